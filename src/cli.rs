use clap::Parser;

use crate::config::{
	Protocol, DEFAULT_BUCKETS, DEFAULT_DURATION_SECS, DEFAULT_HISTOGRAM_TIME_SECS, DEFAULT_PORT,
	DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_SERVER,
};

fn parse_on_off(value: &str) -> Result<bool, String> {
	match value {
		"on" => Ok(true),
		"off" => Ok(false),
		_ => Err(format!("must be 'on' or 'off', got '{}'", value)),
	}
}

/// DNS query load generator and latency profiler
#[derive(Parser, Debug)]
#[command(name = "dnsblast")]
#[command(about = "Drive a DNS server with scripted queries and profile response latency")]
pub struct Cli {
	/// Default query class for script records that omit one
	#[arg(short = 'C', value_name = "qclass", default_value = "IN")]
	pub qclass: String,

	/// Query script file ('-' reads stdin)
	#[arg(short = 'd', value_name = "file", conflicts_with = "query_text")]
	pub datafile: Option<String>,

	/// Set the EDNS DO bit on outgoing queries
	#[arg(
		short = 'D',
		value_name = "on|off",
		value_parser = parse_on_off,
		action = clap::ArgAction::Set,
		default_value = "on"
	)]
	pub dnssec: bool,

	/// Include an EDNS0 OPT record in outgoing queries
	#[arg(
		short = 'e',
		value_name = "on|off",
		value_parser = parse_on_off,
		action = clap::ArgAction::Set,
		default_value = "on"
	)]
	pub edns: bool,

	/// Echo the invocation in the output
	#[arg(short = 'A')]
	pub print_args: bool,

	/// Test duration in seconds
	#[arg(short = 'l', value_name = "seconds", default_value_t = DEFAULT_DURATION_SECS)]
	pub limit: u64,

	/// Preload the query script into memory before starting
	#[arg(short = 'L')]
	pub preload: bool,

	/// Number of worker threads
	#[arg(short = 'n', value_name = "workers", default_value_t = 1)]
	pub workers: usize,

	/// Target port
	#[arg(short = 'p', value_name = "port", default_value_t = DEFAULT_PORT)]
	pub port: u16,

	/// Transport protocol
	#[arg(short = 'P', value_enum, value_name = "udp|tcp", default_value = "udp")]
	pub protocol: Protocol,

	/// Inline newline-separated query script
	#[arg(short = 'q', value_name = "queries")]
	pub query_text: Option<String>,

	/// Global rate cap in queries per second (0 = unlimited)
	#[arg(short = 'Q', value_name = "qps", default_value_t = 0)]
	pub qps: u32,

	/// Target server address
	#[arg(short = 's', value_name = "host", default_value = DEFAULT_SERVER)]
	pub server: String,

	/// Include per-rcode response counts in the report
	#[arg(short = 'c')]
	pub count_rcodes: bool,

	/// Per-query timeout in seconds
	#[arg(short = 't', value_name = "seconds", default_value_t = DEFAULT_QUERY_TIMEOUT_SECS)]
	pub timeout: u64,

	/// Latency histogram bucket count (0 disables the histogram)
	#[arg(short = 'H', value_name = "buckets", default_value_t = DEFAULT_BUCKETS)]
	pub histogram_buckets: usize,

	/// Latency histogram window in seconds
	#[arg(short = 'T', value_name = "seconds", default_value_t = DEFAULT_HISTOGRAM_TIME_SECS)]
	pub histogram_time: u64,

	/// Write the merged latency distribution to a CSV file
	#[arg(short = 'o', value_name = "file")]
	pub output: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::CommandFactory;

	#[test]
	fn test_cli_definition_is_consistent() {
		Cli::command().debug_assert();
	}

	#[test]
	fn test_defaults() {
		let cli = Cli::parse_from(["dnsblast"]);
		assert_eq!(cli.qclass, "IN");
		assert!(cli.dnssec);
		assert!(cli.edns);
		assert_eq!(cli.limit, 30);
		assert_eq!(cli.workers, 1);
		assert_eq!(cli.port, 53);
		assert_eq!(cli.protocol, Protocol::Udp);
		assert_eq!(cli.qps, 0);
		assert_eq!(cli.server, "127.0.0.1");
		assert_eq!(cli.timeout, 5);
		assert_eq!(cli.histogram_buckets, 200);
		assert_eq!(cli.histogram_time, 1);
	}

	#[test]
	fn test_on_off_flags() {
		let cli = Cli::parse_from(["dnsblast", "-D", "off", "-e", "off"]);
		assert!(!cli.dnssec);
		assert!(!cli.edns);
		assert!(Cli::try_parse_from(["dnsblast", "-D", "maybe"]).is_err());
	}

	#[test]
	fn test_datafile_conflicts_with_inline() {
		let result = Cli::try_parse_from(["dnsblast", "-d", "queries.txt", "-q", "example.com A"]);
		assert!(result.is_err());
	}

	#[test]
	fn test_tcp_protocol() {
		let cli = Cli::parse_from(["dnsblast", "-P", "tcp"]);
		assert_eq!(cli.protocol, Protocol::Tcp);
	}
}
