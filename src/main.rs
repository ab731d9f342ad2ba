mod cli;
mod config;
mod dispatch;
mod dns;
mod inflight;
mod output;
mod pacer;
mod script;
mod stats;
mod transport;
mod worker;

use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use chrono::Local;
use clap::Parser;
use hickory_proto::rr::DNSClass;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::{RunConfig, ScriptInput, DEFAULT_MAX_OUTSTANDING};
use crate::stats::WorkerStats;

fn main() -> Result<()> {
	let cli = Cli::parse();

	// Diagnostics go to stderr; stdout carries only the report.
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
		.with_writer(std::io::stderr)
		.init();

	let config = Arc::new(build_config(&cli)?);

	println!("[Status] Processing input data");
	println!(
		"[Status] Sending queries to {} over {}, port {}",
		config.server.ip(),
		config.protocol,
		config.server.port(),
	);

	let started = Local::now();
	let begun = Instant::now();
	let reports = worker::run_pool(Arc::clone(&config))?;
	let wall = begun.elapsed();
	let finished = Local::now();
	println!("[Status] Testing complete");

	if cli.print_args {
		let invocation: Vec<String> = std::env::args().collect();
		println!("[Status] Arguments: {}", invocation.join(" "));
	}

	let mut merged = WorkerStats::new(config.histogram_nbuckets, config.histogram_time_secs);
	for report in &reports {
		merged.merge(&report.stats);
	}

	output::print_report(&reports, &merged, wall, started, finished, cli.count_rcodes);

	if let Some(path) = &cli.output {
		output::write_csv(path, &merged)?;
	}

	Ok(())
}

/// Validate the command line and freeze it into the run configuration.
/// Anything wrong here aborts before a single worker starts.
fn build_config(cli: &Cli) -> Result<RunConfig> {
	let default_class = DNSClass::from_str(&cli.qclass.to_ascii_uppercase())
		.map_err(|_| anyhow!("unrecognized query class '{}'", cli.qclass))?;

	if cli.histogram_time == 0 {
		bail!("-T must be greater than 0");
	}
	if cli.workers == 0 {
		bail!("-n must be at least 1");
	}
	if cli.timeout == 0 {
		bail!("-t must be greater than 0");
	}
	if cli.output.is_some() && cli.histogram_buckets == 0 {
		bail!("-o needs a histogram; set -H greater than 0");
	}

	let input = match (&cli.datafile, &cli.query_text) {
		(Some(_), Some(_)) => bail!("-d and -q cannot be specified at the same time"),
		(Some(path), None) if path == "-" => ScriptInput::Stdin,
		(Some(path), None) => ScriptInput::File(PathBuf::from(path)),
		(None, Some(text)) => ScriptInput::Inline(text.clone()),
		(None, None) => ScriptInput::Stdin,
	};
	if cli.workers > 1 && matches!(input, ScriptInput::Stdin) {
		bail!("stdin can be used as input only with 1 worker");
	}

	if !cli.edns && cli.dnssec {
		warn!("EDNS is disabled but DNSSEC is enabled; EDNS will still be included");
	}

	let server = (cli.server.as_str(), cli.port)
		.to_socket_addrs()
		.map_err(|e| anyhow!("failed to resolve server '{}': {}", cli.server, e))?
		.next()
		.ok_or_else(|| anyhow!("server '{}' resolved to no addresses", cli.server))?;

	// Integer division: the remainder of the global rate is dropped rather
	// than redistributed across workers.
	let per_worker_qps = cli.qps / cli.workers as u32;
	if cli.qps > 0 && per_worker_qps == 0 {
		warn!(
			"rate cap {} is below the worker count; workers will run unlimited",
			cli.qps
		);
	}

	Ok(RunConfig {
		server,
		protocol: cli.protocol,
		duration: Duration::from_secs(cli.limit),
		query_timeout: Duration::from_secs(cli.timeout),
		per_worker_qps,
		workers: cli.workers,
		default_class,
		edns: cli.edns,
		dnssec_ok: cli.dnssec,
		max_outstanding: DEFAULT_MAX_OUTSTANDING,
		histogram_nbuckets: cli.histogram_buckets,
		histogram_time_secs: cli.histogram_time,
		input,
		preload: cli.preload,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::Protocol;

	fn parse(args: &[&str]) -> Cli {
		let mut full = vec!["dnsblast"];
		full.extend_from_slice(args);
		Cli::parse_from(full)
	}

	#[test]
	fn test_config_defaults() {
		let config = build_config(&parse(&[])).unwrap();
		assert_eq!(config.server, "127.0.0.1:53".parse().unwrap());
		assert_eq!(config.protocol, Protocol::Udp);
		assert_eq!(config.duration, Duration::from_secs(30));
		assert_eq!(config.query_timeout, Duration::from_secs(5));
		assert_eq!(config.per_worker_qps, 0);
		assert_eq!(config.default_class, DNSClass::IN);
		assert!(matches!(config.input, ScriptInput::Stdin));
	}

	#[test]
	fn test_rate_split_drops_remainder() {
		let config = build_config(&parse(&["-n", "3", "-Q", "100", "-q", "a.test"])).unwrap();
		assert_eq!(config.per_worker_qps, 33);
	}

	#[test]
	fn test_stdin_forbidden_with_multiple_workers() {
		assert!(build_config(&parse(&["-n", "2"])).is_err());
		assert!(build_config(&parse(&["-n", "2", "-d", "-"])).is_err());
		assert!(build_config(&parse(&["-n", "2", "-q", "a.test"])).is_ok());
	}

	#[test]
	fn test_bad_class_rejected() {
		assert!(build_config(&parse(&["-C", "BOGUS"])).is_err());
	}

	#[test]
	fn test_zero_histogram_window_rejected() {
		assert!(build_config(&parse(&["-T", "0"])).is_err());
	}

	#[test]
	fn test_csv_needs_histogram() {
		assert!(build_config(&parse(&["-o", "out.csv", "-H", "0"])).is_err());
	}

	#[test]
	fn test_explicit_port_and_server() {
		let config = build_config(&parse(&["-s", "127.0.0.1", "-p", "5300"])).unwrap();
		assert_eq!(config.server, "127.0.0.1:5300".parse().unwrap());
	}
}
