use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use hickory_proto::rr::DNSClass;

pub const DEFAULT_SERVER: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 53;
pub const DEFAULT_DURATION_SECS: u64 = 30;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_BUCKETS: usize = 200;
pub const DEFAULT_HISTOGRAM_TIME_SECS: u64 = 1;

/// Upper bound on concurrently outstanding queries per worker.
pub const DEFAULT_MAX_OUTSTANDING: usize = 64;

/// Transport used to carry queries to the target server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Protocol {
	Udp,
	Tcp,
}

impl fmt::Display for Protocol {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Protocol::Udp => write!(f, "udp"),
			Protocol::Tcp => write!(f, "tcp"),
		}
	}
}

/// Where the query script comes from.
#[derive(Debug, Clone)]
pub enum ScriptInput {
	Stdin,
	File(PathBuf),
	Inline(String),
}

/// Immutable run configuration handed to every worker.
///
/// Built once in main after validation; workers share it read-only and
/// derive all per-worker state from it.
#[derive(Debug, Clone)]
pub struct RunConfig {
	pub server: SocketAddr,
	pub protocol: Protocol,
	pub duration: Duration,
	pub query_timeout: Duration,
	/// Per-worker send rate; 0 means unlimited.
	pub per_worker_qps: u32,
	pub workers: usize,
	pub default_class: DNSClass,
	pub edns: bool,
	pub dnssec_ok: bool,
	pub max_outstanding: usize,
	/// Latency histogram bucket count; 0 disables the histogram.
	pub histogram_nbuckets: usize,
	pub histogram_time_secs: u64,
	pub input: ScriptInput,
	pub preload: bool,
}
