use std::io;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType;
use tracing::{debug, trace};

use crate::config::{Protocol, RunConfig};
use crate::dns;
use crate::inflight::{InFlightTable, Outstanding, QueryKey};
use crate::pacer::Pacer;
use crate::script::QuerySource;
use crate::stats::WorkerStats;
use crate::transport::{TcpTransport, Transport, TransportEvent, UdpTransport};

/// What a worker hands back on join: its statistics, complete or partial,
/// and the error that stopped it early if one did.
pub struct WorkerReport {
	pub stats: WorkerStats,
	pub error: Option<anyhow::Error>,
}

/// A query built and ready to go, parked when the socket pushes back so
/// wire order still follows script order.
struct PendingQuery {
	xid: u16,
	qtype: RecordType,
	bytes: Vec<u8>,
}

/// The per-worker core loop.
///
/// Owns one query source, one transport, the in-flight table, the pacer,
/// and this worker's statistics. `run` sends paced queries until the test
/// duration elapses, then drains outstanding queries for at most one query
/// timeout before finalising.
pub struct Dispatcher {
	config: Arc<RunConfig>,
	source: QuerySource,
	transport: Transport,
	table: InFlightTable,
	pacer: Pacer,
	stats: WorkerStats,
	pending: Option<PendingQuery>,
}

impl Dispatcher {
	pub async fn new(config: Arc<RunConfig>) -> Result<Dispatcher> {
		let source = QuerySource::open(&config.input, config.default_class, config.preload)?;
		let transport = match config.protocol {
			Protocol::Udp => Transport::Udp(UdpTransport::connect(config.server).await?),
			Protocol::Tcp => Transport::Tcp(TcpTransport::new(
				config.server,
				config.query_timeout,
				config.max_outstanding,
			)),
		};
		let table = InFlightTable::new(config.max_outstanding);
		let pacer = Pacer::new(config.per_worker_qps);
		let stats = WorkerStats::new(config.histogram_nbuckets, config.histogram_time_secs);
		Ok(Dispatcher {
			config,
			source,
			transport,
			table,
			pacer,
			stats,
			pending: None,
		})
	}

	/// Drive the loop to completion and hand back the statistics, partial
	/// if the worker failed mid-run.
	pub async fn run(mut self) -> WorkerReport {
		let begun = Instant::now();
		let error = self.drive(begun).await.err();
		self.stats.elapsed = begun.elapsed();
		WorkerReport {
			stats: self.stats,
			error,
		}
	}

	async fn drive(&mut self, start: Instant) -> Result<()> {
		self.pacer.restart(start);
		let end_deadline = start + self.config.duration;
		let drain_deadline = end_deadline + self.config.query_timeout;

		loop {
			let now = Instant::now();
			let draining = now >= end_deadline;
			if draining && self.table.is_empty() {
				break;
			}
			if now >= drain_deadline {
				break;
			}

			// Responses win ties: the biased select polls the transport
			// before it concedes to the deadline sleep.
			let wake = self.next_wake(now, draining, end_deadline, drain_deadline);
			let event = tokio::select! {
				biased;
				event = self.transport.next_event() => Some(event),
				() = tokio::time::sleep_until(tokio::time::Instant::from_std(wake)) => None,
			};
			if let Some(event) = event {
				self.on_event(event);
			}

			if Instant::now() < end_deadline {
				self.pump_sends(end_deadline)?;
			}
			self.sweep(Instant::now());
		}
		Ok(())
	}

	/// The next instant anything becomes actionable: the end of the run,
	/// the oldest in-flight timeout, and (while still sending) the pacer.
	fn next_wake(
		&self,
		now: Instant,
		draining: bool,
		end_deadline: Instant,
		drain_deadline: Instant,
	) -> Instant {
		let mut wake = if draining { drain_deadline } else { end_deadline };
		if let Some(deadline) = self.table.oldest_deadline(self.config.query_timeout) {
			wake = wake.min(deadline);
		}
		if !draining && !self.table.is_full() {
			match self.pacer.next_deadline() {
				Some(deadline) => wake = wake.min(deadline),
				None => wake = now,
			}
		}
		wake
	}

	fn on_event(&mut self, event: io::Result<TransportEvent>) {
		let event = match event {
			Ok(event) => event,
			Err(e) => {
				// ICMP-surfaced errors on the connected UDP socket land
				// here; the query stays in flight for the timeout sweep.
				debug!("receive error ignored: {}", e);
				return;
			}
		};
		match event {
			TransportEvent::Datagram(bytes) => match dns::parse_response(&bytes) {
				Ok(response) => match self.table.remove(&QueryKey::Udp(response.xid)) {
					Some(entry) => self.complete(&entry, response.rcode),
					None => trace!("response with unknown xid {} dropped", response.xid),
				},
				Err(e) => debug!("unparseable response dropped: {}", e),
			},
			TransportEvent::TcpDone { id, result } => {
				let Some(entry) = self.table.remove(&QueryKey::Tcp(id)) else {
					return; // already swept
				};
				match result {
					Ok(bytes) => match dns::parse_response(&bytes) {
						Ok(response) => self.complete(&entry, response.rcode),
						Err(e) => debug!("unparseable response dropped: {}", e),
					},
					Err(e) => debug!("tcp query for xid {} failed: {}", entry.xid, e),
				}
			}
		}
	}

	fn complete(&mut self, entry: &Outstanding, rcode: ResponseCode) {
		let latency = entry.sent_at.elapsed().as_secs_f64();
		trace!("{} query xid {} completed in {:.6}s", entry.qtype, entry.xid, latency);
		self.stats
			.record_response(rcode.low() as usize, dns::is_success(rcode), latency);
	}

	/// Send as much as the pacer, the in-flight bound, and the end of the
	/// run allow; stalls are caught up in bursts.
	fn pump_sends(&mut self, end_deadline: Instant) -> Result<()> {
		loop {
			let now = Instant::now();
			if now >= end_deadline || self.table.is_full() || !self.pacer.due(now) {
				return Ok(());
			}
			match self.config.protocol {
				Protocol::Udp => {
					if !self.send_udp()? {
						return Ok(());
					}
				}
				Protocol::Tcp => self.send_tcp()?,
			}
		}
	}

	/// Returns false when the socket would block; the built query stays
	/// parked for the next pass.
	fn send_udp(&mut self) -> Result<bool> {
		let pending = match self.pending.take() {
			Some(pending) => pending,
			None => self.build_next()?,
		};
		let Transport::Udp(udp) = &self.transport else {
			unreachable!("udp send on tcp transport");
		};
		match udp.try_send(&pending.bytes) {
			Ok(()) => {
				self.table.insert(
					QueryKey::Udp(pending.xid),
					Outstanding {
						xid: pending.xid,
						qtype: pending.qtype,
						sent_at: Instant::now(),
					},
				);
				self.stats.record_sent();
				self.pacer.record_send();
				Ok(true)
			}
			Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
				self.pending = Some(pending);
				Ok(false)
			}
			Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
				// An earlier datagram bounced and the refusal was queued
				// against the socket; the failed call consumed it, so the
				// parked query goes out on the retry.
				debug!("send saw connection refused, retrying");
				self.pending = Some(pending);
				Ok(true)
			}
			Err(e) => Err(anyhow!("failed to send query: {}", e)),
		}
	}

	fn send_tcp(&mut self) -> Result<()> {
		let query = self.build_next()?;
		let Transport::Tcp(tcp) = &mut self.transport else {
			unreachable!("tcp send on udp transport");
		};
		let id = tcp.send(query.bytes);
		self.table.insert(
			QueryKey::Tcp(id),
			Outstanding {
				xid: query.xid,
				qtype: query.qtype,
				sent_at: Instant::now(),
			},
		);
		self.stats.record_sent();
		self.pacer.record_send();
		Ok(())
	}

	/// Pull the next record and build its wire form, with a transaction ID
	/// unique among this worker's outstanding UDP queries. The ID space is
	/// 65536 against at most `max_outstanding` holders, so rejection
	/// sampling terminates quickly.
	fn build_next(&mut self) -> Result<PendingQuery> {
		let record = self.source.next()?;
		let xid = loop {
			let candidate: u16 = rand::random();
			if !self.table.contains(&QueryKey::Udp(candidate)) {
				break candidate;
			}
		};
		let bytes = dns::build_query(&record, xid, self.config.edns, self.config.dnssec_ok)?;
		Ok(PendingQuery {
			xid,
			qtype: record.qtype,
			bytes,
		})
	}

	fn sweep(&mut self, now: Instant) {
		let swept = self
			.table
			.sweep_expired(now, self.config.query_timeout);
		if swept > 0 {
			debug!("{} queries timed out, {} still in flight", swept, self.table.len());
		}
	}
}
