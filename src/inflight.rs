use std::collections::HashMap;
use std::time::{Duration, Instant};

use hickory_proto::rr::RecordType;

/// Correlation key for an outstanding query: the DNS transaction ID over
/// UDP, the connection handle over TCP (each connection carries exactly one
/// query, so the xid is not needed to disambiguate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKey {
	Udp(u16),
	Tcp(u64),
}

/// Bookkeeping for one sent-but-unanswered query.
#[derive(Debug)]
pub struct Outstanding {
	pub xid: u16,
	pub qtype: RecordType,
	pub sent_at: Instant,
}

/// Bounded table of in-flight queries.
///
/// Entries leave either by response correlation or by the timeout sweep;
/// the dispatcher checks `is_full` before every send, so the bound holds
/// at all times.
pub struct InFlightTable {
	entries: HashMap<QueryKey, Outstanding>,
	capacity: usize,
}

impl InFlightTable {
	pub fn new(capacity: usize) -> InFlightTable {
		InFlightTable {
			entries: HashMap::with_capacity(capacity),
			capacity,
		}
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn is_full(&self) -> bool {
		self.entries.len() >= self.capacity
	}

	pub fn contains(&self, key: &QueryKey) -> bool {
		self.entries.contains_key(key)
	}

	pub fn insert(&mut self, key: QueryKey, entry: Outstanding) {
		debug_assert!(!self.is_full());
		self.entries.insert(key, entry);
	}

	pub fn remove(&mut self, key: &QueryKey) -> Option<Outstanding> {
		self.entries.remove(key)
	}

	/// Deadline of the longest-outstanding query, None when empty.
	pub fn oldest_deadline(&self, timeout: Duration) -> Option<Instant> {
		self.entries.values().map(|entry| entry.sent_at + timeout).min()
	}

	/// Drop every entry whose timeout has passed, returning how many went.
	pub fn sweep_expired(&mut self, now: Instant, timeout: Duration) -> usize {
		let before = self.entries.len();
		self.entries.retain(|_, entry| entry.sent_at + timeout > now);
		before - self.entries.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(sent_at: Instant) -> Outstanding {
		Outstanding {
			xid: 1,
			qtype: RecordType::A,
			sent_at,
		}
	}

	#[test]
	fn test_insert_remove() {
		let mut table = InFlightTable::new(4);
		let now = Instant::now();
		table.insert(QueryKey::Udp(7), entry(now));
		assert_eq!(table.len(), 1);
		assert!(table.contains(&QueryKey::Udp(7)));
		assert!(!table.contains(&QueryKey::Udp(8)));
		assert!(table.remove(&QueryKey::Udp(7)).is_some());
		assert!(table.remove(&QueryKey::Udp(7)).is_none());
		assert!(table.is_empty());
	}

	#[test]
	fn test_udp_and_tcp_keys_are_distinct() {
		let mut table = InFlightTable::new(4);
		let now = Instant::now();
		table.insert(QueryKey::Udp(5), entry(now));
		table.insert(QueryKey::Tcp(5), entry(now));
		assert_eq!(table.len(), 2);
	}

	#[test]
	fn test_full_bound() {
		let mut table = InFlightTable::new(2);
		let now = Instant::now();
		table.insert(QueryKey::Udp(1), entry(now));
		assert!(!table.is_full());
		table.insert(QueryKey::Udp(2), entry(now));
		assert!(table.is_full());
	}

	#[test]
	fn test_oldest_deadline() {
		let mut table = InFlightTable::new(4);
		let timeout = Duration::from_secs(5);
		assert_eq!(table.oldest_deadline(timeout), None);

		let now = Instant::now();
		table.insert(QueryKey::Udp(1), entry(now + Duration::from_secs(2)));
		table.insert(QueryKey::Udp(2), entry(now));
		table.insert(QueryKey::Udp(3), entry(now + Duration::from_secs(1)));
		assert_eq!(table.oldest_deadline(timeout), Some(now + timeout));
	}

	#[test]
	fn test_sweep_removes_only_expired() {
		let mut table = InFlightTable::new(4);
		let timeout = Duration::from_secs(5);
		let now = Instant::now();
		table.insert(QueryKey::Udp(1), entry(now));
		table.insert(QueryKey::Udp(2), entry(now + Duration::from_secs(3)));

		// Nothing has expired yet.
		assert_eq!(table.sweep_expired(now + Duration::from_secs(1), timeout), 0);
		assert_eq!(table.len(), 2);

		// The first entry expires at now+5, the second at now+8.
		assert_eq!(table.sweep_expired(now + Duration::from_secs(6), timeout), 1);
		assert!(!table.contains(&QueryKey::Udp(1)));
		assert!(table.contains(&QueryKey::Udp(2)));

		assert_eq!(table.sweep_expired(now + Duration::from_secs(9), timeout), 1);
		assert!(table.is_empty());
	}
}
