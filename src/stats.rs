use std::time::Duration;

/// Number of base response codes tracked (the 4-bit header field).
pub const MAX_RCODE: usize = 16;

/// Success/failure partition used for histogram colouring.
pub const CATEGORY_COUNT: usize = 2;
pub const CATEGORY_SUCCESS: usize = 0;
pub const CATEGORY_FAILURE: usize = 1;

/// One histogram bin, split by response category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bucket {
	pub categories: [u64; CATEGORY_COUNT],
}

/// Latency histogram: `nbuckets` equal-width bins over `[0, window_secs)`
/// plus one overflow bin for everything at or past the window.
///
/// A bucket count of 0 disables the histogram entirely; `record` becomes a
/// no-op and `buckets` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
	nbuckets: usize,
	window_secs: u64,
	buckets: Vec<Bucket>,
}

impl Histogram {
	pub fn new(nbuckets: usize, window_secs: u64) -> Histogram {
		let buckets = if nbuckets == 0 {
			Vec::new()
		} else {
			vec![Bucket::default(); nbuckets + 1]
		};
		Histogram {
			nbuckets,
			window_secs,
			buckets,
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.nbuckets > 0
	}

	pub fn nbuckets(&self) -> usize {
		self.nbuckets
	}

	pub fn window_secs(&self) -> u64 {
		self.window_secs
	}

	pub fn buckets(&self) -> &[Bucket] {
		&self.buckets
	}

	/// Count one response latency.
	///
	/// Args:
	///   latency_secs: Round-trip time in seconds.
	///   category: CATEGORY_SUCCESS or CATEGORY_FAILURE.
	pub fn record(&mut self, latency_secs: f64, category: usize) {
		if self.nbuckets == 0 {
			return;
		}
		let scaled = latency_secs * self.nbuckets as f64 / self.window_secs as f64;
		let index = (scaled.floor() as usize).min(self.nbuckets);
		self.buckets[index].categories[category] += 1;
	}

	/// Elementwise bucket sum; both sides must share a shape.
	pub fn merge(&mut self, other: &Histogram) {
		debug_assert_eq!(self.nbuckets, other.nbuckets);
		debug_assert_eq!(self.window_secs, other.window_secs);
		for (mine, theirs) in self.buckets.iter_mut().zip(&other.buckets) {
			for category in 0..CATEGORY_COUNT {
				mine.categories[category] += theirs.categories[category];
			}
		}
	}

	/// Total responses recorded across all buckets and categories.
	pub fn total(&self) -> u64 {
		self.buckets
			.iter()
			.map(|bucket| bucket.categories.iter().sum::<u64>())
			.sum()
	}
}

/// Statistics one worker accumulates over its run.
///
/// Merging is commutative and associative: counters sum, min takes min,
/// max takes max, histogram buckets sum elementwise. A merged value is
/// therefore independent of worker join order.
#[derive(Debug, Clone)]
pub struct WorkerStats {
	pub queries_sent: u64,
	pub queries_completed: u64,
	pub rcodes: [u64; MAX_RCODE],
	pub latency_sum: f64,
	pub latency_min: f64,
	pub latency_max: f64,
	pub histogram: Histogram,
	pub elapsed: Duration,
}

impl WorkerStats {
	pub fn new(histogram_nbuckets: usize, histogram_time_secs: u64) -> WorkerStats {
		WorkerStats {
			queries_sent: 0,
			queries_completed: 0,
			rcodes: [0; MAX_RCODE],
			latency_sum: 0.0,
			latency_min: f64::INFINITY,
			latency_max: 0.0,
			histogram: Histogram::new(histogram_nbuckets, histogram_time_secs),
			elapsed: Duration::ZERO,
		}
	}

	pub fn record_sent(&mut self) {
		self.queries_sent += 1;
	}

	pub fn record_response(&mut self, rcode: usize, success: bool, latency_secs: f64) {
		self.queries_completed += 1;
		if rcode < MAX_RCODE {
			self.rcodes[rcode] += 1;
		}
		self.latency_sum += latency_secs;
		if latency_secs < self.latency_min {
			self.latency_min = latency_secs;
		}
		if latency_secs > self.latency_max {
			self.latency_max = latency_secs;
		}
		let category = if success {
			CATEGORY_SUCCESS
		} else {
			CATEGORY_FAILURE
		};
		self.histogram.record(latency_secs, category);
	}

	pub fn merge(&mut self, other: &WorkerStats) {
		self.queries_sent += other.queries_sent;
		self.queries_completed += other.queries_completed;
		for (mine, theirs) in self.rcodes.iter_mut().zip(&other.rcodes) {
			*mine += theirs;
		}
		self.latency_sum += other.latency_sum;
		self.latency_min = self.latency_min.min(other.latency_min);
		self.latency_max = self.latency_max.max(other.latency_max);
		self.histogram.merge(&other.histogram);
		self.elapsed = self.elapsed.max(other.elapsed);
	}

	/// Completed-query throughput over this worker's own run time.
	pub fn qps(&self) -> f64 {
		let seconds = self.elapsed.as_secs_f64();
		if seconds > 0.0 {
			self.queries_completed as f64 / seconds
		} else {
			0.0
		}
	}

	pub fn average_latency(&self) -> Option<f64> {
		if self.queries_completed > 0 {
			Some(self.latency_sum / self.queries_completed as f64)
		} else {
			None
		}
	}
}
