use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};
use tracing::warn;

use crate::config::RunConfig;
use crate::dispatch::{Dispatcher, WorkerReport};
use crate::stats::WorkerStats;

/// Spawn one dispatcher per worker thread, wait for them all, and collect
/// their reports in spawn order.
///
/// Workers share nothing but the read-only configuration; each one owns
/// its dispatcher exclusively and returns its statistics by value on join.
/// A worker failure becomes a report error, not a pool failure, so the
/// final report still reflects the partial work.
pub fn run_pool(config: Arc<RunConfig>) -> Result<Vec<WorkerReport>> {
	let mut handles = Vec::with_capacity(config.workers);
	for index in 0..config.workers {
		let config = Arc::clone(&config);
		let handle = thread::Builder::new()
			.name(format!("worker-{}", index))
			.spawn(move || worker_main(config))
			.map_err(|e| anyhow!("failed to spawn worker thread: {}", e))?;
		handles.push(handle);
	}

	let mut reports = Vec::with_capacity(handles.len());
	for (index, handle) in handles.into_iter().enumerate() {
		match handle.join() {
			Ok(report) => {
				if let Some(error) = &report.error {
					warn!("worker {} failed: {:#}", index, error);
				}
				reports.push(report);
			}
			Err(_) => warn!("worker {} panicked", index),
		}
	}
	Ok(reports)
}

/// Each worker runs its dispatcher on a current-thread runtime: one OS
/// thread, one cooperative loop, no cross-worker state.
fn worker_main(config: Arc<RunConfig>) -> WorkerReport {
	let empty = WorkerStats::new(config.histogram_nbuckets, config.histogram_time_secs);
	let runtime = match tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
	{
		Ok(runtime) => runtime,
		Err(e) => {
			return WorkerReport {
				stats: empty,
				error: Some(anyhow!("failed to build worker runtime: {}", e)),
			}
		}
	};
	runtime.block_on(async {
		match Dispatcher::new(Arc::clone(&config)).await {
			Ok(dispatcher) => dispatcher.run().await,
			Err(e) => WorkerReport {
				stats: empty,
				error: Some(e),
			},
		}
	})
}
