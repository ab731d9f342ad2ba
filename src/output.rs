use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use crate::dispatch::WorkerReport;
use crate::stats::{WorkerStats, CATEGORY_FAILURE, CATEGORY_SUCCESS, MAX_RCODE};

/// Header-field names for the 16 base response codes.
const RCODE_NAMES: [&str; MAX_RCODE] = [
	"NOERROR", "FORMERR", "SERVFAIL", "NXDOMAIN", "NOTIMP", "REFUSED",
	"YXDOMAIN", "YXRRSET", "NXRRSET", "NOTAUTH", "NOTZONE", "RESERVED11",
	"RESERVED12", "RESERVED13", "RESERVED14", "RESERVED15",
];

/// Width of the widest histogram bar, in marker characters.
const BAR_WIDTH: u64 = 60;

/// Print the full run summary: per-worker throughput, merged counters,
/// optional rcode distribution, completion percentages, wall-clock frame,
/// and the latency histogram.
pub fn print_report(
	reports: &[WorkerReport],
	merged: &WorkerStats,
	wall: Duration,
	started: DateTime<Local>,
	finished: DateTime<Local>,
	count_rcodes: bool,
) {
	println!("\nStatistics:\n");

	let mut total_qps = 0.0;
	for (index, report) in reports.iter().enumerate() {
		let qps = report.stats.qps();
		total_qps += qps;
		println!("  Queries per second #{}:  {:.6} qps", index, qps);
	}
	if reports.len() > 1 {
		println!("         Summarized QPS:  {:.6} qps", total_qps);
	}
	println!();

	println!("  Queries sent:         {} queries", merged.queries_sent);
	println!("  Queries completed:    {} queries", merged.queries_completed);
	println!();

	if count_rcodes {
		print_rcode_table(merged);
	}

	print!("  Percentage completed: ");
	if merged.queries_sent > 0 {
		let completed = merged.queries_completed as f64 / merged.queries_sent as f64;
		println!("{:6.2}%", completed * 100.0);
	} else {
		println!("N/A");
	}
	print!("  Percentage lost:      ");
	if merged.queries_sent > 0 {
		let lost = (merged.queries_sent - merged.queries_completed) as f64
			/ merged.queries_sent as f64;
		println!("{:6.2}%", lost * 100.0);
	} else {
		println!("N/A");
	}
	println!();

	println!("  Started at:           {}", started.format("%Y-%m-%d %H:%M:%S%.3f"));
	println!("  Finished at:          {}", finished.format("%Y-%m-%d %H:%M:%S%.3f"));
	println!("  Run for:              {:.6} seconds", wall.as_secs_f64());
	println!();

	let overall = if wall.as_secs_f64() > 0.0 {
		merged.queries_completed as f64 / wall.as_secs_f64()
	} else {
		0.0
	};
	println!("  Queries per second:   {:.6} qps", overall);

	print_histogram(merged);
}

fn print_rcode_table(merged: &WorkerStats) {
	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_content_arrangement(ContentArrangement::Dynamic);
	table.set_header(vec!["RCODE", "Responses"]);
	for (code, count) in merged.rcodes.iter().enumerate() {
		if *count != 0 {
			table.add_row(vec![RCODE_NAMES[code].to_string(), count.to_string()]);
		}
	}
	println!("{table}\n");
}

/// Render the latency distribution as per-bucket rows with stacked
/// success/failure bars.
fn print_histogram(merged: &WorkerStats) {
	let histogram = &merged.histogram;
	if !histogram.is_enabled() {
		return;
	}

	println!();
	if let Some(average) = merged.average_latency() {
		println!("Average latency:  {:.6} s", average);
		println!("Fastest response: {:.6} s", merged.latency_min);
		println!("Slowest response: {:.6} s", merged.latency_max);
		println!();
	}

	println!(
		"Response latency distribution (total {} responses):\n",
		merged.queries_completed
	);
	println!("    Latency    Success  %     Fail  % |");

	let max_total = histogram
		.buckets()
		.iter()
		.map(|bucket| bucket.categories.iter().sum::<u64>())
		.max()
		.unwrap_or(0)
		.max(1);

	let nbuckets = histogram.nbuckets();
	let window = histogram.window_secs() as f64;
	let decimals = (nbuckets as f64).log10().floor() as usize;
	for (index, bucket) in histogram.buckets().iter().enumerate() {
		let (op, bound) = if index == nbuckets {
			(">=", window)
		} else {
			("< ", (index + 1) as f64 * window / nbuckets as f64)
		};
		let total: u64 = bucket.categories.iter().sum();
		print!("{}{:9.*}s", op, decimals, bound);
		for category in [CATEGORY_SUCCESS, CATEGORY_FAILURE] {
			let count = bucket.categories[category];
			let percent = if total > 0 { count * 100 / total } else { 0 };
			print!("{:9} {:2} ", count, percent);
		}
		print!("|");
		for (category, marker) in [(CATEGORY_SUCCESS, '#'), (CATEGORY_FAILURE, '-')] {
			let bar = (BAR_WIDTH * bucket.categories[category] / max_total) as usize;
			for _ in 0..bar {
				print!("{}", marker);
			}
		}
		println!();
	}

	println!("\nLegend:\n");
	println!("##### = success responses (RCODE was NOERROR or NXDOMAIN)");
	println!("----- = failure responses (any other RCODE)");
}

/// Write the merged latency distribution to a CSV file, one row per bucket.
/// The overflow row has an empty ceiling.
pub fn write_csv(path: &str, merged: &WorkerStats) -> Result<()> {
	let histogram = &merged.histogram;
	if !histogram.is_enabled() {
		return Err(anyhow!("no latency distribution to export with -H 0"));
	}

	let mut writer = csv::Writer::from_path(path)
		.map_err(|e| anyhow!("failed to open '{}': {}", path, e))?;
	writer.write_record(["bucket_floor_s", "bucket_ceiling_s", "success", "failure"])?;

	let nbuckets = histogram.nbuckets();
	let window = histogram.window_secs() as f64;
	for (index, bucket) in histogram.buckets().iter().enumerate() {
		let floor = index as f64 * window / nbuckets as f64;
		let ceiling = if index == nbuckets {
			String::new()
		} else {
			format!("{:.6}", (index + 1) as f64 * window / nbuckets as f64)
		};
		writer.write_record([
			format!("{:.6}", floor.min(window)),
			ceiling,
			bucket.categories[CATEGORY_SUCCESS].to_string(),
			bucket.categories[CATEGORY_FAILURE].to_string(),
		])?;
	}

	writer.flush()?;
	println!("\nLatency distribution written to: {}", path);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_csv_rows_cover_all_buckets() {
		let mut stats = WorkerStats::new(4, 1);
		stats.record_sent();
		stats.record_response(0, true, 0.1);
		stats.record_sent();
		stats.record_response(2, false, 5.0);

		let path = std::env::temp_dir().join(format!("dnsblast-hist-{}.csv", std::process::id()));
		write_csv(path.to_str().unwrap(), &stats).unwrap();

		let content = std::fs::read_to_string(&path).unwrap();
		let lines: Vec<&str> = content.lines().collect();
		// Header plus 4 buckets plus the overflow row.
		assert_eq!(lines.len(), 6);
		assert!(lines[1].ends_with(",1,0"));
		assert!(lines[5].ends_with(",0,1"));

		std::fs::remove_file(&path).ok();
	}

	#[test]
	fn test_csv_refused_without_histogram() {
		let stats = WorkerStats::new(0, 1);
		assert!(write_csv("/tmp/never-written.csv", &stats).is_err());
	}
}
