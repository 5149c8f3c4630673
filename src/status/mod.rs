//! Printing build progress to the terminal, in the `NINJA_STATUS` format.

mod progressbar;

use crate::timeformat::MinSec;
use ninjin::graph::EdgeId;
use progressbar::ProgressBar;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// The default `NINJA_STATUS` format, matching upstream ninja.
const DEFAULT_STATUS_FORMAT: &str = "[%s/%t] ";

struct Counters {
	started: AtomicUsize,
	finished: AtomicUsize,
	running: AtomicUsize,
	total: AtomicUsize,
}

/// Tracks in-flight edge counts and prints a one-line progress update as
/// edges start and finish, following `NINJA_STATUS`'s placeholder format.
pub struct BuildStatus {
	counters: Counters,
	start_time: Instant,
	format: String,
	last_description: Mutex<Option<String>>,
	quiet: bool,
}

impl BuildStatus {
	pub fn new(total_edges: usize, quiet: bool) -> Self {
		let format = std::env::var("NINJA_STATUS").unwrap_or_else(|_| DEFAULT_STATUS_FORMAT.to_string());
		BuildStatus {
			counters: Counters {
				started: AtomicUsize::new(0),
				finished: AtomicUsize::new(0),
				running: AtomicUsize::new(0),
				total: AtomicUsize::new(total_edges),
			},
			start_time: Instant::now(),
			format,
			last_description: Mutex::new(None),
			quiet,
		}
	}

	pub fn edge_started(&self, _edge: EdgeId) {
		self.counters.started.fetch_add(1, Ordering::SeqCst);
		self.counters.running.fetch_add(1, Ordering::SeqCst);
		self.print_line(None);
	}

	pub fn edge_finished(&self, edge: EdgeId, success: bool) {
		self.counters.finished.fetch_add(1, Ordering::SeqCst);
		self.counters.running.fetch_sub(1, Ordering::SeqCst);
		let label = if success {
			format!("edge {}", edge.0)
		} else {
			format!("FAILED edge {}", edge.0)
		};
		self.print_line(Some(&label));
	}

	fn print_line(&self, description: Option<&str>) {
		if self.quiet {
			return;
		}
		let mut last = self.last_description.lock().unwrap();
		let text = description
			.map(str::to_string)
			.or_else(|| last.clone())
			.unwrap_or_default();
		*last = Some(text.clone());
		drop(last);

		let prefix = self.render_format();
		println!("{}{}", prefix, text);
	}

	fn render_format(&self) -> String {
		let started = self.counters.started.load(Ordering::SeqCst);
		let finished = self.counters.finished.load(Ordering::SeqCst);
		let running = self.counters.running.load(Ordering::SeqCst);
		let total = self.counters.total.load(Ordering::SeqCst);
		let unstarted = total.saturating_sub(started);
		let elapsed = self.start_time.elapsed();
		let elapsed_secs = elapsed.as_secs() as f64 + f64::from(elapsed.subsec_millis()) / 1000.0;
		let overall_rate = if elapsed_secs > 0.0 {
			finished as f64 / elapsed_secs
		} else {
			0.0
		};
		let percent = if total > 0 {
			(finished * 100 / total) as u32
		} else {
			0
		};

		let mut out = String::with_capacity(self.format.len());
		let mut chars = self.format.chars().peekable();
		while let Some(c) = chars.next() {
			if c != '%' {
				out.push(c);
				continue;
			}
			match chars.next() {
				Some('s') => out.push_str(&started.to_string()),
				Some('t') => out.push_str(&total.to_string()),
				Some('r') => out.push_str(&running.to_string()),
				Some('u') => out.push_str(&unstarted.to_string()),
				Some('f') => out.push_str(&finished.to_string()),
				Some('o') => out.push_str(&format!("{:.1}", overall_rate)),
				Some('c') => out.push_str(&format!("{:.1}", overall_rate)),
				Some('p') => out.push_str(&format!("{:3}%", percent)),
				Some('e') => out.push_str(&format!("{}", MinSec::from_duration(elapsed))),
				Some('%') => out.push('%'),
				Some(other) => {
					out.push('%');
					out.push(other);
				}
				None => out.push('%'),
			}
		}
		out
	}

	/// A compact ANSI progress bar, for tools that want a fuller display
	/// than the one-line status (e.g. an interactive `-t browse`-adjacent
	/// view). Not used by the default build output.
	pub fn render_bar(&self, width: usize) -> String {
		let finished = self.counters.finished.load(Ordering::SeqCst);
		let total = self.counters.total.load(Ordering::SeqCst).max(1);
		let progress = finished as f64 / total as f64;
		format!(
			"{}",
			ProgressBar {
				progress,
				width,
				ascii: false,
				label: &format!("{}/{}", finished, total),
			}
		)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn formats_placeholders() {
		std::env::remove_var("NINJA_STATUS");
		let status = BuildStatus::new(4, true);
		status.counters.started.store(2, Ordering::SeqCst);
		status.counters.finished.store(1, Ordering::SeqCst);
		status.counters.running.store(1, Ordering::SeqCst);
		let rendered = status.render_format();
		assert_eq!(rendered, "[2/4] ");
	}
}
