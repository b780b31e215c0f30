//! Progress reporting helpers.
//!
//! Interactive runs get indicatif bars and spinners; in log-only mode the
//! bars are hidden and phases emit periodic stderr lines instead, which keeps
//! redirected output tail-friendly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Global flag for log-only mode (set from args in main).
pub static LOG_ONLY: AtomicBool = AtomicBool::new(false);

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// Human-readable duration for summary lines.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

/// Progress bar with consistent styling, hidden in log-only mode.
pub fn create_progress_bar(len: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA {eta})")
                .unwrap()
                .progress_chars("#> "),
        );
    }
    pb.set_message(msg.to_string());
    pb
}

/// Periodic stderr progress line for tail-friendly output. Only emits in
/// log-only mode, at the interval and at completion.
pub fn log_progress(phase: &str, current: u64, total: u64, interval: u64) {
    if is_log_only() && (current % interval == 0 || current == total) {
        let pct = 100.0 * current as f64 / total.max(1) as f64;
        eprintln!("[{}] {}/{} ({:.1}%)", phase, current, total, pct);
    }
}

/// Spinner for indeterminate phases, hidden in log-only mode.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {msg} [{elapsed}]")
                .unwrap(),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb.set_message(msg.to_string());
    pb
}
