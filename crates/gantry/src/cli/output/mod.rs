//! Output formatting utilities

use std::time::Duration;

use console::{style, Style};

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Style for task IDs
pub fn task_style() -> Style {
    Style::new().bold()
}

/// Style for digests
pub fn digest_style() -> Style {
    Style::new().dim()
}

/// Seconds with one decimal, e.g. `3.2s`
pub fn seconds(duration: Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

/// First 12 characters of a digest's checksum
pub fn short_digest(digest: &str) -> &str {
    let sum = digest.split_once(':').map_or(digest, |(_, sum)| sum);
    &sum[..sum.len().min(12)]
}
