use std::time::Duration;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Size in megabytes with two decimals, e.g. `"2.00"`
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / BYTES_PER_MB)
}

/// Elapsed wall-clock seconds with two decimals, e.g. `"1.27"`
pub fn format_seconds(elapsed: Duration) -> String {
    format!("{:.2}", elapsed.as_secs_f64())
}
