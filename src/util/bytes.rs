//! Utility helpers for representing byte counts and transfer rates in human-readable form.

use std::time::Duration;

/// Format a byte count into IEC units (KiB, MiB, GiB, TiB) with trimmed precision.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    scale(bytes as f64, 1024.0, &UNITS)
}

/// Effective throughput of moving `bytes` in `elapsed`, in SI bit-rate units.
///
/// A zero elapsed time is treated as one millisecond so a cache hit served
/// within the timer resolution still reports a finite rate.
pub fn format_bit_rate(bytes: u64, elapsed: Duration) -> String {
    const UNITS: [&str; 5] = ["bit/s", "kbit/s", "Mbit/s", "Gbit/s", "Tbit/s"];

    let seconds = elapsed.as_secs_f64().max(0.001);
    let bits_per_second = (bytes as f64 * 8.0) / seconds;
    scale(bits_per_second, 1000.0, &UNITS)
}

fn scale(mut value: f64, step: f64, units: &[&str]) -> String {
    let mut unit_index = 0;

    while value >= step && unit_index < units.len() - 1 {
        value /= step;
        unit_index += 1;
    }

    if unit_index == 0 {
        return format!("{} {}", value.round() as u64, units[unit_index]);
    }

    let mut value_str = if value >= 10.0 {
        format!("{value:.1}")
    } else {
        format!("{value:.2}")
    };

    if value_str.contains('.') {
        while value_str.ends_with('0') {
            value_str.pop();
        }
        if value_str.ends_with('.') {
            value_str.pop();
        }
    }

    format!("{value_str} {}", units[unit_index])
}
