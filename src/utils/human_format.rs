//! Human-readable formatting for sizes and durations in log lines

/// Formats a size in bytes with a binary unit suffix
pub fn format_memory(bytes: f64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0.0 {
        return "0B".to_string();
    }

    let mut size = bytes.abs();
    let mut unit_index = 0;
    while size >= THRESHOLD && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD;
        unit_index += 1;
    }

    let sign = if bytes < 0.0 { "-" } else { "" };
    match unit_index {
        0 => format!("{sign}{size:.0}{}", UNITS[unit_index]),
        _ if size >= 10.0 => format!("{sign}{size:.1}{}", UNITS[unit_index]),
        _ => format!("{sign}{size:.2}{}", UNITS[unit_index]),
    }
}

/// Formats a duration in milliseconds
pub fn format_duration(millis: u64) -> String {
    if millis < 1000 {
        return format!("{millis}ms");
    }
    if millis < 60_000 {
        let seconds = millis as f64 / 1000.0;
        return if seconds >= 10.0 {
            format!("{seconds:.1}s")
        } else {
            format!("{seconds:.2}s")
        };
    }

    let total_seconds = millis / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    match (hours, seconds) {
        (0, 0) => format!("{minutes}m"),
        (0, _) => format!("{minutes}m{seconds}s"),
        (_, 0) if minutes == 0 => format!("{hours}h"),
        (_, 0) => format!("{hours}h{minutes}m"),
        _ => format!("{hours}h{minutes}m{seconds}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, "0B")]
    #[case(512.0, "512B")]
    #[case(1536.0, "1.50KB")]
    #[case(15.0 * 1024.0 * 1024.0, "15.0MB")]
    fn test_format_memory(#[case] bytes: f64, #[case] expected: &str) {
        assert_eq!(format_memory(bytes), expected);
    }

    #[rstest]
    #[case(0, "0ms")]
    #[case(250, "250ms")]
    #[case(1500, "1.50s")]
    #[case(12_300, "12.3s")]
    #[case(120_000, "2m")]
    #[case(125_000, "2m5s")]
    #[case(3_600_000, "1h")]
    #[case(3_660_000, "1h1m")]
    #[case(3_661_000, "1h1m1s")]
    fn test_format_duration(#[case] millis: u64, #[case] expected: &str) {
        assert_eq!(format_duration(millis), expected);
    }
}
