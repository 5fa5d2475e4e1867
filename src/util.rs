use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing_subscriber::{EnvFilter, fmt};

pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

pub fn truncate(input: &str, max_len: usize) -> String {
    if input.chars().count() <= max_len {
        return input.to_string();
    }
    if max_len <= 3 {
        return input.chars().take(max_len).collect();
    }
    let head: String = input.chars().take(max_len - 3).collect();
    format!("{head}...")
}

pub fn format_local_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

pub fn format_optional_time(time: Option<SystemTime>) -> String {
    time.map(format_local_time).unwrap_or_else(|| "-".to_string())
}
