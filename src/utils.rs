use std::path::PathBuf;

/// Get the snapshot data directory from environment variable or use default
pub fn get_data_dir() -> PathBuf {
    std::env::var("PENNYPULSE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}
