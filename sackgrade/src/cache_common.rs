use anyhow::Result;
use std::fs;
use std::path::Path;

/// Calculate MD5 hash of bytes
pub fn calculate_md5_bytes(bytes: &[u8]) -> String {
    let mut hasher = md5::Context::new();
    hasher.consume(bytes);
    let result = hasher.finalize();
    format!("{result:x}")
}

/// Get detailed file information for debugging
pub fn get_file_info(path: &Path) -> Result<String> {
    let metadata = fs::metadata(path)?;
    let size = metadata.len();
    let size_mb = size as f64 / (1024.0 * 1024.0);

    Ok(format!(
        "size: {} bytes ({:.2} MB), modified: {:?}",
        size,
        size_mb,
        metadata
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    ))
}
