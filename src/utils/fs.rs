//! Atomic file replacement
//!
//! Content is written to a sibling temporary file and renamed over the
//! target, so readers only ever see the old or the new file in full.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.{}.{nonce}.tmp", std::process::id()))
}

/// Write `contents` to `target` via temp file + rename
pub async fn write_atomic(target: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = temp_path_for(target);
    if let Err(e) = fs::write(&temp_path, contents).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&temp_path, target).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    debug!("Atomic write: {} ({} bytes)", target.display(), contents.len());
    Ok(())
}
