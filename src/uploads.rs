use std::path::{Path, PathBuf};

/// Reduce a client-supplied file name to its last path component.
pub fn safe_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

pub async fn save_upload(dir: &Path, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, bytes).await?;
    tracing::info!("saved upload {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

/// Write `<name><suffix>` next to the upload. Failures are logged only.
pub async fn save_side_file(dir: &Path, name: &str, suffix: &str, text: &str) {
    let path = dir.join(format!("{}{}", name, suffix));
    if let Err(e) = tokio::fs::write(&path, text).await {
        tracing::warn!("could not write {}: {}", path.display(), e);
    }
}
