use anyhow::{Result, Context};
use std::path::Path;

/// Read a shared secret from a file, trimming surrounding whitespace
pub fn read_secret(path: &Path) -> Result<String> {
    let contents = std::fs::read_to_string(path)
        .context(format!("Failed to read secret: {}", path.display()))?;

    let secret = contents.trim();
    if secret.is_empty() {
        anyhow::bail!("Secret file is empty: {}", path.display());
    }

    Ok(secret.to_string())
}
