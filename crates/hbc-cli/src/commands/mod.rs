//! CLI command implementations.

pub mod info;
pub mod patch;
pub mod rewrite;
pub mod verify;

use std::path::Path;

use anyhow::{Context, Result};
use hbc_bytecode::{Module, ParseOptions, parse_async};

/// Stream a bytecode file from disk into a module
pub async fn load_module(path: &Path, verify_hash: bool) -> Result<Module> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let options = ParseOptions {
        verify_hash,
        ..ParseOptions::default()
    };
    let module = parse_async(file, &options)
        .await
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    tracing::debug!(
        path = %path.display(),
        functions = module.functions.len(),
        strings = module.strings.len(),
        "loaded module"
    );
    Ok(module)
}

/// Write bytes, creating parent directories as needed
pub async fn save(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
