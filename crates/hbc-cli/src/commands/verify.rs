//! Verify command - check that a file survives a parse/write round trip.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use hbc_bytecode::verify_roundtrip;

#[derive(Args)]
pub struct VerifyCommand {
    /// Bytecode files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

impl VerifyCommand {
    pub async fn run(&self) -> Result<()> {
        let mut failed = 0;
        for path in &self.files {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match verify_roundtrip(&bytes) {
                Ok(module) => println!(
                    "ok    {} ({} bytes, {} functions)",
                    path.display(),
                    bytes.len(),
                    module.functions.len()
                ),
                Err(err) => {
                    failed += 1;
                    println!("FAIL  {}: {}", path.display(), err);
                }
            }
        }

        if failed > 0 {
            anyhow::bail!("{} of {} files failed verification", failed, self.files.len());
        }
        Ok(())
    }
}
