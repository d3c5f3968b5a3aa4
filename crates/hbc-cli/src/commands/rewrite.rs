//! Rewrite command - parse a file and write it back out.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use hbc_bytecode::{WriteOptions, write_module_with};

use super::{load_module, save};

#[derive(Args)]
pub struct RewriteCommand {
    /// Input bytecode file
    pub input: PathBuf,

    /// Output path
    pub output: PathBuf,

    /// Format version to stamp into the output header
    #[arg(long)]
    pub version: Option<u32>,

    /// Check the input's trailing hash before rewriting
    #[arg(long)]
    pub check_hash: bool,
}

impl RewriteCommand {
    pub async fn run(&self) -> Result<()> {
        let module = load_module(&self.input, self.check_hash).await?;
        let bytes = write_module_with(&module, &WriteOptions { version: self.version })?;
        save(&self.output, &bytes).await?;
        println!("Wrote {} ({} bytes)", self.output.display(), bytes.len());
        Ok(())
    }
}
