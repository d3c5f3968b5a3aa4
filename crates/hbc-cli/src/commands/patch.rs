//! Patch command - apply JSON patch definitions to a bytecode file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use hbc_bytecode::{verify_roundtrip, write_module};
use hbc_patch::{PatchAction, PatchDef, PatchOutcome, PatchSession, run_patches};

use super::{load_module, save};
use crate::config::Config;

#[derive(Args)]
pub struct PatchCommand {
    /// Input bytecode file
    pub input: PathBuf,

    /// Output path
    pub output: PathBuf,

    /// JSON patch definition files, applied after those from hbc.toml
    #[arg(long = "defs")]
    pub defs: Vec<PathBuf>,

    /// Skip re-parsing the patched output
    #[arg(long)]
    pub no_verify: bool,
}

impl PatchCommand {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let paths: Vec<PathBuf> = config.patch_defs().into_iter().chain(self.defs.iter().cloned()).collect();
        if paths.is_empty() {
            anyhow::bail!(
                "No patch definitions given.\n\
                 Pass --defs <file.json> or list them under [patch] defs in hbc.toml."
            );
        }

        let mut defs = Vec::new();
        for path in &paths {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let loaded = PatchDef::from_json(&text)
                .with_context(|| format!("Failed to parse patch definitions in {}", path.display()))?;
            tracing::debug!(path = %path.display(), count = loaded.len(), "loaded patch definitions");
            defs.extend(loaded);
        }

        let module = load_module(&self.input, false).await?;
        let mut session = PatchSession::new(module);
        let outcomes = run_patches(&mut session, &defs);
        print_outcomes(&defs, &outcomes, 0);

        let dirty = session.dirty_functions().count();
        let created = session.created_functions().len();
        let bytes = write_module(&session.commit())?;
        if config.patch.verify_roundtrip && !self.no_verify {
            verify_roundtrip(&bytes).context("Patched output does not round-trip")?;
        }
        save(&self.output, &bytes).await?;

        let applied = outcomes.iter().filter(|o| o.is_applied()).count();
        println!(
            "Applied {} of {} patches ({} functions edited, {} created), wrote {}",
            applied,
            defs.len(),
            dirty,
            created,
            self.output.display()
        );
        Ok(())
    }
}

fn label(index: usize, def: &PatchDef) -> String {
    match (&def.identifier, def.strings.first()) {
        (Some(name), _) => format!("#{index} {name}"),
        (None, Some(text)) => format!("#{index} {text:?}"),
        (None, None) => format!("#{index}"),
    }
}

fn print_outcomes(defs: &[PatchDef], outcomes: &[PatchOutcome], depth: usize) {
    for (index, (def, outcome)) in defs.iter().zip(outcomes).enumerate() {
        println!("{:indent$}{}: {}", "", label(index, def), outcome, indent = depth * 2);
        if let PatchAction::Patches(nested) = &def.action {
            print_outcomes(nested, outcome.nested(), depth + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        let defs = PatchDef::from_json(r#"[{ "identifier": "a", "replace": [] }, { "strings": ["b"], "replace": [] }]"#)
            .unwrap();
        assert_eq!(label(0, &defs[0]), "#0 a");
        assert_eq!(label(1, &defs[1]), "#1 \"b\"");
    }
}
