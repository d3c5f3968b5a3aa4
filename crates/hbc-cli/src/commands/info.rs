//! Info command - summarize a bytecode file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use hbc_bytecode::{FunctionHeader, Header, Module};
use serde::Serialize;

#[derive(Args)]
pub struct InfoCommand {
    /// Bytecode file
    pub file: PathBuf,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// List every function
    #[arg(long)]
    pub functions: bool,
}

#[derive(Serialize)]
struct Report<'m> {
    header: Header,
    bytecode_blobs: usize,
    overflowed_headers: usize,
    functions: Vec<FunctionRow<'m>>,
}

#[derive(Serialize)]
struct FunctionRow<'m> {
    id: u32,
    name: Option<&'m str>,
    bytecode: u32,
    header: FunctionHeader,
}

impl InfoCommand {
    pub async fn run(&self) -> Result<()> {
        let bytes = tokio::fs::read(&self.file)
            .await
            .with_context(|| format!("Failed to read {}", self.file.display()))?;
        let header = Header::parse(&bytes)?;
        let module = Module::parse(bytes)?;
        let report = report(header, &module, self.functions || self.json);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_text(&report, &module);
        }
        Ok(())
    }
}

fn report(header: Header, module: &Module, with_functions: bool) -> Report<'_> {
    let functions = if with_functions {
        module
            .functions
            .iter()
            .enumerate()
            .map(|(id, func)| FunctionRow {
                id: id as u32,
                name: module.function_name(id as u32),
                bytecode: func.bytecode.0,
                header: func.header,
            })
            .collect()
    } else {
        Vec::new()
    };

    Report {
        header,
        bytecode_blobs: module.bytecode.len(),
        overflowed_headers: module.functions.iter().filter(|f| f.header.overflowed).count(),
        functions,
    }
}

fn print_text(report: &Report<'_>, module: &Module) {
    let h = &report.header;
    println!("version        {}", h.version);
    println!("source hash    {}", hex::encode(h.source_hash));
    println!("file length    {}", h.file_length);
    println!(
        "functions      {} ({} overflowed, {} bytecode blobs, global code #{})",
        h.function_count, report.overflowed_headers, report.bytecode_blobs, h.global_code_index
    );
    println!(
        "strings        {} ({} identifiers, {} overflowed, {} bytes)",
        h.string_count, h.identifier_count, h.overflow_string_count, h.string_storage_size
    );
    println!("bigints        {}", h.bigint_count);
    println!("regexps        {}", h.regexp_count);
    println!(
        "literals       {} array / {} key / {} value bytes",
        h.array_buffer_size, h.obj_key_buffer_size, h.obj_value_buffer_size
    );
    println!("cjs modules    {}", h.cjs_module_count);
    match &module.debug_info {
        Some(blob) => println!("debug info     {} bytes at {:#x}", blob.len(), h.debug_info_offset),
        None => println!("debug info     none"),
    }

    for row in &report.functions {
        println!(
            "  #{:<6} {:<32} params={} frame={} size={}",
            row.id,
            row.name.unwrap_or("<invalid>"),
            row.header.param_count,
            row.header.frame_size,
            row.header.bytecode_size_in_bytes
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = include_bytes!("../../../hbc-bytecode/tests/fixtures/sample.hbc");

    #[test]
    fn test_report_serializes() {
        let header = Header::parse(SAMPLE).unwrap();
        let module = Module::parse(SAMPLE).unwrap();
        let report = report(header, &module, true);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["header"]["file_length"], 349);
        assert_eq!(json["functions"][0]["header"]["param_count"], 1);
        assert_eq!(json["bytecode_blobs"], 1);
    }
}
