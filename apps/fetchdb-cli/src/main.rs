//! Small driver around the fetch phase: loads a directory of JSON
//! documents into the in-memory store, fetches the requested slots and
//! prints the shaped result.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use fetchdb_core::config::Config;
use fetchdb_core::types::{FetchRequest, ShardTarget, SourceSpec, StoredFieldsSpec};
use fetchdb_phase::FetchPhase;
use fetchdb_store::{MemSchema, MemStore};

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().collect();
    let prog = args.remove(0);
    if args.is_empty() {
        eprintln!("Usage: {} fetch <dir> <id,id,...> [--fields a,b] [--no-source] [--profile]", prog);
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

fn build_store(config: &Config, dir: &Path) -> anyhow::Result<MemStore> {
    let segment_size: usize = config.get("store.segment_size").unwrap_or(128);
    let field_names: Vec<String> = config.get("schema.fields").unwrap_or_default();
    let mut schema = MemSchema::new().metadata_field("_id");
    for name in &field_names {
        schema = schema.field(name);
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut builder = MemStore::builder(schema).segment_size(segment_size);
    for path in &files {
        let id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let source: Value =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        builder = builder.push_doc(&id, &source);
    }
    debug!(docs = files.len(), "store loaded");
    Ok(builder.build())
}

fn run_fetch(config: &Config, args: &[String]) -> anyhow::Result<()> {
    let dir = args.first().map(PathBuf::from).context("missing <dir> argument")?;
    let ids: Vec<u32> = args
        .get(1)
        .context("missing doc id list")?
        .split(',')
        .map(|part| part.trim().parse::<u32>().context("doc ids must be numeric"))
        .collect::<anyhow::Result<Vec<u32>>>()?;

    let mut fields: Option<Vec<String>> = None;
    let mut no_source = false;
    let mut profile = false;
    let mut rest = args[2..].iter();
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--fields" => {
                let list = rest.next().context("--fields needs a value")?;
                fields = Some(list.split(',').map(str::to_string).collect());
            }
            "--no-source" => no_source = true,
            "--profile" => profile = true,
            other => anyhow::bail!("unknown flag: {}", other),
        }
    }

    let store = build_store(config, &dir)?;
    let index: String = config.get("shard.index").unwrap_or_else(|_| "docs".to_string());
    let mut request = FetchRequest::new(ShardTarget::new(index, 0), ids);
    if let Some(names) = fields {
        request.stored_fields = Some(StoredFieldsSpec::fields(names));
    }
    if no_source {
        request.source = Some(SourceSpec::disabled());
    }
    request.profile = profile;

    let phase = FetchPhase::new(Vec::new());
    let result = phase.execute(&store, &request)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let config = Config::load()?;
    let (cmd, args) = parse_args();
    match cmd.as_str() {
        "fetch" => run_fetch(&config, &args),
        _ => {
            eprintln!("Unknown command: {}", cmd);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchdb_core::traits::DocStore;

    #[test]
    fn build_store_loads_json_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.json"), r#"{"title": "second"}"#).unwrap();
        fs::write(dir.path().join("a.json"), r#"{"title": "first"}"#).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let config = Config::load().unwrap();
        let store = build_store(&config, dir.path()).unwrap();
        let total: u32 = store.segments().iter().map(|m| m.max_doc).sum();
        assert_eq!(total, 2);
    }
}
