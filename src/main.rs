use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use signdb::{
    InMemoryRenderer, InlineExecutor, ManualRegionOracle, RecordStore, SignConfig, SignContext,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "signdb")]
#[command(about = "Maintenance tooling for a sign data directory")]
struct Cli {
    /// Directory holding config.json and the signs file
    #[arg(long, global = true, default_value = ".")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summary counts
    Stats,
    /// One line per sign
    List {
        #[arg(long)]
        collection: Option<String>,
    },
    /// Verify the derived indices
    Check,
    /// Rebuild indices, repair ids and rewrite the file
    Compact,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("signdb=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Stats => stats(&cli.data_dir),
        Command::List { collection } => list(&cli.data_dir, collection.as_deref()),
        Command::Check => check(&cli.data_dir),
        Command::Compact => compact(&cli.data_dir),
    }
}

fn read_config(data_dir: &Path) -> Result<SignConfig> {
    SignConfig::read(data_dir)
        .with_context(|| format!("Failed to load configuration from '{}'", data_dir.display()))
}

fn open_store(data_dir: &Path) -> Result<RecordStore> {
    let config = read_config(data_dir)?;
    let path = config.signs_path(data_dir);
    RecordStore::open(&path).with_context(|| format!("Failed to open signs file '{}'", path.display()))
}

fn stats(data_dir: &Path) -> Result<()> {
    // No render surface here: displays go to an in-memory one.
    let context = SignContext::with_config(
        data_dir,
        read_config(data_dir)?,
        Arc::new(InMemoryRenderer::new()),
        Arc::new(ManualRegionOracle::new()),
        Arc::new(InlineExecutor),
    )
    .with_context(|| format!("Failed to open '{}'", data_dir.display()))?;

    println!("{}", context.status());
    for collection in context.store().collections() {
        println!(
            "  {}: {} signs",
            collection,
            context.store().keys_in_collection(&collection).len()
        );
    }
    Ok(())
}

fn list(data_dir: &Path, collection: Option<&str>) -> Result<()> {
    let store = open_store(data_dir)?;
    let collections = match collection {
        Some(name) => vec![name.to_string()],
        None => store.collections(),
    };

    let mut shown = 0usize;
    for name in &collections {
        for (key, record) in store.records_in_collection(name) {
            println!("{:<28} {:<10} {}", key.to_string(), record.id().as_str(), record.preview());
            shown += 1;
        }
    }
    println!("{} sign(s)", shown);
    Ok(())
}

fn check(data_dir: &Path) -> Result<()> {
    let store = open_store(data_dir)?;
    let violations = store.verify_indices();
    if violations.is_empty() {
        println!("OK: {} signs, indices consistent", store.len());
        return Ok(());
    }

    for violation in &violations {
        println!("  {}", violation);
    }
    Err(anyhow!("{} index problem(s) found", violations.len()))
}

fn compact(data_dir: &Path) -> Result<()> {
    let store = open_store(data_dir)?;
    store.rebuild_indices();
    let repaired = store.regenerate_missing_ids();
    store
        .force_flush()
        .with_context(|| format!("Failed to write '{}'", store.path().display()))?;
    println!(
        "Wrote {} signs to {} ({} id(s) regenerated)",
        store.len(),
        store.path().display(),
        repaired
    );
    Ok(())
}
