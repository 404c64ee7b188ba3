//! `segfetch list`: show persisted task records.

use std::path::PathBuf;

use clap::Args;
use segfetch::config::{format_size, ConfigFile};
use segfetch::store::{JsonTaskStore, TaskRecord, TaskStore};

use crate::error::CliError;

/// Arguments for `list`.
#[derive(Debug, Args)]
pub struct ListArgs {
    /// Task record file (default: store.path from config)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Remove the record for this URL instead of listing
    #[arg(long, value_name = "URL")]
    pub forget: Option<String>,
}

/// Run the `list` command.
pub fn run(args: ListArgs) -> Result<(), CliError> {
    let path = match args.store {
        Some(path) => path,
        None => ConfigFile::load()?.store.path,
    };
    let store = JsonTaskStore::new(path);

    if let Some(url) = args.forget {
        if store.remove(&url)? {
            println!("Removed {}", url);
        } else {
            println!("No record for {}", url);
        }
        return Ok(());
    }

    let records = store.list()?;
    if records.is_empty() {
        println!("No downloads recorded in {}", store.path().display());
        return Ok(());
    }

    for record in &records {
        println!("{}", format_record(record));
    }
    println!();
    println!("{} download(s)", records.len());

    Ok(())
}

/// One-line summary of a record.
fn format_record(record: &TaskRecord) -> String {
    let size = if record.total_bytes >= 0 {
        format!(
            "{} / {}",
            format_size(record.downloaded_bytes),
            format_size(record.total_bytes as u64)
        )
    } else {
        format!("{} / unknown", format_size(record.downloaded_bytes))
    };

    let mut line = format!(
        "{:<12} {:>5.1}%  {:<24} {}\n  {}",
        record.status,
        record.progress * 100.0,
        size,
        record.save_path.display(),
        record.url
    );
    if let Some(error) = &record.error {
        line.push_str(&format!("\n  error: {}", error));
    }
    line.push_str(&format!(
        "\n  updated {}",
        record.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    line
}
