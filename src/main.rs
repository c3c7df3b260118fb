use anyhow::{Context, Result};
use clap::Parser;
use photonote::cache_key::CacheKeyStore;
use photonote::{metadata, Config, GridEvent, Session};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Lists the photos in a folder with their embedded comments, filling the
/// thumbnail cache along the way.
#[derive(Parser, Debug)]
#[command(name = "photonote", version)]
struct Cli {
    /// Folder to scan recursively
    folder: PathBuf,

    /// Only list images whose comment contains TEXT (case-insensitive)
    #[arg(long, value_name = "TEXT")]
    filter: Option<String>,

    /// Print comments next to paths
    #[arg(long)]
    notes: bool,

    /// Also print every text field found in each image's metadata
    #[arg(long)]
    fields: bool,

    /// Store TEXT as the comment of FILE before listing
    #[arg(long, num_args = 2, value_names = ["FILE", "TEXT"])]
    set_comment: Option<Vec<String>>,

    /// Remove all cached thumbnails first
    #[arg(long)]
    clear_cache: bool,

    /// Config file (defaults to the platform config dir)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let tic = Instant::now();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    if cli.clear_cache {
        CacheKeyStore::new(config.cache_dir.clone())
            .clear()
            .context("failed to clear thumbnail cache")?;
        info!(cache = %config.cache_dir.display(), "thumbnail cache cleared");
    }

    if let Some([file, text]) = cli.set_comment.as_deref() {
        let file = PathBuf::from(file);
        metadata::write_comment(&file, text)
            .with_context(|| format!("failed to write comment to {}", file.display()))?;
    }

    let mut session = Session::open(&config, &cli.folder)?;
    session.handle(GridEvent::PredicateChanged {
        text: cli.filter.unwrap_or_default(),
        show_notes: cli.notes,
    });
    while session.controller().realized_count() < session.controller().total() {
        session.handle(GridEvent::ScrolledNearEnd);
        session.handle(GridEvent::Idle);
        session.pump();
    }
    session.wait_idle(Duration::from_secs(600));

    for item in session.visible_items() {
        match item.note {
            Some(note) => println!("{}: {}", item.path.display(), note),
            None => println!("{}", item.path.display()),
        }
        if cli.fields {
            match metadata::read_text_fields(&item.path) {
                Ok(fields) => {
                    for (key, value) in fields {
                        println!("    {key} = {value:?}");
                    }
                }
                Err(err) => println!("    <{err}>"),
            }
        }
    }
    info!(
        images = session.controller().total(),
        pending = session.pipeline().in_flight(),
        elapsed_ms = tic.elapsed().as_millis() as u64,
        "done"
    );
    Ok(())
}
