use clap::{Parser, Subcommand};
use gallery_sync::imaging::RustBackend;
use gallery_sync::store::FilesystemStore;
use gallery_sync::sync::Syncer;
use gallery_sync::{config, output};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gallery-sync")]
#[command(about = "Incrementally publish thumbnails, manifests and pages for photo albums")]
#[command(long_about = "\
Incrementally publish thumbnails, manifests and pages for photo albums

Albums are directories of images in a bucket. For every album the derived
artifacts are kept next to the sources under the artifact directory:

  bucket/
  ├── 2024/
  │   ├── a.jpg                        # Source
  │   └── trip/
  │       └── b.jpg
  └── thumbs/
      ├── gallery.js                   # Support file
      └── 2024/
          ├── a_thumb_3fa9c1.jpg       # <stem>_<kind>_<hash>.jpg
          ├── a_medium_0b77e2.jpg
          ├── index.json               # Manifest
          ├── index.html               # Page
          └── trip/
              └── ...

Artifact names embed a hash of the source content and the kind's settings,
so only new or changed work is done. Running sync twice in a row uploads
nothing the second time.

Run 'gallery-sync gen-config' to generate a documented gallery-sync.toml.")]
#[command(version)]
struct Cli {
    /// Config file (missing file = stock settings)
    #[arg(long, default_value = "gallery-sync.toml", global = true)]
    config: PathBuf,

    /// Log per-object detail
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync an album and everything below it
    Sync {
        /// Album path relative to the store prefix (default: whole tree)
        #[arg(default_value = "")]
        album: String,

        /// Record failed albums and continue with the rest
        #[arg(long)]
        keep_going: bool,
    },
    /// Show what a sync would do without changing anything
    Plan {
        #[arg(default_value = "")]
        album: String,
    },
    /// Print a stock gallery-sync.toml with all options documented
    GenConfig,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "gallery_sync=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Load config, open the store, and set up the run.
async fn open_syncer(config_path: &Path) -> Result<Syncer, Box<dyn std::error::Error>> {
    let config = config::load_config(config_path)?;
    let store = FilesystemStore::new(config.store.root.clone()).await?;
    Ok(Syncer::new(Arc::new(store), Arc::new(RustBackend::new()), config).await?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Sync { album, keep_going } => {
            init_tracing(cli.verbose);
            let syncer = open_syncer(&cli.config).await?;
            let report = syncer.run(&album, keep_going).await?;
            output::print_sync_report(&report);
            if !report.is_success() {
                std::process::exit(1);
            }
        }
        Command::Plan { album } => {
            init_tracing(cli.verbose);
            let syncer = open_syncer(&cli.config).await?;
            let plan = syncer.plan_tree(&album).await?;
            output::print_plan(&plan);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}
