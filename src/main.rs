mod catalog;
mod error;

use crate::catalog::CatalogEntry;
use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::ResultExt;
use futures::StreamExt;
use quire_cache::{CoverCoordinator, CoverDecoder, DiskStore, FetchCoordinator, HttpFetcher, format_bytes};
use quire_config::Config;
use quire_resolve::{Candidates, Forget, ResolveEvent, Resolver, WinnerPersistence};
use quire_storage::backend::LocalBackend;
use std::path::PathBuf;
use std::pin::pin;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "quire", version, about = "Find, fetch and cache book covers")]
struct Cli {
    /// More logging (-v info, -vv debug). RUST_LOG overrides this.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Read configuration from this file instead of the platform default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Try cover locations in order until one loads.
    Resolve {
        /// Start from this location if it is one of the candidates.
        #[arg(long)]
        preferred: Option<String>,
        /// JSON catalog to read candidates from and record the winner in.
        #[arg(long, requires = "book")]
        catalog: Option<PathBuf>,
        /// Book in the catalog.
        #[arg(long, requires = "catalog")]
        book: Option<String>,
        /// Extra candidate locations, tried after the catalog's.
        locations: Vec<String>,
    },
    /// Show how much disk the cover cache uses.
    Usage,
    /// Delete every cached cover.
    Clear,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn coordinator(config: &Config) -> Result<CoverCoordinator> {
    let backend = LocalBackend::new("covers", &config.cache.directory).or_raise(|| ErrorKind::Storage)?;
    let disk = DiskStore::with_default_extension(Arc::new(backend), &config.cache.default_extension);
    let fetcher = HttpFetcher::new(&config.http);
    Ok(FetchCoordinator::new(disk, Arc::default(), Arc::new(fetcher), CoverDecoder))
}

/// Cancel on Ctrl-C. Whatever is being fetched still finishes in the
/// background until the runtime shuts down.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    cancel
}

async fn resolve(
    coordinator: CoverCoordinator,
    preferred: Option<String>,
    entry: Option<CatalogEntry>,
    locations: Vec<String>,
) -> ExitCode {
    let record = entry.as_ref().map(CatalogEntry::record).unwrap_or_default();
    let candidates = Candidates::normalize(record.to_candidates().as_slice().iter().chain(locations.iter()));
    let preferred = preferred.as_deref().or(record.preferred());
    let persistence: &dyn WinnerPersistence = match &entry {
        Some(entry) => entry,
        None => &Forget,
    };

    let resolver = Resolver::new(coordinator);
    let cancel = cancel_on_interrupt();
    let mut events = pin!(resolver.resolve(&candidates, preferred, persistence));
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                eprintln!("interrupted");
                return ExitCode::from(130);
            },
            event = events.next() => event,
        };
        match event {
            Some(ResolveEvent::Attempting(key)) => eprintln!("trying  {key}"),
            Some(ResolveEvent::Missed(key)) => eprintln!("missed  {key}"),
            Some(ResolveEvent::Loaded { winner, object }) => {
                let format = object.format.extensions_str().first().copied().unwrap_or("image");
                println!("{winner}\t{format}\t{}x{}", object.width, object.height);
                if let Some(entry) = &entry {
                    entry.flush().await;
                }
                return ExitCode::SUCCESS;
            },
            Some(ResolveEvent::Empty) | None => {
                eprintln!("no cover found among {} candidate(s)", candidates.len());
                return ExitCode::FAILURE;
            },
            Some(ResolveEvent::Loading | ResolveEvent::Restarted) => {},
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    tracing::debug!(directory = %config.cache.directory.display(), "Using cover cache");
    let coordinator = coordinator(&config)?;

    match cli.command {
        Command::Resolve { preferred, catalog, book, locations } => {
            let entry = match catalog.zip(book) {
                Some((path, book)) => Some(CatalogEntry::open(path, book)?),
                None => None,
            };
            Ok(resolve(coordinator, preferred, entry, locations).await)
        },
        Command::Usage => {
            let bytes = coordinator.usage_size().await;
            println!("{}\t{}", format_bytes(bytes), config.cache.directory.display());
            Ok(ExitCode::SUCCESS)
        },
        Command::Clear => {
            coordinator.clear_all().await;
            println!("cleared {}", config.cache.directory.display());
            Ok(ExitCode::SUCCESS)
        },
    }
}
