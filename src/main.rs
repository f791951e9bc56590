use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fetchkit::cache::{self, CacheStore, DataSource, SqliteCacheStore};
use fetchkit::config::Config;
use fetchkit::{logging, FetchController, HttpTransport, RetryController, Transport};

#[derive(Parser, Debug)]
#[command(name = "fetchkit")]
#[command(about = "Fetch JSON resources through a shared cache or with retries")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fetchkit/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep fetched bodies in the on-disk cache
  #[arg(long)]
  persist: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch each URL, serving repeats from the cache
  Get {
    #[arg(required = true)]
    urls: Vec<String>,
  },
  /// Fetch a URL, retrying failures on a fixed delay
  Retry {
    url: String,
    /// Additional attempts after the first
    #[arg(long)]
    retries: Option<u32>,
    /// Delay between attempts in milliseconds
    #[arg(long, value_name = "MS")]
    retry_delay: Option<u64>,
  },
  /// Inspect the on-disk cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// List cached resource keys
  List,
  /// Remove every cached entry
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if args.persist {
    config.cache.persist = true;
  }

  let _log_guard = logging::init(&config.log)?;

  match args.command {
    Command::Get { urls } => get(&config, &urls).await,
    Command::Retry {
      url,
      retries,
      retry_delay,
    } => retry(&config, &url, retries, retry_delay).await,
    Command::Cache { action } => manage_cache(&config, action),
  }
}

async fn get(config: &Config, urls: &[String]) -> Result<()> {
  let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.http)?);
  let store: Arc<dyn CacheStore> = if config.cache.persist {
    Arc::new(SqliteCacheStore::open(config.cache.path.as_deref())?)
  } else {
    cache::global()
  };

  let mut failures = 0;
  for url in urls {
    let mut controller = FetchController::<Value>::with_cache(Arc::clone(&transport), Arc::clone(&store));
    controller.fetch_resource(url);
    let state = controller.settled().await;

    match (state.data, state.error) {
      (_, Some(error)) => {
        failures += 1;
        eprintln!("{}: {}", url, error);
      }
      (Some(data), None) => {
        let source = match state.source {
          Some(DataSource::Cache) => "cache",
          _ => "network",
        };
        eprintln!("{} ({})", url, source);
        println!("{}", serde_json::to_string_pretty(&data)?);
      }
      (None, None) => eprintln!("{}: no data", url),
    }
  }

  if failures > 0 {
    return Err(eyre!("{} of {} requests failed", failures, urls.len()));
  }
  Ok(())
}

async fn retry(
  config: &Config,
  url: &str,
  retries: Option<u32>,
  retry_delay: Option<u64>,
) -> Result<()> {
  let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.http)?);

  let mut retry_config = config.retry_config();
  if let Some(retries) = retries {
    retry_config.retries = retries;
  }
  if let Some(ms) = retry_delay {
    retry_config.retry_delay = Duration::from_millis(ms);
  }

  let mut controller = RetryController::<Value>::new(transport);
  controller.fetch_with_retry(url, Some(retry_config));

  match controller.settled().await.into_parts() {
    (Some(data), _, _) => {
      println!("{}", serde_json::to_string_pretty(&data)?);
      Ok(())
    }
    (None, _, Some(error)) => Err(eyre!(
      "{}: giving up after {} retries: {}",
      url,
      retry_config.retries,
      error
    )),
    (None, _, None) => Err(eyre!("{}: no data", url)),
  }
}

fn manage_cache(config: &Config, action: CacheAction) -> Result<()> {
  let store = SqliteCacheStore::open(config.cache.path.as_deref())?;

  match action {
    CacheAction::List => {
      for entry in store.entries()? {
        println!(
          "{}  {:>8}  {}",
          entry.cached_at.format("%Y-%m-%d %H:%M:%S"),
          entry.size,
          entry.key
        );
      }
    }
    CacheAction::Clear => {
      let removed = store.clear()?;
      println!("Removed {} cached entries", removed);
    }
  }

  Ok(())
}
