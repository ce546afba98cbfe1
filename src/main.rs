use cari_lokasi::assistant::Assistant;
use cari_lokasi::intent::oracle::{self, Unreachable};
use cari_lokasi::intent::{ClassifierConfig, FailoverOracle, HttpOracle, IntentClassifier, Oracle, OracleEndpoint};
use cari_lokasi::location::gpsd::DEFAULT_GPSD_ADDR;
use cari_lokasi::location::{
    CacheStore, DevicePositionSource, FileStore, GpsdSource, IpApiLocator, LocationResolver, MemoryStore,
    NetworkLocator, NoDevice, Offline,
};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Cari Lokasi — find out what place the user is asking for, and where they are.
///
/// Resolves the current position (GPS via gpsd, then IP lookup, then a
/// built-in fallback) and, if a message is given, classifies it.
///
/// Examples:
///   cari "dimana atm terdekat"
///   cari "cari makan enak" --no-device
///   cari --offline
///   cari --watch 30
#[derive(Parser)]
#[command(name = "cari", version, about, long_about = None)]
struct Cli {
    /// Message to classify. Without it, only the location is printed.
    #[arg(index = 1)]
    text: Option<String>,

    /// Stream position updates for this many seconds, then stop.
    #[arg(long, value_name = "SECS")]
    watch: Option<u64>,

    /// Offline mode: no IP lookup, no oracle.
    #[arg(long)]
    offline: bool,

    /// Skip on-device positioning.
    #[arg(long)]
    no_device: bool,

    /// gpsd address for on-device positioning.
    #[arg(long, env = "CARI_GPSD", default_value = DEFAULT_GPSD_ADDR)]
    gpsd: String,

    /// Keep the location cache in memory only.
    #[arg(long)]
    no_persist: bool,

    /// Location cache file (default: ~/.cari_lokasi/cache.json).
    #[arg(long, env = "CARI_CACHE_FILE")]
    cache_file: Option<PathBuf>,

    /// Primary oracle endpoint (plain GET).
    #[arg(long, env = "CARI_ORACLE_PRIMARY", default_value = oracle::PRIMARY_URL)]
    oracle_primary: String,

    /// Secondary oracle endpoint (chat-style POST).
    #[arg(long, env = "CARI_ORACLE_SECONDARY", default_value = oracle::SECONDARY_URL)]
    oracle_secondary: String,

    /// Model name sent to the secondary oracle.
    #[arg(long, env = "CARI_ORACLE_MODEL", default_value = oracle::DEFAULT_MODEL)]
    oracle_model: String,

    /// Oracle timeout in seconds, failover included.
    #[arg(long, default_value_t = 15)]
    oracle_timeout: u64,
}

#[derive(Serialize)]
struct LocationOutput {
    location: cari_lokasi::location::Coordinate,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cari_lokasi=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_resolver(cli: &Cli) -> LocationResolver {
    let device: Arc<dyn DevicePositionSource> = if cli.no_device {
        Arc::new(NoDevice)
    } else {
        Arc::new(GpsdSource::new(cli.gpsd.clone()))
    };
    let network: Arc<dyn NetworkLocator> = if cli.offline {
        Arc::new(Offline)
    } else {
        Arc::new(IpApiLocator::new())
    };
    let store: Box<dyn CacheStore> = match (&cli.cache_file, cli.no_persist) {
        (_, true) => Box::new(MemoryStore::new()),
        (Some(path), false) => Box::new(FileStore::at(path.clone())),
        (None, false) => Box::new(FileStore::new()),
    };
    LocationResolver::new(device, network, store)
}

fn build_classifier(cli: &Cli) -> IntentClassifier {
    let timeout = Duration::from_secs(cli.oracle_timeout);
    let oracle: Arc<dyn Oracle> = if cli.offline {
        Arc::new(Unreachable)
    } else {
        Arc::new(FailoverOracle::new(
            Box::new(
                HttpOracle::new(OracleEndpoint::PlainGet {
                    base_url: cli.oracle_primary.clone(),
                })
                .with_request_timeout(timeout),
            ),
            Box::new(
                HttpOracle::new(OracleEndpoint::ChatPost {
                    url: cli.oracle_secondary.clone(),
                    model: cli.oracle_model.clone(),
                })
                .with_request_timeout(timeout),
            ),
        ))
    };
    IntentClassifier::new(oracle).with_config(ClassifierConfig { oracle_timeout: timeout })
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: cannot encode output: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let resolver = Arc::new(build_resolver(&cli));

    // ── Watch mode ──────────────────────────────────────────────

    if let Some(secs) = cli.watch {
        let handle = resolver.watch_position(
            |c| eprintln!("  {}", c.display_line()),
            |e| eprintln!("  Warning: {}", e),
        );
        tokio::time::sleep(Duration::from_secs(secs)).await;
        resolver.cancel_watch(handle);
        return;
    }

    // ── Location only ───────────────────────────────────────────

    let Some(text) = cli.text.as_deref() else {
        let location = resolver.resolve_location().await;
        eprintln!("  {}", location.display_line());
        print_json(&LocationOutput { location });
        return;
    };

    // ── Full request ────────────────────────────────────────────

    let assistant = Assistant::new(Arc::clone(&resolver), build_classifier(&cli));
    let reply = assistant.handle(text).await;

    eprintln!("  {}", reply.location.display_line());
    eprintln!("  \u{1F4AC} {}", reply.classification.reply_text);
    print_json(&reply);
}
