//! gridscout CLI - resolve driver profiles from the command line.
//!
//! Resolves a list of driver names (or customer ids) through the profile
//! engine and prints each profile as JSON the moment it arrives.

use clap::Parser;
use gridscout::config::EngineConfig;
use gridscout::delivery::ProfileConsumer;
use gridscout::engine::ProfileEngine;
use gridscout::error::FetchError;
use gridscout::logging::init_logging;
use gridscout::profile::DriverProfile;
use gridscout::provider::{
    MemberProfileProvider, ProviderConfig, ReqwestHttpClient, StaticTokenSource,
};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "gridscout")]
#[command(about = "Resolve driver profiles against the members API", long_about = None)]
struct Args {
    /// Driver names or customer ids to resolve
    #[arg(required = true)]
    names: Vec<String>,

    /// Base URL of the members data API
    #[arg(long, default_value = "https://members-ng.iracing.com")]
    base_url: String,

    /// OAuth bearer token (falls back to $IRACING_TOKEN)
    #[arg(long, env = "IRACING_TOKEN")]
    token: String,

    /// Per-attempt request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Maximum attempts per driver
    #[arg(long, default_value = "3")]
    max_retries: u32,

    /// Overall deadline in seconds before giving up on stragglers
    #[arg(long, default_value = "120")]
    deadline_secs: u64,

    /// Print engine statistics after resolution
    #[arg(long)]
    stats: bool,
}

/// Consumer that prints each outcome as it arrives and counts terminals.
struct PrintingConsumer {
    terminal: AtomicUsize,
    failures: AtomicUsize,
    output: Mutex<()>,
}

impl PrintingConsumer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            terminal: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            output: Mutex::new(()),
        })
    }

    fn terminal_count(&self) -> usize {
        self.terminal.load(Ordering::SeqCst)
    }

    fn failure_count(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl ProfileConsumer for PrintingConsumer {
    fn on_profile(&self, key: &str, profile: &Arc<DriverProfile>) {
        let _guard = self.output.lock().unwrap();
        match serde_json::to_string_pretty(&profile.raw) {
            Ok(json) => println!("=== {key}\n{json}"),
            Err(_) => println!("=== {key}\n{:?}", profile.raw),
        }
        self.terminal.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, key: &str, error: &FetchError) {
        let _guard = self.output.lock().unwrap();
        eprintln!("=== {key}: {error}");
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.terminal.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _logging_guard = match init_logging("logs", "gridscout.log") {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error initializing logging: {e}");
            process::exit(1);
        }
    };

    let http = match ReqwestHttpClient::new() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error creating HTTP client: {e}");
            process::exit(1);
        }
    };

    let provider = Arc::new(MemberProfileProvider::new(
        http,
        StaticTokenSource::new(args.token.clone()),
        ProviderConfig {
            base_url: args.base_url.clone(),
        },
    ));

    let mut config = EngineConfig::default();
    config.retry.request_timeout = Duration::from_secs(args.timeout_secs);
    config.retry.max_retries = args.max_retries;

    let engine = ProfileEngine::new(provider, config);
    let consumer = PrintingConsumer::new();
    let as_dyn = Arc::clone(&consumer) as Arc<dyn ProfileConsumer>;

    for name in &args.names {
        engine.register(name, &as_dyn);
        // Everything the CLI asks for is on the "page".
        engine.update_visibility(name, true, 1.0);
    }
    engine.submit(args.names.clone());

    let expected = args.names.len();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.deadline_secs);
    while consumer.terminal_count() < expected {
        if tokio::time::Instant::now() >= deadline {
            eprintln!(
                "Deadline reached with {}/{} drivers resolved",
                consumer.terminal_count(),
                expected
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    if args.stats {
        let snapshot = engine.snapshot();
        println!();
        println!("Resolved:   {}", snapshot.resolutions_succeeded);
        println!("Failed:     {}", snapshot.resolutions_failed);
        println!("Retries:    {}", snapshot.retries);
        println!(
            "Cache:      {} hits / {} misses",
            snapshot.cache_hits, snapshot.cache_misses
        );
        if let Some(latency) = snapshot.mean_latency {
            println!("Latency:    {latency:?} mean");
        }
    }

    engine.cleanup();
    if consumer.failure_count() > 0 || consumer.terminal_count() < expected {
        process::exit(1);
    }
}
