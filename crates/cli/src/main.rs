use std::collections::HashSet;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

use lookout_core::{EventKind, ResourceKind};
use lookout_informer::{resolve_kinds, Informer, SyncEvent};
use lookout_store::StateStore;
use lookout_transport::{ClusterConfig, HttpTransport};

#[derive(Parser, Debug)]
#[command(name = "lookoutctl", version, about = "Lookout: a live local cache of a cluster API")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// API server base URL, e.g. https://10.0.0.1:6443
    #[arg(long = "server", env = "LOOKOUT_SERVER", global = true, default_value = "https://127.0.0.1:6443")]
    server: String,

    /// Bearer token (prefer --token-file for anything real)
    #[arg(long = "token", env = "LOOKOUT_TOKEN", global = true)]
    token: Option<String>,

    /// Read the bearer token from a file
    #[arg(long = "token-file", global = true)]
    token_file: Option<std::path::PathBuf>,

    /// PEM bundle used to validate the server certificate
    #[arg(long = "ca-file", global = true)]
    ca_file: Option<std::path::PathBuf>,

    /// Skip server certificate validation (explicit opt-in)
    #[arg(long = "insecure", global = true, action = ArgAction::SetTrue)]
    insecure: bool,

    /// Namespace scope
    #[arg(long = "ns", global = true, default_value = "default")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the built-in resource kind table
    Kinds,
    /// Run the informer and print change events until Ctrl-C
    Sync {
        /// Kind names to sync (default: all built-in kinds)
        #[arg(long = "kinds", value_delimiter = ',')]
        kinds: Vec<String>,
    },
    /// List every kind once, print the cached state as JSON, and exit
    Snapshot {
        /// Kind names to snapshot (default: all built-in kinds)
        #[arg(long = "kinds", value_delimiter = ',')]
        kinds: Vec<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("LOOKOUT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("LOOKOUT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid LOOKOUT_METRICS_ADDR; expected host:port");
        }
    }
}

/// Stand-in for the discovery collaborator: the kinds this build knows how
/// to reach and their path templates.
fn builtin_kinds() -> Vec<ResourceKind> {
    [
        ("pods", "/api/v1/namespaces/{namespace}/pods"),
        ("services", "/api/v1/namespaces/{namespace}/services"),
        ("endpoints", "/api/v1/namespaces/{namespace}/endpoints"),
        ("configmaps", "/api/v1/namespaces/{namespace}/configmaps"),
        ("secrets", "/api/v1/namespaces/{namespace}/secrets"),
        ("deployments", "/apis/apps/v1/namespaces/{namespace}/deployments"),
        ("replicasets", "/apis/apps/v1/namespaces/{namespace}/replicasets"),
    ]
    .into_iter()
    .map(|(name, path)| ResourceKind::new(name, path))
    .collect()
}

fn cluster_config(cli: &Cli) -> Result<ClusterConfig> {
    let token = match (&cli.token, &cli.token_file) {
        (Some(t), _) => Some(t.clone()),
        (None, Some(path)) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading token file {}", path.display()))?;
            Some(raw.trim().to_string())
        }
        (None, None) => None,
    };
    let trust_bundle_pem = match &cli.ca_file {
        Some(path) => Some(
            std::fs::read(path).with_context(|| format!("reading CA file {}", path.display()))?,
        ),
        None => None,
    };
    Ok(ClusterConfig {
        server: cli.server.clone(),
        token,
        trust_bundle_pem,
        insecure: cli.insecure,
        namespace: cli.namespace.clone(),
    })
}

fn selected_kinds(requested: &[String]) -> Result<Vec<ResourceKind>> {
    let table = builtin_kinds();
    if requested.is_empty() {
        return Ok(table);
    }
    Ok(resolve_kinds(&table, requested)?)
}

fn queue_cap() -> usize {
    std::env::var("LOOKOUT_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(2048)
}

fn print_event(output: Output, event: &SyncEvent) {
    match output {
        Output::Human => match event {
            SyncEvent::Synced { kind, count } => println!("synced {kind} ({count} objects)"),
            SyncEvent::Applied { kind, record } => {
                let sigil = match record.kind {
                    EventKind::Added => '+',
                    EventKind::Modified => '~',
                    EventKind::Deleted => '-',
                    EventKind::Unknown => '?',
                };
                println!("{sigil} {kind}/{}", record.name);
            }
            SyncEvent::GaveUp { kind } => println!("! {kind} gave up; cache frozen"),
        },
        Output::Json => {
            let line = match event {
                SyncEvent::Synced { kind, count } => {
                    serde_json::json!({ "synced": kind, "count": count })
                }
                SyncEvent::Applied { kind, record } => {
                    serde_json::json!({ "kind": kind, "event": record.kind, "name": record.name })
                }
                SyncEvent::GaveUp { kind } => serde_json::json!({ "gaveUp": kind }),
            };
            println!("{line}");
        }
    }
}

fn print_summary(store: &StateStore, kinds: &[ResourceKind]) {
    for kind in kinds {
        println!("{}: {} objects cached", kind.name, store.count(&kind.name));
    }
}

async fn run_sync(cli: &Cli, requested: &[String]) -> Result<()> {
    let kinds = selected_kinds(requested)?;
    let config = cluster_config(cli)?;
    let transport = std::sync::Arc::new(HttpTransport::new(config)?);
    let (tx, mut rx) = mpsc::channel::<SyncEvent>(queue_cap());
    let informer = Informer::start(transport, kinds.clone(), Some(tx));
    let store = informer.store();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                break;
            }
            event = rx.recv() => match event {
                Some(ev) => print_event(cli.output, &ev),
                None => {
                    warn!("all coordinators ended");
                    break;
                }
            }
        }
    }

    informer.stop().await;
    if cli.output == Output::Human {
        print_summary(&store, &kinds);
    }
    Ok(())
}

async fn run_snapshot(cli: &Cli, requested: &[String]) -> Result<()> {
    let kinds = selected_kinds(requested)?;
    let config = cluster_config(cli)?;
    let transport = std::sync::Arc::new(HttpTransport::new(config)?);
    let (tx, mut rx) = mpsc::channel::<SyncEvent>(queue_cap());
    let informer = Informer::start(transport, kinds.clone(), Some(tx));

    let mut settled: HashSet<String> = HashSet::new();
    while settled.len() < kinds.len() {
        match rx.recv().await {
            Some(SyncEvent::Synced { kind, .. }) => {
                settled.insert(kind);
            }
            Some(SyncEvent::GaveUp { kind }) => {
                warn!(kind = %kind, "kind gave up before listing");
                settled.insert(kind);
            }
            Some(SyncEvent::Applied { .. }) => {}
            None => break,
        }
    }

    let state = informer.store().snapshot();
    println!("{}", serde_json::to_string_pretty(&*state)?);
    informer.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Kinds => {
            for kind in builtin_kinds() {
                match cli.output {
                    Output::Human => println!("{} • {}", kind.name, kind.path_template),
                    Output::Json => println!("{}", serde_json::to_string(&kind)?),
                }
            }
            Ok(())
        }
        Commands::Sync { kinds } => run_sync(&cli, kinds).await,
        Commands::Snapshot { kinds } => run_snapshot(&cli, kinds).await,
    }
}
