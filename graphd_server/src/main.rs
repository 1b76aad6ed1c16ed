/// graphd inference server
///
/// Holds registered computation graphs in memory and answers
/// RegisterGraph / ReplaceGraph / ForgetGraph / InferenceRequest calls over TCP.
use clap::Parser;
use graphd_core::{GraphRegistry, InferenceService, OpRegistry, ServerConfig};
use graphd_server::GraphServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "graphd_server")]
#[command(about = "graphd computation graph inference server", long_about = None)]
struct Args {
    /// Config file (TOML or YAML); standard locations are searched otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Abort inference requests after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Requests evaluated at the same time
    #[arg(long)]
    max_concurrent: Option<usize>,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::find_and_load()?,
        };

        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.inference_timeout_ms = Some(timeout_ms);
        }
        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent_requests = max_concurrent;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_filter = if args.verbose {
        "graphd_server=debug,graphd_core=debug,info"
    } else {
        "graphd_server=info,graphd_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.load_config()?;
    let ops = OpRegistry::shared_builtin();
    info!(
        "Loaded {} operators, {} concurrent requests, inference timeout {:?}",
        ops.len(),
        config.max_concurrent_requests,
        config.inference_timeout()
    );

    let registry = Arc::new(GraphRegistry::new(ops));
    let service = Arc::new(
        InferenceService::new(registry).with_inference_timeout(config.inference_timeout()),
    );

    GraphServer::new(config, service).run().await
}
