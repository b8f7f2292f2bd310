use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use logutil::LogFormat;
use planserver::args::Arguments;
use planserver::server::PlanServer;
use plansrv::PlanService;
use plansrv::compiler::SharedCatalog;
use sqlrel::MemoryCatalog;
use tokio::net::TcpListener;
use tracing::info;

fn main() {
    let args = Arguments::parse();

    logutil::init_stderr(args.log_level, LogFormat::from(args.log_format));

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to build runtime: {e}"))
        .and_then(|runtime| runtime.block_on(inner(args)));

    if let Err(e) = result {
        println!("ERROR: {e:#}");
        std::process::exit(1);
    }
}

async fn inner(args: Arguments) -> Result<()> {
    let catalog = match &args.catalog {
        Some(path) => MemoryCatalog::from_path(path)
            .with_context(|| format!("failed to load catalog from {}", path.display()))?,
        None => MemoryCatalog::new(),
    };
    info!(catalog = ?args.catalog, "loaded catalog");
    let catalog: SharedCatalog = Arc::new(catalog);

    let service = Arc::new(PlanService::new(args.service_config(), catalog));
    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("failed to bind to {}", args.bind))?;

    PlanServer::new(listener, service).serve().await
}
