//! Shale API server.
//!
//! Serves the document API over the in-memory store; wiring a wide-column
//! driver session into the factory is a deployment concern.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use shale_engine::config::EngineConfig;
use shale_engine::executor::StoreExecutor;
use shale_engine::testing::InMemoryStore;
use shale_engine::CommandProcessor;

#[derive(Parser)]
#[command(name = "shale-server")]
#[command(about = "JSON document API over a wide-column store")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8181", env = "SHALE_PORT")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1", env = "SHALE_HOST")]
    host: String,

    /// Namespaces available at startup
    #[arg(long = "namespace", default_value = "default_keyspace")]
    namespaces: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shale_server=info".parse()?)
                .add_directive("shale_engine=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let namespaces: Vec<&str> = args.namespaces.iter().map(String::as_str).collect();
    let store = InMemoryStore::with_namespaces(&namespaces);
    let processor = Arc::new(CommandProcessor::new(
        EngineConfig::default(),
        Box::new(move |_tenant| Ok(Arc::clone(&store) as Arc<dyn StoreExecutor>)),
    ));
    let app = shale_server::build_router(processor);

    let addr = format!("{}:{}", args.host, args.port);
    info!("listening on http://{addr}/v1");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
