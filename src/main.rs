use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use doctalk::{
    create_router, AppState, Config, ConversationEngine, CpalAudioInput, CpalAudioOutput,
    WsTransport,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "doctalk", about = "Live voice conversation service for the doctalk viewer")]
struct Args {
    /// Configuration file (without extension)
    #[arg(long, default_value = "config/doctalk")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Live session service: {}", cfg.transport.url);

    let input = Arc::new(CpalAudioInput::new());
    let output = Arc::new(CpalAudioOutput::new());
    let transport = Arc::new(WsTransport::new(cfg.transport.url.clone()));
    let engine = Arc::new(ConversationEngine::new(
        cfg.conversation.clone(),
        input,
        output,
        transport,
    ));

    let state = AppState::new(Arc::clone(&engine));
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app).await?;

    // The engine owns OS audio resources; release them on the way out.
    engine.stop().await;

    Ok(())
}
