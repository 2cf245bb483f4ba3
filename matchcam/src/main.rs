mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use matchcam_api::AppState;
use matchcam_core::{
    config::load_config,
    logging,
    repository::{FileMatchStateStore, FingerprintStore, MatchStateStore, ThresholdStore},
};
use matchcam_livestream::{HttpUpstreamConnector, StreamManager, StreamSettings};
use matchcam_recorder::{MatchOrchestrator, RecordingManager};

use server::MatchCamServer;

#[derive(Parser, Debug)]
#[command(name = "matchcam")]
#[command(about = "Camera stream proxy and match recorder", long_about = None)]
struct Args {
    /// Configuration file (YAML or JSON)
    #[arg(short, long, env = "MATCHCAM_CONFIG_PATH")]
    config: Option<String>,

    /// Override server.host
    #[arg(long)]
    host: Option<String>,

    /// Override server.port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let mut config = load_config(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        if port == 0 {
            anyhow::bail!("--port must be non-zero");
        }
        config.server.port = port;
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("MatchCam server starting...");
    info!("HTTP address: {}", config.http_address());
    for (key, camera) in &config.cameras {
        info!(camera = %key, url = %camera.stream_url(), "Camera configured: {}", camera.display_name);
    }

    // 3. Persistent state
    tokio::fs::create_dir_all(&config.recording.output_dir).await?;
    let state_store = Arc::new(FileMatchStateStore::new(&config.matches.state_path));
    let match_state = state_store.load_or_default().await;
    let state_store: Arc<dyn MatchStateStore> = state_store;

    let threshold = Arc::new(ThresholdStore::new(&config.storage.threshold_path));
    let fingerprints = Arc::new(FingerprintStore::open(&config.storage.fingerprints_path).await);

    // 4. Stream proxy and recorder
    let cameras = Arc::new(config.cameras.clone());
    let connector = Arc::new(HttpUpstreamConnector::new(&config.streaming)?);
    let streams = Arc::new(StreamManager::new(
        Arc::clone(&cameras),
        connector,
        StreamSettings::from(&config.streaming),
    ));

    let recordings = Arc::new(RecordingManager::new(cameras, config.recording.clone()));
    let orchestrator = MatchOrchestrator::new(
        recordings,
        state_store,
        match_state,
        config.matches.duration(),
    );

    let state = AppState {
        streams,
        orchestrator,
        threshold,
        fingerprints,
        recordings_dir: config.recording.output_dir.clone(),
    };

    // 5. Serve until a shutdown signal
    MatchCamServer::new(config, state).start().await
}
