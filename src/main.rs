mod cli;
mod detector;
mod pipeline;
mod transport;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use cli::Args;
use pipeline::RoadService;
use transport::ZenohRoadPublisher;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    let session = transport::open_session(args.connect.as_deref()).await?;
    let publisher = Arc::new(ZenohRoadPublisher::new(
        session.clone(),
        args.road_channel.clone(),
    ));
    let service = RoadService::new(args.horizon, publisher);

    transport::run(&session, &args.camera_channel, service).await?;

    session
        .close()
        .await
        .map_err(|e| anyhow!("closing zenoh session: {e}"))?;
    Ok(())
}
