// Zenoh transport: camera frame subscription and road result publication

pub mod codec;

use anyhow::{anyhow, Context, Result};
use zenoh::{Session, Wait};

use crate::pipeline::types::{RoadMessage, RoadPublisher};
use crate::pipeline::RoadService;

/// Opens a zenoh session, either scouting the local network or connecting to
/// an explicit locator.
pub async fn open_session(connect: Option<&str>) -> Result<Session> {
    let mut config = zenoh::Config::default();
    if let Some(endpoint) = connect {
        config
            .insert_json5("connect/endpoints", &format!("[\"{endpoint}\"]"))
            .map_err(|e| anyhow!("invalid zenoh endpoint {endpoint}: {e}"))?;
    }
    zenoh::open(config)
        .await
        .map_err(|e| anyhow!("unable to open zenoh session: {e}"))
}

/// Publishes encoded road messages on a fixed key expression. Safe to call
/// from any processing thread.
pub struct ZenohRoadPublisher {
    session: Session,
    key: String,
}

impl ZenohRoadPublisher {
    pub fn new(session: Session, key: impl Into<String>) -> Self {
        Self {
            session,
            key: key.into(),
        }
    }
}

impl RoadPublisher for ZenohRoadPublisher {
    fn publish(&self, msg: &RoadMessage) -> Result<()> {
        self.session
            .put(&self.key, codec::encode_road_message(msg))
            .wait()
            .map_err(|e| anyhow!("publish on {}: {e}", self.key))
    }
}

/// Feeds camera samples into the service until ctrl-c or channel close, then
/// drains in-flight tasks. Frames keep being accepted while earlier tasks
/// are still running.
pub async fn run(session: &Session, camera_key: &str, service: RoadService) -> Result<()> {
    let subscriber = session
        .declare_subscriber(camera_key)
        .await
        .map_err(|e| anyhow!("unable to subscribe to {camera_key}: {e}"))?;
    tracing::info!("listening for camera frames on {camera_key}");

    loop {
        tokio::select! {
            sample = subscriber.recv_async() => {
                match sample {
                    Ok(sample) => service.on_frame(&sample.payload().to_bytes()),
                    Err(_) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("stop requested");
                break;
            }
        }
    }

    // Run-to-completion contract: frames already accepted still publish.
    tokio::task::spawn_blocking(move || service.shutdown())
        .await
        .context("waiting for in-flight frames")?;
    Ok(())
}
