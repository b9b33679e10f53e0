// Frame reception and task spawning
//
// Each accepted frame is decoded once and moved into its own processing
// thread. No mutable frame slot is shared between tasks: a frame is only
// ever reachable from the one task that owns it.

pub mod task;
pub mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use crossbeam::sync::WaitGroup;
use opencv::core::Vector;
use opencv::imgcodecs;
use opencv::prelude::*;

use crate::detector::RoadDetector;
use crate::pipeline::task::ProcessingTask;
use crate::pipeline::types::{Frame, RoadPublisher};
use crate::transport::codec;

/// Reception side of the service: decodes inbound envelopes and spawns one
/// run-to-completion task per frame. Acceptance is unthrottled; tasks may
/// overlap arbitrarily and results may publish out of arrival order.
pub struct RoadService {
    detector: RoadDetector,
    horizon: i32,
    publisher: Arc<dyn RoadPublisher>,
    accepting: Arc<AtomicBool>,
    in_flight: WaitGroup,
}

impl RoadService {
    pub fn new(horizon: i32, publisher: Arc<dyn RoadPublisher>) -> Self {
        Self {
            detector: RoadDetector::new(),
            horizon,
            publisher,
            accepting: Arc::new(AtomicBool::new(true)),
            in_flight: WaitGroup::new(),
        }
    }

    /// Halts acceptance of new frames. Tasks already spawned keep running.
    pub fn stop(&self) {
        self.accepting.store(false, Ordering::Relaxed);
    }

    /// Accepts one raw envelope from the transport. Decode failures are
    /// logged and dropped; nothing propagates back to the transport.
    pub fn on_frame(&self, payload: &[u8]) {
        if !self.accepting.load(Ordering::Relaxed) {
            tracing::debug!("stop requested, frame dropped");
            return;
        }
        if let Err(err) = self.ingest(payload) {
            tracing::warn!("frame dropped: {err:#}");
        }
    }

    fn ingest(&self, payload: &[u8]) -> Result<()> {
        let frame_msg = codec::decode_frame_message(payload)?;

        let buf = Vector::from_slice(&frame_msg.image);
        let mat = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_UNCHANGED).context("image decode")?;
        if mat.empty() {
            anyhow::bail!("image decode produced an empty frame");
        }

        let frame = Frame {
            frame_ref: frame_msg.frame_ref,
            mat,
        };
        let task = ProcessingTask::new(
            frame,
            self.horizon,
            self.detector.clone(),
            self.publisher.clone(),
        );

        let guard = self.in_flight.clone();
        std::thread::spawn(move || {
            task.run();
            drop(guard);
        });
        Ok(())
    }

    /// Stops accepting frames and blocks until every in-flight task has
    /// published (or failed) and released its frame.
    pub fn shutdown(self) {
        self.stop();
        self.in_flight.wait();
    }
}
