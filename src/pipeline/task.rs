// Per-frame processing task: one owned frame in, one published result out

use std::sync::Arc;

use anyhow::Result;
use opencv::core::Mat;
use opencv::imgproc;

use crate::detector::RoadDetector;
use crate::pipeline::types::{Frame, RoadMessage, RoadPublisher};

/// Unit of work bound to exactly one decoded frame. The frame moves in at
/// construction; the frame buffer and every intermediate buffer are dropped
/// when the task returns, on every exit path.
pub(crate) struct ProcessingTask {
    frame: Frame,
    horizon: i32,
    detector: RoadDetector,
    publisher: Arc<dyn RoadPublisher>,
}

impl ProcessingTask {
    pub(crate) fn new(
        frame: Frame,
        horizon: i32,
        detector: RoadDetector,
        publisher: Arc<dyn RoadPublisher>,
    ) -> Self {
        Self {
            frame,
            horizon,
            detector,
            publisher,
        }
    }

    /// Runs to completion, absorbing its own failures: a broken frame or a
    /// failed publish never reaches the reception path.
    pub(crate) fn run(self) {
        if let Err(err) = self.process() {
            tracing::error!("frame {}: {err:#}", self.frame.frame_ref.id);
        }
    }

    fn process(&self) -> Result<()> {
        let mut gray = Mat::default();
        imgproc::cvt_color_def(&self.frame.mat, &mut gray, imgproc::COLOR_RGB2GRAY)?;

        let contour = self.detector.detect_road_contour(&gray, self.horizon)?;
        let ellipse = self.detector.compute_ellipse(&contour)?;
        tracing::debug!(
            "frame {}: {} contour points, confidence {}",
            self.frame.frame_ref.id,
            contour.len(),
            ellipse.confidence
        );

        let msg = RoadMessage {
            contour: contour.to_vec(),
            ellipse,
            frame_ref: self.frame.frame_ref.clone(),
        };
        self.publisher.publish(&msg)
    }
}
