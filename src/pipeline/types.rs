// Pipeline data types: frames in flight, detection results, publisher seam

use anyhow::Result;
use chrono::{DateTime, Utc};
use opencv::core::{Mat, Point};

/// Correlation identity of a camera frame. Never interpreted here, only
/// copied through to the outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRef {
    pub name: String,
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// A decoded camera frame, exclusively owned by the processing task it is
/// handed to. The pixel buffer is released when the owning task drops it.
pub struct Frame {
    pub frame_ref: FrameRef,
    pub mat: Mat,
}

/// Road ellipse fitted to the detected contour, with a trust score for how
/// close its center sits to the expected on-track zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipse {
    pub center: Point,
    pub width: i32,
    pub height: i32,
    pub angle: f32,
    pub confidence: f32,
}

impl Ellipse {
    /// Degenerate value published when no valid fit exists.
    pub fn not_found() -> Self {
        Self {
            center: Point::new(0, 0),
            width: 0,
            height: 0,
            angle: 0.0,
            confidence: 0.0,
        }
    }
}

/// One detection result, built once per processed frame and handed straight
/// to the publisher.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadMessage {
    pub contour: Vec<Point>,
    pub ellipse: Ellipse,
    pub frame_ref: FrameRef,
}

/// Result sink for processed frames. Injected at construction so transports
/// and test doubles swap freely.
pub trait RoadPublisher: Send + Sync {
    fn publish(&self, msg: &RoadMessage) -> Result<()>;
}
