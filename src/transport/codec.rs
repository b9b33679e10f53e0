// Wire envelopes: magic-prefixed, little-endian, length-prefixed framing.
// One message per camera frame in, one road message per processed frame out.

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use opencv::core::Point;

use crate::pipeline::types::{Ellipse, FrameRef, RoadMessage};

const FRAME_MAGIC: &[u8; 5] = b"RCAM1";
const ROAD_MAGIC: &[u8; 5] = b"ROAD1";

/// Inbound camera envelope: correlation ref plus encoded image bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMessage {
    pub frame_ref: FrameRef,
    pub image: Vec<u8>,
}

pub fn encode_frame_message(msg: &FrameMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_MAGIC.len() + 64 + msg.image.len());
    out.extend_from_slice(FRAME_MAGIC);
    put_frame_ref(&mut out, &msg.frame_ref);
    put_bytes(&mut out, &msg.image);
    out
}

pub fn decode_frame_message(payload: &[u8]) -> Result<FrameMessage> {
    let mut rd = Reader::new(payload);
    rd.magic(FRAME_MAGIC).context("camera envelope")?;
    let frame_ref = take_frame_ref(&mut rd).context("frame ref")?;
    let image = rd.bytes().context("image payload")?.to_vec();
    rd.finish()?;
    Ok(FrameMessage { frame_ref, image })
}

pub fn encode_road_message(msg: &RoadMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(ROAD_MAGIC.len() + 96 + msg.contour.len() * 8);
    out.extend_from_slice(ROAD_MAGIC);
    put_u32(&mut out, msg.contour.len() as u32);
    for point in &msg.contour {
        put_i32(&mut out, point.x);
        put_i32(&mut out, point.y);
    }
    put_i32(&mut out, msg.ellipse.center.x);
    put_i32(&mut out, msg.ellipse.center.y);
    put_i32(&mut out, msg.ellipse.width);
    put_i32(&mut out, msg.ellipse.height);
    put_f32(&mut out, msg.ellipse.angle);
    put_f32(&mut out, msg.ellipse.confidence);
    put_frame_ref(&mut out, &msg.frame_ref);
    out
}

pub fn decode_road_message(payload: &[u8]) -> Result<RoadMessage> {
    let mut rd = Reader::new(payload);
    rd.magic(ROAD_MAGIC).context("road envelope")?;

    let count = rd.u32().context("contour length")? as usize;
    let mut contour = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let x = rd.i32()?;
        let y = rd.i32()?;
        contour.push(Point::new(x, y));
    }

    let ellipse = Ellipse {
        center: Point::new(rd.i32()?, rd.i32()?),
        width: rd.i32()?,
        height: rd.i32()?,
        angle: rd.f32()?,
        confidence: rd.f32()?,
    };
    let frame_ref = take_frame_ref(&mut rd).context("frame ref")?;
    rd.finish()?;

    Ok(RoadMessage {
        contour,
        ellipse,
        frame_ref,
    })
}

fn put_frame_ref(out: &mut Vec<u8>, frame_ref: &FrameRef) {
    put_bytes(out, frame_ref.name.as_bytes());
    put_bytes(out, frame_ref.id.as_bytes());
    out.extend_from_slice(&frame_ref.created_at.timestamp().to_le_bytes());
    put_u32(out, frame_ref.created_at.timestamp_subsec_nanos());
}

fn take_frame_ref(rd: &mut Reader<'_>) -> Result<FrameRef> {
    let name = rd.string().context("name")?;
    let id = rd.string().context("id")?;
    let secs = rd.i64().context("timestamp seconds")?;
    let nanos = rd.u32().context("timestamp nanos")?;
    let created_at = Utc
        .timestamp_opt(secs, nanos)
        .single()
        .context("timestamp out of range")?;
    Ok(FrameRef {
        name,
        id,
        created_at,
    })
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            bail!("truncated: wanted {n} more bytes, have {}", self.buf.len());
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn magic(&mut self, expected: &[u8; 5]) -> Result<()> {
        let got = self.take(expected.len())?;
        if got != expected {
            bail!("bad magic {got:?}");
        }
        Ok(())
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into()?))
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String> {
        Ok(std::str::from_utf8(self.bytes()?)?.to_string())
    }

    fn finish(&self) -> Result<()> {
        if !self.buf.is_empty() {
            bail!("{} trailing bytes", self.buf.len());
        }
        Ok(())
    }
}
