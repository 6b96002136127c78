//! Frames: one batch of points of a single format, plus rate and flags.

use crate::error::{Error, Result};
use crate::protocols::helios::protocol::{self, FrameFormat, MAX_POINTS, MAX_PPS};
use crate::types::{Capabilities, Point, PointExt, PointHighRes, WriteFrameFlags};

/// Borrowed points of one of the three formats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FramePoints<'a> {
    Standard(&'a [Point]),
    HighRes(&'a [PointHighRes]),
    Extended(&'a [PointExt]),
}

impl FramePoints<'_> {
    pub fn len(&self) -> usize {
        match self {
            FramePoints::Standard(points) => points.len(),
            FramePoints::HighRes(points) => points.len(),
            FramePoints::Extended(points) => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name of the point format, for log messages.
    pub fn format_name(&self) -> &'static str {
        match self {
            FramePoints::Standard(_) => "standard",
            FramePoints::HighRes(_) => "high-resolution",
            FramePoints::Extended(_) => "extended",
        }
    }
}

impl<'a> From<&'a [Point]> for FramePoints<'a> {
    fn from(points: &'a [Point]) -> Self {
        FramePoints::Standard(points)
    }
}

impl<'a> From<&'a [PointHighRes]> for FramePoints<'a> {
    fn from(points: &'a [PointHighRes]) -> Self {
        FramePoints::HighRes(points)
    }
}

impl<'a> From<&'a [PointExt]> for FramePoints<'a> {
    fn from(points: &'a [PointExt]) -> Self {
        FramePoints::Extended(points)
    }
}

/// A frame submitted for output.
///
/// Frames borrow their points; the session serializes them during the write
/// call and keeps nothing afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame<'a> {
    /// Output rate in points per second.
    pub pps: u32,
    pub flags: WriteFrameFlags,
    pub points: FramePoints<'a>,
}

impl<'a> Frame<'a> {
    pub fn new(pps: u32, flags: WriteFrameFlags, points: impl Into<FramePoints<'a>>) -> Self {
        Self {
            pps,
            flags,
            points: points.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Capabilities a device needs to accept this frame.
    pub fn required_capabilities(&self) -> Capabilities {
        match self.points {
            FramePoints::Standard(_) => Capabilities::empty(),
            FramePoints::HighRes(_) | FramePoints::Extended(_) => Capabilities::HIGH_RESOLUTION,
        }
    }

    /// Check rate, size and coordinate limits.
    ///
    /// Empty frames are valid here; callers treat them as a no-op.
    pub fn validate(&self) -> Result<()> {
        if self.pps == 0 || self.pps > MAX_PPS {
            return Err(Error::invalid_argument(format!(
                "pps must be between 1 and {}, got {}",
                MAX_PPS, self.pps
            )));
        }
        if self.points.len() > MAX_POINTS {
            return Err(Error::invalid_argument(format!(
                "frame has {} points, maximum is {}",
                self.points.len(),
                MAX_POINTS
            )));
        }
        if let FramePoints::Standard(points) = self.points {
            if let Some((index, point)) = points
                .iter()
                .enumerate()
                .find(|(_, p)| p.x > Point::MAX_COORDINATE || p.y > Point::MAX_COORDINATE)
            {
                return Err(Error::invalid_argument(format!(
                    "point {} at ({}, {}) exceeds {}",
                    index,
                    point.x,
                    point.y,
                    Point::MAX_COORDINATE
                )));
            }
        }
        Ok(())
    }

    /// Serialize the frame into the payload handed to the transport.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let encoded = match self.points {
            FramePoints::Standard(points) => {
                protocol::encode_standard_frame(self.pps, self.flags, points)
            }
            FramePoints::HighRes(points) => {
                protocol::encode_wide_frame(FrameFormat::HighResolution, self.pps, self.flags, points)
            }
            FramePoints::Extended(points) => {
                protocol::encode_wide_frame(FrameFormat::Extended, self.pps, self.flags, points)
            }
        };
        encoded.map_err(|e| Error::invalid_argument(format!("frame encoding failed: {e}")))
    }
}
