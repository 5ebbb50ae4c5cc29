use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of landmarks the hand model produces per hand.
pub const NUM_LANDMARKS: usize = 21;

/// A point in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// A hand landmark converted to pixel space.
///
/// `z` is the model's relative depth (wrist-relative, smaller is closer to the camera),
/// scaled by the frame width so it shares units with `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Landmark {
    /// Drops the depth component.
    pub fn xy(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A landmark as produced by the predictor, in normalized image coordinates.
///
/// `x` and `y` are in `[0, 1]` relative to frame width and height (values slightly outside
/// that range occur when a hand is partially out of frame).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedLandmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Anatomical position of each of the 21 hand landmarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist = 0,
    ThumbCmc = 1,
    ThumbMcp = 2,
    ThumbIp = 3,
    ThumbTip = 4,
    IndexMcp = 5,
    IndexPip = 6,
    IndexDip = 7,
    IndexTip = 8,
    MiddleMcp = 9,
    MiddlePip = 10,
    MiddleDip = 11,
    MiddleTip = 12,
    RingMcp = 13,
    RingPip = 14,
    RingDip = 15,
    RingTip = 16,
    PinkyMcp = 17,
    PinkyPip = 18,
    PinkyDip = 19,
    PinkyTip = 20,
}

/// Skeleton edges between landmarks, used for drawing.
pub const HAND_CONNECTIONS: [(LandmarkIdx, LandmarkIdx); 21] = {
    use LandmarkIdx::*;
    [
        (Wrist, ThumbCmc),
        (ThumbCmc, ThumbMcp),
        (ThumbMcp, ThumbIp),
        (ThumbIp, ThumbTip),
        (Wrist, IndexMcp),
        (IndexMcp, IndexPip),
        (IndexPip, IndexDip),
        (IndexDip, IndexTip),
        (IndexMcp, MiddleMcp),
        (MiddleMcp, MiddlePip),
        (MiddlePip, MiddleDip),
        (MiddleDip, MiddleTip),
        (MiddleMcp, RingMcp),
        (RingMcp, RingPip),
        (RingPip, RingDip),
        (RingDip, RingTip),
        (RingMcp, PinkyMcp),
        (Wrist, PinkyMcp),
        (PinkyMcp, PinkyPip),
        (PinkyPip, PinkyDip),
        (PinkyDip, PinkyTip),
    ]
};

/// Which hand a detection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    /// Returns the opposite hand.
    ///
    /// The model labels hands as seen in a mirrored (selfie) image, so a front-facing
    /// camera frame passed through as-is needs its labels swapped.
    pub fn mirrored(self) -> Self {
        match self {
            Handedness::Left => Handedness::Right,
            Handedness::Right => Handedness::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Handedness::Left => "Left",
            Handedness::Right => "Right",
        }
    }
}

impl fmt::Display for Handedness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown handedness label: {0:?} (expected \"Left\" or \"Right\")")]
pub struct ParseHandednessError(pub String);

impl FromStr for Handedness {
    type Err = ParseHandednessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Left" => Ok(Handedness::Left),
            "Right" => Ok(Handedness::Right),
            other => Err(ParseHandednessError(other.to_string())),
        }
    }
}

/// Axis-aligned pixel rectangle: top-left corner plus size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    /// Tight enclosure of a set of points. Returns `None` for an empty set.
    ///
    /// Extents saturate at `i32::MAX`, so width and height are never negative.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Point>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (xmin, ymin, xmax, ymax) = iter.fold(
            (first.x, first.y, first.x, first.y),
            |(xmin, ymin, xmax, ymax), p| (xmin.min(p.x), ymin.min(p.y), xmax.max(p.x), ymax.max(p.y)),
        );
        Some(Self {
            x: xmin,
            y: ymin,
            width: xmax.saturating_sub(xmin),
            height: ymax.saturating_sub(ymin),
        })
    }

    /// Tight enclosure of a hand's landmarks (x/y only).
    pub fn from_landmarks(landmarks: &[Landmark; NUM_LANDMARKS]) -> Self {
        Self::from_points(landmarks.iter().map(Landmark::xy)).unwrap_or_default()
    }

    /// Box origin plus half the box size, integer-truncated.
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Corner form: `(xmin, ymin, xmax, ymax)`.
    pub fn corners(&self) -> (i32, i32, i32, i32) {
        (self.x, self.y, self.x + self.width, self.y + self.height)
    }

    /// Inclusive containment test.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    /// Grows the box by `margin` pixels on every side, saturating at the `i32` range.
    pub fn expanded(&self, margin: i32) -> Self {
        Self {
            x: self.x.saturating_sub(margin),
            y: self.y.saturating_sub(margin),
            width: self.width.saturating_add(margin.saturating_mul(2)),
            height: self.height.saturating_add(margin.saturating_mul(2)),
        }
    }

    /// Intersection-over-Union with another box. Zero-area boxes never overlap.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_area = ((x2 - x1).max(0) as f32) * ((y2 - y1).max(0) as f32);
        let area_a = self.width as f32 * self.height as f32;
        let area_b = other.width as f32 * other.height as f32;
        let union_area = area_a + area_b - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

/// A hand as reported by the landmark predictor, before pixel conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHand {
    pub landmarks: [NormalizedLandmark; NUM_LANDMARKS],
    /// Label as the model reports it (not yet mirrored).
    pub handedness: Handedness,
    /// Hand presence confidence in [0, 1].
    pub score: f32,
}

/// One detected hand in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandRecord {
    pub landmarks: [Landmark; NUM_LANDMARKS],
    pub bbox: BoundingBox,
    pub center: Point,
    pub handedness: Handedness,
    pub score: f32,
}

impl HandRecord {
    pub fn landmark(&self, idx: LandmarkIdx) -> Landmark {
        self.landmarks[idx as usize]
    }
}

/// The five digits, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Finger {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Finger {
    pub const ALL: [Finger; 5] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Pinky,
    ];

    /// Landmark at the tip of this digit.
    pub fn tip(self) -> LandmarkIdx {
        match self {
            Finger::Thumb => LandmarkIdx::ThumbTip,
            Finger::Index => LandmarkIdx::IndexTip,
            Finger::Middle => LandmarkIdx::MiddleTip,
            Finger::Ring => LandmarkIdx::RingTip,
            Finger::Pinky => LandmarkIdx::PinkyTip,
        }
    }
}

/// Per-digit extension flags in [`Finger::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FingerState(pub [bool; 5]);

impl FingerState {
    /// Flags as `1` (extended) / `0` (folded).
    pub fn bits(&self) -> [u8; 5] {
        self.0.map(u8::from)
    }

    pub fn is_extended(&self, finger: Finger) -> bool {
        self.0[finger as usize]
    }

    /// Number of extended digits.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&up| up).count()
    }
}

/// Result of measuring the distance between two points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceInfo {
    pub length: f64,
    pub p1: Point,
    pub p2: Point,
    pub midpoint: Point,
}

impl DistanceInfo {
    /// Flat `(x1, y1, x2, y2, cx, cy)` form.
    pub fn as_tuple(&self) -> (i32, i32, i32, i32, i32, i32) {
        (
            self.p1.x,
            self.p1.y,
            self.p2.x,
            self.p2.y,
            self.midpoint.x,
            self.midpoint.y,
        )
    }
}
