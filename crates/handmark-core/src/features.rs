//! Geometric features derived from hand landmarks.
//!
//! Everything here is pure: no drawing, no predictor access, no hidden state.

use crate::types::{
    BoundingBox, DistanceInfo, Finger, FingerState, HandRecord, Handedness, Landmark, LandmarkIdx,
    Point, RawHand, NUM_LANDMARKS,
};

/// How far past the frame (in frame sizes) a landmark may lie before it is clamped.
const OFFSCREEN_LIMIT: f32 = 4.0;

/// Convert a predictor hand into a pixel-space [`HandRecord`].
///
/// Coordinates are scaled by frame width (`x`, `z`) and height (`y`) and truncated toward
/// zero. Normalized values are first clamped to `OFFSCREEN_LIMIT` frame sizes beyond
/// either edge. The label is swapped when `mirror_handedness` is set.
pub fn hand_record(raw: &RawHand, width: u32, height: u32, mirror_handedness: bool) -> HandRecord {
    let w = width as f32;
    let h = height as f32;
    let clamp = |v: f32| v.clamp(-OFFSCREEN_LIMIT, 1.0 + OFFSCREEN_LIMIT);

    let landmarks: [Landmark; NUM_LANDMARKS] = raw.landmarks.map(|lm| Landmark {
        x: (clamp(lm.x) * w) as i32,
        y: (clamp(lm.y) * h) as i32,
        z: (clamp(lm.z) * w) as i32,
    });

    let bbox = BoundingBox::from_landmarks(&landmarks);
    let handedness = if mirror_handedness {
        raw.handedness.mirrored()
    } else {
        raw.handedness
    };

    HandRecord {
        landmarks,
        bbox,
        center: bbox.center(),
        handedness,
        score: raw.score,
    }
}

/// Which digits are extended.
///
/// The thumb moves mostly sideways, so it is judged on x against the joint below its tip,
/// with the direction depending on handedness. The other four are judged on y against the
/// joint two positions below the tip; image y grows downward, so "up" is a smaller y.
pub fn fingers_up(hand: &HandRecord) -> FingerState {
    let mut flags = [false; 5];

    let thumb_tip = hand.landmark(LandmarkIdx::ThumbTip);
    let thumb_joint = hand.landmark(LandmarkIdx::ThumbIp);
    flags[0] = match hand.handedness {
        Handedness::Right => thumb_tip.x > thumb_joint.x,
        Handedness::Left => thumb_tip.x < thumb_joint.x,
    };

    for (i, finger) in Finger::ALL.iter().enumerate().skip(1) {
        let tip = finger.tip() as usize;
        flags[i] = hand.landmarks[tip].y < hand.landmarks[tip - 2].y;
    }

    FingerState(flags)
}

/// Euclidean distance between two points, with their midpoint.
///
/// The midpoint uses floor division, so `(0,0)`–`(3,4)` yields `(1,2)`.
pub fn distance(p1: Point, p2: Point) -> DistanceInfo {
    let dx = f64::from(p2.x) - f64::from(p1.x);
    let dy = f64::from(p2.y) - f64::from(p1.y);
    let midpoint = Point::new(midpoint(p1.x, p2.x), midpoint(p1.y, p2.y));

    DistanceInfo {
        length: dx.hypot(dy),
        p1,
        p2,
        midpoint,
    }
}

/// Floor of the mean, computed wide; always lies between `a` and `b`.
fn midpoint(a: i32, b: i32) -> i32 {
    (i64::from(a) + i64::from(b)).div_euclid(2) as i32
}
