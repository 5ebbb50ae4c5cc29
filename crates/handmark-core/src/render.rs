//! Overlay drawing for hand records and distance measurements.
//!
//! Kept apart from [`crate::features`]: these functions only consume already computed
//! results and paint them onto a frame. Anything outside the frame is clipped.

use crate::types::{BoundingBox, DistanceInfo, HandRecord, Point, HAND_CONNECTIONS};
use embedded_graphics::{
    mono_font::{ascii::FONT_10X20, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::{DrawTarget, Drawable, OriginDimensions, Primitive, RgbColor, Size},
    primitives::{Circle, Line, PrimitiveStyle, Rectangle},
    text::Text,
    Pixel,
};
use image::{Rgb, RgbImage};
use std::convert::Infallible;

const HIGHLIGHT: Rgb888 = Rgb888::new(255, 0, 255);
const POSITION_BOX: Rgb888 = Rgb888::new(0, 255, 0);
const LANDMARK_DOT: Rgb888 = Rgb888::new(255, 0, 0);
const SKELETON: Rgb888 = Rgb888::new(224, 224, 224);

/// Padding between the landmark box and the drawn rectangle.
const BOX_MARGIN: i32 = 20;
/// Offset of the handedness label from the box's top-left corner.
const LABEL_OFFSET: i32 = 30;
const DISTANCE_MARKER_RADIUS: u32 = 15;
const POSITION_MARKER_RADIUS: u32 = 5;

/// `embedded-graphics` draw target over an RGB frame.
struct Canvas<'a>(&'a mut RgbImage);

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.0.width(), self.0.height())
    }
}

impl DrawTarget for Canvas<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (width, height) = self.0.dimensions();
        for Pixel(pos, color) in pixels {
            if pos.x >= 0 && pos.y >= 0 && (pos.x as u32) < width && (pos.y as u32) < height {
                self.0
                    .put_pixel(pos.x as u32, pos.y as u32, Rgb([color.r(), color.g(), color.b()]));
            }
        }
        Ok(())
    }
}

fn paint<T>(canvas: &mut Canvas<'_>, item: &T)
where
    T: Drawable<Color = Rgb888>,
{
    match item.draw(canvas) {
        Ok(_) => {}
        Err(never) => match never {},
    }
}

fn eg_point(p: Point) -> embedded_graphics::prelude::Point {
    embedded_graphics::prelude::Point::new(p.x, p.y)
}

fn dot(canvas: &mut Canvas<'_>, center: Point, radius: u32, color: Rgb888) {
    paint(
        canvas,
        &Circle::with_center(eg_point(center), radius * 2 + 1)
            .into_styled(PrimitiveStyle::with_fill(color)),
    );
}

fn line(canvas: &mut Canvas<'_>, from: Point, to: Point, color: Rgb888, width: u32) {
    paint(
        canvas,
        &Line::new(eg_point(from), eg_point(to)).into_styled(PrimitiveStyle::with_stroke(color, width)),
    );
}

fn rect(canvas: &mut Canvas<'_>, bbox: BoundingBox, color: Rgb888) {
    let (xmin, ymin, xmax, ymax) = bbox.corners();
    paint(
        canvas,
        &Rectangle::with_corners(
            embedded_graphics::prelude::Point::new(xmin, ymin),
            embedded_graphics::prelude::Point::new(xmax, ymax),
        )
        .into_styled(PrimitiveStyle::with_stroke(color, 2)),
    );
}

/// Draw each hand's skeleton, landmarks, padded bounding box and handedness label.
pub fn draw_hands(frame: &mut RgbImage, hands: &[HandRecord]) {
    let mut canvas = Canvas(frame);

    for hand in hands {
        for (a, b) in HAND_CONNECTIONS {
            line(
                &mut canvas,
                hand.landmark(a).xy(),
                hand.landmark(b).xy(),
                SKELETON,
                2,
            );
        }
        for lm in &hand.landmarks {
            dot(&mut canvas, lm.xy(), 2, LANDMARK_DOT);
        }

        rect(&mut canvas, hand.bbox.expanded(BOX_MARGIN), HIGHLIGHT);

        let style = MonoTextStyle::new(&FONT_10X20, HIGHLIGHT);
        let label_at = embedded_graphics::prelude::Point::new(
            hand.bbox.x - LABEL_OFFSET,
            hand.bbox.y - LABEL_OFFSET,
        );
        paint(&mut canvas, &Text::new(hand.handedness.as_str(), label_at, style));
    }
}

/// Draw markers at both measured points and their midpoint, joined by a line.
pub fn draw_distance(frame: &mut RgbImage, info: &DistanceInfo) {
    let mut canvas = Canvas(frame);
    dot(&mut canvas, info.p1, DISTANCE_MARKER_RADIUS, HIGHLIGHT);
    dot(&mut canvas, info.p2, DISTANCE_MARKER_RADIUS, HIGHLIGHT);
    line(&mut canvas, info.p1, info.p2, HIGHLIGHT, 3);
    dot(&mut canvas, info.midpoint, DISTANCE_MARKER_RADIUS, HIGHLIGHT);
}

/// Draw a landmark listing as produced by [`crate::Detection::find_position`].
pub fn draw_position(frame: &mut RgbImage, landmarks: &[(usize, Point)], bbox: BoundingBox) {
    let mut canvas = Canvas(frame);
    for (_, p) in landmarks {
        dot(&mut canvas, *p, POSITION_MARKER_RADIUS, HIGHLIGHT);
    }
    rect(&mut canvas, bbox.expanded(BOX_MARGIN), POSITION_BOX);
}
