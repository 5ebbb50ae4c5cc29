//! The per-frame loop shared by `run` and `image`: acquire, detect, derive, present.

use anyhow::{bail, Result};
use handmark_core::{
    render, BoundingBox, DetectOptions, Detection, DistanceInfo, HandDetector, Handedness,
    LandmarkIdx, LandmarkPredictor, Point,
};
use handmark_hw::FrameSource;
use image::RgbImage;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// What one frame produced, in the shape printed as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub frame: u32,
    pub hands: Vec<HandSummary>,
    /// Distance between the index fingertips when two hands are visible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_distance: Option<DistanceInfo>,
    /// `[id, x, y]` for every landmark of the hand selected with `position_hand`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec<[i32; 3]>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandSummary {
    pub handedness: Handedness,
    pub bbox: BoundingBox,
    pub center: Point,
    pub score: f32,
    pub fingers: [u8; 5],
}

/// Derive the report for one detection: finger state per hand and, with two hands,
/// the distance between their index fingertips.
pub fn analyze(frame: u32, detection: &Detection) -> Result<FrameReport> {
    let mut hands = Vec::with_capacity(detection.hands.len());
    for (i, hand) in detection.hands.iter().enumerate() {
        hands.push(HandSummary {
            handedness: hand.handedness,
            bbox: hand.bbox,
            center: hand.center,
            score: hand.score,
            fingers: detection.fingers_up(i)?.bits(),
        });
    }

    let index_distance = if detection.hands.len() >= 2 {
        let a = detection.hand(0)?.landmark(LandmarkIdx::IndexTip).xy();
        let b = detection.hand(1)?.landmark(LandmarkIdx::IndexTip).xy();
        Some(handmark_core::distance(a, b))
    } else {
        None
    };

    Ok(FrameReport {
        frame,
        hands,
        index_distance,
        position: None,
    })
}

/// Where processed frames go.
pub trait FrameSink {
    /// Present one frame. Returning `false` asks the loop to stop.
    fn present(&mut self, image: &RgbImage, report: &FrameReport) -> Result<bool>;
}

/// Prints one JSON line per frame.
pub struct JsonSink<W> {
    out: W,
}

impl<W: std::io::Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: std::io::Write> FrameSink for JsonSink<W> {
    fn present(&mut self, _image: &RgbImage, report: &FrameReport) -> Result<bool> {
        serde_json::to_writer(&mut self.out, report)?;
        writeln!(self.out)?;
        Ok(true)
    }
}

/// Loop settings.
#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    pub detect: DetectOptions,
    /// Stop after this many processed frames.
    pub max_frames: Option<usize>,
    /// Consecutive acquisition failures tolerated before giving up.
    pub max_capture_failures: usize,
    /// Also report (and draw) the landmark listing of this hand, when present.
    pub position_hand: Option<usize>,
}

/// Detect on one image and build its report; the returned image carries the overlays
/// when drawing is enabled.
pub fn process_frame<P: LandmarkPredictor>(
    detector: &mut HandDetector<P>,
    frame: RgbImage,
    sequence: u32,
    options: &LoopOptions,
) -> Result<(RgbImage, FrameReport)> {
    let result = detector.find_hands(&frame, options.detect)?;
    let mut report = analyze(sequence, &result.detection)?;
    let mut shown = result.annotated.unwrap_or(frame);
    let draw = options.detect.draw;

    if let Some(info) = report.index_distance.as_ref().filter(|_| draw) {
        render::draw_distance(&mut shown, info);
    }

    if let Some(index) = options.position_hand {
        match result.detection.find_position(index) {
            Ok((landmarks, bbox)) => {
                if draw {
                    render::draw_position(&mut shown, &landmarks, bbox);
                }
                report.position = Some(
                    landmarks
                        .iter()
                        .map(|&(id, p)| [id as i32, p.x, p.y])
                        .collect(),
                );
            }
            Err(e) => tracing::debug!(error = %e, "no landmark listing for this frame"),
        }
    }

    Ok((shown, report))
}

/// Process frames until the source ends, the sink declines, `stop` is raised, or
/// `max_frames` is reached. Returns the number of frames processed.
pub fn run_loop<S, P, K>(
    source: &mut S,
    detector: &mut HandDetector<P>,
    sink: &mut K,
    options: LoopOptions,
    stop: &AtomicBool,
) -> Result<usize>
where
    S: FrameSource + ?Sized,
    P: LandmarkPredictor,
    K: FrameSink + ?Sized,
{
    let mut processed = 0usize;
    let mut failures = 0usize;

    while !stop.load(Ordering::Relaxed) {
        if options.max_frames.is_some_and(|max| processed >= max) {
            break;
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => {
                failures = 0;
                frame
            }
            Ok(None) => {
                tracing::info!("frame source exhausted");
                break;
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(error = %e, failures, "frame acquisition failed");
                if failures > options.max_capture_failures {
                    bail!("giving up after {failures} consecutive capture failures: {e}");
                }
                continue;
            }
        };

        let (shown, report) = process_frame(detector, frame.image, frame.sequence, &options)?;
        processed += 1;
        if !sink.present(&shown, &report)? {
            tracing::info!("output closed");
            break;
        }
    }

    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use handmark_core::{DetectorError, NormalizedLandmark, RawHand, NUM_LANDMARKS};
    use handmark_hw::{CaptureError, Frame};
    use std::collections::VecDeque;

    struct FakeSource {
        items: VecDeque<Result<Option<Frame>, CaptureError>>,
    }

    impl FakeSource {
        fn frames(n: usize) -> Self {
            Self {
                items: (0..n)
                    .map(|i| Ok(Some(Frame::new(RgbImage::new(320, 240), i as u32))))
                    .collect(),
            }
        }
    }

    impl FrameSource for FakeSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
            self.items.pop_front().unwrap_or(Ok(None))
        }
    }

    /// Always reports the same hands.
    struct FixedPredictor(Vec<RawHand>);

    impl LandmarkPredictor for FixedPredictor {
        fn predict(&mut self, _frame: &RgbImage) -> Result<Vec<RawHand>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct CollectSink {
        reports: Vec<FrameReport>,
        images: Vec<RgbImage>,
        accept: Option<usize>,
    }

    impl FrameSink for CollectSink {
        fn present(&mut self, image: &RgbImage, report: &FrameReport) -> Result<bool> {
            self.reports.push(report.clone());
            self.images.push(image.clone());
            Ok(self.accept.map_or(true, |n| self.reports.len() < n))
        }
    }

    /// A flat hand: every landmark on a row at height `y`, spread from `x` to `x + 0.2`.
    fn flat_hand(x: f32, y: f32, handedness: Handedness) -> RawHand {
        RawHand {
            landmarks: std::array::from_fn(|i| NormalizedLandmark {
                x: x + 0.2 * i as f32 / NUM_LANDMARKS as f32,
                y,
                z: 0.0,
            }),
            handedness,
            score: 0.9,
        }
    }

    fn options() -> LoopOptions {
        LoopOptions {
            detect: DetectOptions::default(),
            max_frames: None,
            max_capture_failures: 2,
            position_hand: None,
        }
    }

    #[test]
    fn test_loop_runs_until_source_ends() {
        let mut source = FakeSource::frames(3);
        let mut detector = HandDetector::new(FixedPredictor(vec![]));
        let mut sink = CollectSink::default();

        let n = run_loop(&mut source, &mut detector, &mut sink, options(), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(n, 3);
        assert!(sink.reports.iter().all(|r| r.hands.is_empty()));
        assert_eq!(
            sink.reports.iter().map(|r| r.frame).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_loop_respects_max_frames_and_stop() {
        let mut detector = HandDetector::new(FixedPredictor(vec![]));

        let mut sink = CollectSink::default();
        let opts = LoopOptions { max_frames: Some(2), ..options() };
        let n = run_loop(&mut FakeSource::frames(5), &mut detector, &mut sink, opts, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(n, 2);

        let mut sink = CollectSink::default();
        let n = run_loop(&mut FakeSource::frames(5), &mut detector, &mut sink, options(), &AtomicBool::new(true))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_loop_stops_when_sink_declines() {
        let mut detector = HandDetector::new(FixedPredictor(vec![]));
        let mut sink = CollectSink { accept: Some(1), ..Default::default() };
        let n = run_loop(&mut FakeSource::frames(5), &mut detector, &mut sink, options(), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_loop_retries_transient_capture_failures() {
        let mut source = FakeSource::frames(0);
        source.items.push_back(Err(CaptureError::CaptureFailed("glitch".into())));
        source.items.push_back(Err(CaptureError::CaptureFailed("glitch".into())));
        source.items.push_back(Ok(Some(Frame::new(RgbImage::new(8, 8), 7))));

        let mut detector = HandDetector::new(FixedPredictor(vec![]));
        let mut sink = CollectSink::default();
        let n = run_loop(&mut source, &mut detector, &mut sink, options(), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(sink.reports[0].frame, 7);
    }

    #[test]
    fn test_loop_gives_up_after_repeated_failures() {
        let mut source = FakeSource::frames(0);
        for _ in 0..3 {
            source.items.push_back(Err(CaptureError::CaptureFailed("unplugged".into())));
        }
        let mut detector = HandDetector::new(FixedPredictor(vec![]));
        let mut sink = CollectSink::default();
        let err = run_loop(&mut source, &mut detector, &mut sink, options(), &AtomicBool::new(false))
            .unwrap_err();
        assert!(err.to_string().contains("3 consecutive capture failures"));
    }

    #[test]
    fn test_two_hands_report_index_distance() {
        let hands = vec![
            flat_hand(0.1, 0.5, Handedness::Right),
            flat_hand(0.6, 0.5, Handedness::Left),
        ];
        let mut detector = HandDetector::new(FixedPredictor(hands));
        let mut sink = CollectSink::default();
        run_loop(&mut FakeSource::frames(1), &mut detector, &mut sink, options(), &AtomicBool::new(false))
            .unwrap();

        let report = &sink.reports[0];
        assert_eq!(report.hands.len(), 2);
        // Mirrored by default.
        assert_eq!(report.hands[0].handedness, Handedness::Left);

        let info = report.index_distance.unwrap();
        assert_eq!(info.p1.y, info.p2.y);
        assert!((info.length - f64::from(info.p2.x - info.p1.x)).abs() < 1e-9);

        // The midpoint marker is drawn on the presented image.
        let mid = info.midpoint;
        assert_eq!(sink.images[0].get_pixel(mid.x as u32, mid.y as u32).0, [255, 0, 255]);
    }

    #[test]
    fn test_analyze_single_hand() {
        let detection = Detection {
            hands: vec![handmark_core::hand_record(
                &flat_hand(0.2, 0.3, Handedness::Right),
                100,
                100,
                false,
            )],
            width: 100,
            height: 100,
        };
        let report = analyze(4, &detection).unwrap();
        assert_eq!(report.frame, 4);
        assert!(report.index_distance.is_none());
        // Flat hand: thumb tip right of its joint, no finger above its joint.
        assert_eq!(report.hands[0].fingers, [1, 0, 0, 0, 0]);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("index_distance").is_none());
        assert_eq!(json["hands"][0]["handedness"], "Right");
    }

    #[test]
    fn test_position_listing_for_selected_hand() {
        let mut detector =
            HandDetector::new(FixedPredictor(vec![flat_hand(0.25, 0.5, Handedness::Right)]));
        let opts = LoopOptions { position_hand: Some(0), ..options() };

        let (shown, report) =
            process_frame(&mut detector, RgbImage::new(320, 240), 3, &opts).unwrap();
        let position = report.position.unwrap();
        assert_eq!(position.len(), NUM_LANDMARKS);
        assert_eq!(position[0], [0, 80, 120]);
        assert_eq!(position[8][0], 8);
        assert_eq!(shown.get_pixel(80, 120).0, [255, 0, 255]);

        // Asking for a hand that is not there leaves the listing out.
        let opts = LoopOptions { position_hand: Some(1), ..options() };
        let (_, report) = process_frame(&mut detector, RgbImage::new(320, 240), 4, &opts).unwrap();
        assert!(report.position.is_none());
    }

    #[test]
    fn test_json_sink_writes_lines() {
        let mut buf = Vec::new();
        {
            let mut sink = JsonSink::new(&mut buf);
            let report = FrameReport {
                frame: 1,
                hands: vec![],
                index_distance: None,
                position: None,
            };
            assert!(sink.present(&RgbImage::new(1, 1), &report).unwrap());
            assert!(sink.present(&RgbImage::new(1, 1), &report).unwrap());
        }
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with(r#"{"frame":1,"hands":[]}"#));
    }
}
