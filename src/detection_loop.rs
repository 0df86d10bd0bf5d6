/// Detection loop module
///
/// Pulls frames from a `FrameSource`, records them, feeds them to a
/// `KeywordDetector` and fires the reaction on every match. Runs on a single
/// thread until a stop is requested or the source/detector fails.

use crate::detector::{DetectorError, KeywordDetector, KeywordSpec};
use crate::frame_source::FrameSource;
use crate::reaction::Reaction;
use crate::recording::RecordingBuffer;
use crate::session::SessionError;
use chrono::{DateTime, Local};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Frames between progress log lines (~32s at 16kHz / 512)
const PROGRESS_INTERVAL: u64 = 1000;

/// Cooperative stop signal
///
/// Checked by the loop once per iteration, after a read completes and before
/// the next one starts.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A keyword match, handed to the reaction and then dropped
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    /// Index into the session's keyword table
    pub keyword_index: usize,
    pub label: String,
    pub timestamp: DateTime<Local>,
}

/// Counters for one run of the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_processed: u64,
    pub detections: u64,
    pub reaction_failures: u64,
}

/// Run until `stop` is requested, the source fails, or the detector fails
///
/// Frames are appended to `recorder` (if any) before detection, so on error
/// the recorder holds every frame that was read successfully.
pub fn run_detection_loop<S, D, R>(
    source: &mut S,
    detector: &mut D,
    keywords: &[KeywordSpec],
    reaction: &mut R,
    mut recorder: Option<&mut RecordingBuffer>,
    stop: &StopToken,
) -> Result<LoopStats, SessionError>
where
    S: FrameSource + ?Sized,
    D: KeywordDetector + ?Sized,
    R: Reaction + ?Sized,
{
    let frame_length = source.format().frame_length;
    let mut stats = LoopStats::default();

    info!(
        "Detection loop started ({} keyword(s), {} samples per frame)",
        keywords.len(),
        frame_length
    );
    reaction.on_ready(keywords);

    while !stop.is_stop_requested() {
        let frame = source.read_frame()?;

        if frame.len() != frame_length {
            return Err(SessionError::Stream(format!(
                "frame {} has {} samples, expected {}",
                frame.sequence(),
                frame.len(),
                frame_length
            )));
        }

        if let Some(recorder) = recorder.as_deref_mut() {
            recorder.append(&frame);
        }
        stats.frames_processed += 1;

        let matched = detector.process(frame.samples()).map_err(SessionError::Detector)?;

        if let Some(index) = matched {
            let keyword = keywords.get(index).ok_or_else(|| {
                SessionError::Detector(DetectorError::Process(format!(
                    "keyword index {} out of range ({} keywords)",
                    index,
                    keywords.len()
                )))
            })?;

            let event = DetectionEvent {
                keyword_index: index,
                label: keyword.label.clone(),
                timestamp: Local::now(),
            };
            stats.detections += 1;

            info!("Detected '{}' at frame {}", event.label, frame.sequence());

            if !dispatch(reaction, &event) {
                stats.reaction_failures += 1;
            }
        }

        if stats.frames_processed % PROGRESS_INTERVAL == 0 {
            debug!(
                "Processed {} frames, {} detection(s)",
                stats.frames_processed, stats.detections
            );
        }
    }

    info!(
        "Detection loop stopped after {} frames ({} detection(s), {} failed reaction(s))",
        stats.frames_processed, stats.detections, stats.reaction_failures
    );

    Ok(stats)
}

/// Invoke the reaction, containing both errors and panics
fn dispatch<R: Reaction + ?Sized>(reaction: &mut R, event: &DetectionEvent) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| reaction.react(event))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("Reaction to '{}' failed: {}", event.label, e);
            false
        }
        Err(payload) => {
            error!(
                "Reaction to '{}' panicked: {}",
                event.label,
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
