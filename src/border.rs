//! Horizontal black border detection.
//!
//! Letterboxed content (a wide picture inside a 16:9 frame with black
//! bars above and below) is a strong broadcast signal on channels that
//! show commercials full-frame. The detector samples two 20-line strips
//! near the top and bottom edge; both must be dark for the frame to count,
//! and a run has to last four minutes before a transition is committed.

use crate::decoder::DecodedFrame;
use crate::stream_info::StreamContext;

/// Height of each sampled strip in lines.
const CHECK_HEIGHT: usize = 20;
/// Mean luma at or below which a strip counts as black.
const BRIGHTNESS: u64 = 20;
/// Lines skipped at the very edge of the picture.
const OFFSET: usize = 5;
/// Seconds a border run must last before it is committed.
const MIN_SECS: f64 = 240.0;

/// Committed border state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderState {
    /// No run committed yet.
    Uninitialized,
    /// Borders present.
    Border,
    /// Borders absent.
    NoBorder,
}

/// A committed border transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderEvent {
    /// Borders appeared at `frame`, confirmed at `detected_at`.
    Start {
        /// First frame of the run.
        frame: u64,
        /// Frame that confirmed the run.
        detected_at: u64,
    },
    /// Borders vanished after `frame`, noticed at `detected_at`.
    Stop {
        /// Last frame with borders.
        frame: u64,
        /// First frame without borders.
        detected_at: u64,
    },
}

/// Black border detector for one recording.
#[derive(Debug, Clone)]
pub struct BorderDetector {
    state: BorderState,
    border_frame: Option<u64>,
}

impl Default for BorderDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl BorderDetector {
    /// A fresh detector.
    pub fn new() -> Self {
        Self {
            state: BorderState::Uninitialized,
            border_frame: None,
        }
    }

    /// Committed state.
    pub fn state(&self) -> BorderState {
        self.state
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Analyze one picture.
    pub fn process(
        &mut self,
        context: &StreamContext,
        picture: &DecodedFrame,
        frame_number: u64,
    ) -> Option<BorderEvent> {
        let fps = context.fps();
        if fps <= 0.0 || context.video.aspect_ratio.num == 4 {
            return None;
        }
        let bordered = has_borders(picture)?;
        self.update(frame_number, bordered, fps)
    }

    /// Advance the state machine with one frame's border verdict.
    pub fn update(&mut self, frame_number: u64, bordered: bool, fps: f64) -> Option<BorderEvent> {
        let min_frames = fps * MIN_SECS;
        if bordered {
            let Some(start) = self.border_frame else {
                self.border_frame = Some(frame_number);
                return None;
            };
            let confirmed = frame_number as f64 > start as f64 + min_frames;
            match self.state {
                BorderState::Uninitialized if confirmed => self.state = BorderState::Border,
                BorderState::NoBorder if confirmed => {
                    self.state = BorderState::Border;
                    return Some(BorderEvent::Start {
                        frame: start,
                        detected_at: frame_number,
                    });
                }
                BorderState::Border => self.border_frame = Some(frame_number),
                _ => {}
            }
            return None;
        }

        match self.border_frame.take() {
            Some(last) if self.state == BorderState::Border => {
                self.state = BorderState::NoBorder;
                Some(BorderEvent::Stop {
                    frame: last,
                    detected_at: frame_number,
                })
            }
            Some(_) => None,
            None => {
                self.state = BorderState::NoBorder;
                None
            }
        }
    }
}

/// Whether both the bottom and the top strip of `picture` are black.
///
/// `None` when the picture is too small to sample.
pub fn has_borders(picture: &DecodedFrame) -> Option<bool> {
    let height = (picture.height as usize).checked_sub(OFFSET)?;
    let bottom = height.checked_sub(CHECK_HEIGHT)?;
    if strip_mean(picture, bottom, height)? > BRIGHTNESS {
        return Some(false);
    }
    Some(strip_mean(picture, OFFSET, OFFSET + CHECK_HEIGHT)? <= BRIGHTNESS)
}

fn strip_mean(picture: &DecodedFrame, from: usize, to: usize) -> Option<u64> {
    let mut sum = 0u64;
    let mut count = 0u64;
    for y in from..to {
        let row = picture.luma_row(y)?;
        sum += row.iter().map(|&value| u64::from(value)).sum::<u64>();
        count += row.len() as u64;
    }
    (count > 0).then(|| sum / count)
}
