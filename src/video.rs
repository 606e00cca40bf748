//! Per-picture video analysis.
//!
//! [`VideoAnalyzer`] runs the logo and border detectors on a decoded
//! picture and tracks the display aspect ratio from the stream headers.
//! Every event of one analyzed frame is returned as a separate candidate
//! [`Mark`], in logo, border, aspect order.

use log::debug;

use crate::border::{BorderDetector, BorderEvent};
use crate::decoder::DecodedFrame;
use crate::logo::{LogoDetector, LogoEvent};
use crate::marks::{BroadcastAspect, Mark, MarkReason, MarkType};
use crate::stream_info::{AspectRatio, StreamContext};

/// Combines logo, border and aspect-ratio detection.
#[derive(Debug)]
pub struct VideoAnalyzer {
    logo: LogoDetector,
    border: BorderDetector,
    aspect_ratio: AspectRatio,
    last_frame: u64,
}

impl VideoAnalyzer {
    /// Create an analyzer around an already configured logo detector.
    pub fn new(logo: LogoDetector) -> Self {
        Self {
            logo,
            border: BorderDetector::new(),
            aspect_ratio: AspectRatio::default(),
            last_frame: 0,
        }
    }

    /// The logo detector.
    pub fn logo(&self) -> &LogoDetector {
        &self.logo
    }

    /// Reset all detector state.
    pub fn clear(&mut self) {
        self.aspect_ratio = AspectRatio::default();
        self.border.clear();
        self.logo.clear();
    }

    /// Analyze the I-frame `frame` (the previous one) while `next_frame`
    /// is the I-frame just seen.
    ///
    /// `picture` is the decoded picture, if decoding is active; without
    /// it only aspect-ratio tracking runs.
    pub fn process(
        &mut self,
        context: &StreamContext,
        picture: Option<&DecodedFrame>,
        frame: u64,
        next_frame: u64,
    ) -> Vec<Mark> {
        let mut marks = Vec::new();
        if frame == 0 && next_frame == 0 {
            return marks;
        }

        if let Some(picture) = picture {
            if !context.ignore_logo_detection
                && let Some(event) = self.logo.process(context, picture, frame)
            {
                marks.push(match event {
                    LogoEvent::Start { frame } => {
                        Mark::new(MarkType::LogoStart, frame, MarkReason::LogoStart { frame })
                    }
                    LogoEvent::Stop { frame } => {
                        Mark::new(MarkType::LogoStop, frame, MarkReason::LogoStop { frame })
                    }
                });
            }

            match self.border.process(context, picture, frame) {
                Some(BorderEvent::Start { frame, detected_at }) if frame > 0 => {
                    marks.push(Mark::new(
                        MarkType::BorderStart,
                        frame,
                        MarkReason::BorderStart { frame, detected_at },
                    ));
                }
                Some(BorderEvent::Stop { frame, detected_at }) if frame > 0 => {
                    marks.push(Mark::new(
                        MarkType::BorderStop,
                        frame,
                        MarkReason::BorderStop { frame, detected_at },
                    ));
                }
                _ => {}
            }
        }

        if !context.ignore_aspect_ratio {
            let current = context.video.aspect_ratio;
            if current.differs_from(&self.aspect_ratio) {
                marks.push(self.aspect_mark(context, current, frame, next_frame));
            }
            self.aspect_ratio = current;
        }
        self.last_frame = next_frame;
        marks
    }

    fn aspect_mark(
        &self,
        context: &StreamContext,
        current: AspectRatio,
        frame: u64,
        next_frame: u64,
    ) -> Mark {
        let broadcast = context.broadcast.aspect_ratio;
        let (mark_type, position, relation) = if !broadcast.is_known() {
            (MarkType::AspectChange, frame, BroadcastAspect::Unknown)
        } else if current == broadcast {
            (MarkType::AspectStart, next_frame, BroadcastAspect::Matches)
        } else {
            (MarkType::AspectStop, self.last_frame, BroadcastAspect::Differs)
        };
        debug!(
            "aspect ratio {} -> {current} at {position} ({mark_type})",
            self.aspect_ratio
        );
        Mark::new(
            mark_type,
            position,
            MarkReason::AspectChange {
                from: self.aspect_ratio,
                to: current,
                frame: position,
                broadcast: relation,
            },
        )
    }
}
