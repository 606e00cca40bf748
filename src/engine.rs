//! Mark aggregation.
//!
//! [`MarkEngine`] is the only owner of the mark timeline. Detectors hand it
//! candidate marks one at a time; each candidate passes through a fixed
//! sequence of rules before it may enter the timeline:
//!
//! 1. A logo start shortly (5 s) after an aspect mark is a byproduct of the
//!    aspect change and is dropped.
//! 2. A logo stop shortly (15 s) after a channel stop is dropped.
//! 3. A logo or border mark less than 80 s after the previous mark of the
//!    same category removes that mark and is not added itself.
//! 4. Past the first fifth of the broadcast, a border mark disables logo
//!    detection, and an aspect or channel mark arriving after three of its
//!    kind disables video decoding; the marks of the disabled detectors
//!    are purged.
//! 5. The leading synthetic mark is dropped once the timeline shows that
//!    the recording starts inside the broadcast ([`MarkEngine::check_first_mark`]).
//! 6. A start-like mark within 200 s of the expected broadcast start
//!    clears the timeline.
//! 7. A mark past the expected broadcast end requests a fast exit.
//! 8. At an occupied position, aspect and channel marks are never replaced.
//!
//! After all input is consumed, [`MarkEngine::rate_marks`] makes a final
//! pass.

use log::{debug, info};

use crate::marks::{Mark, MarkCategory, MarkReason, MarkType, Marks};
use crate::stream_info::{RecordingTimers, StreamContext};

/// Frame rate assumed while the stream has not announced one.
pub const FALLBACK_FPS: f64 = 25.0;

const ASPECT_SUPPRESS_SECS: f64 = 5.0;
const CHANNEL_SUPPRESS_SECS: f64 = 15.0;
const MIN_SAME_CATEGORY_SECS: f64 = 80.0;
const BROADCAST_START_WINDOW_SECS: f64 = 200.0;
/// Used when a fifth of the broadcast rounds down to zero frames.
const FALLBACK_MIN_POSITION: i64 = 25_000;
/// Longest ad block assumed, and the programme length it belongs to.
const MAX_AD_BLOCK_SECS: u64 = 13 * 60;
const REFERENCE_PROGRAMME_SECS: u64 = 90 * 60;
const MIN_RATED_LENGTH_SECS: u64 = 1800;

/// What [`MarkEngine::add_mark`] did with a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkDecision {
    /// The mark entered the timeline.
    Added,
    /// The mark replaced a mark at the same position.
    Replaced,
    /// An aspect or channel mark already holds the position.
    Kept,
    /// The mark was discarded as a byproduct of another mark.
    Suppressed,
    /// The mark removed its too-close predecessor instead of being added.
    RemovedPrevious,
}

/// Owner of the mark timeline and its rules.
#[derive(Debug, Clone, Default)]
pub struct MarkEngine {
    marks: Marks,
    aligned: bool,
    fast_exit: bool,
    broadcast_start: u64,
    broadcast_stop: u64,
    timers: RecordingTimers,
}

impl MarkEngine {
    /// An engine with an empty timeline and the given broadcast margins.
    pub fn new(timers: RecordingTimers) -> Self {
        Self {
            timers,
            ..Self::default()
        }
    }

    /// The timeline.
    pub fn marks(&self) -> &Marks {
        &self.marks
    }

    /// Consume the engine, returning the timeline.
    pub fn into_marks(self) -> Marks {
        self.marks
    }

    /// Whether the leading synthetic mark has been resolved.
    pub fn is_aligned(&self) -> bool {
        self.aligned
    }

    /// Whether a mark past the broadcast end requested a fast exit.
    pub fn fast_exit(&self) -> bool {
        self.fast_exit
    }

    /// Expected broadcast start in frames; `0` once resolved or unknown.
    pub fn broadcast_start(&self) -> u64 {
        self.broadcast_start
    }

    /// Expected broadcast end in frames; `0` once passed or unknown.
    pub fn broadcast_stop(&self) -> u64 {
        self.broadcast_stop
    }

    /// Insert the `COMMON` mark at the first analyzed frame and convert
    /// the broadcast margins into frame positions.
    pub fn add_start_mark(&mut self, context: &StreamContext) {
        let mark = Mark::new(MarkType::Common, 0, MarkReason::RecordingStart);
        info!("{}", mark.reason);
        self.marks.add(mark);

        let fps = effective_fps(context);
        let start_secs = self.timers.pre_roll_secs;
        self.broadcast_stop = if self.timers.post_roll_secs > 0 {
            ((start_secs + context.broadcast.length_secs) as f64 * fps) as u64
        } else {
            0
        };
        self.broadcast_start = (start_secs as f64 * fps) as u64;
        debug!(
            "broadcast start={} stop={}",
            self.broadcast_start, self.broadcast_stop
        );
    }

    /// Insert the `COMMON` mark at the last analyzed I-frame, unless a
    /// fast exit already ended the run.
    pub fn add_stop_mark(&mut self, context: &mut StreamContext, last_iframe: u64) {
        if last_iframe == 0 || self.fast_exit {
            return;
        }
        let mark = Mark::new(
            MarkType::Common,
            last_iframe,
            MarkReason::RecordingStop { frame: last_iframe },
        );
        self.add_mark(context, mark);
    }

    /// Apply the rule set to a candidate mark.
    pub fn add_mark(&mut self, context: &mut StreamContext, mark: Mark) -> MarkDecision {
        let fps = effective_fps(context);
        let position = mark.position as i64;

        if let Some(previous) = self.marks.last() {
            let distance = position - previous.position as i64;
            if mark.mark_type == MarkType::LogoStart
                && previous.category() == MarkCategory::Aspect
                && (distance as f64) < fps * ASPECT_SUPPRESS_SECS
            {
                info!("{}", mark.reason);
                info!(
                    "aspect ratio change in short distance, using this mark ({}->{})",
                    mark.position, previous.position
                );
                return MarkDecision::Suppressed;
            }
            if mark.mark_type == MarkType::LogoStop
                && previous.mark_type == MarkType::ChannelStop
                && (distance as f64) < fps * CHANNEL_SUPPRESS_SECS
            {
                info!("{}", mark.reason);
                info!(
                    "audio channel change in short distance, using this mark ({}->{})",
                    mark.position, previous.position
                );
                return MarkDecision::Suppressed;
            }
            if matches!(mark.category(), MarkCategory::Logo | MarkCategory::Border)
                && previous.category() == mark.category()
                && (distance as f64) < fps * MIN_SAME_CATEGORY_SECS
            {
                let previous_position = previous.position;
                info!("{}", mark.reason);
                info!(
                    "{} distance too short, deleting ({},{})",
                    if mark.category() == MarkCategory::Logo {
                        "logo"
                    } else {
                        "border"
                    },
                    previous_position,
                    mark.position
                );
                self.marks.remove(previous_position);
                return MarkDecision::RemovedPrevious;
            }
        }

        self.disable_detectors(context, &mark, fps);
        self.check_first_mark(context);

        if self.broadcast_start > 0
            && ((position - self.broadcast_start as i64).abs() as f64)
                < BROADCAST_START_WINDOW_SECS * fps
            && matches!(
                mark.mark_type,
                MarkType::AspectStart
                    | MarkType::LogoStart
                    | MarkType::ChannelStart
                    | MarkType::AspectChange
            )
        {
            info!("assuming start of broadcast ({})", mark.position);
            self.marks.clear();
            self.broadcast_start = 0;
        }

        if self.broadcast_stop > 0 && mark.position > self.broadcast_stop {
            info!("assuming stop of broadcast ({})", mark.position);
            self.fast_exit = true;
            self.broadcast_stop = 0;
        }

        match self.marks.get(mark.position).map(Mark::category) {
            Some(MarkCategory::Aspect | MarkCategory::Channel) => MarkDecision::Kept,
            Some(_) => {
                info!("{}", mark.reason);
                self.marks.add(mark);
                MarkDecision::Replaced
            }
            None => {
                info!("{}", mark.reason);
                self.marks.add(mark);
                MarkDecision::Added
            }
        }
    }

    fn disable_detectors(&mut self, context: &mut StreamContext, mark: &Mark, fps: f64) {
        let length = context.broadcast.length_secs;
        if length == 0 {
            return;
        }
        let mut min_position = (fps * length as f64 / 5.0) as i64;
        if min_position == 0 {
            min_position = FALLBACK_MIN_POSITION;
        }
        let past_min = mark.position as i64 > min_position;

        if mark.category() == MarkCategory::Border && past_min && !context.ignore_logo_detection {
            info!("border change detected. logo detection disabled");
            context.ignore_logo_detection = true;
            self.marks.remove_type(MarkType::LogoStart);
            self.marks.remove_type(MarkType::LogoStop);
        }

        let seen = match mark.category() {
            MarkCategory::Aspect => {
                self.marks.count_type(MarkType::AspectChange)
                    + self.marks.count_type(MarkType::AspectStart)
                    + self.marks.count_type(MarkType::AspectStop)
            }
            MarkCategory::Channel => {
                self.marks.count_type(MarkType::ChannelStart)
                    + self.marks.count_type(MarkType::ChannelStop)
            }
            _ => return,
        };
        if past_min && context.decode_video && seen >= 3 {
            info!(
                "{} change detected. logo/border detection disabled",
                if mark.category() == MarkCategory::Aspect {
                    "aspect ratio"
                } else {
                    "audio channel"
                }
            );
            context.decode_video = false;
            for mark_type in [
                MarkType::LogoStart,
                MarkType::LogoStop,
                MarkType::BorderStart,
                MarkType::BorderStop,
            ] {
                self.marks.remove_type(mark_type);
            }
        }
    }

    /// Decide whether the synthetic mark at position 0 is obsolete.
    ///
    /// Looks at the first mark after position 0: a start mark means the
    /// recording begins inside an ad block, so the leading mark is
    /// removed; a stop mark confirms it. Two aspect changes further apart
    /// than the longest plausible ad block also remove it. Returns whether
    /// the timeline is aligned.
    pub fn check_first_mark(&mut self, context: &StreamContext) -> bool {
        if self.aligned {
            return true;
        }
        let Some(second) = self.marks.next_after(0) else {
            return false;
        };
        let (second_type, second_position) = (second.mark_type, second.position);

        if second_type.is_start() {
            self.marks.remove(0);
            self.aligned = true;
        } else if second_type.is_stop() {
            self.aligned = true;
        }

        let length = context.broadcast.length_secs;
        if second_type == MarkType::AspectChange
            && length > 0
            && let Some(next) = self
                .marks
                .next_of_type(second_position, MarkType::AspectChange)
        {
            let max_secs = (length * MAX_AD_BLOCK_SECS / REFERENCE_PROGRAMME_SECS)
                .min(MAX_AD_BLOCK_SECS);
            let max_distance = (effective_fps(context) * max_secs as f64) as u64;
            if next.position - second_position > max_distance {
                self.marks.remove(0);
                self.aligned = true;
            }
        }
        self.aligned
    }

    /// Final pass once all input is consumed.
    ///
    /// On a long recording with more than three marks, aspect marks are
    /// purged when logo or channel marks exist; then the leading mark is
    /// checked again.
    pub fn rate_marks(&mut self, context: &StreamContext) {
        let length = context.broadcast.length_secs;
        if length > 0 && self.marks.len() > 3 && length > MIN_RATED_LENGTH_SECS {
            let logo_marks = self.marks.count_category(MarkCategory::Logo);
            let channel_marks = self.marks.count_category(MarkCategory::Channel);
            if logo_marks > 0 || channel_marks > 0 {
                for mark_type in [
                    MarkType::AspectChange,
                    MarkType::AspectStart,
                    MarkType::AspectStop,
                ] {
                    self.marks.remove_type(mark_type);
                }
            }
        }
        self.check_first_mark(context);
    }

    /// Move the mark at `from` to `to`, replacing its reason.
    ///
    /// Returns `false` when no mark sits at `from`.
    pub fn relocate(&mut self, from: u64, to: u64, reason: MarkReason) -> bool {
        let Some(mut mark) = self.marks.remove(from) else {
            return false;
        };
        mark.position = to;
        mark.reason = reason;
        info!("{}", mark.reason);
        self.marks.add(mark);
        true
    }

    /// Replace the timeline wholesale (e.g. with marks loaded from disk).
    pub fn replace_marks(&mut self, marks: Marks) {
        self.marks = marks;
    }
}

/// Frame rate of `context`, or [`FALLBACK_FPS`] while unknown.
pub fn effective_fps(context: &StreamContext) -> f64 {
    let fps = context.fps();
    if fps > 0.0 { fps } else { FALLBACK_FPS }
}
