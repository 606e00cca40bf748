//! Audio channel layout tracking.
//!
//! Many channels broadcast the programme with multichannel AC-3 and switch
//! to stereo for commercials. [`ChannelDetector`] watches the channel count
//! reported by the AC-3 header parser and turns each change into a
//! candidate mark.

use crate::marks::{Mark, MarkReason, MarkType};
use crate::stream_info::StreamContext;

/// Channel counts above this value count as multichannel.
const STEREO_CHANNELS: u16 = 2;

/// Detects changes in the AC-3 channel count.
#[derive(Debug, Clone, Default)]
pub struct ChannelDetector {
    channels: u16,
}

impl ChannelDetector {
    /// A detector that has not seen any audio yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last channel count seen; `0` before the first header.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Forget the last channel count.
    pub fn clear(&mut self) {
        self.channels = 0;
    }

    /// Compare the channel count in `context` with the previous one.
    ///
    /// A change from a known count yields `CHANNEL_START` when the new
    /// layout is multichannel and `CHANNEL_STOP` otherwise, placed at
    /// `last_iframe`.
    pub fn process(&mut self, context: &StreamContext, last_iframe: u64) -> Option<Mark> {
        let current = context.audio.channels;
        if current == 0 {
            return None;
        }
        let previous = std::mem::replace(&mut self.channels, current);
        if previous == 0 || previous == current {
            return None;
        }

        let mark_type = if current > STEREO_CHANNELS {
            MarkType::ChannelStart
        } else {
            MarkType::ChannelStop
        };
        Some(Mark::new(
            mark_type,
            last_iframe,
            MarkReason::ChannelChange {
                from: previous,
                to: current,
                frame: last_iframe,
            },
        ))
    }
}
