//! Pulse-position frame decoding from rising-edge timestamps.
//!
//! A PPM stream carries `channel_count` pulse widths as the gaps between
//! consecutive rising edges, followed by a sync gap longer than any channel.
//! [`PpmDecoder::edge`] runs once per edge and never blocks or allocates.

use embedded_time::duration::Microseconds;
use tracing::debug;

use crate::time::{elapsed, Timestamp};

/// Sync gaps are at least this long in a standard PPM stream.
pub const DEFAULT_SYNC_THRESHOLD: Microseconds<u32> = Microseconds(3_000);

/// Where the decoder is within the current frame window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Position {
    /// Waiting for a sync gap before collecting pulses.
    AwaitingSync,
    /// After a sync gap, with `pulses` widths buffered so far.
    Collecting { pulses: usize },
}

/// Counters describing what the decoder has seen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Frames with exactly the configured channel count.
    pub frames: u64,
    /// Sync gaps that ended a window with too few pulses.
    pub short_frames: u64,
    /// Windows abandoned because they held too many pulses.
    pub overruns: u64,
}

/// Turns rising-edge timestamps into validated raw frames.
pub struct PpmDecoder {
    sync_threshold: Microseconds<u32>,
    last_edge: Option<Timestamp>,
    position: Position,
    widths: Vec<Microseconds<u32>>,
    stats: DecodeStats,
}

impl PpmDecoder {
    /// Create a decoder for `channel_count` channels.
    ///
    /// A zero channel count is rejected by [`Config::validate`](crate::Config::validate)
    /// before a decoder is ever built.
    pub fn new(channel_count: usize, sync_threshold: Microseconds<u32>) -> Self {
        Self {
            sync_threshold,
            last_edge: None,
            position: Position::AwaitingSync,
            widths: vec![Microseconds(0); channel_count],
            stats: DecodeStats::default(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.widths.len()
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Feed one rising edge observed at `now`.
    ///
    /// Returns the buffered pulse widths when this edge closes a frame of
    /// exactly `channel_count` pulses. The slice is valid until the next call.
    pub fn edge(&mut self, now: Timestamp) -> Option<&[Microseconds<u32>]> {
        let gap = self.last_edge.map(|last| elapsed(now, last));
        self.last_edge = Some(now);

        // The very first edge has no predecessor and counts as a sync gap.
        let is_sync = gap.map_or(true, |gap| gap.0 > self.sync_threshold.0);
        let channel_count = self.widths.len();

        if is_sync {
            let complete = self.position == Position::Collecting { pulses: channel_count };
            if !complete {
                if let Position::Collecting { pulses } = self.position {
                    if pulses > 0 {
                        self.stats.short_frames += 1;
                        debug!(pulses, expected = channel_count, "discarding short frame");
                    }
                }
            }

            self.position = Position::Collecting { pulses: 0 };
            if complete {
                self.stats.frames += 1;
                return Some(self.widths.as_slice());
            }
            return None;
        }

        if let Position::Collecting { pulses } = self.position {
            if pulses == channel_count {
                self.stats.overruns += 1;
                debug!(expected = channel_count, "frame overrun, waiting for sync");
                self.position = Position::AwaitingSync;
            } else if let Some(gap) = gap {
                self.widths[pulses] = gap;
                self.position = Position::Collecting { pulses: pulses + 1 };
            }
        }

        None
    }

    /// Forget the current window and wait for the next sync gap.
    pub fn reset(&mut self) {
        self.last_edge = None;
        self.position = Position::AwaitingSync;
    }
}
