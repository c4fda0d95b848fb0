use embedded_time::duration::Microseconds;
use tracing::{info, warn};

use crate::{
    channels::ChannelVector,
    time::{elapsed, Timestamp},
};

/// A change of link state, reported once per edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

/// Judges whether the radio link is alive from frame freshness and throttle.
///
/// Receivers that lose signal either stop sending frames or hold the throttle
/// channel below its normal range, so both must look healthy.
///
/// A frame that has timed out stays stale even when the wrapping microsecond
/// counter later makes it look recent again.
#[derive(Debug)]
pub struct ConnectionMonitor {
    throttle_channel: usize,
    connected_threshold: f32,
    timeout: Microseconds<u32>,
    is_connected: bool,
    expired: Option<Timestamp>,
}

impl ConnectionMonitor {
    pub fn new(throttle_channel: usize, connected_threshold: f32, timeout: Microseconds<u32>) -> Self {
        Self {
            throttle_channel,
            connected_threshold,
            timeout,
            is_connected: false,
            expired: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    /// Evaluate the link at `now` against the latest channel vector.
    pub fn update(&mut self, now: Timestamp, channels: &ChannelVector) -> Option<ConnectionEvent> {
        let is_fresh = match channels.received_at() {
            Some(at) if self.expired == Some(at) => false,
            Some(at) if elapsed(now, at).0 < self.timeout.0 => true,
            Some(at) => {
                self.expired = Some(at);
                false
            }
            None => false,
        };
        let has_throttle = channels
            .get(self.throttle_channel)
            .map_or(false, |throttle| throttle > self.connected_threshold);

        let is_connected = is_fresh && has_throttle;
        if is_connected == self.is_connected {
            return None;
        }
        self.is_connected = is_connected;

        if is_connected {
            info!("radio link connected");
            Some(ConnectionEvent::Connected)
        } else {
            warn!(is_fresh, has_throttle, "radio link lost");
            Some(ConnectionEvent::Disconnected)
        }
    }
}
