//! The smoothed channel vector and its single-writer handoff.
//!
//! The decode path is the only holder of a [`ChannelPublisher`]. Each frame
//! replaces the whole vector in one swap, so a [`ChannelReader`] never sees a
//! mix of old and new channel values.

use tokio::sync::watch;

use crate::time::Timestamp;

/// One smoothed value per logical channel, stamped with its frame's arrival.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelVector {
    values: Vec<f32>,
    received_at: Option<Timestamp>,
}

impl ChannelVector {
    /// A vector that has not received any frame yet.
    pub fn empty(channel_count: usize) -> Self {
        Self {
            values: vec![0.; channel_count],
            received_at: None,
        }
    }

    pub fn new(values: Vec<f32>, received_at: Timestamp) -> Self {
        Self {
            values,
            received_at: Some(received_at),
        }
    }

    pub fn get(&self, channel: usize) -> Option<f32> {
        self.values.get(channel).copied()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// When the frame behind these values was closed, if any frame arrived yet.
    pub fn received_at(&self) -> Option<Timestamp> {
        self.received_at
    }
}

/// Create the publisher/reader pair for `channel_count` channels.
pub fn channel_bus(channel_count: usize) -> (ChannelPublisher, ChannelReader) {
    let (tx, rx) = watch::channel(ChannelVector::empty(channel_count));
    (ChannelPublisher { tx }, ChannelReader { rx })
}

/// Write side of the channel vector.
pub struct ChannelPublisher {
    tx: watch::Sender<ChannelVector>,
}

impl ChannelPublisher {
    /// Replace the published vector with `values` from a frame closed at `at`.
    pub fn publish(&self, values: &[f32], at: Timestamp) {
        self.tx.send_modify(|vector| {
            vector.values.clear();
            vector.values.extend_from_slice(values);
            vector.received_at = Some(at);
        });
    }

    pub fn subscribe(&self) -> ChannelReader {
        ChannelReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of the channel vector.
#[derive(Clone)]
pub struct ChannelReader {
    rx: watch::Receiver<ChannelVector>,
}

impl ChannelReader {
    /// A consistent copy of the latest vector.
    pub fn snapshot(&self) -> ChannelVector {
        self.rx.borrow().clone()
    }

    /// Wait until a new vector is published.
    ///
    /// Returns `false` once the publisher is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use embedded_time::duration::Microseconds;

    use super::*;

    #[test]
    fn empty_vector_has_no_frame() {
        let (_publisher, reader) = channel_bus(8);
        let snapshot = reader.snapshot();
        assert_eq!(snapshot.len(), 8);
        assert!(snapshot.received_at().is_none());
        assert_eq!(snapshot.get(8), None);
    }

    #[test]
    fn publish_replaces_whole_vector() {
        let (publisher, reader) = channel_bus(3);
        publisher.publish(&[1000., 1500., 2000.], Microseconds(42));

        let snapshot = reader.snapshot();
        assert_eq!(snapshot.values(), &[1000., 1500., 2000.]);
        assert_eq!(snapshot.received_at().map(|t| t.0), Some(42));

        publisher.publish(&[1100., 1600., 1900.], Microseconds(64));
        assert_eq!(reader.snapshot().values(), &[1100., 1600., 1900.]);
    }

    #[tokio::test]
    async fn reader_is_woken_by_publish() {
        let (publisher, mut reader) = channel_bus(1);
        let task = tokio::spawn(async move { reader.changed().await });
        publisher.publish(&[1200.], Microseconds(1));
        assert!(task.await.unwrap());
    }
}
