//! The edge queue and the decode task that feeds the channel vector.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use embedded_time::Clock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

use crate::{
    channels::ChannelPublisher,
    decoder::{DecodeStats, PpmDecoder},
    filter::FilterBank,
    shutdown::Shutdown,
    time::{self, Timestamp},
    Error,
};

/// Create a bounded edge queue holding up to `capacity` pending edges.
pub fn edge_queue(capacity: usize) -> (EdgeSender, mpsc::Receiver<Timestamp>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = EdgeSender {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sender, rx)
}

/// Handed to the input line so it can report rising edges.
///
/// [`EdgeSender::edge`] never blocks: when the queue is full the edge is
/// dropped and counted, and the decoder resynchronises on the next sync gap.
#[derive(Clone, Debug)]
pub struct EdgeSender {
    tx: mpsc::Sender<Timestamp>,
    dropped: Arc<AtomicU64>,
}

impl EdgeSender {
    /// Report a rising edge detected at `at`.
    pub fn edge(&self, at: Timestamp) {
        match self.tx.try_send(at) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "edge queue full, dropping edge");
            }
            // The decode task has stopped; nothing is listening any more.
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Edges dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Decoder, filter bank and publisher owned by the decode task.
///
/// Edge timestamps only measure pulse widths; frames are stamped with
/// `clock`, the same clock the control cycle judges freshness with.
pub struct PpmInput<C> {
    decoder: PpmDecoder,
    filters: FilterBank,
    publisher: ChannelPublisher,
    clock: C,
    raw: Vec<f32>,
    smoothed: Vec<f32>,
}

impl<C: Clock<T = u32>> PpmInput<C> {
    pub fn new(decoder: PpmDecoder, filters: FilterBank, publisher: ChannelPublisher, clock: C) -> Self {
        let channel_count = decoder.channel_count();
        Self {
            decoder,
            filters,
            publisher,
            clock,
            raw: vec![0.; channel_count],
            smoothed: vec![0.; channel_count],
        }
    }

    /// Handle one edge, publishing a new channel vector when it closes a frame.
    ///
    /// Returns `true` if a frame was published.
    pub fn edge(&mut self, at: Timestamp) -> Result<bool, Error> {
        let Some(frame) = self.decoder.edge(at) else {
            return Ok(false);
        };

        for (raw, width) in self.raw.iter_mut().zip(frame) {
            *raw = width.0 as f32;
        }
        self.filters.update(&self.raw, &mut self.smoothed);
        self.publisher.publish(&self.smoothed, time::now(&self.clock)?);

        debug!(channels = ?self.smoothed, "frame decoded");
        Ok(true)
    }

    pub fn stats(&self) -> DecodeStats {
        self.decoder.stats()
    }

    /// Drain `edges` until the queue closes, `shutdown` fires or the clock fails.
    pub async fn run(mut self, mut edges: mpsc::Receiver<Timestamp>, mut shutdown: Shutdown) -> DecodeStats {
        loop {
            tokio::select! {
                edge = edges.recv() => match edge {
                    Some(at) => {
                        if let Err(e) = self.edge(at) {
                            error!(error = %e, "decode task failed");
                            break;
                        }
                    }
                    None => break,
                },
                _ = shutdown.wait() => break,
            }
        }

        let stats = self.stats();
        debug!(?stats, "decode task stopped");
        stats
    }
}
