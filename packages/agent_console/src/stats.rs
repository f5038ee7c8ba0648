//! Connection counters.

use agent_stream::DecoderStats;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TransportStats {
    /// Payloads read off the socket, decodable or not
    pub frames_received: AtomicU64,
    /// Outbound frames handed to the writer
    pub frames_sent: AtomicU64,
    /// `send` calls refused because the connection was not open
    pub sends_rejected: AtomicU64,
    /// Successful handshakes since the manager was created
    pub connections_opened: AtomicU64,
}

impl TransportStats {
    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_rejected(&self) {
        self.sends_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, decoder: DecoderStats) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_decoded: decoder.decoded,
            frames_dropped: decoder.dropped,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            sends_rejected: self.sends_rejected.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStatsSnapshot {
    pub frames_received: u64,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub frames_sent: u64,
    pub sends_rejected: u64,
    pub connections_opened: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_merges_decoder_counts() {
        let stats = TransportStats::default();
        stats.frame_received();
        stats.frame_received();
        stats.frame_sent();
        stats.send_rejected();
        stats.connection_opened();

        let snap = stats.snapshot(DecoderStats {
            decoded: 1,
            dropped: 1,
        });
        assert_eq!(
            snap,
            TransportStatsSnapshot {
                frames_received: 2,
                frames_decoded: 1,
                frames_dropped: 1,
                frames_sent: 1,
                sends_rejected: 1,
                connections_opened: 1,
            }
        );
    }
}
