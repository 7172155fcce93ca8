//! Counters of the control traffic handled by the engine.
use slog::{Record, Serializer, KV};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct AodvStats {
    requests_received: AtomicU64,
    requests_duplicate: AtomicU64,
    requests_queue_full: AtomicU64,
    requests_ttl_expired: AtomicU64,
    requests_forwarded: AtomicU64,
    replies_sent: AtomicU64,
    replies_received: AtomicU64,
    replies_forwarded: AtomicU64,
    errors_received: AtomicU64,
    errors_forwarded: AtomicU64,
    malformed_packets: AtomicU64,
    routes_resolved: AtomicU64,
}

/// Point-in-time copy of [`AodvStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Route requests admitted to the queue.
    pub requests_received: u64,
    /// Route requests dropped because they were already known.
    pub requests_duplicate: u64,
    /// Route requests dropped because the inbound queue was full.
    pub requests_queue_full: u64,
    /// Route requests dropped because they travelled beyond the network diameter.
    pub requests_ttl_expired: u64,
    /// Route requests relayed or originated by this node.
    pub requests_forwarded: u64,
    /// Route replies generated by this node as a destination.
    pub replies_sent: u64,
    pub replies_received: u64,
    pub replies_forwarded: u64,
    pub errors_received: u64,
    pub errors_forwarded: u64,
    /// Packets that could not be decoded.
    pub malformed_packets: u64,
    /// Waiting clients that received a route.
    pub routes_resolved: u64,
    /// Waiting clients whose discovery timed out. Counted by the request table cleaner.
    pub routes_not_found: u64,
}

macro_rules! counters {
    ($($name:ident => $inc:ident),* $(,)?) => {
        impl AodvStats {
            $(
                pub(crate) fn $inc(&self) {
                    self.$name.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $( $name: self.$name.load(Ordering::Relaxed), )*
                    ..StatsSnapshot::default()
                }
            }
        }
    };
}

counters! {
    requests_received => inc_requests_received,
    requests_duplicate => inc_requests_duplicate,
    requests_queue_full => inc_requests_queue_full,
    requests_ttl_expired => inc_requests_ttl_expired,
    requests_forwarded => inc_requests_forwarded,
    replies_sent => inc_replies_sent,
    replies_received => inc_replies_received,
    replies_forwarded => inc_replies_forwarded,
    errors_received => inc_errors_received,
    errors_forwarded => inc_errors_forwarded,
    malformed_packets => inc_malformed_packets,
    routes_resolved => inc_routes_resolved,
}

impl KV for StatsSnapshot {
    fn serialize(&self, _rec: &Record, serializer: &mut dyn Serializer) -> slog::Result {
        serializer.emit_u64("requests_received", self.requests_received)?;
        serializer.emit_u64("requests_duplicate", self.requests_duplicate)?;
        serializer.emit_u64("requests_queue_full", self.requests_queue_full)?;
        serializer.emit_u64("requests_ttl_expired", self.requests_ttl_expired)?;
        serializer.emit_u64("requests_forwarded", self.requests_forwarded)?;
        serializer.emit_u64("replies_sent", self.replies_sent)?;
        serializer.emit_u64("replies_received", self.replies_received)?;
        serializer.emit_u64("replies_forwarded", self.replies_forwarded)?;
        serializer.emit_u64("errors_received", self.errors_received)?;
        serializer.emit_u64("errors_forwarded", self.errors_forwarded)?;
        serializer.emit_u64("malformed_packets", self.malformed_packets)?;
        serializer.emit_u64("routes_resolved", self.routes_resolved)?;
        serializer.emit_u64("routes_not_found", self.routes_not_found)
    }
}
