//! Seams between the routing engine and the rest of the node: the link layer below it,
//! the transport that sends its control messages, and the upper layers that consume routes.
use crate::aodv::messages::AodvMessage;
use crate::common::Address;
use crate::AodvError;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Opaque value a route client hands over with a query and gets back with the answer.
pub type RouteToken = u64;

/// Answer to a route query: the next hop towards `destination`, or no route at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteInfo {
    pub destination: Address,
    pub next_hop: Option<Address>,
    pub hop_count: u8,
}

impl RouteInfo {
    pub fn new(destination: Address, next_hop: Address, hop_count: u8) -> Self {
        RouteInfo {
            destination,
            next_hop: Some(next_hop),
            hop_count,
        }
    }

    /// The "no route" answer for `destination`.
    pub fn no_route(destination: Address) -> Self {
        RouteInfo {
            destination,
            next_hop: None,
            hop_count: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.next_hop.is_some()
    }
}

/// Data about a received packet supplied by the link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrivalInfo {
    /// The neighbour that transmitted the packet (previous hop).
    pub sender: Address,
    pub received_at: DateTime<Utc>,
}

impl ArrivalInfo {
    pub fn from_sender(sender: Address) -> Self {
        ArrivalInfo {
            sender,
            received_at: Utc::now(),
        }
    }
}

/// Consumer of packets that the link layer received for a registered protocol number.
pub trait ProtocolHandler: std::fmt::Debug + Send + Sync {
    /// Called once per received packet. Must not block.
    fn on_incoming(&self, payload: &[u8], info: &ArrivalInfo);
}

/// The link layer that delivers packets to the engine.
pub trait LinkLayer {
    /// Binds `handler` to every packet carrying `protocol`.
    fn register_protocol(
        &self,
        protocol: u8,
        handler: Arc<dyn ProtocolHandler>,
    ) -> Result<(), AodvError>;
}

/// Sends control messages on behalf of the engine.
pub trait Transport: std::fmt::Debug + Send + Sync {
    /// Relays a message whose fields (hop count, sequence numbers) may have been updated by
    /// this node. New route requests originated by this node are sent through here as well.
    fn forward(&self, msg: AodvMessage) -> Result<(), AodvError>;

    /// Sends a freshly built route reply back along the reverse path to its originator.
    fn reply(&self, msg: AodvMessage) -> Result<(), AodvError>;
}

/// Observer of the control traffic processed by the engine. Notifications are best effort.
pub trait RouteEventListener: std::fmt::Debug + Send + Sync {
    fn on_request(&self, _originator: Address, _destination: Address, _hop_count: u8) {}
    fn on_reply(&self, _originator: Address, _destination: Address, _hop_count: u8) {}
    fn on_error(&self, _originator: Address, _destination: Address) {}
}

/// Local client waiting on a route discovery.
pub trait RouteEventClient: std::fmt::Debug + Send + Sync {
    /// Called with the discovered route, or with [`RouteInfo::no_route`] when the
    /// discovery timed out.
    fn route_found(&self, info: RouteInfo, token: Option<RouteToken>);
}
