//! Best known next hop per destination, with sequence-number freshness tracking.
//! Entries are never deleted: an invalidated entry stays as a negative cache entry until a
//! fresher route replaces it.
use crate::aodv::interfaces::RouteInfo;
use crate::aodv::messages::{AodvMessage, SequenceNumber};
use crate::common::Address;
use chrono::{DateTime, Utc};
use slog::Logger;
use std::collections::HashMap;
use std::sync::Mutex;

bitflags! {
    #[derive(Default)]
    pub struct RTEFlags : u32 {
        const VALID_SEQ_NO = 0b00000001;
        const ACTIVE_ROUTE = 0b00000010;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteTableEntry {
    pub destination: Address,
    pub next_hop: Address,
    pub hop_count: u8,
    dest_seq_no: u32,
    flags: RTEFlags,
    pub installed_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl RouteTableEntry {
    fn new(destination: Address, next_hop: Address, hop_count: u8, dest_seq_no: SequenceNumber) -> Self {
        let mut flags = RTEFlags::VALID_SEQ_NO | RTEFlags::ACTIVE_ROUTE;
        let seq = match dest_seq_no {
            Some(seq) => seq,
            None => {
                flags.remove(RTEFlags::VALID_SEQ_NO);
                0
            }
        };
        let now = Utc::now();
        RouteTableEntry {
            destination,
            next_hop,
            hop_count,
            dest_seq_no: seq,
            flags,
            installed_at: now,
            last_used: now,
        }
    }

    /// Destination sequence number of the entry, if known.
    pub fn dest_seq_no(&self) -> SequenceNumber {
        if self.flags.contains(RTEFlags::VALID_SEQ_NO) {
            Some(self.dest_seq_no)
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.flags.contains(RTEFlags::ACTIVE_ROUTE)
    }

    /// Whether a candidate route with the given sequence number and hop count is more
    /// attractive than this entry. An unknown sequence number is older than any known one.
    /// Inactive entries follow the same rule.
    fn is_replaced_by(&self, seq: SequenceNumber, hop_count: u8) -> bool {
        let stored = self.dest_seq_no();
        seq > stored || (seq == stored && hop_count <= self.hop_count)
    }

    fn route_info(&self) -> RouteInfo {
        RouteInfo::new(self.destination, self.next_hop, self.hop_count)
    }
}

/// Route table of one node. All operations are total and never block on anything but the
/// table's own lock.
#[derive(Debug)]
pub struct RouteTable {
    routes: Mutex<HashMap<Address, RouteTableEntry>>,
    logger: Logger,
}

impl RouteTable {
    pub fn new(logger: Logger) -> Self {
        RouteTable {
            routes: Mutex::new(HashMap::new()),
            logger: logger.new(o!("component" => "RouteTable")),
        }
    }

    /// Next hop towards `destination`, or the "no route" answer if there is no active route.
    pub fn lookup(&self, destination: Address) -> RouteInfo {
        let mut routes = self.routes.lock().expect("Could not lock route table");
        match routes.get_mut(&destination) {
            Some(entry) if entry.is_active() => {
                entry.last_used = Utc::now();
                entry.route_info()
            }
            _ => RouteInfo::no_route(destination),
        }
    }

    /// Installs `route` unless the stored entry for the same destination is fresher.
    /// Returns whether the table changed.
    pub fn install(
        &self,
        destination: Address,
        next_hop: Address,
        hop_count: u8,
        dest_seq_no: SequenceNumber,
    ) -> bool {
        let mut routes = self.routes.lock().expect("Could not lock route table");
        if let Some(entry) = routes.get(&destination) {
            if !entry.is_replaced_by(dest_seq_no, hop_count) {
                debug!(
                    self.logger,
                    "Stale route update rejected";
                    "destination" => destination,
                    "next_hop" => next_hop,
                    "hop_count" => hop_count,
                    "stored_hop_count" => entry.hop_count,
                );
                return false;
            }
        }

        info!(
            self.logger,
            "Updating route";
            "destination" => destination,
            "next_hop" => next_hop,
            "hop_count" => hop_count,
        );
        routes.insert(
            destination,
            RouteTableEntry::new(destination, next_hop, hop_count, dest_seq_no),
        );
        true
    }

    /// Installs a route to a neighbour, reached directly through itself.
    pub fn install_from_hop(&self, neighbor: Address, hop_count: u8, dest_seq_no: SequenceNumber) -> bool {
        self.install(neighbor, neighbor, hop_count, dest_seq_no)
    }

    /// Installs the route a message advertises through `neighbor`: the reverse route to the
    /// originator for a request, the forward route to the destination for a reply.
    /// Route errors carry no route.
    pub fn install_from_message(&self, neighbor: Address, msg: &AodvMessage) -> bool {
        match *msg {
            AodvMessage::RREQ(ref m) => {
                self.install(m.originator, neighbor, m.hop_count, m.orig_seq_num)
            }
            AodvMessage::RREP(ref m) => {
                self.install(m.destination, neighbor, m.hop_count, m.dest_seq_num)
            }
            AodvMessage::RERR(_) => false,
        }
    }

    /// Installs the route of a neighbour advertisement, but only if there's no active route
    /// to the advertised node yet. Freshness is not compared.
    pub fn install_if_absent(&self, neighbor: Address, msg: &AodvMessage) -> bool {
        let (destination, hop_count, dest_seq_no) = match *msg {
            AodvMessage::RREP(ref m) => (m.destination, m.hop_count, m.dest_seq_num),
            _ => return false,
        };
        let mut routes = self.routes.lock().expect("Could not lock route table");
        if let Some(entry) = routes.get_mut(&destination) {
            if entry.is_active() {
                entry.last_used = Utc::now();
                return false;
            }
        }
        info!(
            self.logger,
            "Route from neighbour advertisement";
            "destination" => destination,
            "next_hop" => neighbor,
        );
        routes.insert(
            destination,
            RouteTableEntry::new(destination, neighbor, hop_count, dest_seq_no),
        );
        true
    }

    /// Marks the route to `destination` inactive. `node` is the node on whose behalf the
    /// route is invalidated. Returns whether an active route was deactivated.
    pub fn deactivate(&self, node: Address, destination: Address) -> bool {
        let mut routes = self.routes.lock().expect("Could not lock route table");
        match routes.get_mut(&destination) {
            Some(entry) if entry.is_active() => {
                entry.flags.remove(RTEFlags::ACTIVE_ROUTE);
                info!(
                    self.logger,
                    "Broken route detected";
                    "destination" => destination,
                    "next_hop" => entry.next_hop,
                    "reported_for" => node,
                );
                true
            }
            _ => false,
        }
    }

    /// Marks every route whose next hop is `neighbor` inactive and returns the destinations
    /// that became unreachable.
    pub fn deactivate_all_via(&self, neighbor: Address) -> Vec<Address> {
        let mut routes = self.routes.lock().expect("Could not lock route table");
        let mut affected = Vec::new();
        for entry in routes.values_mut() {
            if entry.next_hop == neighbor && entry.is_active() {
                entry.flags.remove(RTEFlags::ACTIVE_ROUTE);
                affected.push(entry.destination);
            }
        }
        if !affected.is_empty() {
            info!(
                self.logger,
                "Link failure";
                "neighbor" => neighbor,
                "affected_destinations" => affected.len(),
            );
        }
        affected
    }

    /// Best known sequence number of `destination`.
    pub fn sequence_number_for(&self, destination: Address) -> SequenceNumber {
        let routes = self.routes.lock().expect("Could not lock route table");
        routes.get(&destination).and_then(|e| e.dest_seq_no())
    }

    /// Copy of every entry, active or not.
    pub fn snapshot(&self) -> Vec<RouteTableEntry> {
        let routes = self.routes.lock().expect("Could not lock route table");
        routes.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.routes.lock().expect("Could not lock route table").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aodv::messages::{RouteReplyMessage, RouteRequestMessage};
    use crate::logging;
    use pretty_assertions::assert_eq;

    const D: Address = Address(0xD);
    const A: Address = Address(0xA);
    const B: Address = Address(0xB);

    fn table() -> RouteTable {
        RouteTable::new(logging::create_discard_logger())
    }

    #[test]
    fn lookup_without_route() {
        let rt = table();
        let info = rt.lookup(D);
        assert!(!info.is_valid());
        assert_eq!(info, RouteInfo::no_route(D));
        assert_eq!(rt.sequence_number_for(D), None);
    }

    #[test]
    fn freshness_rule() {
        let rt = table();
        assert!(rt.install(D, A, 3, Some(5)));

        //Older sequence number is rejected regardless of hop count
        assert!(!rt.install(D, B, 1, Some(4)));
        //Same sequence number, longer route is rejected
        assert!(!rt.install(D, B, 4, Some(5)));
        assert_eq!(rt.lookup(D), RouteInfo::new(D, A, 3));

        //Same sequence number, equal hop count replaces
        assert!(rt.install(D, B, 3, Some(5)));
        assert_eq!(rt.lookup(D), RouteInfo::new(D, B, 3));

        //Newer sequence number wins even with a longer route
        assert!(rt.install(D, A, 9, Some(6)));
        assert_eq!(rt.lookup(D), RouteInfo::new(D, A, 9));
        assert_eq!(rt.sequence_number_for(D), Some(6));

        //Unknown sequence number is older than any known one
        assert!(!rt.install(D, B, 1, None));
    }

    #[test]
    fn unknown_sequence_numbers_compare_by_hops() {
        let rt = table();
        assert!(rt.install_from_hop(A, 1, None));
        assert!(!rt.install(A, B, 2, None));
        assert!(rt.install(A, B, 1, None));
        assert!(rt.install(A, A, 5, Some(1)));
    }

    #[test]
    fn install_from_messages() {
        let rt = table();
        let rreq = AodvMessage::RREQ(RouteRequestMessage {
            originator: B,
            destination: D,
            request_id: 1,
            hop_count: 2,
            dest_seq_num: None,
            orig_seq_num: Some(10),
        });
        assert!(rt.install_from_message(A, &rreq));
        assert_eq!(rt.lookup(B), RouteInfo::new(B, A, 2));
        assert_eq!(rt.sequence_number_for(B), Some(10));

        let rrep = AodvMessage::RREP(RouteReplyMessage {
            originator: B,
            destination: D,
            hop_count: 4,
            dest_seq_num: Some(3),
        });
        assert!(rt.install_from_message(A, &rrep));
        assert_eq!(rt.lookup(D), RouteInfo::new(D, A, 4));
    }

    #[test]
    fn neighbor_advertisement_installs_only_when_absent() {
        let rt = table();
        let advert = AodvMessage::RREP(RouteReplyMessage {
            originator: Address::BROADCAST,
            destination: B,
            hop_count: 1,
            dest_seq_num: Some(1),
        });
        assert!(rt.install_if_absent(B, &advert));
        assert_eq!(rt.lookup(B), RouteInfo::new(B, B, 1));

        //Existing route is kept even though the advertisement is fresher
        assert!(rt.install(D, A, 2, Some(1)));
        let advert = AodvMessage::RREP(RouteReplyMessage {
            originator: Address::BROADCAST,
            destination: D,
            hop_count: 1,
            dest_seq_num: Some(50),
        });
        assert!(!rt.install_if_absent(D, &advert));
        assert_eq!(rt.lookup(D), RouteInfo::new(D, A, 2));
    }

    #[test]
    fn deactivation_keeps_negative_cache() {
        let rt = table();
        rt.install(D, A, 2, Some(7));
        assert!(rt.deactivate(B, D));
        assert!(!rt.deactivate(B, D));

        assert!(!rt.lookup(D).is_valid());
        assert_eq!(rt.len(), 1);
        assert_eq!(rt.sequence_number_for(D), Some(7));

        //An inactive route is repaired by a fresher route, or an equally fresh one that is
        //no longer than the broken one
        assert!(!rt.install(D, B, 4, Some(6)));
        assert!(rt.install(D, B, 2, Some(7)));
        assert_eq!(rt.lookup(D), RouteInfo::new(D, B, 2));
    }

    #[test]
    fn inactive_entry_keeps_freshness_rule() {
        let rt = table();
        rt.install(D, A, 2, Some(7));
        rt.deactivate(B, D);

        //Same sequence number but a longer path
        assert!(!rt.install(D, B, 9, Some(7)));
        assert!(!rt.lookup(D).is_valid());
        assert_eq!(rt.snapshot()[0].hop_count, 2);

        assert!(rt.install(D, B, 9, Some(8)));
        assert_eq!(rt.lookup(D), RouteInfo::new(D, B, 9));
    }

    #[test]
    fn link_failure_invalidates_routes_via_neighbor() {
        let rt = table();
        rt.install(D, A, 2, Some(1));
        rt.install(B, A, 3, Some(1));
        rt.install(A, A, 1, None);
        rt.install(Address(0xE), B, 1, None);

        let mut affected = rt.deactivate_all_via(A);
        affected.sort();
        assert_eq!(affected, vec![A, B, D]);
        assert!(rt.lookup(Address(0xE)).is_valid());
        assert!(rt.deactivate_all_via(A).is_empty());
    }
}
