//! Multi-node scenarios. Engines are wired together through an in-memory link that delivers
//! frames in FIFO order, and are stepped on the test thread.
use aodv_mesh::aodv::interfaces::*;
use aodv_mesh::aodv::messages::AodvMessage;
use aodv_mesh::aodv::AODV;
use aodv_mesh::common::Address;
use aodv_mesh::config::Config;
use aodv_mesh::logging;
use aodv_mesh::{AodvError, AodvErrorKind};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};

mod config_file;
mod multi_hop;

const MAX_FRAMES: usize = 10_000;

#[derive(Debug)]
struct Frame {
    from: Address,
    to: Address,
    payload: Vec<u8>,
}

/// Radio neighbourhood shared by every node of a test.
#[derive(Debug, Default)]
pub struct Network {
    links: Mutex<HashSet<(Address, Address)>>,
    nodes: Mutex<HashMap<Address, Arc<AODV>>>,
    in_flight: Mutex<VecDeque<Frame>>,
}

impl Network {
    /// Builds a network of bidirectional `links` between nodes named by number.
    /// Nodes listed in `end_nodes` don't relay.
    pub fn build(links: &[(u64, u64)], end_nodes: &[u64]) -> Arc<Network> {
        let network = Arc::new(Network::default());
        let mut ids: Vec<u64> = links.iter().flat_map(|&(a, b)| vec![a, b]).collect();
        ids.sort();
        ids.dedup();

        for &(a, b) in links {
            network.connect(Address(a), Address(b));
        }
        for id in ids {
            let mut config = Config::for_node(Address(id));
            config.end_node = end_nodes.contains(&id);
            config.random_seed = Some(id);
            let transport = Arc::new(MeshTransport {
                me: Address(id),
                network: Arc::downgrade(&network),
            });
            let engine = AODV::new(config, transport, logging::create_discard_logger());
            network
                .nodes
                .lock()
                .unwrap()
                .insert(Address(id), Arc::new(engine));
        }
        network
    }

    pub fn node(&self, id: u64) -> Arc<AODV> {
        let nodes = self.nodes.lock().unwrap();
        Arc::clone(nodes.get(&Address(id)).expect("Unknown node"))
    }

    pub fn connect(&self, a: Address, b: Address) {
        let mut links = self.links.lock().unwrap();
        links.insert((a, b));
        links.insert((b, a));
    }

    pub fn cut(&self, a: u64, b: u64) {
        let mut links = self.links.lock().unwrap();
        links.remove(&(Address(a), Address(b)));
        links.remove(&(Address(b), Address(a)));
    }

    fn neighbors(&self, node: Address) -> Vec<Address> {
        let links = self.links.lock().unwrap();
        let mut neighbors: Vec<Address> = links
            .iter()
            .filter(|(from, _)| *from == node)
            .map(|(_, to)| *to)
            .collect();
        neighbors.sort();
        neighbors
    }

    fn send(&self, from: Address, to: Address, msg: &AodvMessage) {
        let linked = self.links.lock().unwrap().contains(&(from, to));
        if linked {
            self.in_flight.lock().unwrap().push_back(Frame {
                from,
                to,
                payload: msg.encode(),
            });
        }
    }

    /// Puts a message on the air from `from` to `to`, as if `from` had sent it.
    pub fn inject(&self, from: u64, to: u64, msg: AodvMessage) {
        self.send(Address(from), Address(to), &msg);
    }

    /// Delivers frames until the network is quiet. Returns how many were delivered.
    pub fn run(&self) -> usize {
        let mut delivered = 0;
        loop {
            let frame = self.in_flight.lock().unwrap().pop_front();
            let frame = match frame {
                Some(frame) => frame,
                None => break,
            };
            let node = self.node(frame.to.as_u64());
            node.on_incoming(&frame.payload, &ArrivalInfo::from_sender(frame.from));
            node.run_pending();
            delivered += 1;
            assert!(delivered < MAX_FRAMES, "Control traffic did not settle");
        }
        delivered
    }
}

/// Sends requests to every neighbour and everything else to the next hop towards the
/// message originator.
#[derive(Debug)]
struct MeshTransport {
    me: Address,
    network: Weak<Network>,
}

impl MeshTransport {
    fn network(&self) -> Result<Arc<Network>, AodvError> {
        self.network.upgrade().ok_or_else(|| {
            AodvError::from(AodvErrorKind::Transport(String::from("Network is gone")))
        })
    }

    fn unicast(&self, msg: AodvMessage) -> Result<(), AodvError> {
        let network = self.network()?;
        let route = network.node(self.me.as_u64()).lookup(msg.originator());
        match route.next_hop {
            Some(next_hop) => {
                network.send(self.me, next_hop, &msg);
                Ok(())
            }
            None => {
                let err = format!("No route to {}", msg.originator());
                Err(AodvErrorKind::Transport(err).into())
            }
        }
    }
}

impl Transport for MeshTransport {
    fn forward(&self, msg: AodvMessage) -> Result<(), AodvError> {
        match msg {
            AodvMessage::RREQ(_) => {
                let network = self.network()?;
                for neighbor in network.neighbors(self.me) {
                    network.send(self.me, neighbor, &msg);
                }
                Ok(())
            }
            _ => self.unicast(msg),
        }
    }

    fn reply(&self, msg: AodvMessage) -> Result<(), AodvError> {
        self.unicast(msg)
    }
}

#[derive(Debug, Default)]
pub struct RecordingClient {
    calls: Mutex<Vec<(RouteInfo, Option<RouteToken>)>>,
}

impl RouteEventClient for RecordingClient {
    fn route_found(&self, info: RouteInfo, token: Option<RouteToken>) {
        self.calls.lock().unwrap().push((info, token));
    }
}

impl RecordingClient {
    pub fn calls(&self) -> Vec<(RouteInfo, Option<RouteToken>)> {
        self.calls.lock().unwrap().clone()
    }
}

/// Transport for nodes that are never expected to send anything.
#[derive(Debug)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn forward(&self, _msg: AodvMessage) -> Result<(), AodvError> {
        Ok(())
    }

    fn reply(&self, _msg: AodvMessage) -> Result<(), AodvError> {
        Ok(())
    }
}
