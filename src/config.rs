//! This module defines the AodvConfig struct and related functions. It allows a node to
//! deserialize a configuration file into an AodvConfig object that is eventually resolved
//! into the runtime parameters of the routing engine.
use crate::common::Address;
use crate::{AodvError, AodvErrorKind, ONE_SECOND_MS};
use std::fs::File;
use std::io::Read;
use std::path::Path;

// **************************************************
// ************ Configuration parameters ************
// **************************************************
/// Maximum number of hops a route request may travel.
pub const NET_DIAMETER: u8 = 35;
/// Conservative estimate of the per-hop traversal time, in milliseconds.
pub const NODE_TRAVERSAL_TIME: i64 = 40;
/// Time an inactive request entry is kept around to suppress duplicates, in milliseconds.
pub const REQUEST_GRACE_PERIOD: i64 = 3 * ONE_SECOND_MS;
/// Entries expiring within this window are considered expired by a sweep, in milliseconds.
pub const EXPIRY_TIME_DELTA: i64 = 10;
/// Upper bound accepted for any configured time, in milliseconds (one day).
pub const MAX_TIME: i64 = 24 * 60 * 60 * ONE_SECOND_MS;
/// Admission bound on queued inbound messages when accepting a new route request.
pub const MAX_REQUESTS_OUTSTANDING: usize = 500;

/// Configuration for the routing engine of one node. Every field is optional so that
/// configuration files only need to mention what they change.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub struct AodvConfig {
    ///Address of this node, in dotted-hex (`0014.4F01.0000.1234`) or decimal form.
    pub local_address: Option<String>,
    ///Maximum hop count a route request may reach before it is discarded.
    pub net_diameter: Option<u8>,
    ///Per-hop traversal time estimate (ms). Used to derive the path discovery time.
    pub node_traversal_time: Option<i64>,
    ///How long (ms) a pending route request stays active awaiting a reply.
    pub path_discovery_time: Option<i64>,
    ///How long (ms) an expired request is kept for duplicate suppression.
    pub request_grace_period: Option<i64>,
    ///Tolerance (ms) applied when deciding that a request entry has expired.
    pub expiry_time_delta: Option<i64>,
    ///Queue depth above which new route requests are not admitted.
    pub max_requests_outstanding: Option<usize>,
    ///End nodes never relay route requests or replies for other nodes.
    pub end_node: Option<bool>,
    ///Seed for the starting request ID. Absent means OS entropy.
    pub random_seed: Option<u64>,
}

/// Resolved runtime parameters of the routing engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub local_address: Address,
    pub net_diameter: u8,
    pub node_traversal_time: i64,
    pub path_discovery_time: i64,
    pub request_grace_period: i64,
    pub expiry_time_delta: i64,
    pub max_requests_outstanding: usize,
    pub end_node: bool,
    pub random_seed: Option<u64>,
}

impl Config {
    /// Builds a configuration with every default for the given node address.
    pub fn for_node(local_address: Address) -> Config {
        AodvConfig::default().resolve_with(local_address)
    }
}

impl AodvConfig {
    /// Reads and parses a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<AodvConfig, AodvError> {
        let mut file = File::open(path)?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;
        AodvConfig::from_toml(&data)
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml(data: &str) -> Result<AodvConfig, AodvError> {
        toml::from_str(data).map_err(|e| {
            let msg = String::from("Could not parse the configuration");
            AodvError::with_cause(AodvErrorKind::Configuration(msg), e)
        })
    }

    /// Validates the configuration and fills in every missing value with its default.
    pub fn resolve(&self) -> Result<Config, AodvError> {
        let local_address: Address = match self.local_address {
            Some(ref addr) => addr.parse()?,
            None => {
                let msg = String::from("local_address must be provided");
                return Err(AodvErrorKind::Configuration(msg).into());
            }
        };
        if local_address.is_broadcast() {
            let msg = format!("{} is reserved for neighbour advertisements", local_address);
            return Err(AodvErrorKind::Configuration(msg).into());
        }
        if self.net_diameter == Some(0) {
            let msg = String::from("net_diameter must be greater than zero");
            return Err(AodvErrorKind::Configuration(msg).into());
        }
        let times = [
            ("node_traversal_time", self.node_traversal_time),
            ("path_discovery_time", self.path_discovery_time),
            ("request_grace_period", self.request_grace_period),
            ("expiry_time_delta", self.expiry_time_delta),
        ];
        for (name, value) in times.iter() {
            if let Some(v) = value {
                if *v < 0 {
                    let msg = format!("{} can't be negative ({})", name, v);
                    return Err(AodvErrorKind::Configuration(msg).into());
                }
                if *v > MAX_TIME {
                    let msg = format!("{} can't exceed {} ms ({})", name, MAX_TIME, v);
                    return Err(AodvErrorKind::Configuration(msg).into());
                }
            }
        }

        Ok(self.resolve_with(local_address))
    }

    fn resolve_with(&self, local_address: Address) -> Config {
        let net_diameter = self.net_diameter.unwrap_or(NET_DIAMETER);
        let node_traversal_time = self.node_traversal_time.unwrap_or(NODE_TRAVERSAL_TIME);
        let net_traversal_time = 2 * node_traversal_time * i64::from(net_diameter);
        let path_discovery_time = self.path_discovery_time.unwrap_or(2 * net_traversal_time);

        Config {
            local_address,
            net_diameter,
            node_traversal_time,
            path_discovery_time,
            request_grace_period: self.request_grace_period.unwrap_or(REQUEST_GRACE_PERIOD),
            expiry_time_delta: self.expiry_time_delta.unwrap_or(EXPIRY_TIME_DELTA),
            max_requests_outstanding: self
                .max_requests_outstanding
                .unwrap_or(MAX_REQUESTS_OUTSTANDING),
            end_node: self.end_node.unwrap_or(false),
            random_seed: self.random_seed,
        }
    }
}
