//! Types shared by every component of the routing subsystem.
use crate::{AodvError, AodvErrorKind};
use rand::{rngs::StdRng, SeedableRng};
use slog::{Key, Record, Serializer, Value};
use std::fmt;
use std::str::FromStr;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// 64-bit IEEE (MAC-style) address of a node in the mesh.
/// Rendered and parsed in the dotted-hex form `0014.4F01.0000.1234`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub u64);

impl Address {
    /// Originator value that marks a route reply as a neighbour advertisement.
    pub const BROADCAST: Address = Address(0xFFFF);

    /// The raw 64-bit value of this address.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this is the neighbour-advertisement sentinel.
    pub fn is_broadcast(self) -> bool {
        self == Address::BROADCAST
    }

    /// Renders the address as four dot-separated blocks of 4 hex digits.
    pub fn to_dotted_hex(self) -> String {
        let mut out = String::with_capacity(19);
        for (i, shift) in (0..16).rev().map(|n| n * 4).enumerate() {
            let digit = ((self.0 >> shift) & 0xF) as usize;
            out.push(HEX_DIGITS[digit] as char);
            if i % 4 == 3 && i != 15 {
                out.push('.');
            }
        }
        out
    }

    fn parse_dotted_hex(s: &str) -> Option<u64> {
        let blocks: Vec<&str> = s.split('.').collect();
        if blocks.len() != 4 {
            return None;
        }
        let mut result = 0u64;
        for block in blocks {
            if block.len() != 4 {
                return None;
            }
            let value = u64::from_str_radix(block, 16).ok()?;
            result = (result << 16) + value;
        }
        Some(result)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_dotted_hex())
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address(value)
    }
}

impl FromStr for Address {
    type Err = AodvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value = match Address::parse_dotted_hex(s) {
            Some(v) => v,
            None => s.parse::<u64>().map_err(|e| {
                let msg = format!("'{}' is not a valid address", s);
                AodvError::with_cause(AodvErrorKind::Configuration(msg), e)
            })?,
        };

        if value == 0 || value == u64::MAX {
            let msg = format!("Reserved address: {} cannot be used here", s);
            return Err(AodvErrorKind::Configuration(msg).into());
        }

        Ok(Address(value))
    }
}

impl Value for Address {
    fn serialize(&self, _rec: &Record, key: Key, serializer: &mut dyn Serializer) -> slog::Result {
        serializer.emit_str(key, &self.to_dotted_hex())
    }
}

///Creates the RNG for this node. A fixed seed makes runs reproducible.
pub fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
