//! Control messages of the AODV protocol and their binary encoding.
//! All multi-byte fields are big-endian. Byte 0 holds the message type and byte 1 the hop count;
//! a sequence number of 0 on the wire means the sequence number is unknown.
use crate::common::Address;
use crate::{AodvError, AodvErrorKind};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use slog::{Record, Serializer, KV};
use std::io::{self, Cursor};

/// Message type of a route request.
pub const RREQ_TYPE: u8 = 1;
/// Message type of a route reply.
pub const RREP_TYPE: u8 = 2;
/// Message type of a route error.
pub const RERR_TYPE: u8 = 3;

const RREQ_SIZE: usize = 2 + 2 + 8 + 4 + 8 + 4;
const RREP_SIZE: usize = 2 + 8 + 4 + 8;
const RERR_SIZE: usize = 2 + 8 + 8;

/// Destination sequence number. `None` means the sequence number is unknown.
pub type SequenceNumber = Option<u32>;

/// Request for a route from `originator` to `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequestMessage {
    pub originator: Address,
    pub destination: Address,
    pub request_id: u16,
    pub hop_count: u8,
    pub dest_seq_num: SequenceNumber,
    /// Sequence number of the originator itself, used for the reverse route.
    pub orig_seq_num: SequenceNumber,
}

/// Reply carrying a route to `destination` back towards `originator`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReplyMessage {
    pub originator: Address,
    pub destination: Address,
    pub hop_count: u8,
    pub dest_seq_num: SequenceNumber,
}

/// Notification that `destination` is no longer reachable on the path used by `originator`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteErrorMessage {
    pub originator: Address,
    pub destination: Address,
    pub hop_count: u8,
}

///Messages used by the AODV protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AodvMessage {
    RREQ(RouteRequestMessage),
    RREP(RouteReplyMessage),
    RERR(RouteErrorMessage),
}

impl RouteReplyMessage {
    /// Builds the reply a destination sends for a request addressed to it.
    pub fn from_request(request: &RouteRequestMessage, dest_seq_num: SequenceNumber) -> Self {
        RouteReplyMessage {
            originator: request.originator,
            destination: request.destination,
            hop_count: 0,
            dest_seq_num,
        }
    }

    /// Whether this reply is a lightweight neighbour advertisement rather than a route reply.
    pub fn is_neighbor_advertisement(&self) -> bool {
        self.originator.is_broadcast()
    }
}

impl AodvMessage {
    /// Wire type of the message.
    pub fn msg_type(&self) -> u8 {
        match *self {
            AodvMessage::RREQ(_) => RREQ_TYPE,
            AodvMessage::RREP(_) => RREP_TYPE,
            AodvMessage::RERR(_) => RERR_TYPE,
        }
    }

    pub fn originator(&self) -> Address {
        match *self {
            AodvMessage::RREQ(ref m) => m.originator,
            AodvMessage::RREP(ref m) => m.originator,
            AodvMessage::RERR(ref m) => m.originator,
        }
    }

    pub fn destination(&self) -> Address {
        match *self {
            AodvMessage::RREQ(ref m) => m.destination,
            AodvMessage::RREP(ref m) => m.destination,
            AodvMessage::RERR(ref m) => m.destination,
        }
    }

    pub fn hop_count(&self) -> u8 {
        match *self {
            AodvMessage::RREQ(ref m) => m.hop_count,
            AodvMessage::RREP(ref m) => m.hop_count,
            AodvMessage::RERR(ref m) => m.hop_count,
        }
    }

    /// Adds one relay to the hop count of the message. Saturates instead of wrapping.
    pub fn increment_hop_count(&mut self) {
        let hops = match *self {
            AodvMessage::RREQ(ref mut m) => &mut m.hop_count,
            AodvMessage::RREP(ref mut m) => &mut m.hop_count,
            AodvMessage::RERR(ref mut m) => &mut m.hop_count,
        };
        *hops = hops.saturating_add(1);
    }

    /// Serializes the message into its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RREQ_SIZE);
        buf.push(self.msg_type());
        buf.push(self.hop_count());
        // Writes into a Vec can't fail.
        let _ = self.write_body(&mut buf);
        buf
    }

    fn write_body(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        match *self {
            AodvMessage::RREQ(ref m) => {
                buf.write_u16::<BigEndian>(m.request_id)?;
                buf.write_u64::<BigEndian>(m.destination.as_u64())?;
                buf.write_u32::<BigEndian>(seq_to_wire(m.dest_seq_num))?;
                buf.write_u64::<BigEndian>(m.originator.as_u64())?;
                buf.write_u32::<BigEndian>(seq_to_wire(m.orig_seq_num))?;
            }
            AodvMessage::RREP(ref m) => {
                buf.write_u64::<BigEndian>(m.destination.as_u64())?;
                buf.write_u32::<BigEndian>(seq_to_wire(m.dest_seq_num))?;
                buf.write_u64::<BigEndian>(m.originator.as_u64())?;
            }
            AodvMessage::RERR(ref m) => {
                buf.write_u64::<BigEndian>(m.destination.as_u64())?;
                buf.write_u64::<BigEndian>(m.originator.as_u64())?;
            }
        }
        Ok(())
    }

    /// Parses a control message from its wire representation.
    pub fn decode(data: &[u8]) -> Result<AodvMessage, AodvError> {
        if data.is_empty() {
            let msg = String::from("Empty control message");
            return Err(AodvErrorKind::Serialization(msg).into());
        }
        let msg_type = data[0];
        let expected = match msg_type {
            RREQ_TYPE => RREQ_SIZE,
            RREP_TYPE => RREP_SIZE,
            RERR_TYPE => RERR_SIZE,
            other => {
                let msg = format!("Unknown AODV message type {}", other);
                return Err(AodvErrorKind::Serialization(msg).into());
            }
        };
        if data.len() < expected {
            let msg = format!(
                "Truncated message of type {}: {} bytes, expected {}",
                msg_type,
                data.len(),
                expected
            );
            return Err(AodvErrorKind::Serialization(msg).into());
        }

        let mut rdr = Cursor::new(&data[1..]);
        AodvMessage::read_body(msg_type, &mut rdr).map_err(|e| {
            let msg = String::from("Error deserializing data into message");
            AodvError::with_cause(AodvErrorKind::Serialization(msg), e)
        })
    }

    fn read_body(msg_type: u8, rdr: &mut Cursor<&[u8]>) -> io::Result<AodvMessage> {
        let hop_count = rdr.read_u8()?;
        let msg = match msg_type {
            RREQ_TYPE => {
                let request_id = rdr.read_u16::<BigEndian>()?;
                let destination = Address(rdr.read_u64::<BigEndian>()?);
                let dest_seq_num = seq_from_wire(rdr.read_u32::<BigEndian>()?);
                let originator = Address(rdr.read_u64::<BigEndian>()?);
                let orig_seq_num = seq_from_wire(rdr.read_u32::<BigEndian>()?);
                AodvMessage::RREQ(RouteRequestMessage {
                    originator,
                    destination,
                    request_id,
                    hop_count,
                    dest_seq_num,
                    orig_seq_num,
                })
            }
            RREP_TYPE => {
                let destination = Address(rdr.read_u64::<BigEndian>()?);
                let dest_seq_num = seq_from_wire(rdr.read_u32::<BigEndian>()?);
                let originator = Address(rdr.read_u64::<BigEndian>()?);
                AodvMessage::RREP(RouteReplyMessage {
                    originator,
                    destination,
                    hop_count,
                    dest_seq_num,
                })
            }
            _ => {
                let destination = Address(rdr.read_u64::<BigEndian>()?);
                let originator = Address(rdr.read_u64::<BigEndian>()?);
                AodvMessage::RERR(RouteErrorMessage {
                    originator,
                    destination,
                    hop_count,
                })
            }
        };
        Ok(msg)
    }
}

fn seq_to_wire(seq: SequenceNumber) -> u32 {
    seq.unwrap_or(0)
}

fn seq_from_wire(seq: u32) -> SequenceNumber {
    if seq == 0 {
        None
    } else {
        Some(seq)
    }
}

impl KV for AodvMessage {
    fn serialize(&self, _rec: &Record, serializer: &mut dyn Serializer) -> slog::Result {
        match *self {
            AodvMessage::RREQ(ref m) => {
                serializer.emit_str("msg_type", "RREQ")?;
                serializer.emit_str("msg.originator", &m.originator.to_dotted_hex())?;
                serializer.emit_str("msg.destination", &m.destination.to_dotted_hex())?;
                serializer.emit_u8("msg.hop_count", m.hop_count)?;
                serializer.emit_u16("rreq_id", m.request_id)
            }
            AodvMessage::RREP(ref m) => {
                serializer.emit_str("msg_type", "RREP")?;
                serializer.emit_str("msg.originator", &m.originator.to_dotted_hex())?;
                serializer.emit_str("msg.destination", &m.destination.to_dotted_hex())?;
                serializer.emit_u8("msg.hop_count", m.hop_count)?;
                serializer.emit_u32("dest_seq_no", seq_to_wire(m.dest_seq_num))
            }
            AodvMessage::RERR(ref m) => {
                serializer.emit_str("msg_type", "RERR")?;
                serializer.emit_str("msg.originator", &m.originator.to_dotted_hex())?;
                serializer.emit_str("msg.destination", &m.destination.to_dotted_hex())
            }
        }
    }
}
