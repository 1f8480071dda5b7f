use bytes::Bytes;
use itertools::{Itertools, PeekingNext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Error;

/// A protocol packet: a typed payload scoped to a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub inner: PacketData,
    pub ns: String,
}

/// | Type         | ID  | Usage                                                          |
/// |--------------|-----|----------------------------------------------------------------|
/// | CONNECT      | 0   | Admission to a namespace.                                      |
/// | DISCONNECT   | 1   | Departure from a namespace.                                    |
/// | EVENT        | 2   | Send data to the other side.                                   |
/// | ACK          | 3   | Acknowledge an event.                                          |
/// | ERROR        | 4   | Reject an admission or report a namespace-level error.         |
/// | BINARY_EVENT | 5   | Send data with binary attachments.                             |
/// | BINARY_ACK   | 6   | Acknowledge an event with binary attachments in the response.  |
#[derive(Debug, Clone, PartialEq)]
pub enum PacketData {
    Connect,
    Disconnect,
    Event(String, Value, Option<i64>),
    Ack(Value, i64),
    Error(Value),
    BinaryEvent(String, BinaryPacket, Option<i64>),
    BinaryAck(BinaryPacket, i64),
}

impl PacketData {
    fn index(&self) -> u8 {
        match self {
            PacketData::Connect => 0,
            PacketData::Disconnect => 1,
            PacketData::Event(_, _, _) => 2,
            PacketData::Ack(_, _) => 3,
            PacketData::Error(_) => 4,
            PacketData::BinaryEvent(_, _, _) => 5,
            PacketData::BinaryAck(_, _) => 6,
        }
    }

    /// Number of binary frames following the textual frame on the wire.
    pub fn attachment_count(&self) -> usize {
        match self {
            PacketData::BinaryEvent(_, bin, _) | PacketData::BinaryAck(bin, _) => {
                bin.payload_count
            }
            _ => 0,
        }
    }

    /// Stamp the packet with an acknowledgement id.
    pub fn set_ack_id(&mut self, id: i64) {
        match self {
            PacketData::Event(_, _, ack) | PacketData::BinaryEvent(_, _, ack) => {
                *ack = Some(id);
            }
            _ => (),
        }
    }
}

impl Packet {
    pub fn connect(ns: impl Into<String>) -> Self {
        Self {
            inner: PacketData::Connect,
            ns: ns.into(),
        }
    }

    pub fn disconnect(ns: impl Into<String>) -> Self {
        Self {
            inner: PacketData::Disconnect,
            ns: ns.into(),
        }
    }

    pub fn event(ns: impl Into<String>, e: impl Into<String>, data: Value) -> Self {
        Self {
            inner: PacketData::Event(e.into(), data, None),
            ns: ns.into(),
        }
    }

    pub fn bin_event(
        ns: impl Into<String>,
        e: impl Into<String>,
        data: Value,
        bin: Vec<Bytes>,
    ) -> Self {
        Self {
            inner: PacketData::BinaryEvent(e.into(), BinaryPacket::outgoing(data, bin), None),
            ns: ns.into(),
        }
    }

    pub fn ack(ns: impl Into<String>, data: Value, ack: i64) -> Self {
        Self {
            inner: PacketData::Ack(data, ack),
            ns: ns.into(),
        }
    }

    pub fn bin_ack(ns: impl Into<String>, data: Value, bin: Vec<Bytes>, ack: i64) -> Self {
        Self {
            inner: PacketData::BinaryAck(BinaryPacket::outgoing(data, bin), ack),
            ns: ns.into(),
        }
    }

    pub fn error(ns: impl Into<String>, data: Value) -> Self {
        Self {
            inner: PacketData::Error(data),
            ns: ns.into(),
        }
    }

    pub fn invalid_namespace(ns: impl Into<String>) -> Self {
        Self::error(ns, Value::String("Invalid namespace".to_string()))
    }
}

/// The JSON part of a packet carrying binary attachments.
///
/// Incoming packets strip their `_placeholder` markers and count them; the
/// attachments then arrive as separate binary frames and fill `bin` until
/// the packet [`is_complete`](BinaryPacket::is_complete).
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryPacket {
    pub data: Value,
    pub bin: Vec<Bytes>,
    payload_count: usize,
}

impl BinaryPacket {
    /// Create a binary packet for an outgoing emission.
    pub(crate) fn outgoing(data: Value, bin: Vec<Bytes>) -> Self {
        let payload_count = bin.len();
        Self {
            data,
            bin,
            payload_count,
        }
    }

    /// Create a binary packet from decoded data, removing all placeholders
    /// and recording how many attachments are expected.
    pub(crate) fn incoming(mut data: Value) -> Self {
        let payload_count = match &mut data {
            Value::Array(v) => {
                let count = v.len();
                v.retain(|e| !is_placeholder(e));
                count - v.len()
            }
            val if is_placeholder(val) => {
                data = Value::Array(vec![]);
                1
            }
            _ => 0,
        };

        Self {
            data,
            bin: Vec::new(),
            payload_count,
        }
    }

    pub fn add_payload(&mut self, payload: Bytes) {
        self.bin.push(payload);
    }

    pub fn is_complete(&self) -> bool {
        self.payload_count == self.bin.len()
    }
}

fn is_placeholder(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|o| o.get("_placeholder"))
        .is_some()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Placeholder {
    #[serde(rename = "_placeholder")]
    placeholder: bool,
    num: u32,
}

impl Placeholder {
    fn new(num: u32) -> Self {
        Self {
            placeholder: true,
            num,
        }
    }
}

/// Serialize a packet to its textual frame:
/// ```text
/// <packet type>[<# of binary attachments>-][/<namespace>,][<acknowledgment id>][JSON payload]
/// ```
/// Binary attachments are emitted separately by the
/// [`Encoder`](crate::parser::Encoder).
impl TryFrom<Packet> for String {
    type Error = serde_json::Error;

    fn try_from(packet: Packet) -> Result<Self, Self::Error> {
        let mut res = packet.inner.index().to_string();

        let attachments = packet.inner.attachment_count();
        if attachments > 0 {
            res.push_str(&attachments.to_string());
            res.push('-');
        }

        if !packet.ns.is_empty() && packet.ns != "/" {
            res.push_str(&packet.ns);
            res.push(',');
        }

        match packet.inner {
            PacketData::Connect | PacketData::Disconnect => (),
            PacketData::Event(event, data, ack) => {
                if let Some(ack) = ack {
                    res.push_str(&ack.to_string());
                }
                res.push_str(&serde_json::to_string(&expand_event_args(event, data))?);
            }
            PacketData::Ack(data, ack) => {
                res.push_str(&ack.to_string());
                res.push_str(&serde_json::to_string(&as_array(data))?);
            }
            PacketData::Error(data) => res.push_str(&serde_json::to_string(&data)?),
            PacketData::BinaryEvent(event, bin, ack) => {
                if let Some(ack) = ack {
                    res.push_str(&ack.to_string());
                }
                let mut args = match expand_event_args(event, bin.data) {
                    Value::Array(v) => v,
                    val => vec![val],
                };
                append_placeholders(&mut args, bin.payload_count);
                res.push_str(&serde_json::to_string(&args)?);
            }
            PacketData::BinaryAck(bin, ack) => {
                res.push_str(&ack.to_string());
                let mut args = match as_array(bin.data) {
                    Value::Array(v) => v,
                    val => vec![val],
                };
                append_placeholders(&mut args, bin.payload_count);
                res.push_str(&serde_json::to_string(&args)?);
            }
        };
        Ok(res)
    }
}

/// Expand the payload to `["<event>", ...args]`, wrapping a single non-array
/// argument into an array first.
fn expand_event_args(event: String, data: Value) -> Value {
    let mut args = match data {
        Value::Array(v) => v,
        Value::Null => vec![],
        val => vec![val],
    };
    args.insert(0, Value::String(event));
    Value::Array(args)
}

/// Enforce that an acknowledgement payload is an array.
fn as_array(data: Value) -> Value {
    match data {
        Value::Array(_) => data,
        Value::Null => Value::Array(vec![]),
        val => Value::Array(vec![val]),
    }
}

fn append_placeholders(args: &mut Vec<Value>, count: usize) {
    for num in 0..count {
        let placeholder = serde_json::to_value(Placeholder::new(num as u32))
            .expect("placeholder serialization is infallible");
        args.push(placeholder);
    }
}

/// Deserialize an event payload, formatted as:
/// ```text
/// ["<event name>", ...<JSON-stringified arguments without binary>]
/// ```
fn deserialize_event_packet(data: &str) -> Result<(String, Value), Error> {
    let packet = match serde_json::from_str::<Value>(data)? {
        Value::Array(packet) => packet,
        _ => return Err(Error::InvalidEventName),
    };

    let mut iter = packet.into_iter();
    let event = match iter.next() {
        Some(Value::String(event)) => event,
        _ => return Err(Error::InvalidEventName),
    };
    let payload = Value::from_iter(iter);
    Ok((event, payload))
}

fn deserialize_packet(data: &str) -> Result<Option<Value>, Error> {
    let packet = if data.is_empty() {
        None
    } else {
        Some(serde_json::from_str(data)?)
    };
    Ok(packet)
}

/// Deserialize a packet from its textual frame. Binary attachments arrive as
/// separate frames and are applied by the [`Decoder`](crate::parser::Decoder).
impl TryFrom<String> for Packet {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Packet::try_from(value.as_str())
    }
}

impl TryFrom<&str> for Packet {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut chars = value.chars();
        let index = chars.next().ok_or(Error::InvalidPacketType)?;

        let attachments: usize = if index == '5' || index == '6' {
            let count = chars
                .take_while_ref(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0);
            chars.peeking_next(|c| *c == '-');
            count
        } else {
            0
        };

        let ns: String = if chars.peeking_next(|c| *c == '/').is_some() {
            let mut ns = String::from("/");
            ns.extend(chars.take_while_ref(|c| *c != ','));
            // skip the `,` separator
            chars.next();
            ns
        } else {
            "/".to_string()
        };

        let ack: Option<i64> = chars
            .take_while_ref(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .ok();

        let data = chars.as_str();
        let inner = match index {
            '0' => PacketData::Connect,
            '1' => PacketData::Disconnect,
            '2' => {
                let (event, payload) = deserialize_event_packet(data)?;
                PacketData::Event(event, payload, ack)
            }
            '3' => {
                let payload = deserialize_packet(data)?.ok_or(Error::InvalidPacketType)?;
                PacketData::Ack(payload, ack.ok_or(Error::InvalidPacketType)?)
            }
            '4' => {
                let payload = deserialize_packet(data)?.unwrap_or(Value::Null);
                PacketData::Error(payload)
            }
            '5' => {
                let (event, payload) = deserialize_event_packet(data)?;
                let bin = BinaryPacket::incoming(payload);
                if bin.payload_count != attachments {
                    return Err(Error::InvalidPacketType);
                }
                PacketData::BinaryEvent(event, bin, ack)
            }
            '6' => {
                let payload = deserialize_packet(data)?.ok_or(Error::InvalidPacketType)?;
                let bin = BinaryPacket::incoming(payload);
                if bin.payload_count != attachments {
                    return Err(Error::InvalidPacketType);
                }
                PacketData::BinaryAck(bin, ack.ok_or(Error::InvalidPacketType)?)
            }
            _ => return Err(Error::InvalidPacketType),
        };

        Ok(Self { inner, ns })
    }
}
