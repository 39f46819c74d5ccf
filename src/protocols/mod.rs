//! Thrift wire protocols.
//!
//! Each protocol provides an input side that decodes from a byte slice and an
//! output side that encodes into a growable buffer. Both sides speak the same
//! vocabulary (messages, structs, fields, containers, scalars), so message
//! types are written once against the `InputProtocol` / `OutputProtocol`
//! traits and work over every format.
//!
//! ## Protocols
//! - `binary`: fixed-width big-endian encoding
//! - `compact`: varint encoding with delta field ids
//! - `json`: fully typed JSON (field ids and type tags on the wire)
//! - `simple_json`: name-keyed JSON without type information
//!
//! Decoding works on whatever bytes have arrived so far. Running off the end
//! of the slice yields `ProtocolError::Incomplete`, which the caller answers
//! by reading more from the socket and trying again.

pub mod binary;
pub mod compact;
pub mod json;
pub mod simple_json;
mod tree;

use crate::error::{ProtocolError, ProtocolResult};
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

/// Maximum nesting depth followed when skipping unknown values.
pub const MAX_SKIP_DEPTH: usize = 64;

/// Thrift field and element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TType {
    Stop,
    /// No type information. Reported by protocols that do not carry types.
    Void,
    Bool,
    Byte,
    Double,
    I16,
    I32,
    I64,
    String,
    Struct,
    Map,
    Set,
    List,
}

impl TType {
    pub fn id(self) -> u8 {
        match self {
            TType::Stop => 0,
            TType::Void => 1,
            TType::Bool => 2,
            TType::Byte => 3,
            TType::Double => 4,
            TType::I16 => 6,
            TType::I32 => 8,
            TType::I64 => 10,
            TType::String => 11,
            TType::Struct => 12,
            TType::Map => 13,
            TType::Set => 14,
            TType::List => 15,
        }
    }
}

impl TryFrom<u8> for TType {
    type Error = ProtocolError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(TType::Stop),
            1 => Ok(TType::Void),
            2 => Ok(TType::Bool),
            3 => Ok(TType::Byte),
            4 => Ok(TType::Double),
            6 => Ok(TType::I16),
            8 => Ok(TType::I32),
            10 => Ok(TType::I64),
            11 => Ok(TType::String),
            12 => Ok(TType::Struct),
            13 => Ok(TType::Map),
            14 => Ok(TType::Set),
            15 => Ok(TType::List),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// Kind of message in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TMessageType {
    Call,
    Reply,
    Exception,
    Oneway,
}

impl TMessageType {
    pub fn id(self) -> u8 {
        match self {
            TMessageType::Call => 1,
            TMessageType::Reply => 2,
            TMessageType::Exception => 3,
            TMessageType::Oneway => 4,
        }
    }
}

impl TryFrom<u8> for TMessageType {
    type Error = ProtocolError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(TMessageType::Call),
            2 => Ok(TMessageType::Reply),
            3 => Ok(TMessageType::Exception),
            4 => Ok(TMessageType::Oneway),
            other => Err(ProtocolError::invalid(format!(
                "unknown message type {other}"
            ))),
        }
    }
}

/// Message envelope header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageIdentifier {
    pub name: String,
    pub message_type: TMessageType,
    pub sequence_number: i32,
}

impl MessageIdentifier {
    pub fn new(name: impl Into<String>, message_type: TMessageType, sequence_number: i32) -> Self {
        Self {
            name: name.into(),
            message_type,
            sequence_number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructIdentifier {
    pub name: String,
}

impl StructIdentifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Field header.
///
/// Typed protocols fill in `id` and `field_type`. The simple JSON protocol
/// only knows the field `name` and reports `TType::Void`; readers then match
/// fields by name and trust the schema for the type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIdentifier {
    pub name: Option<String>,
    pub field_type: TType,
    pub id: Option<i16>,
}

impl FieldIdentifier {
    pub fn new(name: impl Into<String>, field_type: TType, id: i16) -> Self {
        Self {
            name: Some(name.into()),
            field_type,
            id: Some(id),
        }
    }

    pub fn stop() -> Self {
        Self {
            name: None,
            field_type: TType::Stop,
            id: None,
        }
    }

    /// Field id, falling back to a lookup of the field name in `fields`.
    pub fn resolve_id(&self, fields: &[(i16, &str)]) -> Option<i16> {
        if let Some(id) = self.id {
            return Some(id);
        }
        let name = self.name.as_deref()?;
        fields
            .iter()
            .find(|(_, field_name)| *field_name == name)
            .map(|(id, _)| *id)
    }

    /// Whether a value of type `expected` can be read for this field.
    pub fn carries(&self, expected: TType) -> bool {
        self.field_type == expected || self.field_type == TType::Void
    }
}

/// Header of a list or a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListIdentifier {
    pub element_type: TType,
    pub size: i32,
}

impl ListIdentifier {
    pub fn new(element_type: TType, size: i32) -> Self {
        Self { element_type, size }
    }
}

pub type SetIdentifier = ListIdentifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapIdentifier {
    pub key_type: TType,
    pub value_type: TType,
    pub size: i32,
}

impl MapIdentifier {
    pub fn new(key_type: TType, value_type: TType, size: i32) -> Self {
        Self {
            key_type,
            value_type,
            size,
        }
    }
}

/// Decoding side of a protocol.
pub trait InputProtocol {
    fn read_message_begin(&mut self) -> ProtocolResult<MessageIdentifier>;
    fn read_message_end(&mut self) -> ProtocolResult<()>;
    fn read_struct_begin(&mut self) -> ProtocolResult<()>;
    fn read_struct_end(&mut self) -> ProtocolResult<()>;
    /// Returns a `TType::Stop` field when the struct has no more fields.
    fn read_field_begin(&mut self) -> ProtocolResult<FieldIdentifier>;
    fn read_field_end(&mut self) -> ProtocolResult<()>;
    fn read_bool(&mut self) -> ProtocolResult<bool>;
    fn read_byte(&mut self) -> ProtocolResult<i8>;
    fn read_i16(&mut self) -> ProtocolResult<i16>;
    fn read_i32(&mut self) -> ProtocolResult<i32>;
    fn read_i64(&mut self) -> ProtocolResult<i64>;
    fn read_double(&mut self) -> ProtocolResult<f64>;
    fn read_string(&mut self) -> ProtocolResult<String>;
    fn read_binary(&mut self) -> ProtocolResult<Vec<u8>>;
    fn read_list_begin(&mut self) -> ProtocolResult<ListIdentifier>;
    fn read_list_end(&mut self) -> ProtocolResult<()>;
    fn read_set_begin(&mut self) -> ProtocolResult<SetIdentifier>;
    fn read_set_end(&mut self) -> ProtocolResult<()>;
    fn read_map_begin(&mut self) -> ProtocolResult<MapIdentifier>;
    fn read_map_end(&mut self) -> ProtocolResult<()>;

    /// Number of input bytes consumed so far.
    fn consumed(&self) -> usize;

    /// Discard a string or binary value without decoding it.
    fn skip_binary(&mut self) -> ProtocolResult<()> {
        self.read_binary().map(|_| ())
    }

    /// Discard the next value of type `field_type`.
    fn skip(&mut self, field_type: TType) -> ProtocolResult<()> {
        self.skip_till_depth(field_type, MAX_SKIP_DEPTH)
    }

    fn skip_till_depth(&mut self, field_type: TType, depth: usize) -> ProtocolResult<()> {
        if depth == 0 {
            return Err(ProtocolError::DepthLimit);
        }

        match field_type {
            TType::Bool => self.read_bool().map(|_| ()),
            TType::Byte => self.read_byte().map(|_| ()),
            TType::I16 => self.read_i16().map(|_| ()),
            TType::I32 => self.read_i32().map(|_| ()),
            TType::I64 => self.read_i64().map(|_| ()),
            TType::Double => self.read_double().map(|_| ()),
            TType::String => self.skip_binary(),
            TType::Struct => {
                self.read_struct_begin()?;
                loop {
                    let field = self.read_field_begin()?;
                    if field.field_type == TType::Stop {
                        break;
                    }
                    self.skip_till_depth(field.field_type, depth - 1)?;
                    self.read_field_end()?;
                }
                self.read_struct_end()
            }
            TType::List => {
                let list = self.read_list_begin()?;
                for _ in 0..list.size {
                    self.skip_till_depth(list.element_type, depth - 1)?;
                }
                self.read_list_end()
            }
            TType::Set => {
                let set = self.read_set_begin()?;
                for _ in 0..set.size {
                    self.skip_till_depth(set.element_type, depth - 1)?;
                }
                self.read_set_end()
            }
            TType::Map => {
                let map = self.read_map_begin()?;
                for _ in 0..map.size {
                    self.skip_till_depth(map.key_type, depth - 1)?;
                    self.skip_till_depth(map.value_type, depth - 1)?;
                }
                self.read_map_end()
            }
            TType::Stop | TType::Void => Err(ProtocolError::invalid(format!(
                "cannot skip value of type {field_type:?}"
            ))),
        }
    }
}

/// Encoding side of a protocol.
pub trait OutputProtocol {
    fn write_message_begin(&mut self, ident: &MessageIdentifier) -> ProtocolResult<()>;
    fn write_message_end(&mut self) -> ProtocolResult<()>;
    fn write_struct_begin(&mut self, ident: &StructIdentifier) -> ProtocolResult<()>;
    fn write_struct_end(&mut self) -> ProtocolResult<()>;
    fn write_field_begin(&mut self, ident: &FieldIdentifier) -> ProtocolResult<()>;
    fn write_field_end(&mut self) -> ProtocolResult<()>;
    fn write_field_stop(&mut self) -> ProtocolResult<()>;
    fn write_bool(&mut self, value: bool) -> ProtocolResult<()>;
    fn write_byte(&mut self, value: i8) -> ProtocolResult<()>;
    fn write_i16(&mut self, value: i16) -> ProtocolResult<()>;
    fn write_i32(&mut self, value: i32) -> ProtocolResult<()>;
    fn write_i64(&mut self, value: i64) -> ProtocolResult<()>;
    fn write_double(&mut self, value: f64) -> ProtocolResult<()>;
    fn write_string(&mut self, value: &str) -> ProtocolResult<()>;
    fn write_binary(&mut self, value: &[u8]) -> ProtocolResult<()>;
    fn write_list_begin(&mut self, ident: &ListIdentifier) -> ProtocolResult<()>;
    fn write_list_end(&mut self) -> ProtocolResult<()>;
    fn write_set_begin(&mut self, ident: &SetIdentifier) -> ProtocolResult<()>;
    fn write_set_end(&mut self) -> ProtocolResult<()>;
    fn write_map_begin(&mut self, ident: &MapIdentifier) -> ProtocolResult<()>;
    fn write_map_end(&mut self) -> ProtocolResult<()>;

    /// Take every complete byte encoded so far.
    fn take_output(&mut self) -> Bytes;
}

/// A struct that can be read from and written to any protocol.
pub trait WireStruct: Sized {
    fn read(input: &mut dyn InputProtocol) -> ProtocolResult<Self>;
    fn write(&self, output: &mut dyn OutputProtocol) -> ProtocolResult<()>;
}

/// Builds the input and output halves of one protocol.
pub trait ProtocolFactory: Send + Sync {
    /// Start decoding `input`. Fails with `Incomplete` if not even the first
    /// token is available yet.
    fn input<'a>(&self, input: &'a [u8]) -> ProtocolResult<Box<dyn InputProtocol + 'a>>;

    fn output(&self) -> Box<dyn OutputProtocol>;
}

/// The wire protocols a server can be launched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Json,
    SimpleJson,
    Binary,
    Compact,
}

impl Protocol {
    /// Every protocol, in the order they are listed to users.
    pub const ALL: [Protocol; 4] = [
        Protocol::Json,
        Protocol::SimpleJson,
        Protocol::Binary,
        Protocol::Compact,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Json => "JSON",
            Protocol::SimpleJson => "SIMPLE_JSON",
            Protocol::Binary => "BINARY",
            Protocol::Compact => "COMPACT",
        }
    }

    pub fn factory(self) -> &'static dyn ProtocolFactory {
        match self {
            Protocol::Json => &json::JsonProtocolFactory,
            Protocol::SimpleJson => &simple_json::SimpleJsonProtocolFactory,
            Protocol::Binary => &binary::BinaryProtocolFactory,
            Protocol::Compact => &compact::CompactProtocolFactory,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A protocol name outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized protocol '{0}' (expected one of JSON, SIMPLE_JSON, BINARY, COMPACT)")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "JSON" => Ok(Protocol::Json),
            "SIMPLE_JSON" => Ok(Protocol::SimpleJson),
            "BINARY" => Ok(Protocol::Binary),
            "COMPACT" => Ok(Protocol::Compact),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}

/// Reject negative sizes read off the wire.
pub(crate) fn checked_size(size: i64) -> ProtocolResult<usize> {
    if size < 0 {
        return Err(ProtocolError::NegativeSize(size));
    }
    usize::try_from(size).map_err(|_| ProtocolError::SizeLimit {
        size: usize::MAX,
        max: isize::MAX as usize,
    })
}

/// Convert a container length to the `i32` the wire carries.
pub(crate) fn wire_size(len: usize) -> ProtocolResult<i32> {
    i32::try_from(len).map_err(|_| ProtocolError::SizeLimit {
        size: len,
        max: i32::MAX as usize,
    })
}
