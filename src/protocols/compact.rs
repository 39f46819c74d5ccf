//! Thrift compact protocol.
//!
//! Integers are zigzag varints, field ids are written as a delta from the
//! previous field when it fits in four bits, and boolean fields fold their
//! value into the field header.
//!
//! ```text
//! Message:  [0x82] [type << 5 | version] [varint seqid] [varint name len] [name]
//! Field:    [delta << 4 | ctype]  or  [ctype] [zigzag i16 id]
//! List/Set: [size << 4 | ctype]   or  [0xf0 | ctype] [varint size]
//! Map:      [0x00] (empty)        or  [varint size] [kctype << 4 | vctype]
//! ```

use super::{
    checked_size, wire_size, FieldIdentifier, InputProtocol, ListIdentifier, MapIdentifier,
    MessageIdentifier, OutputProtocol, ProtocolFactory, SetIdentifier, StructIdentifier,
    TMessageType, TType,
};
use crate::error::{ProtocolError, ProtocolResult};
use bytes::{BufMut, Bytes, BytesMut};

const PROTOCOL_ID: u8 = 0x82;
const VERSION: u8 = 1;
const VERSION_MASK: u8 = 0x1f;
const TYPE_SHIFT: u8 = 5;

const CT_BOOLEAN_TRUE: u8 = 0x01;
const CT_BOOLEAN_FALSE: u8 = 0x02;
const CT_BYTE: u8 = 0x03;
const CT_I16: u8 = 0x04;
const CT_I32: u8 = 0x05;
const CT_I64: u8 = 0x06;
const CT_DOUBLE: u8 = 0x07;
const CT_BINARY: u8 = 0x08;
const CT_LIST: u8 = 0x09;
const CT_SET: u8 = 0x0a;
const CT_MAP: u8 = 0x0b;
const CT_STRUCT: u8 = 0x0c;

fn compact_type(field_type: TType) -> ProtocolResult<u8> {
    match field_type {
        TType::Bool => Ok(CT_BOOLEAN_TRUE),
        TType::Byte => Ok(CT_BYTE),
        TType::I16 => Ok(CT_I16),
        TType::I32 => Ok(CT_I32),
        TType::I64 => Ok(CT_I64),
        TType::Double => Ok(CT_DOUBLE),
        TType::String => Ok(CT_BINARY),
        TType::List => Ok(CT_LIST),
        TType::Set => Ok(CT_SET),
        TType::Map => Ok(CT_MAP),
        TType::Struct => Ok(CT_STRUCT),
        TType::Stop | TType::Void => Err(ProtocolError::invalid(format!(
            "type {field_type:?} has no compact encoding"
        ))),
    }
}

fn ttype(compact: u8) -> ProtocolResult<TType> {
    match compact {
        0x00 => Ok(TType::Stop),
        CT_BOOLEAN_TRUE | CT_BOOLEAN_FALSE => Ok(TType::Bool),
        CT_BYTE => Ok(TType::Byte),
        CT_I16 => Ok(TType::I16),
        CT_I32 => Ok(TType::I32),
        CT_I64 => Ok(TType::I64),
        CT_DOUBLE => Ok(TType::Double),
        CT_BINARY => Ok(TType::String),
        CT_LIST => Ok(TType::List),
        CT_SET => Ok(TType::Set),
        CT_MAP => Ok(TType::Map),
        CT_STRUCT => Ok(TType::Struct),
        other => Err(ProtocolError::UnknownType(other)),
    }
}

fn zigzag_32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

fn zigzag_64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

fn unzigzag_32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

fn unzigzag_64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

pub struct CompactProtocolFactory;

impl ProtocolFactory for CompactProtocolFactory {
    fn input<'a>(&self, input: &'a [u8]) -> ProtocolResult<Box<dyn InputProtocol + 'a>> {
        Ok(Box::new(CompactInputProtocol::new(input)))
    }

    fn output(&self) -> Box<dyn OutputProtocol> {
        Box::new(CompactOutputProtocol::new())
    }
}

/// Decodes the compact protocol from a byte slice.
pub struct CompactInputProtocol<'a> {
    input: &'a [u8],
    pos: usize,
    last_field_id: i16,
    field_id_stack: Vec<i16>,
    /// Value of a boolean field, carried in its header.
    pending_bool: Option<bool>,
}

impl<'a> CompactInputProtocol<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            last_field_id: 0,
            field_id_stack: Vec::new(),
            pending_bool: None,
        }
    }

    fn take(&mut self, len: usize) -> ProtocolResult<&'a [u8]> {
        if self.input.len() - self.pos < len {
            return Err(ProtocolError::Incomplete);
        }
        let bytes = &self.input[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> ProtocolResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_varint(&mut self, max_bytes: usize) -> ProtocolResult<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        for _ in 0..max_bytes {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(ProtocolError::invalid("varint is too long"))
    }

    fn read_varint32(&mut self) -> ProtocolResult<u32> {
        Ok(self.read_varint(5)? as u32)
    }

    fn read_varint64(&mut self) -> ProtocolResult<u64> {
        self.read_varint(10)
    }

    fn read_collection_header(&mut self) -> ProtocolResult<ListIdentifier> {
        let header = self.read_u8()?;
        let element_type = ttype(header & 0x0f)?;
        let short_size = (header >> 4) & 0x0f;
        let size = if short_size == 0x0f {
            self.read_varint32()? as i32
        } else {
            short_size as i32
        };
        checked_size(size as i64)?;
        Ok(ListIdentifier::new(element_type, size))
    }
}

impl InputProtocol for CompactInputProtocol<'_> {
    fn read_message_begin(&mut self) -> ProtocolResult<MessageIdentifier> {
        let protocol_id = self.read_u8()?;
        if protocol_id != PROTOCOL_ID {
            return Err(ProtocolError::invalid(format!(
                "expected compact protocol id {PROTOCOL_ID:#x}, got {protocol_id:#x}"
            )));
        }

        let version_and_type = self.read_u8()?;
        let version = version_and_type & VERSION_MASK;
        if version != VERSION {
            return Err(ProtocolError::BadVersion(version as u32));
        }
        let message_type = TMessageType::try_from(version_and_type >> TYPE_SHIFT)?;
        let sequence_number = self.read_varint32()? as i32;
        let name = self.read_string()?;

        Ok(MessageIdentifier::new(name, message_type, sequence_number))
    }

    fn read_message_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn read_struct_begin(&mut self) -> ProtocolResult<()> {
        self.field_id_stack.push(self.last_field_id);
        self.last_field_id = 0;
        Ok(())
    }

    fn read_struct_end(&mut self) -> ProtocolResult<()> {
        self.last_field_id = self
            .field_id_stack
            .pop()
            .ok_or_else(|| ProtocolError::invalid("struct end without struct begin"))?;
        Ok(())
    }

    fn read_field_begin(&mut self) -> ProtocolResult<FieldIdentifier> {
        let header = self.read_u8()?;
        let compact = header & 0x0f;
        if compact == 0 {
            return Ok(FieldIdentifier::stop());
        }

        let delta = (header & 0xf0) >> 4;
        let id = if delta == 0 {
            self.read_i16()?
        } else {
            self.last_field_id.wrapping_add(delta as i16)
        };
        self.last_field_id = id;

        let field_type = ttype(compact)?;
        if field_type == TType::Bool {
            self.pending_bool = Some(compact == CT_BOOLEAN_TRUE);
        }

        Ok(FieldIdentifier {
            name: None,
            field_type,
            id: Some(id),
        })
    }

    fn read_field_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn read_bool(&mut self) -> ProtocolResult<bool> {
        match self.pending_bool.take() {
            Some(value) => Ok(value),
            None => Ok(self.read_u8()? == CT_BOOLEAN_TRUE),
        }
    }

    fn read_byte(&mut self) -> ProtocolResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    fn read_i16(&mut self) -> ProtocolResult<i16> {
        Ok(unzigzag_32(self.read_varint32()?) as i16)
    }

    fn read_i32(&mut self) -> ProtocolResult<i32> {
        Ok(unzigzag_32(self.read_varint32()?))
    }

    fn read_i64(&mut self) -> ProtocolResult<i64> {
        Ok(unzigzag_64(self.read_varint64()?))
    }

    fn read_double(&mut self) -> ProtocolResult<f64> {
        let mut bits = [0u8; 8];
        bits.copy_from_slice(self.take(8)?);
        Ok(f64::from_bits(u64::from_le_bytes(bits)))
    }

    fn read_string(&mut self) -> ProtocolResult<String> {
        String::from_utf8(self.read_binary()?)
            .map_err(|_| ProtocolError::invalid("string is not valid UTF-8"))
    }

    fn read_binary(&mut self) -> ProtocolResult<Vec<u8>> {
        let len = self.read_varint32()? as i32;
        let len = checked_size(len as i64)?;
        Ok(self.take(len)?.to_vec())
    }

    fn read_list_begin(&mut self) -> ProtocolResult<ListIdentifier> {
        self.read_collection_header()
    }

    fn read_list_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn read_set_begin(&mut self) -> ProtocolResult<SetIdentifier> {
        self.read_collection_header()
    }

    fn read_set_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn read_map_begin(&mut self) -> ProtocolResult<MapIdentifier> {
        let size = self.read_varint32()? as i32;
        checked_size(size as i64)?;
        if size == 0 {
            return Ok(MapIdentifier::new(TType::Stop, TType::Stop, 0));
        }
        let types = self.read_u8()?;
        let key_type = ttype(types >> 4)?;
        let value_type = ttype(types & 0x0f)?;
        Ok(MapIdentifier::new(key_type, value_type, size))
    }

    fn read_map_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn consumed(&self) -> usize {
        self.pos
    }
}

/// Encodes the compact protocol into a buffer.
#[derive(Default)]
pub struct CompactOutputProtocol {
    buf: BytesMut,
    last_field_id: i16,
    field_id_stack: Vec<i16>,
    /// Header of a boolean field, held back until the value is known.
    pending_bool_field: Option<i16>,
}

impl CompactOutputProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_varint(&mut self, mut n: u64) {
        while n >= 0x80 {
            self.buf.put_u8((n as u8 & 0x7f) | 0x80);
            n >>= 7;
        }
        self.buf.put_u8(n as u8);
    }

    fn write_field_header(&mut self, compact: u8, id: i16) -> ProtocolResult<()> {
        let delta = id.wrapping_sub(self.last_field_id);
        if id > self.last_field_id && delta <= 15 {
            self.buf.put_u8(((delta as u8) << 4) | compact);
        } else {
            self.buf.put_u8(compact);
            self.write_i16(id)?;
        }
        self.last_field_id = id;
        Ok(())
    }

    fn write_collection_header(&mut self, element_type: TType, size: i32) -> ProtocolResult<()> {
        let compact = compact_type(element_type)?;
        if (0..15).contains(&size) {
            self.buf.put_u8(((size as u8) << 4) | compact);
        } else {
            self.buf.put_u8(0xf0 | compact);
            self.write_varint(size as u32 as u64);
        }
        Ok(())
    }
}

impl OutputProtocol for CompactOutputProtocol {
    fn write_message_begin(&mut self, ident: &MessageIdentifier) -> ProtocolResult<()> {
        self.buf.put_u8(PROTOCOL_ID);
        self.buf
            .put_u8((ident.message_type.id() << TYPE_SHIFT) | (VERSION & VERSION_MASK));
        self.write_varint(ident.sequence_number as u32 as u64);
        self.write_string(&ident.name)
    }

    fn write_message_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn write_struct_begin(&mut self, _ident: &StructIdentifier) -> ProtocolResult<()> {
        self.field_id_stack.push(self.last_field_id);
        self.last_field_id = 0;
        Ok(())
    }

    fn write_struct_end(&mut self) -> ProtocolResult<()> {
        self.last_field_id = self
            .field_id_stack
            .pop()
            .ok_or_else(|| ProtocolError::invalid("struct end without struct begin"))?;
        Ok(())
    }

    fn write_field_begin(&mut self, ident: &FieldIdentifier) -> ProtocolResult<()> {
        let id = ident
            .id
            .ok_or_else(|| ProtocolError::invalid("compact fields need an id"))?;
        if ident.field_type == TType::Bool {
            self.pending_bool_field = Some(id);
            return Ok(());
        }
        self.write_field_header(compact_type(ident.field_type)?, id)
    }

    fn write_field_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> ProtocolResult<()> {
        self.buf.put_u8(0);
        Ok(())
    }

    fn write_bool(&mut self, value: bool) -> ProtocolResult<()> {
        let compact = if value {
            CT_BOOLEAN_TRUE
        } else {
            CT_BOOLEAN_FALSE
        };
        match self.pending_bool_field.take() {
            Some(id) => self.write_field_header(compact, id),
            None => {
                self.buf.put_u8(compact);
                Ok(())
            }
        }
    }

    fn write_byte(&mut self, value: i8) -> ProtocolResult<()> {
        self.buf.put_i8(value);
        Ok(())
    }

    fn write_i16(&mut self, value: i16) -> ProtocolResult<()> {
        self.write_varint(zigzag_32(value as i32) as u64);
        Ok(())
    }

    fn write_i32(&mut self, value: i32) -> ProtocolResult<()> {
        self.write_varint(zigzag_32(value) as u64);
        Ok(())
    }

    fn write_i64(&mut self, value: i64) -> ProtocolResult<()> {
        self.write_varint(zigzag_64(value));
        Ok(())
    }

    fn write_double(&mut self, value: f64) -> ProtocolResult<()> {
        self.buf.put_f64_le(value);
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> ProtocolResult<()> {
        self.write_binary(value.as_bytes())
    }

    fn write_binary(&mut self, value: &[u8]) -> ProtocolResult<()> {
        let len = wire_size(value.len())?;
        self.write_varint(len as u64);
        self.buf.put_slice(value);
        Ok(())
    }

    fn write_list_begin(&mut self, ident: &ListIdentifier) -> ProtocolResult<()> {
        self.write_collection_header(ident.element_type, ident.size)
    }

    fn write_list_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn write_set_begin(&mut self, ident: &SetIdentifier) -> ProtocolResult<()> {
        self.write_collection_header(ident.element_type, ident.size)
    }

    fn write_set_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn write_map_begin(&mut self, ident: &MapIdentifier) -> ProtocolResult<()> {
        if ident.size == 0 {
            self.buf.put_u8(0);
            return Ok(());
        }
        self.write_varint(ident.size as u32 as u64);
        let key = compact_type(ident.key_type)?;
        let value = compact_type(ident.value_type)?;
        self.buf.put_u8((key << 4) | value);
        Ok(())
    }

    fn write_map_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn take_output(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}
