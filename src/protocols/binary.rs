//! Thrift binary protocol.
//!
//! Fixed-width big-endian integers, `i32` length prefixes for strings and
//! containers, and a one-byte type tag plus `i16` id per field.
//!
//! ```text
//! Message:  [0x80 0x01 0x00 type] [i32 name len] [name] [i32 seqid] <struct>
//! Field:    [type] [i16 id] <value>        ...  [0x00] (stop)
//! List/Set: [elem type] [i32 size] <elems>
//! Map:      [key type] [value type] [i32 size] <key value pairs>
//! ```
//!
//! Messages are always written with the versioned header. Unversioned
//! headers from old clients (`[i32 name len] [name] [type] [i32 seqid]`)
//! are accepted on read.

use super::{
    checked_size, wire_size, FieldIdentifier, InputProtocol, ListIdentifier, MapIdentifier,
    MessageIdentifier, OutputProtocol, ProtocolFactory, SetIdentifier, StructIdentifier,
    TMessageType, TType,
};
use crate::error::{ProtocolError, ProtocolResult};
use bytes::{BufMut, Bytes, BytesMut};

const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;

pub struct BinaryProtocolFactory;

impl ProtocolFactory for BinaryProtocolFactory {
    fn input<'a>(&self, input: &'a [u8]) -> ProtocolResult<Box<dyn InputProtocol + 'a>> {
        Ok(Box::new(BinaryInputProtocol::new(input)))
    }

    fn output(&self) -> Box<dyn OutputProtocol> {
        Box::new(BinaryOutputProtocol::new())
    }
}

/// Decodes the binary protocol from a byte slice.
pub struct BinaryInputProtocol<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> BinaryInputProtocol<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn take(&mut self, len: usize) -> ProtocolResult<&'a [u8]> {
        if self.input.len() - self.pos < len {
            return Err(ProtocolError::Incomplete);
        }
        let bytes = &self.input[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> ProtocolResult<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    fn read_u8(&mut self) -> ProtocolResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_type(&mut self) -> ProtocolResult<TType> {
        TType::try_from(self.read_u8()?)
    }

    fn read_size(&mut self) -> ProtocolResult<usize> {
        let size = self.read_i32()?;
        checked_size(size as i64)
    }
}

impl InputProtocol for BinaryInputProtocol<'_> {
    fn read_message_begin(&mut self) -> ProtocolResult<MessageIdentifier> {
        let header = self.read_i32()?;

        if header < 0 {
            let version = header as u32 & VERSION_MASK;
            if version != VERSION_1 {
                return Err(ProtocolError::BadVersion(version));
            }
            let message_type = TMessageType::try_from((header & 0xff) as u8)?;
            let name = self.read_string()?;
            let sequence_number = self.read_i32()?;
            Ok(MessageIdentifier::new(name, message_type, sequence_number))
        } else {
            let name_len = checked_size(header as i64)?;
            let name = String::from_utf8(self.take(name_len)?.to_vec())
                .map_err(|_| ProtocolError::invalid("method name is not valid UTF-8"))?;
            let message_type = TMessageType::try_from(self.read_u8()?)?;
            let sequence_number = self.read_i32()?;
            Ok(MessageIdentifier::new(name, message_type, sequence_number))
        }
    }

    fn read_message_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn read_struct_begin(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn read_struct_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn read_field_begin(&mut self) -> ProtocolResult<FieldIdentifier> {
        let field_type = self.read_type()?;
        if field_type == TType::Stop {
            return Ok(FieldIdentifier::stop());
        }
        let id = self.read_i16()?;
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
        Ok(self.read_u8()? != 0)
    }

    fn read_byte(&mut self) -> ProtocolResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    fn read_i16(&mut self) -> ProtocolResult<i16> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    fn read_i32(&mut self) -> ProtocolResult<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    fn read_i64(&mut self) -> ProtocolResult<i64> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    fn read_double(&mut self) -> ProtocolResult<f64> {
        Ok(f64::from_bits(u64::from_be_bytes(self.take_array()?)))
    }

    fn read_string(&mut self) -> ProtocolResult<String> {
        String::from_utf8(self.read_binary()?)
            .map_err(|_| ProtocolError::invalid("string is not valid UTF-8"))
    }

    fn read_binary(&mut self) -> ProtocolResult<Vec<u8>> {
        let len = self.read_size()?;
        Ok(self.take(len)?.to_vec())
    }

    fn read_list_begin(&mut self) -> ProtocolResult<ListIdentifier> {
        let element_type = self.read_type()?;
        let size = self.read_i32()?;
        checked_size(size as i64)?;
        Ok(ListIdentifier::new(element_type, size))
    }

    fn read_list_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn read_set_begin(&mut self) -> ProtocolResult<SetIdentifier> {
        self.read_list_begin()
    }

    fn read_set_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn read_map_begin(&mut self) -> ProtocolResult<MapIdentifier> {
        let key_type = self.read_type()?;
        let value_type = self.read_type()?;
        let size = self.read_i32()?;
        checked_size(size as i64)?;
        Ok(MapIdentifier::new(key_type, value_type, size))
    }

    fn read_map_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn consumed(&self) -> usize {
        self.pos
    }
}

/// Encodes the binary protocol into a buffer.
#[derive(Default)]
pub struct BinaryOutputProtocol {
    buf: BytesMut,
}

impl BinaryOutputProtocol {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputProtocol for BinaryOutputProtocol {
    fn write_message_begin(&mut self, ident: &MessageIdentifier) -> ProtocolResult<()> {
        let header = VERSION_1 | ident.message_type.id() as u32;
        self.buf.put_u32(header);
        self.write_string(&ident.name)?;
        self.write_i32(ident.sequence_number)
    }

    fn write_message_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn write_struct_begin(&mut self, _ident: &StructIdentifier) -> ProtocolResult<()> {
        Ok(())
    }

    fn write_struct_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn write_field_begin(&mut self, ident: &FieldIdentifier) -> ProtocolResult<()> {
        let id = ident
            .id
            .ok_or_else(|| ProtocolError::invalid("binary fields need an id"))?;
        self.buf.put_u8(ident.field_type.id());
        self.buf.put_i16(id);
        Ok(())
    }

    fn write_field_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> ProtocolResult<()> {
        self.buf.put_u8(TType::Stop.id());
        Ok(())
    }

    fn write_bool(&mut self, value: bool) -> ProtocolResult<()> {
        self.buf.put_u8(value as u8);
        Ok(())
    }

    fn write_byte(&mut self, value: i8) -> ProtocolResult<()> {
        self.buf.put_i8(value);
        Ok(())
    }

    fn write_i16(&mut self, value: i16) -> ProtocolResult<()> {
        self.buf.put_i16(value);
        Ok(())
    }

    fn write_i32(&mut self, value: i32) -> ProtocolResult<()> {
        self.buf.put_i32(value);
        Ok(())
    }

    fn write_i64(&mut self, value: i64) -> ProtocolResult<()> {
        self.buf.put_i64(value);
        Ok(())
    }

    fn write_double(&mut self, value: f64) -> ProtocolResult<()> {
        self.buf.put_f64(value);
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> ProtocolResult<()> {
        self.write_binary(value.as_bytes())
    }

    fn write_binary(&mut self, value: &[u8]) -> ProtocolResult<()> {
        self.buf.put_i32(wire_size(value.len())?);
        self.buf.put_slice(value);
        Ok(())
    }

    fn write_list_begin(&mut self, ident: &ListIdentifier) -> ProtocolResult<()> {
        self.buf.put_u8(ident.element_type.id());
        self.buf.put_i32(ident.size);
        Ok(())
    }

    fn write_list_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn write_set_begin(&mut self, ident: &SetIdentifier) -> ProtocolResult<()> {
        self.write_list_begin(ident)
    }

    fn write_set_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn write_map_begin(&mut self, ident: &MapIdentifier) -> ProtocolResult<()> {
        self.buf.put_u8(ident.key_type.id());
        self.buf.put_u8(ident.value_type.id());
        self.buf.put_i32(ident.size);
        Ok(())
    }

    fn write_map_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn take_output(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_message_header() {
        let mut out = BinaryOutputProtocol::new();
        out.write_message_begin(&MessageIdentifier::new("echo", TMessageType::Call, 7))
            .unwrap();
        out.write_message_end().unwrap();

        assert_eq!(
            &out.take_output()[..],
            &[0x80, 0x01, 0x00, 0x01, 0, 0, 0, 4, b'e', b'c', b'h', b'o', 0, 0, 0, 7]
        );
    }

    #[test]
    fn test_decode_message_header() {
        let bytes = [0x80, 0x01, 0x00, 0x02, 0, 0, 0, 4, b'e', b'c', b'h', b'o', 0, 0, 0, 9];
        let mut input = BinaryInputProtocol::new(&bytes);
        let ident = input.read_message_begin().unwrap();

        assert_eq!(ident, MessageIdentifier::new("echo", TMessageType::Reply, 9));
        assert_eq!(input.consumed(), bytes.len());
    }

    #[test]
    fn test_decode_unversioned_header() {
        let bytes = [0, 0, 0, 4, b'e', b'c', b'h', b'o', 1, 0, 0, 0, 3];
        let mut input = BinaryInputProtocol::new(&bytes);
        let ident = input.read_message_begin().unwrap();

        assert_eq!(ident, MessageIdentifier::new("echo", TMessageType::Call, 3));
    }

    #[test]
    fn test_bad_version() {
        let bytes = [0x80, 0x02, 0x00, 0x01, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut input = BinaryInputProtocol::new(&bytes);

        assert!(matches!(
            input.read_message_begin(),
            Err(ProtocolError::BadVersion(0x8002_0000))
        ));
    }

    #[test]
    fn test_incomplete() {
        let bytes = [0x80, 0x01, 0x00, 0x01, 0, 0, 0, 4, b'e', b'c'];
        let mut input = BinaryInputProtocol::new(&bytes);

        assert!(matches!(
            input.read_message_begin(),
            Err(ProtocolError::Incomplete)
        ));
    }

    #[test]
    fn test_encode_field_and_list() {
        let mut out = BinaryOutputProtocol::new();
        out.write_field_begin(&FieldIdentifier::new("status", TType::List, 10))
            .unwrap();
        out.write_list_begin(&ListIdentifier::new(TType::I32, 2))
            .unwrap();
        out.write_i32(1).unwrap();
        out.write_i32(2).unwrap();
        out.write_list_end().unwrap();
        out.write_field_end().unwrap();
        out.write_field_stop().unwrap();

        assert_eq!(
            &out.take_output()[..],
            &[15, 0, 10, 8, 0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0, 2, 0]
        );
    }

    #[test]
    fn test_decode_map_header() {
        let bytes = [8, 8, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3];
        let mut input = BinaryInputProtocol::new(&bytes);
        let map = input.read_map_begin().unwrap();

        assert_eq!(map, MapIdentifier::new(TType::I32, TType::I32, 1));
        assert_eq!(input.read_i32().unwrap(), 2);
        assert_eq!(input.read_i32().unwrap(), 3);
    }

    #[test]
    fn test_negative_list_size() {
        let bytes = [8, 0xff, 0xff, 0xff, 0xff];
        let mut input = BinaryInputProtocol::new(&bytes);

        assert!(matches!(
            input.read_list_begin(),
            Err(ProtocolError::NegativeSize(-1))
        ));
    }

    #[test]
    fn test_skip_struct() {
        // struct { 1: i32 5, 2: string "hi" } followed by a trailing byte
        let bytes = [8, 0, 1, 0, 0, 0, 5, 11, 0, 2, 0, 0, 0, 2, b'h', b'i', 0, 0xaa];
        let mut input = BinaryInputProtocol::new(&bytes);
        input.skip(TType::Struct).unwrap();

        assert_eq!(input.consumed(), bytes.len() - 1);
    }

    #[test]
    fn test_scalars() {
        let mut out = BinaryOutputProtocol::new();
        out.write_bool(true).unwrap();
        out.write_byte(-3).unwrap();
        out.write_i16(-2).unwrap();
        out.write_i64(1 << 40).unwrap();
        out.write_double(1.5).unwrap();
        out.write_string("héllo").unwrap();
        let bytes = out.take_output();

        let mut input = BinaryInputProtocol::new(&bytes);
        assert!(input.read_bool().unwrap());
        assert_eq!(input.read_byte().unwrap(), -3);
        assert_eq!(input.read_i16().unwrap(), -2);
        assert_eq!(input.read_i64().unwrap(), 1 << 40);
        assert_eq!(input.read_double().unwrap(), 1.5);
        assert_eq!(input.read_string().unwrap(), "héllo");
        assert_eq!(input.consumed(), bytes.len());
    }
}
