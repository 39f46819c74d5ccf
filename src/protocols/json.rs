//! Thrift JSON protocol.
//!
//! Fully typed: field ids and type tags travel with every value, so any
//! reader can decode a message without knowing its schema.
//!
//! ```text
//! Message: [1,"echo",1,7,{...}]
//! Struct:  {"1":{"i32":2},"10":{"lst":["i32",2,1,2]}}
//! List:    ["i32",2,1,2]
//! Map:     ["i32","i32",1,{"0":3}]
//! ```
//!
//! Booleans are written as 1/0, binary as unpadded base64, and map keys are
//! always strings.

use super::tree::{TreeReader, TreeWriter};
use super::{
    checked_size, FieldIdentifier, InputProtocol, ListIdentifier, MapIdentifier,
    MessageIdentifier, OutputProtocol, ProtocolFactory, SetIdentifier, StructIdentifier,
    TMessageType, TType,
};
use crate::error::{ProtocolError, ProtocolResult};
use bytes::Bytes;
use serde_json::Value;

const VERSION: i64 = 1;

fn type_name(field_type: TType) -> ProtocolResult<&'static str> {
    match field_type {
        TType::Bool => Ok("tf"),
        TType::Byte => Ok("i8"),
        TType::I16 => Ok("i16"),
        TType::I32 => Ok("i32"),
        TType::I64 => Ok("i64"),
        TType::Double => Ok("dbl"),
        TType::String => Ok("str"),
        TType::Struct => Ok("rec"),
        TType::Map => Ok("map"),
        TType::Set => Ok("set"),
        TType::List => Ok("lst"),
        TType::Stop | TType::Void => Err(ProtocolError::invalid(format!(
            "type {field_type:?} has no JSON name"
        ))),
    }
}

fn type_from_name(name: &str) -> ProtocolResult<TType> {
    match name {
        "tf" => Ok(TType::Bool),
        "i8" => Ok(TType::Byte),
        "i16" => Ok(TType::I16),
        "i32" => Ok(TType::I32),
        "i64" => Ok(TType::I64),
        "dbl" => Ok(TType::Double),
        "str" => Ok(TType::String),
        "rec" => Ok(TType::Struct),
        "map" => Ok(TType::Map),
        "set" => Ok(TType::Set),
        "lst" => Ok(TType::List),
        other => Err(ProtocolError::invalid(format!(
            "unknown JSON type name '{other}'"
        ))),
    }
}

pub struct JsonProtocolFactory;

impl ProtocolFactory for JsonProtocolFactory {
    fn input<'a>(&self, input: &'a [u8]) -> ProtocolResult<Box<dyn InputProtocol + 'a>> {
        Ok(Box::new(JsonInputProtocol::new(input)?))
    }

    fn output(&self) -> Box<dyn OutputProtocol> {
        Box::new(JsonOutputProtocol::new())
    }
}

pub struct JsonInputProtocol {
    tree: TreeReader,
}

impl JsonInputProtocol {
    pub fn new(input: &[u8]) -> ProtocolResult<Self> {
        Ok(Self {
            tree: TreeReader::parse(input)?,
        })
    }

    fn read_type(&mut self) -> ProtocolResult<TType> {
        let name = self.tree.next_string()?;
        type_from_name(&name)
    }

    fn read_size(&mut self) -> ProtocolResult<i32> {
        let size = self.tree.next_int::<i32>()?;
        checked_size(size as i64)?;
        Ok(size)
    }
}

impl InputProtocol for JsonInputProtocol {
    fn read_message_begin(&mut self) -> ProtocolResult<MessageIdentifier> {
        self.tree.enter_array()?;
        let version = self.tree.next_i64()?;
        if version != VERSION {
            return Err(ProtocolError::BadVersion(version as u32));
        }
        let name = self.tree.next_string()?;
        let message_type = TMessageType::try_from(self.tree.next_int::<u8>()?)?;
        let sequence_number = self.tree.next_int::<i32>()?;
        Ok(MessageIdentifier::new(name, message_type, sequence_number))
    }

    fn read_message_end(&mut self) -> ProtocolResult<()> {
        self.tree.leave()
    }

    fn read_struct_begin(&mut self) -> ProtocolResult<()> {
        self.tree.enter_object().map(|_| ())
    }

    fn read_struct_end(&mut self) -> ProtocolResult<()> {
        self.tree.leave()
    }

    fn read_field_begin(&mut self) -> ProtocolResult<FieldIdentifier> {
        if self.tree.at_end() {
            return Ok(FieldIdentifier::stop());
        }
        let id = self.tree.next_int::<i16>()?;
        if self.tree.enter_object()? != 1 {
            return Err(ProtocolError::invalid(format!(
                "field {id} must hold exactly one typed value"
            )));
        }
        let field_type = self.read_type()?;
        Ok(FieldIdentifier {
            name: None,
            field_type,
            id: Some(id),
        })
    }

    fn read_field_end(&mut self) -> ProtocolResult<()> {
        self.tree.leave()
    }

    fn read_bool(&mut self) -> ProtocolResult<bool> {
        Ok(self.tree.next_i64()? != 0)
    }

    fn read_byte(&mut self) -> ProtocolResult<i8> {
        self.tree.next_int()
    }

    fn read_i16(&mut self) -> ProtocolResult<i16> {
        self.tree.next_int()
    }

    fn read_i32(&mut self) -> ProtocolResult<i32> {
        self.tree.next_int()
    }

    fn read_i64(&mut self) -> ProtocolResult<i64> {
        self.tree.next_i64()
    }

    fn read_double(&mut self) -> ProtocolResult<f64> {
        self.tree.next_f64()
    }

    fn read_string(&mut self) -> ProtocolResult<String> {
        self.tree.next_string()
    }

    fn read_binary(&mut self) -> ProtocolResult<Vec<u8>> {
        self.tree.next_base64()
    }

    fn read_list_begin(&mut self) -> ProtocolResult<ListIdentifier> {
        self.tree.enter_array()?;
        let element_type = self.read_type()?;
        let size = self.read_size()?;
        Ok(ListIdentifier::new(element_type, size))
    }

    fn read_list_end(&mut self) -> ProtocolResult<()> {
        self.tree.leave()
    }

    fn read_set_begin(&mut self) -> ProtocolResult<SetIdentifier> {
        self.read_list_begin()
    }

    fn read_set_end(&mut self) -> ProtocolResult<()> {
        self.tree.leave()
    }

    fn read_map_begin(&mut self) -> ProtocolResult<MapIdentifier> {
        self.tree.enter_array()?;
        let key_type = self.read_type()?;
        let value_type = self.read_type()?;
        let size = self.read_size()?;
        self.tree.enter_object()?;
        Ok(MapIdentifier::new(key_type, value_type, size))
    }

    fn read_map_end(&mut self) -> ProtocolResult<()> {
        self.tree.leave()?;
        self.tree.leave()
    }

    fn consumed(&self) -> usize {
        self.tree.consumed()
    }

    fn skip_binary(&mut self) -> ProtocolResult<()> {
        self.tree.next().map(|_| ())
    }
}

#[derive(Default)]
pub struct JsonOutputProtocol {
    tree: TreeWriter,
}

impl JsonOutputProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_type(&mut self, field_type: TType) -> ProtocolResult<()> {
        self.tree.emit(Value::from(type_name(field_type)?))
    }
}

impl OutputProtocol for JsonOutputProtocol {
    fn write_message_begin(&mut self, ident: &MessageIdentifier) -> ProtocolResult<()> {
        self.tree.open_array();
        self.tree.emit(Value::from(VERSION))?;
        self.tree.emit(Value::from(ident.name.as_str()))?;
        self.tree.emit(Value::from(ident.message_type.id()))?;
        self.tree.emit(Value::from(ident.sequence_number))
    }

    fn write_message_end(&mut self) -> ProtocolResult<()> {
        self.tree.close()
    }

    fn write_struct_begin(&mut self, _ident: &StructIdentifier) -> ProtocolResult<()> {
        self.tree.open_object();
        Ok(())
    }

    fn write_struct_end(&mut self) -> ProtocolResult<()> {
        self.tree.close()
    }

    fn write_field_begin(&mut self, ident: &FieldIdentifier) -> ProtocolResult<()> {
        let id = ident
            .id
            .ok_or_else(|| ProtocolError::invalid("JSON fields need an id"))?;
        self.tree.emit(Value::from(id.to_string()))?;
        self.tree.open_object();
        self.write_type(ident.field_type)
    }

    fn write_field_end(&mut self) -> ProtocolResult<()> {
        self.tree.close()
    }

    fn write_field_stop(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn write_bool(&mut self, value: bool) -> ProtocolResult<()> {
        self.tree.emit(Value::from(value as i32))
    }

    fn write_byte(&mut self, value: i8) -> ProtocolResult<()> {
        self.tree.emit(Value::from(value))
    }

    fn write_i16(&mut self, value: i16) -> ProtocolResult<()> {
        self.tree.emit(Value::from(value))
    }

    fn write_i32(&mut self, value: i32) -> ProtocolResult<()> {
        self.tree.emit(Value::from(value))
    }

    fn write_i64(&mut self, value: i64) -> ProtocolResult<()> {
        self.tree.emit(Value::from(value))
    }

    fn write_double(&mut self, value: f64) -> ProtocolResult<()> {
        self.tree.emit_f64(value)
    }

    fn write_string(&mut self, value: &str) -> ProtocolResult<()> {
        self.tree.emit(Value::from(value))
    }

    fn write_binary(&mut self, value: &[u8]) -> ProtocolResult<()> {
        self.tree.emit_base64(value)
    }

    fn write_list_begin(&mut self, ident: &ListIdentifier) -> ProtocolResult<()> {
        self.tree.open_array();
        self.write_type(ident.element_type)?;
        self.tree.emit(Value::from(ident.size))
    }

    fn write_list_end(&mut self) -> ProtocolResult<()> {
        self.tree.close()
    }

    fn write_set_begin(&mut self, ident: &SetIdentifier) -> ProtocolResult<()> {
        self.write_list_begin(ident)
    }

    fn write_set_end(&mut self) -> ProtocolResult<()> {
        self.tree.close()
    }

    fn write_map_begin(&mut self, ident: &MapIdentifier) -> ProtocolResult<()> {
        self.tree.open_array();
        self.write_type(ident.key_type)?;
        self.write_type(ident.value_type)?;
        self.tree.emit(Value::from(ident.size))?;
        self.tree.open_object();
        Ok(())
    }

    fn write_map_end(&mut self) -> ProtocolResult<()> {
        self.tree.close()?;
        self.tree.close()
    }

    fn take_output(&mut self) -> Bytes {
        self.tree.take_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sample(out: &mut dyn OutputProtocol) {
        out.write_message_begin(&MessageIdentifier::new("echo", TMessageType::Call, 7))
            .unwrap();
        out.write_struct_begin(&StructIdentifier::new("s")).unwrap();
        out.write_field_begin(&FieldIdentifier::new("first", TType::I32, 1))
            .unwrap();
        out.write_i32(2).unwrap();
        out.write_field_end().unwrap();
        out.write_field_begin(&FieldIdentifier::new("status", TType::List, 10))
            .unwrap();
        out.write_list_begin(&ListIdentifier::new(TType::I32, 2))
            .unwrap();
        out.write_i32(1).unwrap();
        out.write_i32(2).unwrap();
        out.write_list_end().unwrap();
        out.write_field_end().unwrap();
        out.write_field_begin(&FieldIdentifier::new("map", TType::Map, 13))
            .unwrap();
        out.write_map_begin(&MapIdentifier::new(TType::I32, TType::I32, 1))
            .unwrap();
        out.write_i32(0).unwrap();
        out.write_i32(3).unwrap();
        out.write_map_end().unwrap();
        out.write_field_end().unwrap();
        out.write_field_stop().unwrap();
        out.write_struct_end().unwrap();
        out.write_message_end().unwrap();
    }

    #[test]
    fn test_encode_message() {
        let mut out = JsonOutputProtocol::new();
        write_sample(&mut out);

        assert_eq!(
            std::str::from_utf8(&out.take_output()).unwrap(),
            r#"[1,"echo",1,7,{"1":{"i32":2},"10":{"lst":["i32",2,1,2]},"13":{"map":["i32","i32",1,{"0":3}]}}]"#
        );
    }

    #[test]
    fn test_decode_message() {
        let bytes = br#"[1,"echo",1,7,{"1":{"i32":2},"10":{"lst":["i32",2,1,2]},"13":{"map":["i32","i32",1,{"0":3}]}}]"#;
        let mut input = JsonInputProtocol::new(bytes).unwrap();

        let ident = input.read_message_begin().unwrap();
        assert_eq!(ident, MessageIdentifier::new("echo", TMessageType::Call, 7));

        input.read_struct_begin().unwrap();
        let first = input.read_field_begin().unwrap();
        assert_eq!((first.id, first.field_type), (Some(1), TType::I32));
        assert_eq!(input.read_i32().unwrap(), 2);
        input.read_field_end().unwrap();

        let status = input.read_field_begin().unwrap();
        assert_eq!((status.id, status.field_type), (Some(10), TType::List));
        let list = input.read_list_begin().unwrap();
        assert_eq!(list, ListIdentifier::new(TType::I32, 2));
        assert_eq!(input.read_i32().unwrap(), 1);
        assert_eq!(input.read_i32().unwrap(), 2);
        input.read_list_end().unwrap();
        input.read_field_end().unwrap();

        let map_field = input.read_field_begin().unwrap();
        assert_eq!(map_field.id, Some(13));
        let map = input.read_map_begin().unwrap();
        assert_eq!(map, MapIdentifier::new(TType::I32, TType::I32, 1));
        assert_eq!(input.read_i32().unwrap(), 0);
        assert_eq!(input.read_i32().unwrap(), 3);
        input.read_map_end().unwrap();
        input.read_field_end().unwrap();

        assert_eq!(input.read_field_begin().unwrap().field_type, TType::Stop);
        input.read_struct_end().unwrap();
        input.read_message_end().unwrap();
        assert_eq!(input.consumed(), bytes.len());
    }

    #[test]
    fn test_bad_version() {
        let mut input = JsonInputProtocol::new(br#"[2,"echo",1,7,{}]"#).unwrap();
        assert!(matches!(
            input.read_message_begin(),
            Err(ProtocolError::BadVersion(2))
        ));
    }

    #[test]
    fn test_skip_unknown_field() {
        let bytes = br#"{"99":{"rec":{"1":{"str":"x"}}},"1":{"i32":5}}"#;
        let mut input = JsonInputProtocol::new(bytes).unwrap();
        input.read_struct_begin().unwrap();
        let unknown = input.read_field_begin().unwrap();
        input.skip(unknown.field_type).unwrap();
        input.read_field_end().unwrap();
        let known = input.read_field_begin().unwrap();
        assert_eq!(known.id, Some(1));
        assert_eq!(input.read_i32().unwrap(), 5);
    }

    #[test]
    fn test_special_doubles_and_bools() {
        let mut out = JsonOutputProtocol::new();
        out.write_list_begin(&ListIdentifier::new(TType::Double, 2))
            .unwrap();
        out.write_double(f64::INFINITY).unwrap();
        out.write_double(0.5).unwrap();
        out.write_list_end().unwrap();
        assert_eq!(&out.take_output()[..], br#"["dbl",2,"Infinity",0.5]"#);

        out.write_bool(true).unwrap();
        assert_eq!(&out.take_output()[..], b"1");
    }

    #[test]
    fn test_truncated_message_is_incomplete() {
        assert!(matches!(
            JsonInputProtocol::new(br#"[1,"echo",1,7,{"1":{"i3"#),
            Err(ProtocolError::Incomplete)
        ));
    }
}
