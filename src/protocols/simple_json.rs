//! Simple JSON protocol.
//!
//! Human-readable JSON keyed by field name, with no type tags:
//!
//! ```text
//! Message: ["echo",1,7,{"message":{...}}]
//! Struct:  {"first":2,"status":[1,2]}
//! Map:     {"0":3}
//! ```
//!
//! Since the wire carries no field ids or types, the reader reports every
//! field as `TType::Void` with only its name filled in. Struct readers map
//! names back to ids and read values with the type their schema declares.

use super::tree::{TreeReader, TreeWriter};
use super::{
    wire_size, FieldIdentifier, InputProtocol, ListIdentifier, MapIdentifier,
    MessageIdentifier, OutputProtocol, ProtocolFactory, SetIdentifier, StructIdentifier,
    TMessageType, TType,
};
use crate::error::{ProtocolError, ProtocolResult};
use bytes::Bytes;
use serde_json::Value;

pub struct SimpleJsonProtocolFactory;

impl ProtocolFactory for SimpleJsonProtocolFactory {
    fn input<'a>(&self, input: &'a [u8]) -> ProtocolResult<Box<dyn InputProtocol + 'a>> {
        Ok(Box::new(SimpleJsonInputProtocol::new(input)?))
    }

    fn output(&self) -> Box<dyn OutputProtocol> {
        Box::new(SimpleJsonOutputProtocol::new())
    }
}

pub struct SimpleJsonInputProtocol {
    tree: TreeReader,
}

impl SimpleJsonInputProtocol {
    pub fn new(input: &[u8]) -> ProtocolResult<Self> {
        Ok(Self {
            tree: TreeReader::parse(input)?,
        })
    }

    fn read_array_size(&mut self) -> ProtocolResult<i32> {
        let len = self.tree.enter_array()?;
        wire_size(len)
    }
}

impl InputProtocol for SimpleJsonInputProtocol {
    fn read_message_begin(&mut self) -> ProtocolResult<MessageIdentifier> {
        self.tree.enter_array()?;
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
        let name = self.tree.next_string()?;
        Ok(FieldIdentifier {
            name: Some(name),
            field_type: TType::Void,
            id: None,
        })
    }

    fn read_field_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn read_bool(&mut self) -> ProtocolResult<bool> {
        match self.tree.next()? {
            Value::Bool(b) => Ok(b),
            Value::Number(n) => Ok(n.as_i64() != Some(0)),
            Value::String(s) => match s.as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(ProtocolError::invalid(format!("'{s}' is not a boolean"))),
            },
            _ => Err(ProtocolError::invalid("expected JSON boolean")),
        }
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
        let size = self.read_array_size()?;
        Ok(ListIdentifier::new(TType::Void, size))
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
        let size = wire_size(self.tree.enter_object()?)?;
        Ok(MapIdentifier::new(TType::Void, TType::Void, size))
    }

    fn read_map_end(&mut self) -> ProtocolResult<()> {
        self.tree.leave()
    }

    fn consumed(&self) -> usize {
        self.tree.consumed()
    }

    /// Values are self-delimiting JSON, so the whole value goes at once
    /// whatever its declared type.
    fn skip(&mut self, _field_type: TType) -> ProtocolResult<()> {
        self.tree.next().map(|_| ())
    }
}

#[derive(Default)]
pub struct SimpleJsonOutputProtocol {
    tree: TreeWriter,
}

impl SimpleJsonOutputProtocol {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputProtocol for SimpleJsonOutputProtocol {
    fn write_message_begin(&mut self, ident: &MessageIdentifier) -> ProtocolResult<()> {
        self.tree.open_array();
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
        let name = ident
            .name
            .as_deref()
            .ok_or_else(|| ProtocolError::invalid("simple JSON fields need a name"))?;
        self.tree.emit(Value::from(name))
    }

    fn write_field_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn write_bool(&mut self, value: bool) -> ProtocolResult<()> {
        self.tree.emit(Value::Bool(value))
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

    fn write_list_begin(&mut self, _ident: &ListIdentifier) -> ProtocolResult<()> {
        self.tree.open_array();
        Ok(())
    }

    fn write_list_end(&mut self) -> ProtocolResult<()> {
        self.tree.close()
    }

    fn write_set_begin(&mut self, _ident: &SetIdentifier) -> ProtocolResult<()> {
        self.tree.open_array();
        Ok(())
    }

    fn write_set_end(&mut self) -> ProtocolResult<()> {
        self.tree.close()
    }

    fn write_map_begin(&mut self, _ident: &MapIdentifier) -> ProtocolResult<()> {
        self.tree.open_object();
        Ok(())
    }

    fn write_map_end(&mut self) -> ProtocolResult<()> {
        self.tree.close()
    }

    fn take_output(&mut self) -> Bytes {
        self.tree.take_output()
    }
}
