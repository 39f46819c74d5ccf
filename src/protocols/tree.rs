//! JSON value tree shared by the two JSON protocols.
//!
//! `TreeReader` parses one complete JSON document up front and then hands out
//! values in document order through a stack of cursors, one per open array
//! or object. Objects are flattened into alternating key and value entries.
//!
//! `TreeWriter` builds a document through a stack of open arrays and
//! objects. When the outermost value closes it is serialized into the output
//! buffer.

use crate::error::{ProtocolError, ProtocolResult};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Number, Value};
use std::collections::VecDeque;

pub(crate) struct TreeReader {
    cursors: Vec<VecDeque<Value>>,
    consumed: usize,
}

impl TreeReader {
    /// Parse the first JSON document in `input`.
    pub(crate) fn parse(input: &[u8]) -> ProtocolResult<Self> {
        let mut stream = serde_json::Deserializer::from_slice(input).into_iter::<Value>();
        match stream.next() {
            None => Err(ProtocolError::Incomplete),
            Some(Err(e)) if e.is_eof() => Err(ProtocolError::Incomplete),
            Some(Err(e)) => Err(ProtocolError::invalid(e.to_string())),
            Some(Ok(value)) => Ok(Self {
                cursors: vec![VecDeque::from([value])],
                consumed: stream.byte_offset(),
            }),
        }
    }

    pub(crate) fn consumed(&self) -> usize {
        self.consumed
    }

    /// Whether the innermost open container has no values left.
    pub(crate) fn at_end(&self) -> bool {
        self.cursors.last().map_or(true, VecDeque::is_empty)
    }

    pub(crate) fn next(&mut self) -> ProtocolResult<Value> {
        self.cursors
            .last_mut()
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| ProtocolError::invalid("unexpected end of JSON container"))
    }

    /// Open the next value as an array. Returns its length.
    pub(crate) fn enter_array(&mut self) -> ProtocolResult<usize> {
        match self.next()? {
            Value::Array(items) => {
                let len = items.len();
                self.cursors.push(items.into());
                Ok(len)
            }
            other => Err(unexpected("array", &other)),
        }
    }

    /// Open the next value as an object. Returns its number of entries.
    pub(crate) fn enter_object(&mut self) -> ProtocolResult<usize> {
        match self.next()? {
            Value::Object(entries) => {
                let len = entries.len();
                let mut flat = VecDeque::with_capacity(len * 2);
                for (key, value) in entries {
                    flat.push_back(Value::String(key));
                    flat.push_back(value);
                }
                self.cursors.push(flat);
                Ok(len)
            }
            other => Err(unexpected("object", &other)),
        }
    }

    /// Close the innermost container, which must be fully consumed.
    pub(crate) fn leave(&mut self) -> ProtocolResult<()> {
        match self.cursors.pop() {
            Some(rest) if rest.is_empty() => Ok(()),
            Some(rest) => Err(ProtocolError::invalid(format!(
                "{} unread values left in JSON container",
                rest.len()
            ))),
            None => Err(ProtocolError::invalid("no open JSON container")),
        }
    }

    /// Next value as an integer. Map keys arrive as strings and are parsed.
    pub(crate) fn next_i64(&mut self) -> ProtocolResult<i64> {
        match self.next()? {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| ProtocolError::invalid(format!("{n} is not an integer"))),
            Value::String(s) => s
                .parse()
                .map_err(|_| ProtocolError::invalid(format!("'{s}' is not an integer"))),
            other => Err(unexpected("integer", &other)),
        }
    }

    pub(crate) fn next_int<T: TryFrom<i64>>(&mut self) -> ProtocolResult<T> {
        let n = self.next_i64()?;
        T::try_from(n).map_err(|_| ProtocolError::invalid(format!("{n} is out of range")))
    }

    pub(crate) fn next_f64(&mut self) -> ProtocolResult<f64> {
        match self.next()? {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| ProtocolError::invalid(format!("{n} is not a number"))),
            Value::String(s) => match s.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                _ => s
                    .parse()
                    .map_err(|_| ProtocolError::invalid(format!("'{s}' is not a number"))),
            },
            other => Err(unexpected("number", &other)),
        }
    }

    pub(crate) fn next_string(&mut self) -> ProtocolResult<String> {
        match self.next()? {
            Value::String(s) => Ok(s),
            other => Err(unexpected("string", &other)),
        }
    }

    pub(crate) fn next_base64(&mut self) -> ProtocolResult<Vec<u8>> {
        let encoded = self.next_string()?;
        STANDARD_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|e| ProtocolError::invalid(format!("invalid base64: {e}")))
    }
}

fn unexpected(expected: &str, found: &Value) -> ProtocolError {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    ProtocolError::invalid(format!("expected JSON {expected}, found {found}"))
}

enum Frame {
    Array(Vec<Value>),
    Object {
        entries: Map<String, Value>,
        key: Option<String>,
    },
}

#[derive(Default)]
pub(crate) struct TreeWriter {
    frames: Vec<Frame>,
    buf: BytesMut,
}

impl TreeWriter {
    pub(crate) fn open_array(&mut self) {
        self.frames.push(Frame::Array(Vec::new()));
    }

    pub(crate) fn open_object(&mut self) {
        self.frames.push(Frame::Object {
            entries: Map::new(),
            key: None,
        });
    }

    /// Close the innermost container and emit it into its parent.
    pub(crate) fn close(&mut self) -> ProtocolResult<()> {
        let value = match self.frames.pop() {
            Some(Frame::Array(items)) => Value::Array(items),
            Some(Frame::Object { key: Some(key), .. }) => {
                return Err(ProtocolError::invalid(format!(
                    "JSON object closed with dangling key '{key}'"
                )))
            }
            Some(Frame::Object { entries, key: None }) => Value::Object(entries),
            None => return Err(ProtocolError::invalid("no open JSON container")),
        };
        self.emit(value)
    }

    /// Add a value to the innermost container.
    ///
    /// Inside an object, values alternate between key and value position.
    /// Keys are stringified. With no open container the value is a complete
    /// document and is serialized into the output.
    pub(crate) fn emit(&mut self, value: Value) -> ProtocolResult<()> {
        match self.frames.last_mut() {
            None => {
                let mut writer = (&mut self.buf).writer();
                serde_json::to_writer(&mut writer, &value)
                    .map_err(|e| ProtocolError::invalid(e.to_string()))
            }
            Some(Frame::Array(items)) => {
                items.push(value);
                Ok(())
            }
            Some(Frame::Object { entries, key }) => {
                match key.take() {
                    Some(name) => {
                        entries.insert(name, value);
                    }
                    None => *key = Some(key_string(value)?),
                }
                Ok(())
            }
        }
    }

    pub(crate) fn emit_f64(&mut self, value: f64) -> ProtocolResult<()> {
        let value = match Number::from_f64(value) {
            Some(n) => Value::Number(n),
            None if value.is_nan() => Value::String("NaN".to_string()),
            None if value > 0.0 => Value::String("Infinity".to_string()),
            None => Value::String("-Infinity".to_string()),
        };
        self.emit(value)
    }

    pub(crate) fn emit_base64(&mut self, value: &[u8]) -> ProtocolResult<()> {
        self.emit(Value::String(STANDARD_NO_PAD.encode(value)))
    }

    pub(crate) fn take_output(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

fn key_string(value: Value) -> ProtocolResult<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err(ProtocolError::invalid("JSON object key cannot be null")),
        Value::Array(_) | Value::Object(_) => Err(ProtocolError::invalid(
            "JSON object key must be a scalar",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_incomplete() {
        assert!(matches!(
            TreeReader::parse(b""),
            Err(ProtocolError::Incomplete)
        ));
        assert!(matches!(
            TreeReader::parse(b"  [1,\"echo\""),
            Err(ProtocolError::Incomplete)
        ));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            TreeReader::parse(b"[1,}"),
            Err(ProtocolError::InvalidData(_))
        ));
    }

    #[test]
    fn test_consumed_stops_at_first_document() {
        let reader = TreeReader::parse(b"[1,2][3]").unwrap();
        assert_eq!(reader.consumed(), 5);
    }

    #[test]
    fn test_walk_object() {
        let mut reader = TreeReader::parse(br#"{"a":[1,"2"],"b":"x"}"#).unwrap();
        assert_eq!(reader.enter_object().unwrap(), 2);
        assert_eq!(reader.next_string().unwrap(), "a");
        assert_eq!(reader.enter_array().unwrap(), 2);
        assert_eq!(reader.next_int::<i32>().unwrap(), 1);
        assert_eq!(reader.next_int::<i32>().unwrap(), 2);
        assert!(reader.at_end());
        reader.leave().unwrap();
        assert_eq!(reader.next_string().unwrap(), "b");
        assert_eq!(reader.next_string().unwrap(), "x");
        reader.leave().unwrap();
    }

    #[test]
    fn test_leave_with_leftovers() {
        let mut reader = TreeReader::parse(b"[1,2]").unwrap();
        reader.enter_array().unwrap();
        reader.next_i64().unwrap();
        assert!(reader.leave().is_err());
    }

    #[test]
    fn test_out_of_range() {
        let mut reader = TreeReader::parse(b"[300]").unwrap();
        reader.enter_array().unwrap();
        assert!(reader.next_int::<i8>().is_err());
    }

    #[test]
    fn test_writer_builds_document() {
        let mut writer = TreeWriter::default();
        writer.open_array();
        writer.emit(json!(1)).unwrap();
        writer.open_object();
        writer.emit(json!(2)).unwrap();
        writer.emit(json!("two")).unwrap();
        writer.close().unwrap();
        writer.emit_f64(f64::NAN).unwrap();
        writer.emit_base64(b"hi").unwrap();
        writer.close().unwrap();

        assert_eq!(
            &writer.take_output()[..],
            br#"[1,{"2":"two"},"NaN","aGk"]"#
        );
    }

    #[test]
    fn test_base64_accepts_padding() {
        let mut reader = TreeReader::parse(br#"["aGk=","aGk"]"#).unwrap();
        reader.enter_array().unwrap();
        assert_eq!(reader.next_base64().unwrap(), b"hi");
        assert_eq!(reader.next_base64().unwrap(), b"hi");
    }
}
