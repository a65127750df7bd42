//! Typed value encoding
//!
//! Values decode into `serde_json::Value`. Outside the header, string
//! payloads are indices into the bundle's string pool; in header mode they
//! are written inline.

use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use super::stream::{DecodeResult, InputStream, OutputStream};
use crate::utils::error::DecodeError;

/// Type tags for encoded values
pub mod tag {
    pub const NIL: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INT32: u8 = 2;
    pub const UINT32: u8 = 3;
    pub const INT64: u8 = 4;
    pub const DOUBLE: u8 = 5;
    pub const STRING: u8 = 6;
    pub const TABLE: u8 = 7;
    pub const ARRAY: u8 = 8;
    pub const UNDEFINED: u8 = 9;
}

const MAX_DEPTH: usize = 128;

/// Where string payloads live
#[derive(Debug, Clone, Copy)]
pub enum StringSource<'a> {
    /// Strings are written inline (header mode)
    Inline,
    /// Strings are indices into the pool
    Pool(&'a [String]),
}

impl StringSource<'_> {
    fn read(&self, stream: &mut InputStream) -> DecodeResult<String> {
        match self {
            StringSource::Inline => stream.read_string(),
            StringSource::Pool(pool) => {
                let index = stream.read_compact_u32()? as usize;
                pool.get(index).cloned().ok_or_else(|| {
                    DecodeError::Invalid(format!(
                        "string index {} out of range ({} strings)",
                        index,
                        pool.len()
                    ))
                })
            }
        }
    }
}

pub fn decode_value(stream: &mut InputStream, strings: StringSource<'_>) -> DecodeResult<Value> {
    decode_at_depth(stream, strings, 0)
}

fn decode_at_depth(
    stream: &mut InputStream,
    strings: StringSource<'_>,
    depth: usize,
) -> DecodeResult<Value> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::Invalid("value nesting too deep".to_string()));
    }
    let tag = stream.read_u8()?;
    Ok(match tag {
        tag::NIL | tag::UNDEFINED => Value::Null,
        tag::BOOL => Value::Bool(stream.read_bool()?),
        tag::INT32 => Value::from(stream.read_compact_s32()?),
        tag::UINT32 => Value::from(stream.read_compact_u32()?),
        tag::INT64 => Value::from(stream.read_u64()? as i64),
        tag::DOUBLE => {
            let number = stream.read_f64()?;
            Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
        }
        tag::STRING => Value::String(strings.read(stream)?),
        tag::TABLE => {
            let count = stream.read_compact_u32()?;
            let mut map = Map::new();
            for _ in 0..count {
                let key = strings.read(stream)?;
                let value = decode_at_depth(stream, strings, depth + 1)?;
                map.insert(key, value);
            }
            Value::Object(map)
        }
        tag::ARRAY => {
            let count = stream.read_compact_u32()?;
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                items.push(decode_at_depth(stream, strings, depth + 1)?);
            }
            Value::Array(items)
        }
        other => {
            return Err(DecodeError::Invalid(format!(
                "unknown value type {} at offset {}",
                other,
                stream.offset() - 1
            )));
        }
    })
}

/// Collects strings while encoding and assigns pool indices
#[derive(Debug, Clone, Default)]
pub struct StringPoolBuilder {
    strings: Vec<String>,
    index: HashMap<String, u32>,
}

impl StringPoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, text: &str) -> u32 {
        if let Some(index) = self.index.get(text) {
            return *index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(text.to_string());
        self.index.insert(text.to_string(), index);
        index
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }
}

/// Target for string payloads while encoding
pub enum StringSink<'a> {
    Inline,
    Pool(&'a mut StringPoolBuilder),
}

impl StringSink<'_> {
    fn write(&mut self, out: &mut OutputStream, text: &str) {
        match self {
            StringSink::Inline => out.write_string(text),
            StringSink::Pool(pool) => {
                let index = pool.intern(text);
                out.write_compact_u32(index);
            }
        }
    }
}

pub fn encode_value(out: &mut OutputStream, value: &Value, strings: &mut StringSink<'_>) {
    match value {
        Value::Null => out.write_u8(tag::NIL),
        Value::Bool(flag) => {
            out.write_u8(tag::BOOL);
            out.write_bool(*flag);
        }
        Value::Number(number) => {
            if let Some(v) = number.as_i64().and_then(|v| i32::try_from(v).ok()) {
                out.write_u8(tag::INT32);
                out.write_compact_s32(v);
            } else if let Some(v) = number.as_u64().and_then(|v| u32::try_from(v).ok()) {
                out.write_u8(tag::UINT32);
                out.write_compact_u32(v);
            } else if let Some(v) = number.as_i64() {
                out.write_u8(tag::INT64);
                out.write_u64(v as u64);
            } else {
                out.write_u8(tag::DOUBLE);
                out.write_f64(number.as_f64().unwrap_or(0.0));
            }
        }
        Value::String(text) => {
            out.write_u8(tag::STRING);
            strings.write(out, text);
        }
        Value::Array(items) => {
            out.write_u8(tag::ARRAY);
            out.write_compact_u32(items.len() as u32);
            for item in items {
                encode_value(out, item, strings);
            }
        }
        Value::Object(map) => {
            out.write_u8(tag::TABLE);
            out.write_compact_u32(map.len() as u32);
            for (key, item) in map {
                strings.write(out, key);
                encode_value(out, item, strings);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pooled_strings() {
        let value = json!({"title": "hello", "tags": ["hello", "world"], "n": -3, "f": 1.5});
        let mut pool = StringPoolBuilder::new();
        let mut out = OutputStream::new();
        encode_value(&mut out, &value, &mut StringSink::Pool(&mut pool));

        assert_eq!(pool.strings().iter().filter(|s| *s == "hello").count(), 1);

        let strings = pool.strings().to_vec();
        let mut input = InputStream::new(out.into_inner());
        let decoded = decode_value(&mut input, StringSource::Pool(&strings)).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_bad_pool_index() {
        let mut out = OutputStream::new();
        out.write_u8(tag::STRING);
        out.write_compact_u32(7);
        let mut input = InputStream::new(out.into_inner());
        assert!(decode_value(&mut input, StringSource::Pool(&[])).is_err());
    }

    #[test]
    fn test_unknown_tag() {
        let mut input = InputStream::new(vec![42u8]);
        assert!(decode_value(&mut input, StringSource::Inline).is_err());
    }

    #[test]
    fn test_undefined_is_null() {
        let mut input = InputStream::new(vec![tag::UNDEFINED]);
        assert_eq!(decode_value(&mut input, StringSource::Inline).unwrap(), Value::Null);
    }
}
