//! Row codec for encoding rows to and from bytes.
//!
//! Format:
//! - Field count (4 bytes, little-endian)
//! - For each field:
//!   - Field name length (2 bytes, little-endian)
//!   - Field name (UTF-8 bytes)
//!   - Value tag (1 byte)
//!   - Value data (variable length, depends on type)

use chrono::{DateTime, Utc};
use relq_proto::Value;

use super::error::StoreError;
use super::row::Row;

/// Type tag for encoded values.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueTag {
    Null = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    DateTime = 5,
    Json = 6,
    StringList = 7,
}

impl TryFrom<u8> for ValueTag {
    type Error = StoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ValueTag::Null),
            1 => Ok(ValueTag::Bool),
            2 => Ok(ValueTag::Int),
            3 => Ok(ValueTag::Float),
            4 => Ok(ValueTag::String),
            5 => Ok(ValueTag::DateTime),
            6 => Ok(ValueTag::Json),
            7 => Ok(ValueTag::StringList),
            _ => Err(StoreError::Codec(format!("unknown value tag: {}", value))),
        }
    }
}

/// Encode a row to bytes.
pub fn encode_row(row: &Row) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(row.len() as u32).to_le_bytes());

    for (name, value) in row.iter() {
        let name_bytes = name.as_bytes();
        if name_bytes.len() > u16::MAX as usize {
            return Err(StoreError::Codec("field name too long".into()));
        }
        buf.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(name_bytes);
        encode_value(&mut buf, value)?;
    }

    Ok(buf)
}

/// Decode bytes back to a row.
pub fn decode_row(data: &[u8]) -> Result<Row, StoreError> {
    let mut reader = Reader::new(data);
    let count = reader.u32()? as usize;
    let mut fields = Vec::with_capacity(count);

    for _ in 0..count {
        let name_len = reader.u16()? as usize;
        let name = reader.string(name_len)?;
        let value = decode_value(&mut reader)?;
        fields.push((name, value));
    }

    Ok(Row::from_fields(fields))
}

/// Encode a sequence of values, for use as a comparable grouping key.
pub fn encode_key(values: &[Value]) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    for value in values {
        encode_value(&mut buf, value)?;
    }
    Ok(buf)
}

fn encode_len(buf: &mut Vec<u8>, len: usize) -> Result<(), StoreError> {
    let len = u32::try_from(len).map_err(|_| StoreError::Codec("value too long".into()))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn encode_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), StoreError> {
    match value {
        Value::Null => buf.push(ValueTag::Null as u8),
        Value::Bool(b) => {
            buf.push(ValueTag::Bool as u8);
            buf.push(u8::from(*b));
        }
        Value::Int(n) => {
            buf.push(ValueTag::Int as u8);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Value::Float(f) => {
            buf.push(ValueTag::Float as u8);
            buf.extend_from_slice(&f.to_le_bytes());
        }
        Value::String(s) => {
            buf.push(ValueTag::String as u8);
            encode_len(buf, s.len())?;
            buf.extend_from_slice(s.as_bytes());
        }
        Value::DateTime(dt) => {
            buf.push(ValueTag::DateTime as u8);
            buf.extend_from_slice(&dt.timestamp().to_le_bytes());
            buf.extend_from_slice(&dt.timestamp_subsec_nanos().to_le_bytes());
        }
        Value::Json(doc) => {
            buf.push(ValueTag::Json as u8);
            let text = serde_json::to_vec(doc).map_err(|e| StoreError::Codec(e.to_string()))?;
            encode_len(buf, text.len())?;
            buf.extend_from_slice(&text);
        }
        Value::StringList(items) => {
            buf.push(ValueTag::StringList as u8);
            encode_len(buf, items.len())?;
            for item in items {
                encode_len(buf, item.len())?;
                buf.extend_from_slice(item.as_bytes());
            }
        }
    }
    Ok(())
}

fn decode_value(reader: &mut Reader<'_>) -> Result<Value, StoreError> {
    let tag = ValueTag::try_from(reader.u8()?)?;
    let value = match tag {
        ValueTag::Null => Value::Null,
        ValueTag::Bool => Value::Bool(reader.u8()? != 0),
        ValueTag::Int => Value::Int(i64::from_le_bytes(reader.array()?)),
        ValueTag::Float => Value::Float(f64::from_le_bytes(reader.array()?)),
        ValueTag::String => {
            let len = reader.u32()? as usize;
            Value::String(reader.string(len)?)
        }
        ValueTag::DateTime => {
            let secs = i64::from_le_bytes(reader.array()?);
            let nanos = u32::from_le_bytes(reader.array()?);
            let dt: DateTime<Utc> = DateTime::from_timestamp(secs, nanos)
                .ok_or_else(|| StoreError::Codec(format!("timestamp out of range: {}", secs)))?;
            Value::DateTime(dt)
        }
        ValueTag::Json => {
            let len = reader.u32()? as usize;
            let doc = serde_json::from_slice(reader.take(len)?)
                .map_err(|e| StoreError::Codec(e.to_string()))?;
            Value::Json(doc)
        }
        ValueTag::StringList => {
            let count = reader.u32()? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                let len = reader.u32()? as usize;
                items.push(reader.string(len)?);
            }
            Value::StringList(items)
        }
    };
    Ok(value)
}

/// Bounds-checked cursor over encoded bytes.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StoreError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| StoreError::Codec("data too short".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], StoreError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, StoreError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, StoreError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, StoreError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn string(&mut self, len: usize) -> Result<String, StoreError> {
        String::from_utf8(self.take(len)?.to_vec())
            .map_err(|_| StoreError::Codec("invalid UTF-8".into()))
    }
}
