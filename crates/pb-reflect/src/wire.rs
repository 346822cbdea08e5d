//! Protobuf binary encoding for [`DynamicMessage`].

use std::collections::BTreeMap;

use pb_core::Result;
use prost::bytes::{Buf, BufMut};
use prost::encoding::{decode_key, decode_varint, encode_key, encode_varint, WireType};
use prost::DecodeError;

use crate::dynamic::{DynamicMessage, MapKey, Value};
use crate::pool::{FieldDescriptor, Kind, MessageDescriptor};

const MAX_NESTING: usize = 100;

// ── Encoding ──

pub(crate) fn encode_message(message: &DynamicMessage, buf: &mut Vec<u8>) {
    for (field, value) in message.fields() {
        encode_field(&field, value, buf);
    }
}

fn encode_field(field: &FieldDescriptor, value: &Value, buf: &mut Vec<u8>) {
    let number = field.number();
    let kind = field.kind();
    match value {
        Value::List(items) if field.is_packed() => {
            let mut packed = Vec::new();
            for item in items {
                encode_scalar(&kind, item, &mut packed);
            }
            encode_key(number, WireType::LengthDelimited, buf);
            encode_varint(packed.len() as u64, buf);
            buf.put_slice(&packed);
        }
        Value::List(items) => {
            for item in items {
                encode_single(number, &kind, item, buf);
            }
        }
        Value::Map(entries) => {
            let (Some(key_field), Some(value_field)) = (field.map_key(), field.map_value()) else {
                return;
            };
            let (key_kind, value_kind) = (key_field.kind(), value_field.kind());
            for (key, value) in entries {
                let mut entry = Vec::new();
                encode_single(1, &key_kind, &key.to_value(), &mut entry);
                encode_single(2, &value_kind, value, &mut entry);
                encode_key(number, WireType::LengthDelimited, buf);
                encode_varint(entry.len() as u64, buf);
                buf.put_slice(&entry);
            }
        }
        single => encode_single(number, &kind, single, buf),
    }
}

fn encode_single(number: u32, kind: &Kind, value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Message(message) => {
            let bytes = message.encode_to_vec();
            encode_key(number, WireType::LengthDelimited, buf);
            encode_varint(bytes.len() as u64, buf);
            buf.put_slice(&bytes);
        }
        Value::String(text) => {
            encode_key(number, WireType::LengthDelimited, buf);
            encode_varint(text.len() as u64, buf);
            buf.put_slice(text.as_bytes());
        }
        Value::Bytes(bytes) => {
            encode_key(number, WireType::LengthDelimited, buf);
            encode_varint(bytes.len() as u64, buf);
            buf.put_slice(bytes);
        }
        scalar => {
            encode_key(number, scalar_wire_type(kind), buf);
            encode_scalar(kind, scalar, buf);
        }
    }
}

fn scalar_wire_type(kind: &Kind) -> WireType {
    match kind {
        Kind::Double | Kind::Fixed64 | Kind::Sfixed64 => WireType::SixtyFourBit,
        Kind::Float | Kind::Fixed32 | Kind::Sfixed32 => WireType::ThirtyTwoBit,
        Kind::String | Kind::Bytes | Kind::Message(_) => WireType::LengthDelimited,
        _ => WireType::Varint,
    }
}

fn encode_scalar(kind: &Kind, value: &Value, buf: &mut Vec<u8>) {
    match (kind, value) {
        (Kind::Sint32, Value::I32(v)) => encode_varint(u64::from(((v << 1) ^ (v >> 31)) as u32), buf),
        (Kind::Sint64, Value::I64(v)) => encode_varint(((v << 1) ^ (v >> 63)) as u64, buf),
        (Kind::Sfixed32, Value::I32(v)) => buf.put_i32_le(*v),
        (Kind::Sfixed64, Value::I64(v)) => buf.put_i64_le(*v),
        (Kind::Fixed32, Value::U32(v)) => buf.put_u32_le(*v),
        (Kind::Fixed64, Value::U64(v)) => buf.put_u64_le(*v),
        (_, Value::F32(v)) => buf.put_f32_le(*v),
        (_, Value::F64(v)) => buf.put_f64_le(*v),
        (_, Value::Bool(v)) => encode_varint(u64::from(*v), buf),
        // Negative int32 values are sign-extended to ten bytes.
        (_, Value::I32(v) | Value::EnumNumber(v)) => encode_varint(i64::from(*v) as u64, buf),
        (_, Value::I64(v)) => encode_varint(*v as u64, buf),
        (_, Value::U32(v)) => encode_varint(u64::from(*v), buf),
        (_, Value::U64(v)) => encode_varint(*v, buf),
        _ => {}
    }
}

// ── Decoding ──

pub(crate) fn decode_message(desc: &MessageDescriptor, bytes: &[u8]) -> Result<DynamicMessage> {
    decode_nested(desc, bytes, 0)
}

fn decode_nested(desc: &MessageDescriptor, mut buf: &[u8], depth: usize) -> Result<DynamicMessage> {
    if depth > MAX_NESTING {
        return Err(DecodeError::new("recursion limit reached").into());
    }
    let mut message = DynamicMessage::new(desc.clone());
    while buf.has_remaining() {
        let (number, wire_type) = decode_key(&mut buf)?;
        match desc.field_by_number(number) {
            Some(field) => decode_field(&mut message, &field, wire_type, &mut buf, depth)?,
            None => skip_field(number, wire_type, &mut buf)?,
        }
    }
    Ok(message)
}

fn decode_field(
    message: &mut DynamicMessage,
    field: &FieldDescriptor,
    wire_type: WireType,
    buf: &mut &[u8],
    depth: usize,
) -> Result<()> {
    let kind = field.kind();

    if field.is_map() {
        let entry_bytes = take_length_delimited(wire_type, buf)?;
        let (Some(key_field), Some(value_field), Some(entry_desc)) =
            (field.map_key(), field.map_value(), kind.as_message())
        else {
            return Ok(());
        };
        let entry = decode_nested(entry_desc, entry_bytes, depth + 1)?;
        let key = entry
            .get(&key_field)
            .cloned()
            .unwrap_or_else(|| Value::default_for(&key_field.kind()));
        let value = entry
            .get(&value_field)
            .cloned()
            .unwrap_or_else(|| Value::default_for(&value_field.kind()));
        let Some(key) = MapKey::from_value(key) else {
            return Err(DecodeError::new("invalid map key").into());
        };
        let slot = message.slot_mut(field);
        if let Some(Value::Map(entries)) = slot {
            entries.insert(key, value);
        } else {
            *slot = Some(Value::Map(BTreeMap::from([(key, value)])));
        }
        return Ok(());
    }

    if field.is_list() {
        let mut decoded = Vec::new();
        if wire_type == WireType::LengthDelimited && kind.is_packable() {
            let mut packed = take_length_delimited(wire_type, buf)?;
            while packed.has_remaining() {
                decoded.push(decode_scalar(&kind, scalar_wire_type(&kind), &mut packed)?);
            }
        } else {
            decoded.push(decode_single(&kind, wire_type, buf, depth)?);
        }
        let slot = message.slot_mut(field);
        if let Some(Value::List(items)) = slot {
            items.extend(decoded);
        } else {
            *slot = Some(Value::List(decoded));
        }
        return Ok(());
    }

    let value = decode_single(&kind, wire_type, buf, depth)?;
    message.set(field, value)
}

fn decode_single(kind: &Kind, wire_type: WireType, buf: &mut &[u8], depth: usize) -> Result<Value> {
    match kind {
        Kind::Message(desc) => {
            let bytes = take_length_delimited(wire_type, buf)?;
            Ok(Value::Message(decode_nested(desc, bytes, depth + 1)?))
        }
        Kind::String => {
            let bytes = take_length_delimited(wire_type, buf)?;
            let text = std::str::from_utf8(bytes)
                .map_err(|_| DecodeError::new("invalid string value: data is not UTF-8 encoded"))?;
            Ok(Value::String(text.to_string()))
        }
        Kind::Bytes => Ok(Value::Bytes(take_length_delimited(wire_type, buf)?.to_vec())),
        scalar => decode_scalar(scalar, wire_type, buf),
    }
}

fn decode_scalar(kind: &Kind, wire_type: WireType, buf: &mut &[u8]) -> Result<Value> {
    let expected = scalar_wire_type(kind);
    if wire_type != expected {
        return Err(DecodeError::new(format!(
            "invalid wire type: {wire_type:?} (expected {expected:?})"
        ))
        .into());
    }
    let needed = match expected {
        WireType::SixtyFourBit => 8,
        WireType::ThirtyTwoBit => 4,
        _ => 0,
    };
    if buf.remaining() < needed {
        return Err(DecodeError::new("buffer underflow").into());
    }

    let value = match kind {
        Kind::Double => Value::F64(buf.get_f64_le()),
        Kind::Float => Value::F32(buf.get_f32_le()),
        Kind::Fixed64 => Value::U64(buf.get_u64_le()),
        Kind::Sfixed64 => Value::I64(buf.get_i64_le()),
        Kind::Fixed32 => Value::U32(buf.get_u32_le()),
        Kind::Sfixed32 => Value::I32(buf.get_i32_le()),
        Kind::Bool => Value::Bool(decode_varint(buf)? != 0),
        Kind::Int32 => Value::I32(decode_varint(buf)? as i32),
        Kind::Int64 => Value::I64(decode_varint(buf)? as i64),
        Kind::Uint32 => Value::U32(decode_varint(buf)? as u32),
        Kind::Uint64 => Value::U64(decode_varint(buf)?),
        Kind::Sint32 => {
            let raw = decode_varint(buf)? as u32;
            Value::I32(((raw >> 1) as i32) ^ -((raw & 1) as i32))
        }
        Kind::Sint64 => {
            let raw = decode_varint(buf)?;
            Value::I64(((raw >> 1) as i64) ^ -((raw & 1) as i64))
        }
        Kind::Enum(_) => Value::EnumNumber(decode_varint(buf)? as i32),
        Kind::String | Kind::Bytes | Kind::Message(_) => {
            return Err(DecodeError::new("not a scalar field").into())
        }
    };
    Ok(value)
}

fn take_length_delimited<'a>(wire_type: WireType, buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    if wire_type != WireType::LengthDelimited {
        return Err(DecodeError::new(format!(
            "invalid wire type: {wire_type:?} (expected LengthDelimited)"
        ))
        .into());
    }
    let len = decode_varint(buf)? as usize;
    let remaining: &'a [u8] = *buf;
    if len > remaining.len() {
        return Err(DecodeError::new("buffer underflow").into());
    }
    let (head, tail) = remaining.split_at(len);
    *buf = tail;
    Ok(head)
}

fn skip_field(number: u32, wire_type: WireType, buf: &mut &[u8]) -> Result<()> {
    let skip = match wire_type {
        WireType::Varint => {
            decode_varint(buf)?;
            0
        }
        WireType::SixtyFourBit => 8,
        WireType::ThirtyTwoBit => 4,
        WireType::LengthDelimited => {
            take_length_delimited(wire_type, buf)?;
            0
        }
        WireType::StartGroup => loop {
            let (inner, inner_type) = decode_key(buf)?;
            if inner_type == WireType::EndGroup {
                if inner != number {
                    return Err(DecodeError::new("unexpected end group tag").into());
                }
                break 0;
            }
            skip_field(inner, inner_type, buf)?;
        },
        WireType::EndGroup => return Err(DecodeError::new("unexpected end group tag").into()),
    };
    if buf.remaining() < skip {
        return Err(DecodeError::new("buffer underflow").into());
    }
    buf.advance(skip);
    Ok(())
}
