//! Descriptor-bound protobuf messages built at runtime.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use pb_core::{Error, Result};
use serde_json::{Map, Number, Value as Json};

use crate::pool::{FieldDescriptor, Kind, MessageDescriptor};
use crate::wire;
use crate::wkt;

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    EnumNumber(i32),
    Message(DynamicMessage),
    List(Vec<Value>),
    Map(BTreeMap<MapKey, Value>),
}

/// Map keys are restricted to integral, bool and string kinds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    String(String),
}

impl MapKey {
    pub fn from_value(value: Value) -> Option<Self> {
        Some(match value {
            Value::Bool(v) => MapKey::Bool(v),
            Value::I32(v) => MapKey::I32(v),
            Value::I64(v) => MapKey::I64(v),
            Value::U32(v) => MapKey::U32(v),
            Value::U64(v) => MapKey::U64(v),
            Value::String(v) => MapKey::String(v),
            _ => return None,
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Bool(v) => Value::Bool(*v),
            MapKey::I32(v) => Value::I32(*v),
            MapKey::I64(v) => Value::I64(*v),
            MapKey::U32(v) => Value::U32(*v),
            MapKey::U64(v) => Value::U64(*v),
            MapKey::String(v) => Value::String(v.clone()),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Bool(v) => write!(f, "{v}"),
            MapKey::I32(v) => write!(f, "{v}"),
            MapKey::I64(v) => write!(f, "{v}"),
            MapKey::U32(v) => write!(f, "{v}"),
            MapKey::U64(v) => write!(f, "{v}"),
            MapKey::String(v) => f.write_str(v),
        }
    }
}

impl Value {
    /// The zero value for a field of `kind`.
    pub fn default_for(kind: &Kind) -> Value {
        match kind {
            Kind::Double => Value::F64(0.0),
            Kind::Float => Value::F32(0.0),
            Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => Value::I32(0),
            Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => Value::I64(0),
            Kind::Uint32 | Kind::Fixed32 => Value::U32(0),
            Kind::Uint64 | Kind::Fixed64 => Value::U64(0),
            Kind::Bool => Value::Bool(false),
            Kind::String => Value::String(String::new()),
            Kind::Bytes => Value::Bytes(Vec::new()),
            Kind::Enum(_) => Value::EnumNumber(0),
            Kind::Message(message) => Value::Message(DynamicMessage::new(message.clone())),
        }
    }

    fn is_default(&self) -> bool {
        match self {
            Value::Bool(v) => !v,
            Value::I32(v) | Value::EnumNumber(v) => *v == 0,
            Value::I64(v) => *v == 0,
            Value::U32(v) => *v == 0,
            Value::U64(v) => *v == 0,
            Value::F32(v) => v.to_bits() == 0,
            Value::F64(v) => v.to_bits() == 0,
            Value::String(v) => v.is_empty(),
            Value::Bytes(v) => v.is_empty(),
            Value::List(v) => v.is_empty(),
            Value::Map(v) => v.is_empty(),
            Value::Message(_) => false,
        }
    }

    /// Whether this value can be stored in a singular field of `kind`.
    pub fn is_valid_for(&self, kind: &Kind) -> bool {
        match (self, kind) {
            (Value::Bool(_), Kind::Bool)
            | (Value::F64(_), Kind::Double)
            | (Value::F32(_), Kind::Float)
            | (Value::I32(_), Kind::Int32 | Kind::Sint32 | Kind::Sfixed32)
            | (Value::I64(_), Kind::Int64 | Kind::Sint64 | Kind::Sfixed64)
            | (Value::U32(_), Kind::Uint32 | Kind::Fixed32)
            | (Value::U64(_), Kind::Uint64 | Kind::Fixed64)
            | (Value::String(_), Kind::String)
            | (Value::Bytes(_), Kind::Bytes)
            | (Value::EnumNumber(_), Kind::Enum(_)) => true,
            (Value::Message(m), Kind::Message(desc)) => m.descriptor() == desc,
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I32(v) | Value::EnumNumber(v) => Some(i64::from(*v)),
            Value::I64(v) => Some(*v),
            Value::U32(v) => Some(i64::from(*v)),
            Value::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&DynamicMessage> {
        match self {
            Value::Message(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<MapKey, Value>> {
        match self {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }
}

/// A message whose shape is known only through its descriptor.
///
/// Field values are kept in slots indexed by field position. A slot is
/// `None` when the field is unset.
#[derive(Clone, PartialEq)]
pub struct DynamicMessage {
    desc: MessageDescriptor,
    fields: Vec<Option<Value>>,
}

impl DynamicMessage {
    pub fn new(desc: MessageDescriptor) -> Self {
        let fields = vec![None; desc.field_count()];
        Self { desc, fields }
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.desc
    }

    fn check_owner(&self, field: &FieldDescriptor) -> Result<()> {
        if field.containing_message() != &self.desc {
            return Err(Error::Internal(format!(
                "field {} does not belong to {}",
                field.full_name(),
                self.desc.full_name()
            )));
        }
        Ok(())
    }

    pub fn get(&self, field: &FieldDescriptor) -> Option<&Value> {
        if field.containing_message() != &self.desc {
            return None;
        }
        self.fields.get(field.index())?.as_ref()
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let field = self.desc.field_by_name(name)?;
        self.fields.get(field.index())?.as_ref()
    }

    pub fn has(&self, field: &FieldDescriptor) -> bool {
        self.get(field).is_some()
    }

    /// Stores `value` in `field`. Zero values of fields without explicit
    /// presence leave the field unset.
    pub fn set(&mut self, field: &FieldDescriptor, value: Value) -> Result<()> {
        self.check_owner(field)?;
        let valid = match &value {
            Value::List(items) => {
                field.is_list() && items.iter().all(|item| item.is_valid_for(&field.kind()))
            }
            Value::Map(entries) => match (field.map_key(), field.map_value()) {
                (Some(key), Some(entry_value)) => entries.iter().all(|(k, v)| {
                    k.to_value().is_valid_for(&key.kind()) && v.is_valid_for(&entry_value.kind())
                }),
                _ => false,
            },
            single => !field.is_repeated() && single.is_valid_for(&field.kind()),
        };
        if !valid {
            return Err(Error::Internal(format!(
                "value does not match the type of field {}",
                field.full_name()
            )));
        }

        let slot = &mut self.fields[field.index()];
        if !field.supports_presence() && value.is_default() {
            *slot = None;
        } else {
            *slot = Some(value);
        }
        Ok(())
    }

    pub fn set_by_name(&mut self, name: &str, value: Value) -> Result<()> {
        let field = self.desc.field_by_name(name).ok_or_else(|| {
            Error::NotFound(format!("field {name} in {}", self.desc.full_name()))
        })?;
        self.set(&field, value)
    }

    pub fn clear(&mut self, field: &FieldDescriptor) {
        if field.containing_message() == &self.desc {
            self.fields[field.index()] = None;
        }
    }

    /// Set fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (FieldDescriptor, &Value)> + '_ {
        self.desc
            .fields()
            .zip(self.fields.iter())
            .filter_map(|(field, slot)| slot.as_ref().map(|value| (field, value)))
    }

    pub(crate) fn slot_mut(&mut self, field: &FieldDescriptor) -> &mut Option<Value> {
        &mut self.fields[field.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.fields.iter().all(Option::is_none)
    }

    // ── Wire format ──

    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        wire::encode_message(self, &mut buf);
        buf
    }

    pub fn decode(desc: MessageDescriptor, bytes: &[u8]) -> Result<Self> {
        wire::decode_message(&desc, bytes)
    }

    // ── JSON ──

    /// Renders the message as JSON keyed by proto field names.
    ///
    /// Timestamps, durations and field masks use their canonical string
    /// forms. Enums render as value names when known.
    pub fn to_json(&self) -> Json {
        match self.desc.full_name() {
            wkt::TIMESTAMP => {
                let (seconds, nanos) = self.seconds_and_nanos();
                if let Some(text) = wkt::format_timestamp(seconds, nanos) {
                    return Json::String(text);
                }
            }
            wkt::DURATION => {
                let (seconds, nanos) = self.seconds_and_nanos();
                return Json::String(wkt::format_duration(seconds, nanos));
            }
            wkt::FIELD_MASK => {
                let paths: Vec<&str> = self
                    .get_by_name("paths")
                    .and_then(Value::as_list)
                    .unwrap_or_default()
                    .iter()
                    .filter_map(Value::as_str)
                    .collect();
                return Json::String(paths.join(","));
            }
            _ => {}
        }

        let mut object = Map::new();
        for (field, value) in self.fields() {
            object.insert(field.name().to_string(), value_to_json(&field.kind(), value));
        }
        Json::Object(object)
    }

    fn seconds_and_nanos(&self) -> (i64, i32) {
        let seconds = self.get_by_name("seconds").and_then(Value::as_i64).unwrap_or(0);
        let nanos = self.get_by_name("nanos").and_then(Value::as_i64).unwrap_or(0);
        (seconds, nanos as i32)
    }
}

impl fmt::Debug for DynamicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct(self.desc.full_name());
        for (field, value) in self.fields() {
            debug.field(field.name(), value);
        }
        debug.finish()
    }
}

fn value_to_json(kind: &Kind, value: &Value) -> Json {
    match value {
        Value::Bool(v) => Json::Bool(*v),
        Value::I32(v) => Json::from(*v),
        Value::I64(v) => Json::from(*v),
        Value::U32(v) => Json::from(*v),
        Value::U64(v) => Json::from(*v),
        Value::F32(v) => float_to_json(f64::from(*v)),
        Value::F64(v) => float_to_json(*v),
        Value::String(v) => Json::String(v.clone()),
        Value::Bytes(v) => Json::String(base64::engine::general_purpose::STANDARD.encode(v)),
        Value::EnumNumber(number) => match kind.as_enum().and_then(|e| e.value_by_number(*number)) {
            Some(value) => Json::String(value.name().to_string()),
            None => Json::from(*number),
        },
        Value::Message(message) => message.to_json(),
        Value::List(items) => Json::Array(items.iter().map(|item| value_to_json(kind, item)).collect()),
        Value::Map(entries) => {
            let value_kind = kind
                .as_message()
                .and_then(|entry| entry.field_by_number(2))
                .map(|field| field.kind());
            let mut object = Map::new();
            for (key, value) in entries {
                let json = match &value_kind {
                    Some(value_kind) => value_to_json(value_kind, value),
                    None => Json::Null,
                };
                object.insert(key.to_string(), json);
            }
            Json::Object(object)
        }
    }
}

fn float_to_json(value: f64) -> Json {
    match Number::from_f64(value) {
        Some(number) => Json::Number(number),
        None if value.is_nan() => Json::String("NaN".to_string()),
        None if value > 0.0 => Json::String("Infinity".to_string()),
        None => Json::String("-Infinity".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use serde_json::json;

    #[test]
    fn zero_scalars_leave_proto3_fields_unset() {
        let pool = testing::library_pool();
        let book = pool.get_message_by_name("library.v1.Book").unwrap();
        let mut message = DynamicMessage::new(book.clone());
        message.set_by_name("page_count", Value::I32(0)).unwrap();
        message.set_by_name("title", Value::String(String::new())).unwrap();
        assert!(message.is_empty());

        message.set_by_name("page_count", Value::I32(320)).unwrap();
        assert_eq!(message.get_by_name("page_count"), Some(&Value::I32(320)));
    }

    #[test]
    fn set_rejects_mismatched_values() {
        let pool = testing::library_pool();
        let book = pool.get_message_by_name("library.v1.Book").unwrap();
        let mut message = DynamicMessage::new(book);
        assert!(message.set_by_name("page_count", Value::String("x".into())).is_err());
        assert!(message.set_by_name("tags", Value::String("x".into())).is_err());
        assert!(message.set_by_name("missing", Value::Bool(true)).is_err());
    }

    #[test]
    fn renders_json_with_proto_names() {
        let pool = testing::library_pool();
        let book = pool.get_message_by_name("library.v1.Book").unwrap();
        let timestamp = pool.get_message_by_name(wkt::TIMESTAMP).unwrap();

        let mut publish_time = DynamicMessage::new(timestamp);
        publish_time.set_by_name("seconds", Value::I64(1_704_067_200)).unwrap();

        let mut message = DynamicMessage::new(book);
        message.set_by_name("title", Value::String("Dune".into())).unwrap();
        message.set_by_name("genre", Value::EnumNumber(2)).unwrap();
        message
            .set_by_name("tags", Value::List(vec![Value::String("classic".into())]))
            .unwrap();
        message.set_by_name("publish_time", Value::Message(publish_time)).unwrap();

        assert_eq!(
            message.to_json(),
            json!({
                "title": "Dune",
                "genre": "SCIENCE_FICTION",
                "tags": ["classic"],
                "publish_time": "2024-01-01T00:00:00Z",
            })
        );
    }
}
