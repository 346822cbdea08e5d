//! Rebuilds typed messages from the untyped JSON arguments of a tool call.

use std::collections::BTreeMap;

use base64::Engine as _;
use pb_core::{Error, Result};
use pb_reflect::{wkt, DynamicMessage, FieldDescriptor, FieldMask, Kind, MapKey, MessageDescriptor, Value};
use serde_json::{Map, Value as Json};

use crate::schema_builder::RESPONSE_READ_MASK_FIELD;

/// Deepest message nesting accepted from a model.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Builds a `desc` message from `args`.
///
/// Keys that name no field are ignored and `null` leaves a field unset.
/// Every conversion failure is `InvalidArgument` and names the field path.
pub fn build_message(desc: &MessageDescriptor, args: &Map<String, Json>) -> Result<DynamicMessage> {
    populate(desc, args, "", 1)
}

/// The read mask requested through the `response_read_mask` argument.
/// Missing, empty and non-string values mean no mask.
pub fn response_read_mask(args: &Map<String, Json>) -> Result<Option<FieldMask>> {
    match args.get(RESPONSE_READ_MASK_FIELD) {
        Some(Json::String(mask)) if !mask.trim().is_empty() => FieldMask::parse(mask).map(Some),
        _ => Ok(None),
    }
}

fn populate(desc: &MessageDescriptor, args: &Map<String, Json>, prefix: &str, depth: usize) -> Result<DynamicMessage> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::InvalidArgument(format!(
            "message nesting exceeds {MAX_NESTING_DEPTH} levels at {prefix}"
        )));
    }

    let mut message = DynamicMessage::new(desc.clone());
    for field in desc.fields() {
        let Some(json) = args.get(field.name()).or_else(|| args.get(field.json_name())) else {
            continue;
        };
        if json.is_null() {
            continue;
        }
        let path = if prefix.is_empty() {
            field.name().to_string()
        } else {
            format!("{prefix}.{}", field.name())
        };

        let value = if field.is_map() {
            convert_map(&field, json, &path, depth)?
        } else if field.is_list() {
            let items = json
                .as_array()
                .ok_or_else(|| mismatch("array", &path, json))?;
            let values = items
                .iter()
                .map(|item| convert(&field.kind(), item, &path, depth))
                .collect::<Result<Vec<_>>>()?;
            Value::List(values)
        } else {
            convert(&field.kind(), json, &path, depth)?
        };
        message.set(&field, value)?;
    }
    Ok(message)
}

fn convert_map(field: &FieldDescriptor, json: &Json, path: &str, depth: usize) -> Result<Value> {
    let object = json
        .as_object()
        .ok_or_else(|| mismatch("object", path, json))?;
    let (Some(key_field), Some(value_field)) = (field.map_key(), field.map_value()) else {
        return Err(Error::Internal(format!("map field {path} has no entry descriptor")));
    };

    let mut entries = BTreeMap::new();
    for (key, value) in object {
        let key = convert_map_key(&key_field.kind(), key, path)?;
        let value = convert(&value_field.kind(), value, &format!("{path}[{key}]"), depth)?;
        entries.insert(key, value);
    }
    Ok(Value::Map(entries))
}

fn convert_map_key(kind: &Kind, key: &str, path: &str) -> Result<MapKey> {
    let invalid = |expected: &str| {
        Error::InvalidArgument(format!("invalid {expected} key {key:?} for map field {path}"))
    };
    Ok(match kind {
        Kind::String => MapKey::String(key.to_string()),
        Kind::Bool => match key {
            "true" => MapKey::Bool(true),
            "false" => MapKey::Bool(false),
            _ => return Err(invalid("bool")),
        },
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => MapKey::I32(key.parse().map_err(|_| invalid("int32"))?),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => MapKey::I64(key.parse().map_err(|_| invalid("int64"))?),
        Kind::Uint32 | Kind::Fixed32 => MapKey::U32(key.parse().map_err(|_| invalid("uint32"))?),
        Kind::Uint64 | Kind::Fixed64 => MapKey::U64(key.parse().map_err(|_| invalid("uint64"))?),
        _ => {
            return Err(Error::InvalidArgument(format!(
                "unsupported key kind {kind:?} for map field {path}"
            )))
        }
    })
}

/// Converts one singular value, list element or map value.
fn convert(kind: &Kind, json: &Json, path: &str, depth: usize) -> Result<Value> {
    Ok(match kind {
        Kind::String => Value::String(string(json, path)?.to_string()),
        Kind::Bool => Value::Bool(json.as_bool().ok_or_else(|| mismatch("bool", path, json))?),
        Kind::Bytes => {
            let text = string(json, path)?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(text)
                .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(text))
                .map_err(|e| Error::InvalidArgument(format!("invalid base64 for field {path}: {e}")))?;
            Value::Bytes(bytes)
        }
        // Models emit plain JSON numbers: fractions truncate and out-of-range
        // values saturate at the target width.
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => Value::I32(number(json, path)? as i32),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => match json.as_i64() {
            Some(exact) => Value::I64(exact),
            None => Value::I64(number(json, path)? as i64),
        },
        Kind::Uint32 | Kind::Fixed32 => Value::U32(number(json, path)? as u32),
        Kind::Uint64 | Kind::Fixed64 => match json.as_u64() {
            Some(exact) => Value::U64(exact),
            None => Value::U64(number(json, path)? as u64),
        },
        Kind::Float => Value::F32(number(json, path)? as f32),
        Kind::Double => Value::F64(number(json, path)?),
        Kind::Enum(e) => {
            let name = json
                .as_str()
                .ok_or_else(|| mismatch("string (enum)", path, json))?;
            let value = e.value_by_name(name).ok_or_else(|| {
                Error::InvalidArgument(format!("unknown enum value {name:?} for field {path}"))
            })?;
            Value::EnumNumber(value.number())
        }
        Kind::Message(message) => Value::Message(convert_message(message, json, path, depth)?),
    })
}

fn convert_message(desc: &MessageDescriptor, json: &Json, path: &str, depth: usize) -> Result<DynamicMessage> {
    let parse_error = |what: &str, e: String| {
        Error::InvalidArgument(format!("parsing {what} for field {path}: {e}"))
    };
    let mut message = DynamicMessage::new(desc.clone());

    match desc.full_name() {
        wkt::TIMESTAMP => {
            let (seconds, nanos) = wkt::parse_timestamp(string(json, path)?).map_err(|e| parse_error("timestamp", e))?;
            message.set_by_name("seconds", Value::I64(seconds))?;
            message.set_by_name("nanos", Value::I32(nanos))?;
        }
        wkt::DURATION => {
            let (seconds, nanos) = wkt::parse_duration(string(json, path)?).map_err(|e| parse_error("duration", e))?;
            message.set_by_name("seconds", Value::I64(seconds))?;
            message.set_by_name("nanos", Value::I32(nanos))?;
        }
        wkt::FIELD_MASK => {
            let paths: Vec<Value> = string(json, path)?
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| Value::String(p.to_string()))
                .collect();
            message.set_by_name("paths", Value::List(paths))?;
        }
        wkt::DATE => {
            let (year, month, day) = wkt::parse_date(string(json, path)?).map_err(|e| parse_error("date", e))?;
            message.set_by_name("year", Value::I32(year))?;
            message.set_by_name("month", Value::I32(month))?;
            message.set_by_name("day", Value::I32(day))?;
        }
        wkt::TIME_OF_DAY => {
            let (hours, minutes, seconds) =
                wkt::parse_time_of_day(string(json, path)?).map_err(|e| parse_error("time of day", e))?;
            message.set_by_name("hours", Value::I32(hours))?;
            message.set_by_name("minutes", Value::I32(minutes))?;
            message.set_by_name("seconds", Value::I32(seconds))?;
        }
        _ => {
            let object = json
                .as_object()
                .ok_or_else(|| mismatch("object", path, json))?;
            message = populate(desc, object, path, depth + 1)?;
        }
    }
    Ok(message)
}

fn string<'a>(json: &'a Json, path: &str) -> Result<&'a str> {
    json.as_str().ok_or_else(|| mismatch("string", path, json))
}

fn number(json: &Json, path: &str) -> Result<f64> {
    json.as_f64().ok_or_else(|| mismatch("number", path, json))
}

fn mismatch(expected: &str, path: &str, actual: &Json) -> Error {
    Error::InvalidArgument(format!(
        "expected {expected} for field {path}, got {}",
        json_type(actual)
    ))
}

fn json_type(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pb_reflect::testing;
    use serde_json::json;

    fn args(value: Json) -> Map<String, Json> {
        match value {
            Json::Object(map) => map,
            _ => panic!("arguments must be an object"),
        }
    }

    fn book(value: Json) -> Result<DynamicMessage> {
        let pool = testing::library_pool();
        let desc = pool.get_message_by_name("library.v1.Book").unwrap();
        build_message(&desc, &args(value))
    }

    #[test]
    fn builds_a_complete_book() {
        let message = book(json!({
            "name": "shelves/1/books/2",
            "title": "Dune",
            "author": {"display_name": "Frank Herbert"},
            "genre": "SCIENCE_FICTION",
            "tags": ["classic", "desert"],
            "publish_time": "1965-08-01T00:00:00Z",
            "page_count": 412,
            "read_duration": "14h30m",
            "attributes": {"format": "paperback"},
            "published": true,
            "release_date": "1965-08-01",
            "reviews": [{"rating": 5, "text": "Great"}],
            "rating": 4.5,
        }))
        .unwrap();

        assert_eq!(
            message.to_json(),
            json!({
                "name": "shelves/1/books/2",
                "title": "Dune",
                "author": {"display_name": "Frank Herbert"},
                "genre": "SCIENCE_FICTION",
                "tags": ["classic", "desert"],
                "publish_time": "1965-08-01T00:00:00Z",
                "page_count": 412,
                "read_duration": "52200s",
                "attributes": {"format": "paperback"},
                "published": true,
                "release_date": {"year": 1965, "month": 8, "day": 1},
                "reviews": [{"rating": 5, "text": "Great"}],
                "rating": 4.5,
            })
        );
    }

    #[test]
    fn unknown_keys_and_nulls_are_skipped() {
        let message = book(json!({"title": "Dune", "subtitle": "ignored", "author": null})).unwrap();
        assert_eq!(message.to_json(), json!({"title": "Dune"}));
    }

    #[test]
    fn numbers_are_truncated_to_the_field_width() {
        let message = book(json!({"page_count": 412.9})).unwrap();
        assert_eq!(message.get_by_name("page_count"), Some(&Value::I32(412)));
    }

    #[test]
    fn bytes_accept_base64() {
        let message = book(json!({"cover": "aGVsbG8="})).unwrap();
        assert_eq!(message.get_by_name("cover"), Some(&Value::Bytes(b"hello".to_vec())));

        let err = book(json!({"cover": "not base64!"})).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn type_mismatches_name_the_field() {
        let err = book(json!({"title": 5})).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert_eq!(err.message(), "expected string for field title, got number");

        let err = book(json!({"author": {"email": true}})).unwrap_err();
        assert_eq!(err.message(), "expected string for field author.email, got bool");

        let err = book(json!({"tags": "classic"})).unwrap_err();
        assert_eq!(err.message(), "expected array for field tags, got string");

        let err = book(json!({"published": "yes"})).unwrap_err();
        assert_eq!(err.message(), "expected bool for field published, got string");
    }

    #[test]
    fn unknown_enum_values_are_rejected() {
        let err = book(json!({"genre": "POETRY"})).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert_eq!(err.message(), "unknown enum value \"POETRY\" for field genre");
    }

    #[test]
    fn malformed_well_known_values_are_rejected() {
        for bad in [
            json!({"publish_time": "yesterday"}),
            json!({"read_duration": "90"}),
            json!({"release_date": "1965/08/01"}),
        ] {
            let err = book(bad.clone()).unwrap_err();
            assert_eq!(err.code(), tonic::Code::InvalidArgument, "{bad}");
        }
    }

    #[test]
    fn field_masks_split_and_trim() {
        let pool = testing::library_pool();
        let desc = pool.get_message_by_name("library.v1.UpdateBookRequest").unwrap();

        let message = build_message(&desc, &args(json!({"update_mask": " title , author "}))).unwrap();
        assert_eq!(message.to_json(), json!({"update_mask": "title,author"}));

        let message = build_message(&desc, &args(json!({"update_mask": ""}))).unwrap();
        assert_eq!(message.to_json(), json!({"update_mask": ""}));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let pool = testing::library_pool();
        let desc = pool.get_message_by_name("library.v1.Node").unwrap();

        let mut nested = json!({"value": "leaf"});
        for _ in 0..MAX_NESTING_DEPTH {
            nested = json!({"child": nested});
        }
        let err = build_message(&desc, &args(nested)).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        let mut nested = json!({"value": "leaf"});
        for _ in 0..MAX_NESTING_DEPTH - 1 {
            nested = json!({"child": nested});
        }
        assert!(build_message(&desc, &args(nested)).is_ok());
    }

    #[test]
    fn response_read_mask_is_optional() {
        assert_eq!(response_read_mask(&args(json!({}))).unwrap(), None);
        assert_eq!(response_read_mask(&args(json!({"response_read_mask": ""}))).unwrap(), None);
        assert_eq!(response_read_mask(&args(json!({"response_read_mask": 3}))).unwrap(), None);

        let mask = response_read_mask(&args(json!({"response_read_mask": "title, name"})))
            .unwrap()
            .unwrap();
        assert_eq!(mask.paths(), ["name", "title"]);
    }
}
