//! Compiles message descriptors into the JSON Schema shown to a model.

use pb_core::{Error, JsonSchema, Result};
use pb_reflect::{
    wkt, CommentStyle, FieldDescriptor, FieldMask, Kind, MessageDescriptor, MethodDescriptor,
    Schema, StandardMethodType,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Argument holding the comma-separated response read mask.
pub const RESPONSE_READ_MASK_FIELD: &str = "response_read_mask";

const RESPONSE_READ_MASK_DESCRIPTION: &str = "Comma-separated list of response fields to return \
(AIP-157 read mask), e.g. `name,display_name`. Use `*` to return every field.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfiguration {
    /// Deepest field level included. Top-level fields are at depth 1.
    /// Zero selects [`DEFAULT_MAX_DEPTH`].
    pub max_depth: usize,
    /// Restricts the schema (and the parsed message) to these paths.
    pub field_mask_paths: Vec<String>,
    /// Adds a required `response_read_mask` argument to method tools.
    pub response_read_mask: bool,
    /// When non-zero, a preview of the response schema at this depth is
    /// appended to method tool descriptions.
    pub response_schema_max_depth: usize,
}

impl SchemaConfiguration {
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth,
            ..Default::default()
        }
    }

    pub fn effective_max_depth(&self) -> usize {
        if self.max_depth == 0 {
            DEFAULT_MAX_DEPTH
        } else {
            self.max_depth
        }
    }

    /// The generation field mask, validated against `message`. `None` when
    /// no paths are configured.
    pub fn field_mask(&self, message: &MessageDescriptor) -> Result<Option<FieldMask>> {
        if self.field_mask_paths.is_empty() {
            return Ok(None);
        }
        let mask = FieldMask::from_paths(self.field_mask_paths.iter().cloned())?;
        mask.validate(message)
            .map_err(|e| Error::InvalidArgument(format!("validating field_mask: {}", e.message())))?;
        Ok(Some(mask))
    }
}

/// Builds the argument schema for `message`.
///
/// Field behaviors are interpreted for `method_type`: create requests drop
/// identifiers, update requests drop immutable fields and require
/// identifiers. Output-only fields are always dropped.
pub fn build_schema(
    schema: &Schema,
    message: &MessageDescriptor,
    method_type: StandardMethodType,
    config: &SchemaConfiguration,
) -> Result<JsonSchema> {
    let mask = config.field_mask(message)?;
    let builder = Builder {
        schema,
        method_type,
        max_depth: config.effective_max_depth(),
        mask,
        include_output_only: false,
    };
    Ok(builder.message(message, "", 1))
}

/// Builds the argument schema for a method's input, including the response
/// read mask argument when configured.
pub fn build_method_schema(
    schema: &Schema,
    method: &MethodDescriptor,
    config: &SchemaConfiguration,
) -> Result<JsonSchema> {
    let method_type = schema.standard_method_type(method.full_name());
    let mut json = build_schema(schema, &method.input(), method_type, config)?;
    if config.response_read_mask {
        json.properties.insert(
            RESPONSE_READ_MASK_FIELD.to_string(),
            JsonSchema::string().with_description(RESPONSE_READ_MASK_DESCRIPTION),
        );
        json.required.push(RESPONSE_READ_MASK_FIELD.to_string());
    }
    Ok(json)
}

/// A schema of the method's response, used as a preview in descriptions.
pub fn build_response_schema(schema: &Schema, method: &MethodDescriptor, max_depth: usize) -> JsonSchema {
    let builder = Builder {
        schema,
        method_type: StandardMethodType::Unspecified,
        max_depth,
        mask: None,
        include_output_only: true,
    };
    builder.message(&method.output(), "", 1)
}

struct Builder<'a> {
    schema: &'a Schema,
    method_type: StandardMethodType,
    max_depth: usize,
    mask: Option<FieldMask>,
    include_output_only: bool,
}

impl Builder<'_> {
    /// `depth` is the level of the message's own fields.
    fn message(&self, message: &MessageDescriptor, prefix: &str, depth: usize) -> JsonSchema {
        if let Some(hint) = wkt::format_hint(message.full_name()) {
            return JsonSchema::string().with_description(hint);
        }

        let mut node = JsonSchema::object()
            .with_description(self.schema.comment(message.full_name(), CommentStyle::Multiline));
        if depth > self.max_depth {
            return node;
        }
        for field in message.fields() {
            let path = if prefix.is_empty() {
                field.name().to_string()
            } else {
                format!("{prefix}.{}", field.name())
            };
            if let Some((property, required)) = self.field(&field, &path, depth) {
                if required {
                    node.required.push(field.name().to_string());
                }
                node.properties.insert(field.name().to_string(), property);
            }
        }
        node
    }

    fn field(&self, field: &FieldDescriptor, path: &str, depth: usize) -> Option<(JsonSchema, bool)> {
        if self.mask.as_ref().is_some_and(|mask| !mask.allows(path)) {
            return None;
        }

        let behaviors = field.behaviors();
        if behaviors.output_only && !self.include_output_only {
            return None;
        }
        let required = match self.method_type {
            StandardMethodType::Create => {
                if behaviors.identifier {
                    return None;
                }
                behaviors.required
            }
            StandardMethodType::Update => {
                if behaviors.immutable {
                    return None;
                }
                behaviors.identifier
            }
            _ => behaviors.required,
        };

        let description = self.schema.comment(field.full_name(), CommentStyle::Multiline);

        if field.is_map() {
            let mut node = JsonSchema::object().with_description(description);
            if let Some(value) = field.map_value() {
                node.additional_properties = Some(Box::new(self.element(&value, path, depth)));
            }
            return Some((node, required));
        }

        if field.is_list() {
            let node = JsonSchema::array(self.element(field, path, depth)).with_description(description);
            return Some((node, required));
        }

        let node = match field.kind() {
            Kind::Message(message) => {
                let mut node = self.message(&message, path, depth + 1);
                node.description = combine(&description, &node.description);
                node
            }
            kind => scalar(&kind).with_description(description),
        };
        Some((node, required))
    }

    /// List items and map values carry no field comment of their own.
    fn element(&self, field: &FieldDescriptor, path: &str, depth: usize) -> JsonSchema {
        match field.kind() {
            Kind::Message(message) => self.message(&message, path, depth + 1),
            kind => scalar(&kind),
        }
    }
}

fn scalar(kind: &Kind) -> JsonSchema {
    match kind {
        Kind::Bool => JsonSchema::of_type("boolean"),
        Kind::Int32
        | Kind::Sint32
        | Kind::Sfixed32
        | Kind::Int64
        | Kind::Sint64
        | Kind::Sfixed64
        | Kind::Uint32
        | Kind::Fixed32
        | Kind::Uint64
        | Kind::Fixed64 => JsonSchema::of_type("integer"),
        Kind::Float | Kind::Double => JsonSchema::of_type("number"),
        Kind::Enum(e) => JsonSchema {
            enum_values: e.values().map(|v| v.name().to_string()).collect(),
            ..JsonSchema::string()
        },
        Kind::String | Kind::Bytes | Kind::Message(_) => JsonSchema::string(),
    }
}

/// `field (message)`, or whichever side is non-empty.
fn combine(field: &str, message: &str) -> String {
    match (field.is_empty(), message.is_empty()) {
        (_, true) => field.to_string(),
        (true, false) => message.to_string(),
        (false, false) => format!("{field} ({message})"),
    }
}
