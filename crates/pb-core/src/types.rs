use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── JSON Schema ──

/// A JSON Schema node as presented to a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub schema_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, JsonSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<JsonSchema>>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(
        rename = "additionalProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<Box<JsonSchema>>,
}

impl JsonSchema {
    pub fn of_type(schema_type: impl Into<String>) -> Self {
        Self {
            schema_type: schema_type.into(),
            ..Default::default()
        }
    }

    pub fn object() -> Self {
        Self::of_type("object")
    }

    pub fn string() -> Self {
        Self::of_type("string")
    }

    pub fn array(items: JsonSchema) -> Self {
        Self {
            schema_type: "array".to_string(),
            items: Some(Box::new(items)),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Looks up a nested property by dot-path, stepping through array items.
    pub fn property(&self, path: &str) -> Option<&JsonSchema> {
        let mut node = self;
        for segment in path.split('.') {
            while let Some(items) = node.items.as_deref() {
                node = items;
            }
            node = node.properties.get(segment)?;
        }
        Some(node)
    }

    /// Number of property levels below this node.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        for child in self.properties.values() {
            deepest = deepest.max(1 + child.depth());
        }
        if let Some(items) = &self.items {
            deepest = deepest.max(items.depth());
        }
        if let Some(values) = &self.additional_properties {
            deepest = deepest.max(values.depth());
        }
        deepest
    }
}

// ── Tools ──

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub json_schema: JsonSchema,
    /// The only state that survives a round trip through the model.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ToolCall {
    /// Builds a call against `tool`, carrying its annotations forward.
    pub fn for_tool(tool: &Tool, id: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: tool.name.clone(),
            arguments,
            annotations: tool.annotations.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultContent {
    Content(Value),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub tool_call_id: String,
    pub result: ToolResultContent,
}

impl ToolResult {
    pub fn content(
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            result: ToolResultContent::Content(content),
        }
    }

    pub fn error(
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            result: ToolResultContent::Error(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.result, ToolResultContent::Error(_))
    }
}

/// Parsed form of a call to a synthetic discovery tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryCall {
    pub tool_set_name: String,
    pub tool_names: Vec<String>,
}

// ── Conversation ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text { text: String },
    ToolCall { tool_call: ToolCall },
    ToolResult { tool_result: ToolResult },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub blocks: Vec<Block>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            blocks: vec![Block::Text { text: text.into() }],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            blocks: vec![Block::Text { text: text.into() }],
        }
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.blocks.iter().filter_map(|block| match block {
            Block::ToolCall { tool_call } => Some(tool_call),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Required,
    ToolName(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolCall,
    MaxTokens,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    /// Folds a later provider report into this one. Counters never go down.
    pub fn reconcile(&mut self, reported: Usage) {
        self.input_tokens = self.input_tokens.max(reported.input_tokens);
        self.output_tokens = self.output_tokens.max(reported.output_tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_serializes_in_json_schema_shape() {
        let mut schema = JsonSchema::object();
        schema.properties.insert(
            "tools".into(),
            JsonSchema::array(JsonSchema {
                enum_values: vec!["a".into()],
                ..JsonSchema::string()
            }),
        );
        schema.required.push("tools".into());
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "object",
                "properties": {"tools": {"type": "array", "items": {"type": "string", "enum": ["a"]}}},
                "required": ["tools"]
            })
        );
    }

    #[test]
    fn property_walks_through_arrays() {
        let mut review = JsonSchema::object();
        review.properties.insert("rating".into(), JsonSchema::of_type("integer"));
        let mut root = JsonSchema::object();
        root.properties.insert("reviews".into(), JsonSchema::array(review));
        assert!(root.property("reviews.rating").is_some());
        assert!(root.property("reviews.author").is_none());
        assert_eq!(root.depth(), 2);
    }

    #[test]
    fn usage_reconcile_keeps_maximum() {
        let mut usage = Usage { input_tokens: 100, output_tokens: 20 };
        usage.reconcile(Usage { input_tokens: 90, output_tokens: 35 });
        assert_eq!(usage, Usage { input_tokens: 100, output_tokens: 35 });
    }

    #[test]
    fn message_collects_tool_calls() {
        let message = Message {
            role: Role::Assistant,
            blocks: vec![
                Block::Text { text: "thinking".into() },
                Block::ToolCall { tool_call: ToolCall { name: "GetBook".into(), ..Default::default() } },
            ],
        };
        assert_eq!(message.tool_calls().count(), 1);
    }
}
