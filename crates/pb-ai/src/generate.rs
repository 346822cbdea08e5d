//! Message generation through a text-generation service.

use async_trait::async_trait;
use pb_core::{Error, Message, Result, StopReason, Tool, ToolChoice, Usage};
use pb_reflect::DynamicMessage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::annotations::ToolAnnotations;
use crate::bridge::{DescriptorReference, ParsedToolCall, ToolBridge};
use crate::schema_builder::SchemaConfiguration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextToTextRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextToTextResponse {
    pub message: Message,
    pub stop_reason: StopReason,
    #[serde(default)]
    pub usage: Usage,
}

/// A text-generation service. How it talks to upstream providers is its
/// own business.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn text_to_text(&self, request: TextToTextRequest) -> Result<TextToTextResponse>;
}

impl ToolBridge {
    /// Asks the model to fill in a message described by `reference` from
    /// `prompt`. An empty `model` falls back to the configured default.
    pub async fn generate_message(
        &self,
        generator: &dyn TextGenerator,
        reference: &DescriptorReference,
        config: &SchemaConfiguration,
        prompt: &str,
        model: &str,
    ) -> Result<DynamicMessage> {
        let mut tool = self.create_tool(reference, config)?;
        // Method requests are generated too, never dispatched.
        let annotations = match ToolAnnotations::from_map(&tool.annotations)? {
            ToolAnnotations::RpcRequest {
                proto_message,
                generation_field_mask,
                ..
            } => ToolAnnotations::GenerateMessage {
                proto_message,
                generation_field_mask,
            },
            other => other,
        };
        tool.annotations = annotations.to_map();

        let model = if model.is_empty() {
            self.config().default_model.clone()
        } else {
            model.to_string()
        };
        let request = TextToTextRequest {
            model,
            messages: vec![
                Message::system(format!(
                    "Use the `{}` tool to generate a JSON payload based on the data given to you by the user",
                    tool.name
                )),
                Message::user(prompt),
            ],
            tool_choice: Some(ToolChoice::ToolName(tool.name.clone())),
            tools: vec![tool.clone()],
        };

        let response = generator
            .text_to_text(request)
            .await
            .map_err(|e| Error::Internal(format!("text to text: {}", e.message())))?;
        debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "generation finished"
        );

        let calls: Vec<_> = response.message.tool_calls().collect();
        let [call] = calls.as_slice() else {
            return Err(Error::Internal(format!("expected 1 tool call, got {}", calls.len())));
        };
        let mut call = (*call).clone();
        if call.annotations.is_empty() {
            call.annotations = tool.annotations.clone();
        }

        match self.parse_tool_call(&call, &[])? {
            ParsedToolCall::Message(message) => Ok(message),
            other => Err(Error::Internal(format!("expected a generated message, got {other:?}"))),
        }
    }
}
