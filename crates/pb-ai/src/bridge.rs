//! Builds tools from a schema and parses the model's calls back into
//! messages and method requests.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use pb_core::{DiscoveryCall, Error, JsonSchema, Result, Tool, ToolCall, ToolResult};
use pb_reflect::{CommentStyle, DynamicMessage, FieldMask, MessageDescriptor, Schema, StandardMethodType};
use tracing::debug;

use crate::annotations::ToolAnnotations;
use crate::message_builder::{build_message, response_read_mask};
use crate::schema_builder::{build_method_schema, build_response_schema, build_schema, SchemaConfiguration};
use crate::tool_set::{discovery_tool_names, ToolSet, DISCOVERY_TOOLS_FIELD};

/// Names the descriptor a tool is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorReference {
    /// A method full name, e.g. `library.v1.LibraryService.GetBook`.
    Method(String),
    /// A message full name, e.g. `library.v1.Book`.
    Message(String),
}

impl fmt::Display for DescriptorReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorReference::Method(name) => write!(f, "method {name}"),
            DescriptorReference::Message(name) => write!(f, "message {name}"),
        }
    }
}

/// How a discovery call for an already discovered tool is answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DiscoveryPolicy {
    /// Re-discovery is accepted and changes nothing.
    #[default]
    Idempotent,
    /// Re-discovery fails with `AlreadyExists`, carrying an error result the
    /// caller can hand back to the model.
    Strict,
}

#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Used by message generation when the request names no model.
    pub default_model: String,
    pub discovery_policy: DiscoveryPolicy,
}

/// A method call ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub service: String,
    pub method: String,
    pub request: DynamicMessage,
    /// Fields of the response the model asked for.
    pub read_mask: Option<FieldMask>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedToolCall {
    Discovery(DiscoveryCall),
    RpcRequest(RpcRequest),
    Message(DynamicMessage),
}

/// Which methods of a service become tools, and how.
#[derive(Debug, Clone, Default)]
pub struct ToolSetOptions {
    /// Method short names. Empty selects every method.
    pub method_names: Vec<String>,
    pub schema_configuration: SchemaConfiguration,
    /// Overrides `schema_configuration` per method short name.
    pub method_schema_configurations: HashMap<String, SchemaConfiguration>,
}

/// Stateless conversion between a [`Schema`] and tools.
///
/// Everything needed to parse a call travels in the tool's annotations, so
/// any bridge built on the same schema can parse calls to tools built by
/// another.
#[derive(Debug, Clone)]
pub struct ToolBridge {
    schema: Arc<Schema>,
    config: BridgeConfig,
}

impl ToolBridge {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_config(schema, BridgeConfig::default())
    }

    pub fn with_config(schema: Arc<Schema>, config: BridgeConfig) -> Self {
        Self { schema, config }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    // ── Tool construction ──

    pub fn create_tool(&self, reference: &DescriptorReference, config: &SchemaConfiguration) -> Result<Tool> {
        let tool = match reference {
            DescriptorReference::Method(name) => self.method_tool(name, config)?,
            DescriptorReference::Message(name) => self.message_tool(name, config)?,
        };
        debug!(tool = %tool.name, %reference, "tool created");
        Ok(tool)
    }

    fn method_tool(&self, name: &str, config: &SchemaConfiguration) -> Result<Tool> {
        let descriptor = self.find(name, "method")?;
        let method = self
            .schema
            .find_method(descriptor.full_name())
            .ok_or_else(|| Error::InvalidArgument(format!("{name} is not a method")))?;
        let input = method.input();
        let mask = config.field_mask(&input)?;

        let mut description = self.schema.comment(method.full_name(), CommentStyle::Multiline);
        if config.response_schema_max_depth > 0 {
            let response = build_response_schema(&self.schema, &method, config.response_schema_max_depth);
            description = append_section(&description, &format!("Response schema:\n{}", serde_json::to_string(&response)?));
        }

        Ok(Tool {
            name: method.name().to_string(),
            description,
            json_schema: build_method_schema(&self.schema, &method, config)?,
            annotations: ToolAnnotations::RpcRequest {
                service: method.parent_service().full_name().to_string(),
                method: method.full_name().to_string(),
                proto_message: input.full_name().to_string(),
                no_side_effect: method.has_no_side_effects(),
                discoverable: false,
                generation_field_mask: mask.map(|m| m.to_string()),
            }
            .to_map(),
        })
    }

    fn message_tool(&self, name: &str, config: &SchemaConfiguration) -> Result<Tool> {
        let descriptor = self.find(name, "message")?;
        let message = self
            .schema
            .find_message(descriptor.full_name())
            .ok_or_else(|| Error::InvalidArgument(format!("{name} is not a message")))?;
        let mask = config.field_mask(&message)?;

        Ok(Tool {
            name: format!("Generate_{}", message.name()),
            description: format!("Generate a {} message", message.name()),
            json_schema: build_schema(&self.schema, &message, StandardMethodType::Unspecified, config)?,
            annotations: ToolAnnotations::GenerateMessage {
                proto_message: message.full_name().to_string(),
                generation_field_mask: mask.map(|m| m.to_string()),
            }
            .to_map(),
        })
    }

    fn find(&self, name: &str, kind: &str) -> Result<pb_reflect::Descriptor> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("descriptor reference required".to_string()));
        }
        self.schema.find(name).ok_or_else(|| {
            Error::InvalidArgument(format!("finding {kind} descriptor ({name}): not found"))
        })
    }

    /// A tool whose only argument picks tools to reveal from `tools`.
    pub fn create_discovery_tool(name: &str, description: &str, tools: &[Tool]) -> Tool {
        let mut text = String::new();
        if !description.is_empty() {
            text.push_str(description);
            text.push_str("\n\n");
        }
        text.push_str("Discover the following tools:");
        for tool in tools {
            text.push_str("\n- ");
            text.push_str(&tool.name);
            if let Some(first_line) = tool.description.lines().next().filter(|line| !line.is_empty()) {
                text.push_str(": ");
                text.push_str(first_line);
            }
        }

        let names = JsonSchema {
            enum_values: tools.iter().map(|tool| tool.name.clone()).collect(),
            ..JsonSchema::string()
        };
        let mut json_schema = JsonSchema::object();
        json_schema.properties.insert(
            DISCOVERY_TOOLS_FIELD.to_string(),
            JsonSchema::array(names).with_description("Tool names to discover"),
        );
        json_schema.required.push(DISCOVERY_TOOLS_FIELD.to_string());

        Tool {
            name: name.to_string(),
            description: text,
            json_schema,
            annotations: ToolAnnotations::Discovery.to_map(),
        }
    }

    /// One discoverable tool per method of `service`, behind a
    /// `<Service>_Discover` tool.
    pub fn create_service_tool_set(&self, service: &str, options: &ToolSetOptions) -> Result<ToolSet> {
        let descriptor = self.find(service, "service")?;
        let service = self
            .schema
            .find_service(descriptor.full_name())
            .ok_or_else(|| Error::InvalidArgument(format!("{service} is not a service")))?;

        let method_names: Vec<String> = if options.method_names.is_empty() {
            service.methods().map(|m| m.name().to_string()).collect()
        } else {
            options.method_names.clone()
        };

        let mut tools = Vec::with_capacity(method_names.len());
        for method_name in &method_names {
            let config = options
                .method_schema_configurations
                .get(method_name)
                .unwrap_or(&options.schema_configuration);
            let full_name = format!("{}.{method_name}", service.full_name());
            let mut tool = self
                .create_tool(&DescriptorReference::Method(full_name.clone()), config)
                .map_err(|e| Error::Internal(format!("creating tool for method {full_name}: {}", e.message())))?;
            mark_discoverable(&mut tool)?;
            tools.push(tool);
        }

        let discovery_tool = Self::create_discovery_tool(
            &format!("{}_Discover", service.name()),
            &self.schema.comment(service.full_name(), CommentStyle::Multiline),
            &tools,
        );
        Ok(ToolSet::new(service.full_name(), discovery_tool, tools))
    }

    /// A tool for every method of every exposed service, or of `services`
    /// when given.
    pub fn build_all(&self, services: &[String], config: &SchemaConfiguration) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        for service in self.schema.services() {
            if !services.is_empty() && !services.iter().any(|s| s == service.full_name()) {
                continue;
            }
            for method in service.methods() {
                tools.push(self.create_tool(&DescriptorReference::Method(method.full_name().to_string()), config)?);
            }
        }
        debug!(count = tools.len(), "built tools");
        Ok(tools)
    }

    // ── Tool call parsing ──

    /// Parses a call using only its annotations and the caller's tool sets.
    pub fn parse_tool_call(&self, call: &ToolCall, tool_sets: &[ToolSet]) -> Result<ParsedToolCall> {
        match ToolAnnotations::from_map(&call.annotations)? {
            ToolAnnotations::Discovery => self.parse_discovery_call(call, tool_sets).map(ParsedToolCall::Discovery),
            ToolAnnotations::RpcRequest {
                service,
                method,
                proto_message,
                discoverable,
                generation_field_mask,
                ..
            } => {
                if discoverable {
                    check_discovered(&call.name, tool_sets)?;
                }
                let request = self.build_message(call, &proto_message, generation_field_mask.as_deref())?;
                let read_mask = self.read_mask(call, &method)?;
                Ok(ParsedToolCall::RpcRequest(RpcRequest {
                    service,
                    method,
                    request,
                    read_mask,
                }))
            }
            ToolAnnotations::GenerateMessage {
                proto_message,
                generation_field_mask,
            } => self
                .build_message(call, &proto_message, generation_field_mask.as_deref())
                .map(ParsedToolCall::Message),
        }
    }

    fn parse_discovery_call(&self, call: &ToolCall, tool_sets: &[ToolSet]) -> Result<DiscoveryCall> {
        let tool_names = discovery_tool_names(call)?;
        let tool_set = tool_sets
            .iter()
            .find(|set| set.is_discovery_tool(&call.name))
            .ok_or_else(|| Error::NotFound(format!("tool {:?} not found", call.name)))?;

        for name in &tool_names {
            if !tool_set.has_tool(name) {
                return Err(Error::NotFound(format!("tool {name:?} not found in tool set")));
            }
            if self.config.discovery_policy == DiscoveryPolicy::Strict && tool_set.is_discovered(name) {
                return Err(Error::AlreadyExists {
                    message: format!("tool {name:?} already discovered"),
                    tool_result: Some(Box::new(ToolResult::error(
                        call.name.clone(),
                        call.id.clone(),
                        "tool already discovered",
                    ))),
                });
            }
        }

        Ok(DiscoveryCall {
            tool_set_name: tool_set.name.clone(),
            tool_names,
        })
    }

    fn build_message(&self, call: &ToolCall, proto_message: &str, generation_field_mask: Option<&str>) -> Result<DynamicMessage> {
        let desc: MessageDescriptor = self
            .schema
            .find_message(proto_message)
            .ok_or_else(|| Error::NotFound(format!("message {proto_message} not found in schema")))?;
        let mut message = build_message(&desc, &call.arguments)?;

        // Models sometimes fill fields outside the generation mask.
        if let Some(mask) = generation_field_mask {
            let mask = FieldMask::parse(mask)
                .and_then(|mask| mask.validate(&desc).map(|_| mask))
                .map_err(|e| Error::Internal(format!("validating generation field mask: {}", e.message())))?;
            mask.apply(&mut message);
        }
        Ok(message)
    }

    fn read_mask(&self, call: &ToolCall, method: &str) -> Result<Option<FieldMask>> {
        let Some(mask) = response_read_mask(&call.arguments)? else {
            return Ok(None);
        };
        let method = self
            .schema
            .find_method(method)
            .ok_or_else(|| Error::NotFound(format!("method {method} not found in schema")))?;
        mask.validate(&method.output())
            .map_err(|e| Error::InvalidArgument(format!("invalid response_read_mask: {}", e.message())))?;
        Ok(Some(mask))
    }
}

fn mark_discoverable(tool: &mut Tool) -> Result<()> {
    let mut annotations = ToolAnnotations::from_map(&tool.annotations)?;
    if let ToolAnnotations::RpcRequest { discoverable, .. } = &mut annotations {
        *discoverable = true;
    }
    tool.annotations = annotations.to_map();
    Ok(())
}

/// A discoverable tool may only be called once a tool set shows it as
/// discovered.
fn check_discovered(name: &str, tool_sets: &[ToolSet]) -> Result<()> {
    let tool_set = tool_sets
        .iter()
        .find(|set| set.has_tool(name))
        .ok_or_else(|| Error::NotFound(format!("tool {name:?} not found")))?;
    if !tool_set.is_discovered(name) {
        return Err(Error::FailedPrecondition(format!("tool {name:?} has not been discovered")));
    }
    Ok(())
}

fn append_section(text: &str, section: &str) -> String {
    if text.is_empty() {
        section.to_string()
    } else {
        format!("{text}\n\n{section}")
    }
}
