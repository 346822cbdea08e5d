//! The bridge between protobuf schemas and LLM tools.
//!
//! [`ToolBridge`] turns methods and messages of a resolved
//! [`Schema`](pb_reflect::Schema) into [`Tool`](pb_core::Tool)s whose
//! annotations carry everything needed to parse a call later.
//! [`ToolSet`] and [`ToolManager`] keep the tool list small by exposing
//! method tools only after the model discovers them.

pub mod annotations;
pub mod bridge;
pub mod generate;
pub mod message_builder;
pub mod schema_builder;
pub mod tool_manager;
pub mod tool_set;

pub use annotations::{ToolAnnotations, ToolType};
pub use bridge::{
    BridgeConfig, DescriptorReference, DiscoveryPolicy, ParsedToolCall, RpcRequest, ToolBridge,
    ToolSetOptions,
};
pub use generate::{TextGenerator, TextToTextRequest, TextToTextResponse};
pub use message_builder::{build_message, response_read_mask};
pub use schema_builder::{build_method_schema, build_response_schema, build_schema, SchemaConfiguration};
pub use tool_manager::{ToolManager, ToolManagerOptions};
pub use tool_set::ToolSet;
