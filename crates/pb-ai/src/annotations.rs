//! The annotation protocol: the string map a tool carries through the model
//! and back, decoded into a typed form.
//!
//! Keys are a stable contract shared with every replica that may parse a
//! call, so they must not be renamed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use pb_core::{Error, Result};

pub const KEY_TOOL_TYPE: &str = "tool-type";
pub const KEY_GRPC_SERVICE: &str = "grpc-service";
pub const KEY_GRPC_METHOD: &str = "grpc-method";
pub const KEY_PROTO_MESSAGE: &str = "proto-message";
pub const KEY_NO_SIDE_EFFECT: &str = "no-side-effect";
pub const KEY_DISCOVERABLE_TOOL: &str = "discoverable-tool";
pub const KEY_GENERATION_FIELD_MASK: &str = "generation-field-mask";

const TRUE: &str = "true";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolType {
    Discovery,
    GenerateMessage,
    RpcRequest,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Discovery => "discovery",
            ToolType::GenerateMessage => "generate-message",
            ToolType::RpcRequest => "rpc-request",
        }
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "discovery" => Ok(ToolType::Discovery),
            "generate-message" => Ok(ToolType::GenerateMessage),
            "rpc-request" => Ok(ToolType::RpcRequest),
            other => Err(Error::InvalidArgument(format!("unknown tool type {other:?}"))),
        }
    }
}

/// Typed view of a tool's annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolAnnotations {
    /// A synthetic tool that reveals the tools of a tool set.
    Discovery,
    /// Builds a message without dispatching anything.
    GenerateMessage {
        proto_message: String,
        generation_field_mask: Option<String>,
    },
    /// Builds the request of a method.
    RpcRequest {
        service: String,
        method: String,
        proto_message: String,
        no_side_effect: bool,
        discoverable: bool,
        generation_field_mask: Option<String>,
    },
}

impl ToolAnnotations {
    pub fn tool_type(&self) -> ToolType {
        match self {
            ToolAnnotations::Discovery => ToolType::Discovery,
            ToolAnnotations::GenerateMessage { .. } => ToolType::GenerateMessage,
            ToolAnnotations::RpcRequest { .. } => ToolType::RpcRequest,
        }
    }

    pub fn proto_message(&self) -> Option<&str> {
        match self {
            ToolAnnotations::Discovery => None,
            ToolAnnotations::GenerateMessage { proto_message, .. }
            | ToolAnnotations::RpcRequest { proto_message, .. } => Some(proto_message),
        }
    }

    pub fn generation_field_mask(&self) -> Option<&str> {
        match self {
            ToolAnnotations::Discovery => None,
            ToolAnnotations::GenerateMessage { generation_field_mask, .. }
            | ToolAnnotations::RpcRequest { generation_field_mask, .. } => generation_field_mask.as_deref(),
        }
    }

    /// Serializes to the wire map. Absent flags are left out rather than set
    /// to `false`.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(KEY_TOOL_TYPE.to_string(), self.tool_type().to_string());
        match self {
            ToolAnnotations::Discovery => {
                map.insert(KEY_NO_SIDE_EFFECT.to_string(), TRUE.to_string());
            }
            ToolAnnotations::GenerateMessage {
                proto_message,
                generation_field_mask,
            } => {
                map.insert(KEY_PROTO_MESSAGE.to_string(), proto_message.clone());
                if let Some(mask) = generation_field_mask {
                    map.insert(KEY_GENERATION_FIELD_MASK.to_string(), mask.clone());
                }
            }
            ToolAnnotations::RpcRequest {
                service,
                method,
                proto_message,
                no_side_effect,
                discoverable,
                generation_field_mask,
            } => {
                map.insert(KEY_GRPC_SERVICE.to_string(), service.clone());
                map.insert(KEY_GRPC_METHOD.to_string(), method.clone());
                map.insert(KEY_PROTO_MESSAGE.to_string(), proto_message.clone());
                if *no_side_effect {
                    map.insert(KEY_NO_SIDE_EFFECT.to_string(), TRUE.to_string());
                }
                if *discoverable {
                    map.insert(KEY_DISCOVERABLE_TOOL.to_string(), TRUE.to_string());
                }
                if let Some(mask) = generation_field_mask {
                    map.insert(KEY_GENERATION_FIELD_MASK.to_string(), mask.clone());
                }
            }
        }
        map
    }

    /// Decodes the wire map carried on a tool call. Unknown keys are ignored.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        if map.is_empty() {
            return Err(Error::InvalidArgument("missing annotations on tool call".to_string()));
        }
        let tool_type: ToolType = map
            .get(KEY_TOOL_TYPE)
            .ok_or_else(|| Error::InvalidArgument(format!("missing {KEY_TOOL_TYPE} annotation")))?
            .parse()?;

        let required = |key: &str| {
            map.get(key).cloned().ok_or_else(|| {
                Error::InvalidArgument(format!("tool of type \"{tool_type}\" missing annotation {key:?}"))
            })
        };
        let flag = |key: &str| map.get(key).is_some_and(|v| v == TRUE);
        let generation_field_mask = map.get(KEY_GENERATION_FIELD_MASK).cloned();

        Ok(match tool_type {
            ToolType::Discovery => ToolAnnotations::Discovery,
            ToolType::GenerateMessage => ToolAnnotations::GenerateMessage {
                proto_message: required(KEY_PROTO_MESSAGE)?,
                generation_field_mask,
            },
            ToolType::RpcRequest => ToolAnnotations::RpcRequest {
                method: required(KEY_GRPC_METHOD)?,
                service: required(KEY_GRPC_SERVICE)?,
                proto_message: required(KEY_PROTO_MESSAGE)?,
                no_side_effect: flag(KEY_NO_SIDE_EFFECT),
                discoverable: flag(KEY_DISCOVERABLE_TOOL),
                generation_field_mask,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn rpc_request_uses_stable_keys() {
        let annotations = ToolAnnotations::RpcRequest {
            service: "library.v1.LibraryService".into(),
            method: "library.v1.LibraryService.GetBook".into(),
            proto_message: "library.v1.GetBookRequest".into(),
            no_side_effect: true,
            discoverable: false,
            generation_field_mask: None,
        };
        assert_eq!(
            annotations.to_map(),
            map(&[
                ("tool-type", "rpc-request"),
                ("grpc-service", "library.v1.LibraryService"),
                ("grpc-method", "library.v1.LibraryService.GetBook"),
                ("proto-message", "library.v1.GetBookRequest"),
                ("no-side-effect", "true"),
            ])
        );
        assert_eq!(ToolAnnotations::from_map(&annotations.to_map()).unwrap(), annotations);
    }

    #[test]
    fn discovery_is_side_effect_free() {
        assert_eq!(
            ToolAnnotations::Discovery.to_map(),
            map(&[("tool-type", "discovery"), ("no-side-effect", "true")])
        );
    }

    #[test]
    fn empty_annotations_are_rejected() {
        let err = ToolAnnotations::from_map(&BTreeMap::new()).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert_eq!(err.message(), "missing annotations on tool call");
    }

    #[test]
    fn unknown_tool_type_is_rejected() {
        let err = ToolAnnotations::from_map(&map(&[("tool-type", "shell")])).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert!(err.message().contains("shell"));
    }

    #[test]
    fn rpc_request_requires_method_annotations() {
        let err = ToolAnnotations::from_map(&map(&[
            ("tool-type", "rpc-request"),
            ("grpc-service", "library.v1.LibraryService"),
        ]))
        .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert!(err.message().contains("grpc-method"));
    }

    #[test]
    fn generate_message_requires_proto_message() {
        let err = ToolAnnotations::from_map(&map(&[("tool-type", "generate-message")])).unwrap_err();
        assert!(err.message().contains("proto-message"));

        let parsed = ToolAnnotations::from_map(&map(&[
            ("tool-type", "generate-message"),
            ("proto-message", "library.v1.Book"),
            ("generation-field-mask", "title"),
            ("grpc-method", "ignored"),
        ]))
        .unwrap();
        assert_eq!(parsed.proto_message(), Some("library.v1.Book"));
        assert_eq!(parsed.generation_field_mask(), Some("title"));
    }
}
