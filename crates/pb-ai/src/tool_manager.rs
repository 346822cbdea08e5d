//! Service-scoped tool sets with method dispatch.

use std::sync::Arc;
use std::time::Duration;

use pb_core::{Error, Result, Tool, ToolCall, ToolResult};
use pb_reflect::MethodInvoker;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::annotations::ToolAnnotations;
use crate::bridge::{ParsedToolCall, ToolBridge, ToolSetOptions};
use crate::schema_builder::SchemaConfiguration;
use crate::tool_set::ToolSet;

#[derive(Debug, Clone)]
pub struct ToolManagerOptions {
    /// Service full names. Empty selects every exposed service.
    pub services: Vec<String>,
    /// When false every tool is visible from the start and no discovery
    /// tools are offered.
    pub discovery: bool,
    pub schema_configuration: SchemaConfiguration,
    /// Deadline for each method invocation.
    pub timeout: Option<Duration>,
}

impl Default for ToolManagerOptions {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            discovery: true,
            schema_configuration: SchemaConfiguration::default(),
            timeout: None,
        }
    }
}

/// Keeps one tool set per service for the lifetime of the process and
/// executes the calls made against them.
pub struct ToolManager {
    bridge: ToolBridge,
    invoker: Arc<dyn MethodInvoker>,
    tool_sets: RwLock<Vec<ToolSet>>,
    options: ToolManagerOptions,
}

impl ToolManager {
    pub fn new(bridge: ToolBridge, invoker: Arc<dyn MethodInvoker>, options: ToolManagerOptions) -> Result<Self> {
        let services: Vec<String> = if options.services.is_empty() {
            bridge
                .schema()
                .services()
                .map(|service| service.full_name().to_string())
                .collect()
        } else {
            options.services.clone()
        };

        let set_options = ToolSetOptions {
            schema_configuration: options.schema_configuration.clone(),
            ..Default::default()
        };
        let mut tool_sets = Vec::with_capacity(services.len());
        for service in &services {
            let mut set = bridge.create_service_tool_set(service, &set_options)?;
            if !options.discovery {
                set.discover_all();
            }
            tool_sets.push(set);
        }
        info!(services = tool_sets.len(), discovery = options.discovery, "tool manager ready");

        Ok(Self {
            bridge,
            invoker,
            tool_sets: RwLock::new(tool_sets),
            options,
        })
    }

    pub fn bridge(&self) -> &ToolBridge {
        &self.bridge
    }

    pub fn options(&self) -> &ToolManagerOptions {
        &self.options
    }

    /// Discovery tools of sets with something left to discover, then the
    /// discovered tools of every set.
    pub async fn get_tools(&self) -> Vec<Tool> {
        let tool_sets = self.tool_sets.read().await;
        let discovery = tool_sets
            .iter()
            .filter(|set| !set.all_discovered())
            .map(|set| set.discovery_tool.clone());
        let discovered = tool_sets
            .iter()
            .flat_map(|set| set.tools.iter().filter(|tool| set.is_discovered(&tool.name)).cloned());
        discovery.chain(discovered).collect()
    }

    /// A snapshot of the current discovery state.
    pub async fn tool_sets(&self) -> Vec<ToolSet> {
        self.tool_sets.read().await.clone()
    }

    /// Runs one tool call. Invocation failures are returned as they came
    /// from the invoker.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
        if matches!(ToolAnnotations::from_map(&call.annotations), Ok(ToolAnnotations::Discovery)) {
            return self.execute_discovery(call).await;
        }
        let parsed = {
            let tool_sets = self.tool_sets.read().await;
            self.bridge.parse_tool_call(call, &tool_sets)
        };

        match parsed {
            Ok(ParsedToolCall::RpcRequest(rpc)) => {
                let method = self
                    .bridge
                    .schema()
                    .find_method(&rpc.method)
                    .ok_or_else(|| Error::NotFound(format!("method {} not found in schema", rpc.method)))?;
                debug!(method = %rpc.method, "invoking");
                let mut response = self.invoker.invoke(&method, &rpc.request, self.options.timeout).await?;
                if let Some(mask) = &rpc.read_mask {
                    mask.apply(&mut response);
                }
                Ok(ToolResult::content(&call.name, &call.id, response.to_json()))
            }
            Ok(ParsedToolCall::Message(message)) => Ok(ToolResult::content(&call.name, &call.id, message.to_json())),
            Ok(ParsedToolCall::Discovery(_)) => self.execute_discovery(call).await,
            Err(err) => model_result(err),
        }
    }

    /// Parses and applies a discovery call under a single write guard, so
    /// concurrent rediscoveries see each other.
    async fn execute_discovery(&self, call: &ToolCall) -> Result<ToolResult> {
        let mut tool_sets = self.tool_sets.write().await;
        let discovery = match self.bridge.parse_tool_call(call, &tool_sets) {
            Ok(ParsedToolCall::Discovery(discovery)) => discovery,
            Ok(other) => return Err(Error::Internal(format!("expected a discovery call, got {other:?}"))),
            Err(err) => return model_result(err),
        };
        let set = tool_sets
            .iter_mut()
            .find(|set| set.name == discovery.tool_set_name)
            .ok_or_else(|| Error::NotFound(format!("tool set {} not found", discovery.tool_set_name)))?;
        set.discover(&discovery.tool_names)?;
        Ok(ToolResult::content(
            &call.name,
            &call.id,
            json!({
                "tool_set": discovery.tool_set_name,
                "discovered": discovery.tool_names,
            }),
        ))
    }
}

/// A strict rediscovery carries a result meant for the model.
fn model_result(err: Error) -> Result<ToolResult> {
    err.tool_result().cloned().ok_or(err)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::bridge::{BridgeConfig, DiscoveryPolicy};
    use async_trait::async_trait;
    use pb_core::ToolResultContent;
    use pb_reflect::{testing, DynamicMessage, MethodDescriptor, Value};
    use serde_json::Value as Json;

    /// Answers every method with a fixed book and records the requests.
    #[derive(Default)]
    struct FakeInvoker {
        requests: Mutex<Vec<(String, Json)>>,
    }

    #[async_trait]
    impl MethodInvoker for FakeInvoker {
        async fn invoke(
            &self,
            method: &MethodDescriptor,
            request: &DynamicMessage,
            _timeout: Option<Duration>,
        ) -> Result<DynamicMessage> {
            self.requests
                .lock()
                .unwrap()
                .push((method.full_name().to_string(), request.to_json()));
            let mut response = DynamicMessage::new(method.output());
            if response.descriptor().full_name() == "library.v1.Book" {
                response.set_by_name("name", Value::String("shelves/1/books/2".into()))?;
                response.set_by_name("title", Value::String("Dune".into()))?;
                response.set_by_name("isbn", Value::String("9780441013593".into()))?;
            }
            Ok(response)
        }
    }

    struct UnavailableInvoker;

    #[async_trait]
    impl MethodInvoker for UnavailableInvoker {
        async fn invoke(&self, _: &MethodDescriptor, _: &DynamicMessage, _: Option<Duration>) -> Result<DynamicMessage> {
            Err(Error::Unavailable("connection refused".into()))
        }
    }

    fn manager_with(invoker: Arc<dyn MethodInvoker>, options: ToolManagerOptions, config: BridgeConfig) -> ToolManager {
        ToolManager::new(ToolBridge::with_config(testing::library_schema(), config), invoker, options).unwrap()
    }

    fn manager(options: ToolManagerOptions) -> ToolManager {
        manager_with(Arc::new(FakeInvoker::default()), options, BridgeConfig::default())
    }

    async fn call(manager: &ToolManager, name: &str, arguments: Json) -> ToolCall {
        let tools = manager.tool_sets().await;
        let tool = tools
            .iter()
            .flat_map(|set| std::iter::once(&set.discovery_tool).chain(&set.tools))
            .find(|tool| tool.name == name)
            .unwrap();
        let Json::Object(arguments) = arguments else { unreachable!() };
        ToolCall::for_tool(tool, "call-1", arguments)
    }

    fn names(tools: &[Tool]) -> Vec<&str> {
        tools.iter().map(|tool| tool.name.as_str()).collect()
    }

    fn content(result: &ToolResult) -> &Json {
        match &result.result {
            ToolResultContent::Content(json) => json,
            ToolResultContent::Error(message) => panic!("unexpected error result: {message}"),
        }
    }

    #[tokio::test]
    async fn starts_with_only_discovery_tools() {
        let manager = manager(ToolManagerOptions::default());
        assert_eq!(
            names(&manager.get_tools().await),
            ["LibraryService_Discover", "ShelfService_Discover"]
        );
    }

    #[tokio::test]
    async fn discovery_reveals_tools_after_discovery_tools() {
        let manager = manager(ToolManagerOptions::default());
        let discover = call(&manager, "LibraryService_Discover", json!({"tools": ["GetBook"]})).await;
        let result = manager.execute(&discover).await.unwrap();
        assert_eq!(
            content(&result),
            &json!({"tool_set": "library.v1.LibraryService", "discovered": ["GetBook"]})
        );
        assert_eq!(
            names(&manager.get_tools().await),
            ["LibraryService_Discover", "ShelfService_Discover", "GetBook"]
        );
    }

    #[tokio::test]
    async fn undiscovered_tools_cannot_be_called() {
        let manager = manager(ToolManagerOptions::default());
        let get = call(&manager, "GetBook", json!({"name": "shelves/1/books/2"})).await;
        let err = manager.execute(&get).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn method_calls_are_dispatched_and_masked() {
        let invoker = Arc::new(FakeInvoker::default());
        let manager = manager_with(
            invoker.clone(),
            ToolManagerOptions {
                discovery: false,
                schema_configuration: SchemaConfiguration {
                    response_read_mask: true,
                    ..Default::default()
                },
                ..Default::default()
            },
            BridgeConfig::default(),
        );
        assert_eq!(manager.get_tools().await.len(), 7);

        let get = call(
            &manager,
            "GetBook",
            json!({"name": "shelves/1/books/2", "response_read_mask": "title"}),
        )
        .await;
        let result = manager.execute(&get).await.unwrap();
        assert_eq!(content(&result), &json!({"title": "Dune"}));
        assert_eq!(result.tool_call_id, "call-1");
        assert_eq!(
            invoker.requests.lock().unwrap().as_slice(),
            [(
                "library.v1.LibraryService.GetBook".to_string(),
                json!({"name": "shelves/1/books/2"})
            )]
        );
    }

    #[tokio::test]
    async fn invoker_errors_pass_through() {
        let manager = manager_with(
            Arc::new(UnavailableInvoker),
            ToolManagerOptions {
                discovery: false,
                ..Default::default()
            },
            BridgeConfig::default(),
        );
        let get = call(&manager, "GetShelf", json!({"name": "shelves/1"})).await;
        let err = manager.execute(&get).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
        assert_eq!(err.message(), "connection refused");
    }

    #[tokio::test]
    async fn strict_rediscovery_answers_with_an_error_result() {
        let manager = manager_with(
            Arc::new(FakeInvoker::default()),
            ToolManagerOptions::default(),
            BridgeConfig {
                discovery_policy: DiscoveryPolicy::Strict,
                ..Default::default()
            },
        );
        let discover = call(&manager, "ShelfService_Discover", json!({"tools": ["GetShelf"]})).await;
        manager.execute(&discover).await.unwrap();
        let again = manager.execute(&discover).await.unwrap();
        assert!(again.is_error());
        assert_eq!(again.tool_name, "ShelfService_Discover");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_strict_rediscovery_succeeds_once() {
        let manager = Arc::new(manager_with(
            Arc::new(FakeInvoker::default()),
            ToolManagerOptions::default(),
            BridgeConfig {
                discovery_policy: DiscoveryPolicy::Strict,
                ..Default::default()
            },
        ));
        let discover = call(&manager, "LibraryService_Discover", json!({"tools": ["GetBook"]})).await;

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                let discover = discover.clone();
                tokio::spawn(async move { manager.execute(&discover).await.unwrap() })
            })
            .collect();
        let mut successes = 0;
        for task in tasks {
            if !task.await.unwrap().is_error() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn service_filter_limits_tool_sets() {
        let manager = manager(ToolManagerOptions {
            services: vec![testing::SHELF_SERVICE.into()],
            ..Default::default()
        });
        let sets = manager.tool_sets().await;
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].name, testing::SHELF_SERVICE);
    }

    #[test]
    fn unknown_service_fails_construction() {
        let result = ToolManager::new(
            ToolBridge::new(testing::library_schema()),
            Arc::new(FakeInvoker::default()),
            ToolManagerOptions {
                services: vec!["library.v1.Missing".into()],
                ..Default::default()
            },
        );
        assert_eq!(result.err().map(|e| e.code()), Some(tonic::Code::InvalidArgument));
    }
}
