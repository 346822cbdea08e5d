use std::sync::Arc;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use pb_ai::{ToolBridge, ToolManager, ToolManagerOptions};
use pb_core::{ToolCall, ToolResultContent};
use pb_reflect::{GrpcInvoker, ReflectionSource};
use serde_json::{Map, Value as Json};
use tracing::info;

use super::print_json;
use crate::config::Settings;
use crate::schema;

pub async fn run(
    settings: &Settings,
    method: String,
    data: String,
    read_mask: Option<String>,
    target: Option<String>,
) -> Result<()> {
    let (service, method_name) = method
        .rsplit_once('.')
        .with_context(|| format!("invalid method name {method:?}: expected <service>.<method>"))?;
    let Some(target) = target.or_else(|| settings.reflection_url.clone()) else {
        bail!("no target server: pass --target or --reflection-url");
    };

    let mut arguments: Map<String, Json> = serde_json::from_str(&data).context("--data must be a JSON object")?;
    let mut schema_configuration = settings.schema.clone();
    if let Some(mask) = read_mask {
        schema_configuration.response_read_mask = true;
        arguments.insert(pb_ai::schema_builder::RESPONSE_READ_MASK_FIELD.to_string(), Json::String(mask));
    }

    let schema = schema::resolve(settings).await?;
    let channel = ReflectionSource::lazy(&target)?.channel();
    let manager = ToolManager::new(
        ToolBridge::new(schema),
        Arc::new(GrpcInvoker::new(channel)),
        ToolManagerOptions {
            services: vec![service.to_string()],
            discovery: false,
            schema_configuration,
            timeout: settings.timeout,
        },
    )?;

    let tool = manager
        .get_tools()
        .await
        .into_iter()
        .find(|tool| tool.name == method_name)
        .with_context(|| format!("method {method} not found"))?;
    let call = ToolCall::for_tool(&tool, "cli", arguments);

    info!(method = %method, target = %target, "calling method");
    let result = manager.execute(&call).await?;
    info!(method = %method, error = result.is_error(), "call finished");
    match result.result {
        ToolResultContent::Content(content) => print_json(&content),
        ToolResultContent::Error(message) => bail!("{}: {message}", "tool error".red()),
    }
}
