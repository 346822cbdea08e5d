use anyhow::Result;
use pb_ai::{ToolBridge, ToolSetOptions};

use super::print_json;
use crate::config::Settings;
use crate::schema;

/// Prints the tool set as JSON, ready to be passed back to `parse`.
pub async fn run(settings: &Settings, service: String, methods: Vec<String>, discover: Vec<String>) -> Result<()> {
    let schema = schema::resolve(settings).await?;
    let options = ToolSetOptions {
        method_names: methods,
        schema_configuration: settings.schema.clone(),
        ..Default::default()
    };
    let mut tool_set = ToolBridge::new(schema).create_service_tool_set(&service, &options)?;
    if !discover.is_empty() {
        tool_set.discover(&discover)?;
    }
    print_json(&tool_set)
}
