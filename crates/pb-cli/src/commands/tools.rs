use anyhow::Result;
use colored::Colorize;
use pb_ai::annotations::KEY_GRPC_METHOD;
use pb_ai::{SchemaConfiguration, ToolBridge};

use super::print_json;
use crate::config::Settings;
use crate::schema;

pub async fn run(settings: &Settings, services: Vec<String>, response_read_mask: bool, json: bool) -> Result<()> {
    let schema = schema::resolve(settings).await?;
    let config = SchemaConfiguration {
        response_read_mask: response_read_mask || settings.schema.response_read_mask,
        ..settings.schema.clone()
    };
    let tools = ToolBridge::new(schema).build_all(&services, &config)?;

    if json {
        return print_json(&tools);
    }

    if tools.is_empty() {
        println!("No tools.");
        return Ok(());
    }
    for tool in &tools {
        let summary = tool.description.lines().next().unwrap_or_default();
        let method = tool.annotations.get(KEY_GRPC_METHOD).map(String::as_str).unwrap_or_default();
        println!("{}  {}", tool.name.bold(), summary);
        println!("  {}", method.dimmed());
    }
    Ok(())
}
