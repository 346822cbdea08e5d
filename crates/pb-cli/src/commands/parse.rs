use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pb_ai::{ParsedToolCall, ToolBridge, ToolSet};
use pb_core::ToolCall;
use serde_json::{json, Value as Json};

use super::print_json;
use crate::config::Settings;
use crate::schema;

pub async fn run(settings: &Settings, call: PathBuf, tool_sets: Vec<PathBuf>) -> Result<()> {
    let call: ToolCall = serde_json::from_str(&read_input(&call)?).context("failed to parse tool call")?;
    let tool_sets = tool_sets
        .iter()
        .map(|path| {
            let text = read_input(path)?;
            serde_json::from_str::<ToolSet>(&text)
                .with_context(|| format!("failed to parse tool set {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let schema = schema::resolve(settings).await?;
    let parsed = ToolBridge::new(schema).parse_tool_call(&call, &tool_sets)?;
    print_json(&render(&parsed))
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn render(parsed: &ParsedToolCall) -> Json {
    match parsed {
        ParsedToolCall::Discovery(discovery) => json!({ "discovery": discovery }),
        ParsedToolCall::RpcRequest(rpc) => json!({
            "rpc_request": {
                "service": rpc.service,
                "method": rpc.method,
                "request": rpc.request.to_json(),
                "read_mask": rpc.read_mask.as_ref().map(ToString::to_string),
            }
        }),
        ParsedToolCall::Message(message) => json!({ "message": message.to_json() }),
    }
}
