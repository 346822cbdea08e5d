//! Progressive disclosure of a batch of tools behind one discovery tool.

use std::collections::BTreeMap;

use chrono::Utc;
use pb_core::{DiscoveryCall, Error, Result, Tool, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::info;

/// Argument of a discovery call listing the tools to reveal.
pub const DISCOVERY_TOOLS_FIELD: &str = "tools";

/// A group of tools revealed on demand.
///
/// The set is a plain value: callers keep it with their conversation state
/// and pass it back on every turn. A timestamp of zero means the tool has
/// not been discovered yet. Timestamps only ever move from zero to a value
/// larger than every earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSet {
    pub name: String,
    pub discovery_tool: Tool,
    /// Sorted by (discover timestamp, name).
    pub tools: Vec<Tool>,
    pub discover_timestamps: BTreeMap<String, i64>,
}

impl ToolSet {
    pub fn new(name: impl Into<String>, discovery_tool: Tool, tools: Vec<Tool>) -> Self {
        let discover_timestamps = tools.iter().map(|tool| (tool.name.clone(), 0)).collect();
        let mut set = Self {
            name: name.into(),
            discovery_tool,
            tools,
            discover_timestamps,
        };
        set.sort_tools();
        set
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.discover_timestamps.contains_key(name)
    }

    pub fn is_discovery_tool(&self, name: &str) -> bool {
        self.discovery_tool.name == name
    }

    pub fn is_discovered(&self, name: &str) -> bool {
        self.discover_timestamps.get(name).is_some_and(|ts| *ts != 0)
    }

    pub fn all_discovered(&self) -> bool {
        self.discover_timestamps.values().all(|ts| *ts != 0)
    }

    /// Discovered tools in discovery order, followed by the discovery tool
    /// while anything is left to discover.
    pub fn get_tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .tools
            .iter()
            .filter(|tool| self.is_discovered(&tool.name))
            .cloned()
            .collect();
        if !self.all_discovered() {
            tools.push(self.discovery_tool.clone());
        }
        tools
    }

    /// Reads the requested names from a call to this set's discovery tool and
    /// marks them discovered.
    pub fn process_discovery_tool_call(&mut self, call: &ToolCall) -> Result<DiscoveryCall> {
        if !self.is_discovery_tool(&call.name) {
            return Err(Error::Internal(format!(
                "cannot process non-discovery tool call {:?} in tool set {}",
                call.name, self.name
            )));
        }
        let names = discovery_tool_names(call)?;
        self.discover(&names)?;
        Ok(DiscoveryCall {
            tool_set_name: self.name.clone(),
            tool_names: names,
        })
    }

    /// Marks `names` discovered. Already discovered tools keep their
    /// timestamp. Nothing changes if any name is unknown.
    pub fn discover(&mut self, names: &[String]) -> Result<()> {
        if let Some(unknown) = names.iter().find(|name| !self.has_tool(name)) {
            return Err(Error::NotFound(format!("unknown tool {unknown}")));
        }
        self.mark(names);
        Ok(())
    }

    pub fn discover_all(&mut self) {
        let names: Vec<String> = self.tools.iter().map(|tool| tool.name.clone()).collect();
        self.mark(&names);
    }

    fn mark(&mut self, names: &[String]) {
        let mut newly = Vec::new();
        for name in names {
            if self.is_discovered(name) {
                continue;
            }
            let timestamp = self.next_timestamp();
            self.discover_timestamps.insert(name.clone(), timestamp);
            newly.push(name.as_str());
        }
        if !newly.is_empty() {
            info!(tool_set = %self.name, tools = ?newly, "tools discovered");
            self.sort_tools();
        }
    }

    /// Wall-clock microseconds, bumped past the latest timestamp so that
    /// discovery order is total.
    fn next_timestamp(&self) -> i64 {
        let latest = self.discover_timestamps.values().copied().max().unwrap_or(0);
        Utc::now().timestamp_micros().max(latest.saturating_add(1))
    }

    fn sort_tools(&mut self) {
        let timestamps = &self.discover_timestamps;
        self.tools.sort_by(|a, b| {
            let ta = timestamps.get(&a.name).copied().unwrap_or(0);
            let tb = timestamps.get(&b.name).copied().unwrap_or(0);
            ta.cmp(&tb).then_with(|| a.name.cmp(&b.name))
        });
    }
}

/// The tool names requested by a discovery call.
pub fn discovery_tool_names(call: &ToolCall) -> Result<Vec<String>> {
    let requested = call
        .arguments
        .get(DISCOVERY_TOOLS_FIELD)
        .ok_or_else(|| Error::InvalidArgument("missing tools argument".to_string()))?;
    let Json::Array(items) = requested else {
        return Err(Error::InvalidArgument("tools must be an array".to_string()));
    };
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidArgument("tool name must be a string".to_string()))
        })
        .collect()
}
