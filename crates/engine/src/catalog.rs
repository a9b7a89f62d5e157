// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Merged tool catalog.
//!
//! Tools from backend `fs` appear as `fs_<tool>`. The catalog is an immutable
//! snapshot: the engine publishes a new one through an `ArcSwap` on start and
//! after every reload, so readers never observe a torn view.

use std::collections::HashMap;

use assern_core::{Tool, ToolSummary};

/// Separator between backend prefix and original tool name.
const PREFIX_SEPARATOR: char = '_';

/// Route from a prefixed tool name back to its backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRoute {
    pub backend: String,
    pub tool: String,
}

/// Immutable snapshot of the merged catalog.
#[derive(Debug, Default)]
pub struct Catalog {
    tools: Vec<Tool>,
    routes: HashMap<String, ToolRoute>,
}

impl Catalog {
    /// Build a snapshot from per-backend tool lists. Backends are visited in
    /// name order so `tools/list` output is stable across calls.
    pub fn build(mut entries: Vec<(String, Vec<Tool>)>) -> Catalog {
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut tools = Vec::new();
        let mut routes = HashMap::new();
        for (name, backend_tools) in entries {
            for tool in backend_tools {
                let prefixed = format!("{name}{PREFIX_SEPARATOR}{}", tool.name);
                routes.insert(
                    prefixed.clone(),
                    ToolRoute { backend: name.clone(), tool: tool.name.clone() },
                );
                tools.push(Tool { name: prefixed, ..tool });
            }
        }
        Catalog { tools, routes }
    }

    /// Tools under their prefixed names, in backend-name order.
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Resolve a prefixed name to its backend route.
    pub fn resolve(&self, prefixed: &str) -> Option<&ToolRoute> {
        self.routes.get(prefixed)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Summaries for startup logging.
    pub fn summaries(&self) -> Vec<ToolSummary> {
        self.tools
            .iter()
            .map(|tool| {
                let backend = self
                    .routes
                    .get(&tool.name)
                    .map(|route| route.backend.clone())
                    .unwrap_or_default();
                ToolSummary { name: tool.name.clone(), backend }
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
