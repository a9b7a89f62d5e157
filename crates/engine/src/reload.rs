// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reload planning.
//!
//! A reload re-reads configuration and computes which backends to start and
//! stop. Backends whose name and config are unchanged keep running; a changed
//! config under the same name is a restart. Only name-level additions and
//! removals count in the result, so `added`/`removed` always equal the
//! symmetric difference of the before/after name sets.

use std::collections::BTreeMap;

use assern_core::BackendConfig;
use serde::{Deserialize, Serialize};

/// Outcome of a reload, returned to the triggering control request and logged
/// for signal-triggered reloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReloadResult {
    pub added: usize,
    pub removed: usize,
    pub errors: Vec<String>,
}

/// What a reload will do, computed before any backend is touched.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ReloadPlan {
    /// Names present only in the new config.
    pub added: Vec<String>,
    /// Names present only in the old config.
    pub removed: Vec<String>,
    /// Names in both whose config changed: stop then start, uncounted.
    pub changed: Vec<String>,
}

impl ReloadPlan {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Diff the running backend set against the freshly loaded config.
pub(crate) fn plan(
    current: &BTreeMap<String, BackendConfig>,
    next: &BTreeMap<String, BackendConfig>,
) -> ReloadPlan {
    let mut result = ReloadPlan::default();

    for (name, config) in next {
        match current.get(name) {
            None => result.added.push(name.clone()),
            Some(existing) if existing != config => result.changed.push(name.clone()),
            Some(_) => {}
        }
    }
    for name in current.keys() {
        if !next.contains_key(name) {
            result.removed.push(name.clone());
        }
    }

    result
}

#[cfg(test)]
#[path = "reload_tests.rs"]
mod tests;
