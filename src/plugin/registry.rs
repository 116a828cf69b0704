//! Plugin registry
//!
//! Ordered list of registered plugins. Writes (register/unregister) are
//! rare and serialized by the lock; dispatch clones the `Arc` list and runs
//! handlers unlocked.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{Result, SlabError};

use super::{ExtensionPoint, HookContext, HookOutcome, PluginDescriptor};

struct PluginEntry {
    descriptor: PluginDescriptor,
    loaded: AtomicBool,
    invocations: AtomicU64,
}

/// Public view of a registered plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub points: Vec<ExtensionPoint>,
    pub loaded: bool,
    pub invocations: u64,
}

/// Net effect of running one extension point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every handler continued (or the point ignores transforms)
    Unchanged,

    /// Value after the last accepted transform
    Transformed(Bytes),
}

impl DispatchOutcome {
    pub fn into_value(self) -> Option<Bytes> {
        match self {
            DispatchOutcome::Unchanged => None,
            DispatchOutcome::Transformed(value) => Some(value),
        }
    }
}

/// Registry of compiled-in plugins
pub struct PluginRegistry {
    entries: RwLock<Vec<Arc<PluginEntry>>>,
    max_plugins: usize,
}

impl PluginRegistry {
    pub fn new(max_plugins: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            max_plugins,
        }
    }

    /// Validate and store a plugin; it runs after every earlier one
    pub fn register(&self, descriptor: PluginDescriptor) -> Result<()> {
        if descriptor.name().trim().is_empty() {
            return Err(SlabError::InvalidPlugin("plugin name is empty".into()));
        }
        if descriptor.version().trim().is_empty() {
            return Err(SlabError::InvalidPlugin(format!(
                "plugin '{}' has no version",
                descriptor.name()
            )));
        }

        let mut entries = self.entries.write();
        if entries
            .iter()
            .any(|e| e.descriptor.name() == descriptor.name())
        {
            return Err(SlabError::DuplicatePlugin(descriptor.name().to_string()));
        }
        if entries.len() >= self.max_plugins {
            return Err(SlabError::CapacityExceeded {
                resource: "plugin registry",
                limit: self.max_plugins,
            });
        }

        tracing::info!(
            name = descriptor.name(),
            version = descriptor.version(),
            points = ?descriptor.points(),
            "plugin registered"
        );
        entries.push(Arc::new(PluginEntry {
            descriptor,
            loaded: AtomicBool::new(true),
            invocations: AtomicU64::new(0),
        }));
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        let mut entries = self.entries.write();
        let position = entries
            .iter()
            .position(|e| e.descriptor.name() == name)
            .ok_or_else(|| SlabError::PluginNotFound(name.to_string()))?;
        entries.remove(position);
        tracing::info!(name, "plugin unregistered");
        Ok(())
    }

    /// Suspend or resume a plugin without losing its position
    pub fn set_loaded(&self, name: &str, loaded: bool) -> Result<()> {
        let entries = self.entries.read();
        let entry = entries
            .iter()
            .find(|e| e.descriptor.name() == name)
            .ok_or_else(|| SlabError::PluginNotFound(name.to_string()))?;
        entry.loaded.store(loaded, Ordering::Release);
        Ok(())
    }

    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.entries
            .read()
            .iter()
            .map(|e| PluginInfo {
                name: e.descriptor.name().to_string(),
                version: e.descriptor.version().to_string(),
                points: e.descriptor.points(),
                loaded: e.loaded.load(Ordering::Acquire),
                invocations: e.invocations.load(Ordering::Relaxed),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Run every loaded handler for `ctx.point` in registration order
    ///
    /// A transform is visible to later handlers through `ctx.value`. At
    /// post-write points the operation already happened, so vetoes and
    /// transforms there are logged and dropped.
    pub fn dispatch(&self, ctx: HookContext<'_>) -> Result<DispatchOutcome> {
        let snapshot: Vec<Arc<PluginEntry>> = {
            let entries = self.entries.read();
            if entries.is_empty() {
                return Ok(DispatchOutcome::Unchanged);
            }
            entries.clone()
        };

        let point = ctx.point;
        let mut current: Option<Bytes> = None;

        for entry in snapshot {
            if !entry.loaded.load(Ordering::Acquire) {
                continue;
            }
            let Some(handler) = entry.descriptor.handler(point) else {
                continue;
            };
            entry.invocations.fetch_add(1, Ordering::Relaxed);

            let view = HookContext {
                point,
                key: ctx.key,
                value: current.as_deref().or(ctx.value),
                txn: ctx.txn,
            };
            match handler(&view) {
                HookOutcome::Continue => {}
                HookOutcome::Veto(reason) if point.accepts_veto() => {
                    tracing::debug!(plugin = entry.descriptor.name(), ?point, %reason, "operation vetoed");
                    return Err(SlabError::Vetoed {
                        plugin: entry.descriptor.name().to_string(),
                        reason,
                    });
                }
                HookOutcome::Transform(value) if point.accepts_transform() => {
                    current = Some(value);
                }
                ignored => {
                    tracing::warn!(
                        plugin = entry.descriptor.name(),
                        ?point,
                        outcome = ?ignored,
                        "hook outcome ignored at this extension point"
                    );
                }
            }
        }

        Ok(match current {
            Some(value) => DispatchOutcome::Transformed(value),
            None => DispatchOutcome::Unchanged,
        })
    }
}
