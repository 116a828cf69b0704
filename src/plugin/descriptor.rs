//! Plugin descriptor
//!
//! The capability table a plugin hands to `register`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{ExtensionPoint, HookContext, HookOutcome};

/// Handler invoked at an extension point
pub type HookFn = Arc<dyn Fn(&HookContext<'_>) -> HookOutcome + Send + Sync>;

/// Name, version and handlers of a plugin
///
/// # Example
///
/// ```
/// use slabkv::plugin::{ExtensionPoint, HookOutcome, PluginDescriptor};
///
/// let audit = PluginDescriptor::new("audit", "1.0")
///     .on(ExtensionPoint::PostPut, |ctx| {
///         println!("wrote {} bytes", ctx.value.map_or(0, |v| v.len()));
///         HookOutcome::Continue
///     });
/// assert_eq!(audit.name(), "audit");
/// ```
#[derive(Clone)]
pub struct PluginDescriptor {
    name: String,
    version: String,
    handlers: BTreeMap<ExtensionPoint, HookFn>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            handlers: BTreeMap::new(),
        }
    }

    /// Install `handler` at `point`, replacing any earlier one
    pub fn on<F>(mut self, point: ExtensionPoint, handler: F) -> Self
    where
        F: Fn(&HookContext<'_>) -> HookOutcome + Send + Sync + 'static,
    {
        self.handlers.insert(point, Arc::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn handler(&self, point: ExtensionPoint) -> Option<&HookFn> {
        self.handlers.get(&point)
    }

    pub fn points(&self) -> Vec<ExtensionPoint> {
        self.handlers.keys().copied().collect()
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("points", &self.points())
            .finish()
    }
}
