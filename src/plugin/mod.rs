//! Plugin Module
//!
//! Compiled-in extensions that observe or intercept engine operations.
//!
//! ## Responsibilities
//! - Hold capability tables (extension point → handler) by plugin name
//! - Run handlers in registration order at each extension point
//! - Turn `Veto` into an operation failure and `Transform` into a new value
//!
//! ## Dispatch
//! ```text
//!   put(k, v)
//!     │
//!     ├─► PrePut   [audit] ─► [compress] ─► [quota]     veto / transform
//!     │
//!     ├─► hash index write
//!     │
//!     └─► PostPut  [audit] ─► [compress] ─► [quota]     observe only
//! ```
//!
//! Handlers run on whichever thread serves the operation and never while
//! the registry lock is held, so a handler may call back into the registry.

mod descriptor;
mod registry;

use bytes::Bytes;
use serde::Serialize;

use crate::txn::TxnId;

pub use descriptor::{HookFn, PluginDescriptor};
pub use registry::{DispatchOutcome, PluginInfo, PluginRegistry};

/// Named moments in an operation's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ExtensionPoint {
    PrePut,
    PostPut,
    PreGet,
    PostGet,
    PreDelete,
    PostDelete,
}

impl ExtensionPoint {
    pub const ALL: [ExtensionPoint; 6] = [
        ExtensionPoint::PrePut,
        ExtensionPoint::PostPut,
        ExtensionPoint::PreGet,
        ExtensionPoint::PostGet,
        ExtensionPoint::PreDelete,
        ExtensionPoint::PostDelete,
    ];

    /// Whether a `Transform` returned here replaces the value
    pub fn accepts_transform(self) -> bool {
        matches!(self, ExtensionPoint::PrePut | ExtensionPoint::PostGet)
    }

    /// Whether a `Veto` returned here fails the operation
    pub fn accepts_veto(self) -> bool {
        !matches!(self, ExtensionPoint::PostPut | ExtensionPoint::PostDelete)
    }
}

/// What a handler sees
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub point: ExtensionPoint,
    pub key: &'a [u8],

    /// Value being written (PrePut/PostPut) or read (PostGet)
    pub value: Option<&'a [u8]>,

    /// Transaction the operation belongs to, if any
    pub txn: Option<TxnId>,
}

/// Handler verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    Veto(String),
    Transform(Bytes),
}
