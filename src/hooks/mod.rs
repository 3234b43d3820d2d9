//! Lifecycle hooks
//!
//! Caller-registered async observers invoked around every mutating
//! repository operation. Events form a closed set; each event has a single
//! payload shape.

mod event;
mod registry;

pub use event::{HookEvent, HookPayload};
pub use registry::{HookFn, HookRegistry};
