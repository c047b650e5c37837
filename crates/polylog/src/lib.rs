//! Replicated multi-writer log
//!
//! Every writer owns an append-only log. Appends are grouped into units that
//! carry the causal heads the author had seen. A replica orders the units of
//! all known writers into one deterministic sequence and hands them, one unit
//! at a time, to an [`Apply`] handler that derives the view.

mod apply;
mod base;
mod error;
mod linearize;
mod node;
mod system;
mod writer;

pub use apply::Apply;
pub use base::Base;
pub use error::{LogError, Result};
pub use node::Node;
pub use system::{System, WriterInfo};
pub use writer::{Head, WriterId};
