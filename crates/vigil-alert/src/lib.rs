//! Core evaluation engine: definitions registry, working memory, rule
//! matching, dampening drive, and alert production.
//!
//! The [`registry::DefinitionsRegistry`] is the mutation surface for
//! triggers, conditions, dampenings, and actions; it enforces the
//! group/member/orphan discipline and the tenant trust boundary, and tells
//! the engine to reload affected triggers. The [`engine::AlertEngine`] holds
//! working memory, matches incoming data against the active condition sets
//! through an indexed scan, and turns satisfied dampenings into alerts.

pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod registry;


pub use config::EngineConfig;
pub use engine::AlertEngine;
pub use error::{DefinitionsError, DefinitionsResult};
pub use matcher::ExternalMatcher;
pub use registry::{DefinitionsRegistry, ListenerId};
