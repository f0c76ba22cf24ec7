//! Research navigator: a dependency-ordered graph of language-model
//! workers that vets a research question, gathers evidence from vector and
//! web search, and synthesizes a cited answer.

pub mod artifacts;
pub mod capability;
pub mod config;
pub mod core;
pub mod error;
pub mod orchestration;
pub mod research;
pub mod telemetry;

pub use capability::{Capabilities, CapabilityError, ModelCapability, RetrievalTool};
pub use core::query::Query;
pub use error::{Error, Result};
pub use orchestration::{run_research, ResearchReply};
