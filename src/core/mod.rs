//! Core domain models for the research navigator.
//!
//! This module contains the query value type, task descriptions and
//! results, output schemas, and the frozen execution graph.

pub mod dag;
pub mod query;
pub mod schema;
pub mod task;

pub use dag::{TaskGraph, TaskGraphBuilder};
pub use query::Query;
pub use schema::{OutputSchema, RelevancyVerdict, ResearchReport, SearchQueries};
pub use task::{Payload, Role, TaskId, TaskResult, TaskSpec, TaskStatus, ToolRef};
