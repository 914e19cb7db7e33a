//! Core abstractions for the inference pipeline engine
//!
//! This crate provides the workflow data model, the node executor contract
//! and the error taxonomy shared by the runtime, the built-in nodes and the
//! binaries. It performs no I/O of its own.

pub mod condition;
mod error;
pub mod events;
mod node;
pub mod schema;
mod workflow;

pub use condition::{Condition, Operator};
pub use error::{FlowError, NodeError, WorkflowError};
pub use events::*;
pub use node::{
    run_node, NodeContext, NodeExecutor, NodeKind, NodeOutput, NodeResult, ResolvedService,
    ServiceResolver, SubflowResult, SubflowRunner, UpstreamOutput,
};
pub use schema::{DataType, ParamKind, ParamSpec, PortSpec};
pub use workflow::{
    EdgeSpec, NodeId, NodeSpec, NodeStatus, RunStatus, SkipReason, WorkflowDefinition,
    WorkflowId, WorkflowSettings,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
