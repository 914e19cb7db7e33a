//! Standard node library
//!
//! Built-in executors: input sources, inference service calls and the
//! control-flow primitives (`if`, `loop`, `merge`).

pub mod control;
mod http;
mod input;
mod model;

pub use control::{IfNode, LoopNode, MergeNode, MergeStrategy};
pub use http::ServiceClient;
pub use input::{ImageInputNode, TextInputNode};
pub use model::{DetectNode, OcrNode, ServiceCallNode, VlmNode};
use inferruntime::ExecutorRegistry;

use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut ExecutorRegistry) {
    registry.register(Arc::new(ImageInputNode));
    registry.register(Arc::new(TextInputNode));
    registry.register(Arc::new(DetectNode::new()));
    registry.register(Arc::new(OcrNode::new()));
    registry.register(Arc::new(VlmNode::new()));
    registry.register(Arc::new(ServiceCallNode::new()));
    registry.register(Arc::new(IfNode));
    registry.register(Arc::new(LoopNode));
    registry.register(Arc::new(MergeNode));
}

/// A registry holding every built-in node.
pub fn standard_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    register_all(&mut registry);
    registry
}
