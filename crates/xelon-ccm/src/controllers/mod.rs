//! Kubernetes controllers
//!
//! Reconcilers that drive the load balancer orchestrator from Service events
//! and initialize Nodes from the Xelon inventory.

mod context;
mod node;
mod service;

pub use context::Context;
pub use node::NodeController;
pub use service::ServiceController;
