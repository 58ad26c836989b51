//! Xelon Cloud Controller Manager
//!
//! Kubernetes cloud controller manager for the Xelon cloud. Exposes
//! `LoadBalancer` services through pre-provisioned Xelon load balancer
//! clusters and initializes nodes from the managed cluster inventory.
//!
//! Service annotations are the only state this controller writes; everything
//! else is re-read from the Xelon API on each reconciliation.

pub mod annotations;
pub mod api;
pub mod cloud;
pub mod config;
pub mod controllers;
pub mod error;
pub mod load_balancer;
pub mod node_cache;
pub mod observability;
pub mod patcher;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, ErrorKind, Result};
