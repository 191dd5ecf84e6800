//! Core types of the cluster exchange
//!
//! This library provides:
//! - ClusterRecord, the read-only registry view of a child cluster
//! - The ClusterRegistry capability, with static and Kubernetes-backed sources
//! - The exchange error taxonomy

pub mod error;
pub mod kube_registry;
pub mod record;
pub mod registry;

pub use error::{ErrorCategory, ExchangeError, Result};
pub use kube_registry::KubeClusterRegistry;
pub use record::ClusterRecord;
pub use registry::{ClusterRegistry, StaticClusterRegistry};
