//! nudl kube - Kubernetes node access for the labeler
//!
//! This crate implements [`nudl_core::NodeRegistry`] on top of the Kubernetes
//! REST API, using either the in-cluster service account or an explicit API
//! server address.

pub mod client;
pub mod cluster;

pub use client::KubeClient;
pub use cluster::{ClusterConfig, KubeError, DEFAULT_TIMEOUT, SERVICE_ACCOUNT_DIR};
