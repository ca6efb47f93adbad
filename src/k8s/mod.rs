//! Kubernetes API client module
//!
//! Core Kubernetes resource management shared by the scenarios.

pub mod cleanup;
mod client;
#[cfg(test)]
pub mod mock;
pub mod network;
pub mod pod;
pub mod pvc;
pub mod rbac;
pub mod service;

pub use cleanup::CleanupStack;
pub use client::K8sClient;
pub use network::NetworkManager;
pub use pod::{PodManager, PvcPod};
pub use pvc::{PvcBuilder, PvcManager};
pub use rbac::{BindingSubject, RbacManager};
pub use service::ServiceManager;
