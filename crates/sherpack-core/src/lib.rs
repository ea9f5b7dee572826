//! Sherpack Core - Shared types for the Sherpack cluster agent
//!
//! This crate provides the foundational types used throughout the agent:
//! - `GroupVersionKind` / `GroupVersionResource`: Kubernetes type coordinates
//! - `Manifest`: A semi-structured resource document with a narrow typed view
//! - `ServiceDescriptor`: Desired-state record mirrored from the control plane
//! - `ComponentAttributes`: Per-resource status reported back to the control plane
//! - `archive`: Tarball extraction for fetched manifest artifacts

pub mod archive;
pub mod component;
pub mod error;
pub mod gvk;
pub mod manifest;
pub mod service;

pub use component::{ComponentAttributes, ComponentState, ErrorSource, ServiceError};
pub use error::{CoreError, Result};
pub use gvk::{GroupVersion, GroupVersionKind, GroupVersionResource};
pub use manifest::{Manifest, ResourceKey};
pub use service::{
    Gate, GateState, GateType, HelmSettings, RendererKind, RendererSpec, Revision,
    ServiceDescriptor,
};
