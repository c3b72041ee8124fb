//! Domain models for SpecForge.
//!
//! Canonical definitions for the core entities:
//! - `Blueprint`: the structured build specification
//! - `Artifact` / `ArtifactBag`: generated files, categorized per job
//! - `DomainEvent`: immutable events published on the bus
//! - `ForgeError`: the error taxonomy shared by every component

pub mod artifact;
pub mod blueprint;
pub mod digest;
pub mod error;
pub mod event;

// Re-export main types and errors
pub use artifact::{Artifact, ArtifactBag, ArtifactCategory, GeneratedFile};
pub use blueprint::{
    AuthRole, Blueprint, ComplianceFramework, Entity, Field, FieldType, InfraSize, Integration,
    Page, Relationship, RelationshipKind,
};
pub use error::{ForgeError, Result, ValidationError};
pub use event::{DomainEvent, EventError, EventPayload, EventTypeRegistry};
