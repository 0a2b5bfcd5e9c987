//! Resource identity model.
//!
//! Every request, plane record and reconciliation status refers to resources
//! through a [`ResourceId`]. Identifiers span planes (`/planes/radius/local`),
//! scopes (`resourceGroups/rg1`) and provider-qualified types
//! (`providers/Applications.Core/containers/c1`).

mod id;

pub use id::{ResourceId, ResourceIdError, ScopeSegment, TypeSegment, PLANE_TYPES};
