//! Reconcilers for managed object kinds.
//!
//! Each reconciler compares the desired state of one object with the
//! resource-provider backend and takes one step towards convergence per
//! call: start or resume an operation, poll it once, persist the outcome
//! and return. Long operations finish over several calls via requeue.

pub mod deployment;
pub mod recipe;
mod util;

pub use deployment::DeploymentReconciler;
pub use recipe::RecipeReconciler;

use anyhow::Result;
use async_trait::async_trait;
use meridian_api::{ObjectKey, ObjectKind, OperationResult};

/// Trait for object reconcilers.
///
/// `Err` means the step could not run (storage conflict, network failure)
/// and the key is retried with backoff. Backend operation failures are
/// reported in the returned [`OperationResult`] instead.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Kind of object this reconciler owns.
    fn kind(&self) -> ObjectKind;

    /// Run one reconciliation step for `key`.
    async fn reconcile(&self, key: &ObjectKey) -> Result<OperationResult>;
}
