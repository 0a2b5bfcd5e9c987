pub mod aws;
pub mod client;
pub mod objects;
pub mod operation;
pub mod planes;
pub mod provisioning;
pub mod resources;
pub mod rest;
pub mod store;

pub use client::{GenericResource, ResourcesClient};
pub use objects::{ManagedObject, ObjectKey, ObjectKind, ObjectMeta, ObjectService};
pub use operation::{OperationError, OperationState, OperationStatus, Poller};
pub use planes::{Plane, PlaneService};
pub use provisioning::{ErrorDetails, OperationResult, ProvisioningState};
pub use resources::{ResourceId, ResourceIdError};
pub use store::{Event, MemoryStore, StorageClient, StoreError};
