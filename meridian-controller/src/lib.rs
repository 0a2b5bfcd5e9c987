//! meridian-controller: reconciles managed deployments and recipes against
//! resource-provider backends.

pub mod annotations;
pub mod clients;
pub mod config;
pub mod controller;
pub mod queue;
pub mod reconciler;
pub mod status;

pub use clients::{HttpObjectClient, LocalObjectClient, ObjectClient};
pub use config::{AnnotationKeys, ControllerConfig};
pub use controller::Controller;
pub use reconciler::{DeploymentReconciler, RecipeReconciler, Reconciler};
pub use status::{DeploymentStatus, Phase, RecipeStatus};
