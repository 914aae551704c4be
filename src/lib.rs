//! converge - a declarative reconciliation engine for REST-managed resources.
//!
//! The engine takes a caller-declared desired state and a static, pre-built
//! resource descriptor (produced offline by a separate code-generation
//! stage) and converges the remote resource to match: existence check,
//! idempotent diffing, command planning, execution, and optional polling of
//! asynchronous operations.
//!
//! # Module Structure
//!
//! - [`api`] - HTTP transport (one request in, body + status out)
//! - [`descriptor`] - the static descriptor consumed at run start
//! - [`params`] - the immutable desired-state parameter bag
//! - [`resolver`] - name/UUID -> canonical API reference resolution
//! - [`normalize`] - order-insensitive canonicalization for comparison
//! - [`command`] - atomic mutation units separating planning from execution
//! - [`poller`] - fixed-interval polling to terminal states
//! - [`runner`] - the reconciliation state machines (CRUD and order flavors)

pub mod api;
pub mod command;
pub mod descriptor;
pub mod error;
pub mod normalize;
pub mod params;
pub mod poller;
pub mod resolver;
pub mod runner;

use std::sync::Arc;

pub use api::ApiClient;
pub use descriptor::{ResourceDescriptor, RunnerKind};
pub use error::{Error, Result};
pub use params::RunParams;
pub use runner::{CrudRunner, OrderRunner, RunResult};

/// Perform one reconciliation: build the transport from the parameter bag's
/// `api_url` and `access_token`, pick the runner flavor the descriptor
/// declares, and drive it to completion.
pub async fn reconcile(descriptor: ResourceDescriptor, params: RunParams) -> Result<RunResult> {
    let client = ApiClient::new(params.require_str("api_url")?, params.require_str("access_token")?)?;
    let descriptor = Arc::new(descriptor);

    match descriptor.runner {
        RunnerKind::Crud => CrudRunner::new(client, descriptor, params).run().await,
        RunnerKind::Order => OrderRunner::new(client, descriptor, params).run().await,
    }
}
