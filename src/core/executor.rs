//! Operation execution and resource provisioning traits.

use async_trait::async_trait;

use crate::core::{Lease, OperationError, TaskContext};
use crate::util::serde::ResourceKind;

/// Source of the external resources a [`ResourcePool`](crate::core::ResourcePool) lends out.
///
/// The persistence layer's session handle and the outbound HTTP client's
/// connection are both exposed through this trait, one [`ResourceKind`] each.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use measurement_orchestrator::core::{OperationError, ResourceFactory};
/// use measurement_orchestrator::util::ResourceKind;
///
/// struct Sessions { url: String }
///
/// #[async_trait]
/// impl ResourceFactory for Sessions {
///     type Resource = DbSession;
///
///     async fn open(&self, kind: ResourceKind) -> Result<DbSession, OperationError> {
///         DbSession::connect(&self.url).await.map_err(|e| OperationError::server("connect").with_source(e))
///     }
/// }
/// ```
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// Resource handed out inside a [`Lease`].
    type Resource: Send + 'static;

    /// Open a new resource of `kind`. Called only when no idle instance is available.
    async fn open(&self, kind: ResourceKind) -> Result<Self::Resource, OperationError>;

    /// Close an idle resource during pool teardown.
    async fn close(&self, _kind: ResourceKind, resource: Self::Resource) {
        drop(resource);
    }
}

/// Executes one operation descriptor with the leases its work item required.
///
/// Implementations must observe `ctx` at their suspension points
/// ([`TaskContext::checkpoint`], [`TaskContext::suspend`]) so that timeouts and
/// cancellation can stop them promptly.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone)]
/// struct Fetch;
///
/// #[async_trait]
/// impl OperationExecutor for Fetch {
///     type Operation = String;
///     type Resource = HttpConnection;
///     type Output = Vec<u8>;
///
///     async fn execute(
///         &self,
///         url: &String,
///         leases: &mut [Lease<HttpConnection>],
///         ctx: TaskContext,
///     ) -> Result<Vec<u8>, OperationError> {
///         let conn = &mut leases[0];
///         ctx.suspend(conn.get(url)).await
///     }
/// }
/// ```
#[async_trait]
pub trait OperationExecutor: Send + Sync + Clone + 'static {
    /// Operation descriptor carried by work items.
    type Operation: Send + Sync + 'static;
    /// Pooled resource type the operation uses.
    type Resource: Send + 'static;
    /// Value produced on success.
    type Output: Send + 'static;

    /// Run `operation`. `leases` follow the order of the work item's required kinds.
    async fn execute(
        &self,
        operation: &Self::Operation,
        leases: &mut [Lease<Self::Resource>],
        ctx: TaskContext,
    ) -> Result<Self::Output, OperationError>;
}
