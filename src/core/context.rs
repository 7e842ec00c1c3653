//! Causal error chains tagged with a correlation id.
//!
//! An [`ErrorContext`] is a node holding a message, a correlation id and a
//! timestamp. Every node links to its cause: either an older node or the root
//! [`OrchestratorError`]. The links are owned boxes, so a chain cannot refer
//! back to itself and the root is always reachable.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{FailureClass, OperationError, OrchestratorError};
use crate::util::clock::now_ms;
use crate::util::serde::CorrelationId;

/// What a context node wraps.
#[derive(Debug)]
pub enum ErrorCause {
    /// The original failure.
    Error(OrchestratorError),
    /// An existing chain.
    Context(ErrorContext),
}

impl From<OrchestratorError> for ErrorCause {
    fn from(value: OrchestratorError) -> Self {
        Self::Error(value)
    }
}

impl From<OperationError> for ErrorCause {
    fn from(value: OperationError) -> Self {
        Self::Error(OrchestratorError::OperationFailure(value))
    }
}

impl From<ErrorContext> for ErrorCause {
    fn from(value: ErrorContext) -> Self {
        Self::Context(value)
    }
}

#[derive(Debug, Clone)]
enum Link {
    Root(Arc<OrchestratorError>),
    Node(Box<ErrorContext>),
}

/// One node of a causal error chain.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    message: String,
    correlation_id: CorrelationId,
    timestamp_ms: u128,
    link: Link,
}

impl ErrorContext {
    /// Wrap `cause` with a message, keeping the cause reachable.
    pub fn wrap(
        cause: impl Into<ErrorCause>,
        message: impl Into<String>,
        correlation_id: CorrelationId,
    ) -> Self {
        let link = match cause.into() {
            ErrorCause::Error(err) => Link::Root(Arc::new(err)),
            ErrorCause::Context(ctx) => Link::Node(Box::new(ctx)),
        };
        Self {
            message: message.into(),
            correlation_id,
            timestamp_ms: now_ms(),
            link,
        }
    }

    /// Add another layer using this chain's correlation id.
    #[must_use]
    pub fn context(self, message: impl Into<String>) -> Self {
        let correlation_id = self.correlation_id;
        Self::wrap(self, message, correlation_id)
    }

    /// Message of this node.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Correlation id of this node.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Creation time in milliseconds since the epoch.
    #[must_use]
    pub const fn timestamp_ms(&self) -> u128 {
        self.timestamp_ms
    }

    /// The next older node, if this is not the innermost one.
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        match &self.link {
            Link::Node(node) => Some(node),
            Link::Root(_) => None,
        }
    }

    /// The original failure at the bottom of the chain.
    #[must_use]
    pub fn root_cause(&self) -> &OrchestratorError {
        self.innermost().root_arc()
    }

    /// Shared handle to the original failure.
    #[must_use]
    pub fn root_cause_arc(&self) -> Arc<OrchestratorError> {
        Arc::clone(self.innermost().root_arc())
    }

    /// Nodes from newest to oldest.
    #[must_use]
    pub const fn trace(&self) -> Trace<'_> {
        Trace { next: Some(self) }
    }

    /// Number of context nodes in the chain.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.trace().count()
    }

    /// Single-line rendering: `newest: ...: oldest: root`.
    #[must_use]
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = self.trace().map(|node| node.message.clone()).collect();
        parts.push(self.root_cause().to_string());
        parts.join(": ")
    }

    /// Attribution of the root failure.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self.root_cause() {
            OrchestratorError::OperationFailure(err) => err.class,
            err if err.is_client_error() => FailureClass::Client,
            OrchestratorError::TimedOut { .. }
            | OrchestratorError::AdmissionTimeout { .. }
            | OrchestratorError::Cancelled => FailureClass::Interrupted,
            _ => FailureClass::Server,
        }
    }

    /// Serialisable snapshot of the chain.
    #[must_use]
    pub fn report(&self) -> ErrorReport {
        let root = self.root_cause();
        ErrorReport {
            correlation_id: self.correlation_id,
            messages: self.trace().map(|node| node.message.clone()).collect(),
            root: root.to_string(),
            root_kind: root.kind_name().to_string(),
            class: self.class(),
        }
    }

    fn innermost(&self) -> &Self {
        let mut node = self;
        while let Some(next) = node.cause() {
            node = next;
        }
        node
    }

    fn root_arc(&self) -> &Arc<OrchestratorError> {
        match &self.link {
            Link::Root(root) => root,
            Link::Node(node) => node.innermost().root_arc(),
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ErrorContext {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.link {
            Link::Node(node) => Some(node.as_ref()),
            Link::Root(root) => Some(root.as_ref()),
        }
    }
}

/// Iterator over a chain from newest to oldest node.
pub struct Trace<'a> {
    next: Option<&'a ErrorContext>,
}

impl<'a> Iterator for Trace<'a> {
    type Item = &'a ErrorContext;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.cause();
        Some(current)
    }
}

/// Serialisable view of an error chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Correlation id shared by the chain.
    pub correlation_id: CorrelationId,
    /// Node messages, newest first.
    pub messages: Vec<String>,
    /// Display form of the root failure.
    pub root: String,
    /// Short name of the root failure kind.
    pub root_kind: String,
    /// Attribution of the root failure.
    pub class: FailureClass,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::serde::ResourceKind;
    use std::error::Error as _;
    use std::time::Duration;

    #[test]
    fn nested_wraps_keep_root_cause() {
        let id = CorrelationId::new();
        let inner = ErrorContext::wrap(
            OrchestratorError::PoolTimeout {
                kind: ResourceKind::DbSession,
                waited: Duration::from_millis(10),
            },
            "a",
            id,
        );
        let outer = ErrorContext::wrap(inner, "b", id);

        assert!(matches!(
            outer.root_cause(),
            OrchestratorError::PoolTimeout { kind: ResourceKind::DbSession, .. }
        ));
        let messages: Vec<&str> = outer.trace().map(ErrorContext::message).collect();
        assert_eq!(messages, vec!["b", "a"]);
        assert_eq!(outer.depth(), 2);
    }

    #[test]
    fn source_chain_reaches_root() {
        let id = CorrelationId::new();
        let chain = ErrorContext::wrap(OrchestratorError::Cancelled, "inner", id).context("outer");

        let first = chain.source().expect("inner node");
        assert_eq!(first.to_string(), "inner");
        let root = first.source().expect("root error");
        assert_eq!(root.to_string(), "cancelled");
        assert!(root.source().is_none());
    }

    #[test]
    fn render_and_class() {
        let id = CorrelationId::new();
        let chain = ErrorContext::wrap(OperationError::client("signal `x` not found"), "load", id)
            .context("item 7 failed");
        assert_eq!(
            chain.render(),
            "item 7 failed: load: operation failed: signal `x` not found"
        );
        assert_eq!(chain.class(), FailureClass::Client);
        let report = chain.report();
        assert_eq!(report.root_kind, "operation_failure");
        assert_eq!(report.correlation_id, id);
    }
}
