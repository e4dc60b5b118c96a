//! Error types for the orderflow engine.
//!
//! Every layer tags the errors it propagates with the name of the operation that
//! failed (`"OrderService.SubmitOrder"`, `"PgStore.CompleteJob"`, ...) instead of
//! replacing the cause, so a failure reads as a chain from the outermost operation
//! down to the root cause.

use crate::config::ConfigurationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderflowError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Invalid expression '{expression}' for key '{key}': {reason}")]
    InvalidExpression {
        key: String,
        expression: String,
        reason: String,
    },
    #[error("Can't evaluate key '{key}' ({expression}): {reason}")]
    EvaluationError {
        key: String,
        expression: String,
        reason: String,
    },
    #[error("Transaction failure: {0}")]
    TransactionFailure(String),
    #[error("Dispatch failure ({destination}): {reason}")]
    DispatchFailure { destination: String, reason: String },
    #[error("No active transaction: {0}")]
    NoActiveTransaction(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Invalid trace token: {0}")]
    InvalidTraceToken(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Scheduler task failed: {0}")]
    SchedulerFailure(String),
    #[error("{op}: {source}")]
    Operation {
        op: &'static str,
        #[source]
        source: Box<OrderflowError>,
    },
}

/// Root-cause classification, independent of how many operation tags wrap it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidExpression,
    EvaluationError,
    TransactionFailure,
    DispatchFailure,
    NoActiveTransaction,
    Database,
    Serialization,
    InvalidTraceToken,
    Configuration,
    Scheduler,
}

impl OrderflowError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        OrderflowError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn no_active_transaction(op: &str) -> Self {
        OrderflowError::NoActiveTransaction(format!("{op} requires an open transaction"))
    }

    /// Prepend an operation tag to this error.
    pub fn with_op(self, op: &'static str) -> Self {
        OrderflowError::Operation {
            op,
            source: Box::new(self),
        }
    }

    /// The innermost error, with all operation tags stripped.
    pub fn root_cause(&self) -> &OrderflowError {
        let mut current = self;
        while let OrderflowError::Operation { source, .. } = current {
            current = source;
        }
        current
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderflowError::NotFound { .. } => ErrorKind::NotFound,
            OrderflowError::InvalidExpression { .. } => ErrorKind::InvalidExpression,
            OrderflowError::EvaluationError { .. } => ErrorKind::EvaluationError,
            OrderflowError::TransactionFailure(_) => ErrorKind::TransactionFailure,
            OrderflowError::DispatchFailure { .. } => ErrorKind::DispatchFailure,
            OrderflowError::NoActiveTransaction(_) => ErrorKind::NoActiveTransaction,
            OrderflowError::DatabaseError(_) => ErrorKind::Database,
            OrderflowError::SerializationError(_) => ErrorKind::Serialization,
            OrderflowError::InvalidTraceToken(_) => ErrorKind::InvalidTraceToken,
            OrderflowError::ConfigurationError(_) => ErrorKind::Configuration,
            OrderflowError::SchedulerFailure(_) => ErrorKind::Scheduler,
            OrderflowError::Operation { source, .. } => source.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Operation tags from outermost to innermost.
    pub fn operations(&self) -> Vec<&'static str> {
        let mut ops = Vec::new();
        let mut current = self;
        while let OrderflowError::Operation { op, source } = current {
            ops.push(*op);
            current = source;
        }
        ops
    }
}

impl From<sqlx::Error> for OrderflowError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => OrderflowError::not_found("row", "<query>"),
            other => OrderflowError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OrderflowError {
    fn from(error: serde_json::Error) -> Self {
        OrderflowError::SerializationError(error.to_string())
    }
}

impl From<ConfigurationError> for OrderflowError {
    fn from(error: ConfigurationError) -> Self {
        OrderflowError::ConfigurationError(error.to_string())
    }
}

impl From<tokio::task::JoinError> for OrderflowError {
    fn from(error: tokio::task::JoinError) -> Self {
        OrderflowError::SchedulerFailure(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrderflowError>;

/// Operation tagging for `Result`s.
pub trait ResultExt<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<OrderflowError>,
{
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|e| e.into().with_op(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_chain_preserves_root_cause() {
        let error = OrderflowError::not_found("process", "p-1")
            .with_op("PgStore.FindProcess")
            .with_op("OrderService.SubmitOrder");

        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert!(error.is_not_found());
        assert_eq!(
            error.operations(),
            vec!["OrderService.SubmitOrder", "PgStore.FindProcess"]
        );
        assert_eq!(
            error.to_string(),
            "OrderService.SubmitOrder: PgStore.FindProcess: process not found: p-1"
        );
    }

    #[test]
    fn test_source_chain_is_walkable() {
        use std::error::Error as _;

        let error = OrderflowError::TransactionFailure("commit failed".to_string())
            .with_op("OrderService.CompleteJob");
        let source = error.source().expect("tagged error has a source");
        assert_eq!(source.to_string(), "Transaction failure: commit failed");
        assert!(source.source().is_none());
    }

    #[test]
    fn test_result_ext_converts_foreign_errors() {
        let parsed: std::result::Result<serde_json::Value, serde_json::Error> =
            serde_json::from_str("{not json");
        let error = parsed.op("Order.ParseBody").unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Serialization);
        assert_eq!(error.operations(), vec!["Order.ParseBody"]);
    }

    #[test]
    fn test_untagged_error_has_no_operations() {
        let error = OrderflowError::no_active_transaction("create_order");
        assert!(error.operations().is_empty());
        assert_eq!(error.kind(), ErrorKind::NoActiveTransaction);
        assert!(!error.is_not_found());
    }
}
