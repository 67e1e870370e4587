use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Record kinds that can be missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Item,
    Transaction,
    Requester,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Item => write!(f, "item"),
            Entity::Transaction => write!(f, "transaction"),
            Entity::Requester => write!(f, "requester"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligibility {
    Inactive,
    Delinquent,
}

/// Business rules that rejected a transition.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    #[error("requester is not eligible ({0:?})")]
    RequesterNotEligible(Ineligibility),

    #[error("item is not available")]
    ItemNotAvailable,

    #[error("not enough stock for the requested quantity")]
    InsufficientStock,

    #[error("item still has an ongoing transaction")]
    ItemHasOpenTransaction,

    #[error("items are reserved only by opening a transaction")]
    ReservedByWorkflowOnly,

    #[error("transaction is already closed")]
    TransactionClosed,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(#[from] Precondition),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Internal error")]
    Database(#[from] sqlx::Error),
}

/// Coarse error classes handed to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    InvalidStatus,
    InvalidInput,
    PreconditionFailed,
    Unauthenticated,
    InternalError,
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::InvalidStatus(_) => ErrorCode::InvalidStatus,
            AppError::InvalidInput(_) => ErrorCode::InvalidInput,
            AppError::PreconditionFailed(_) => ErrorCode::PreconditionFailed,
            AppError::Unauthenticated => ErrorCode::Unauthenticated,
            AppError::Database(_) => ErrorCode::InternalError,
        }
    }

    /// Specific reason token, e.g. `ITEM_NOT_AVAILABLE`.
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::NotFound(Entity::Item) => "ITEM_NOT_FOUND",
            AppError::NotFound(Entity::Transaction) => "TRANSACTION_NOT_FOUND",
            AppError::NotFound(Entity::Requester) => "REQUESTER_NOT_FOUND",
            AppError::InvalidStatus(_) => "STATUS_INVALID",
            AppError::InvalidInput(_) => "INPUT_INVALID",
            AppError::PreconditionFailed(p) => match p {
                Precondition::RequesterNotEligible(Ineligibility::Inactive) => {
                    "REQUESTER_NOT_ACTIVE"
                }
                Precondition::RequesterNotEligible(Ineligibility::Delinquent) => {
                    "REQUESTER_DELINQUENT"
                }
                Precondition::ItemNotAvailable => "ITEM_NOT_AVAILABLE",
                Precondition::InsufficientStock => "INSUFFICIENT_STOCK",
                Precondition::ItemHasOpenTransaction => "ITEM_HAS_OPEN_TRANSACTION",
                Precondition::ReservedByWorkflowOnly => "RESERVED_BY_WORKFLOW_ONLY",
                Precondition::TransactionClosed => "TRANSACTION_CLOSED",
            },
            AppError::Unauthenticated => "UNAUTHENTICATED",
            AppError::Database(_) => "INTERNAL_ERROR",
        }
    }

    pub fn precondition(&self) -> Option<Precondition> {
        match self {
            AppError::PreconditionFailed(p) => Some(*p),
            _ => None,
        }
    }
}

/// Structured error returned to callers. Storage details never reach it.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub reason: &'static str,
    pub message: String,
}

impl From<&AppError> for ErrorBody {
    fn from(err: &AppError) -> Self {
        if let AppError::Database(e) = err {
            tracing::error!("Storage failure: {}", e);
        }
        ErrorBody {
            code: err.code(),
            reason: err.reason(),
            message: err.to_string(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
