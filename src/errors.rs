use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entity kinds that can appear in reference-resolution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum EntityKind {
    Company,
    Customer,
    Product,
    Order,
    OrderItem,
    Invoice,
    InvoiceItem,
    BankDetail,
}

/// Typed errors returned by every engine operation.
///
/// The engine never renders user-facing copy; each variant carries enough
/// structure for the calling layer to map to its own message catalogue.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("validation failed on `{field}`: {reason}")]
    Validation { field: String, reason: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("insufficient stock for product {product_id}")]
    InsufficientStock { product_id: Uuid },

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl ServiceError {
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Optimistic-lock failure: another writer got there first.
    pub fn stale_version(kind: EntityKind, id: Uuid) -> Self {
        Self::Conflict(format!("{kind} {id} was modified concurrently"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_entity_kind() {
        let err = ServiceError::not_found(EntityKind::Customer, Uuid::nil());
        assert!(err.to_string().starts_with("Customer"));
    }

    #[test]
    fn transition_error_carries_both_endpoints() {
        let err = ServiceError::invalid_transition("completed", "draft");
        assert_eq!(
            err.to_string(),
            "invalid status transition completed -> draft"
        );
    }
}
