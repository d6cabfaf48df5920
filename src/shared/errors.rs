use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Not found: {entity} with {field}={value}")]
    NotFound {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl DomainError {
    /// Whether this error is likely transient (e.g. DB connection lost)
    /// and the operation may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::Storage(_))
    }
}

impl From<sea_orm::DbErr> for DomainError {
    fn from(e: sea_orm::DbErr) -> Self {
        DomainError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(e: serde_json::Error) -> Self {
        DomainError::Validation(format!("Serialization error: {}", e))
    }
}

/// Result type for domain operations
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_transient() {
        assert!(DomainError::Storage("locked".into()).is_transient());
        assert!(!DomainError::Validation("bad".into()).is_transient());
    }

    #[test]
    fn not_found_message_names_entity() {
        let err = DomainError::NotFound {
            entity: "Transaction",
            field: "id",
            value: "42".into(),
        };
        assert_eq!(err.to_string(), "Not found: Transaction with id=42");
    }
}
