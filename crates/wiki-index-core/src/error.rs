//! Error taxonomy shared by the indexing pipeline and its facades.
//!
//! | Variant | Raised by | Handling |
//! |---------|-----------|----------|
//! | [`Configuration`](IndexError::Configuration) | collection creation, policy edits | fatal, never retried |
//! | [`Retrieval`](IndexError::Retrieval) | document storage collaborator | logged, retried on next notification |
//! | [`Embedding`](IndexError::Embedding) / [`Storage`](IndexError::Storage) / [`Timeout`](IndexError::Timeout) | external capabilities | retried with backoff per document attempt |
//! | [`DuplicateName`](IndexError::DuplicateName) / [`AccessDenied`](IndexError::AccessDenied) | mutating facade calls | returned to the caller |

/// Errors produced by the wiki index.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("retrieval error for {collection}/{document_id}: {reason}")]
    Retrieval {
        collection: String,
        document_id: String,
        reason: String,
    },
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("index store error: {0}")]
    Storage(String),
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("collection already exists: {0}")]
    DuplicateName(String),
    #[error("access denied: {principal} may not {action} on collection {collection}")]
    AccessDenied {
        principal: String,
        action: String,
        collection: String,
    },
    #[error("unknown collection: {0}")]
    CollectionNotFound(String),
    #[error("unknown document {document_id} in collection {collection}")]
    DocumentNotFound {
        collection: String,
        document_id: String,
    },
}

impl IndexError {
    /// Whether a failed pipeline attempt with this error should be retried.
    ///
    /// Only failures of the external capabilities (embedding, index store,
    /// including timeouts) count against the attempt budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexError::Embedding(_)
                | IndexError::Storage(_)
                | IndexError::Timeout { .. }
                | IndexError::DimensionMismatch { .. }
        )
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        IndexError::Storage(err.to_string())
    }

    pub fn embedding(err: impl std::fmt::Display) -> Self {
        IndexError::Embedding(err.to_string())
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
