use vigil_storage::StoreError;

/// Errors surfaced by definitions registry operations.
///
/// `Store` failures abort the operation before any listener notification;
/// the other variants are validation outcomes the caller can act on, raised
/// before anything is written.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionsError {
    #[error("Definitions: {entity} not found [{tenant_id}/{id}]")]
    NotFound {
        entity: &'static str,
        tenant_id: String,
        id: String,
    },

    #[error("Definitions: invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Definitions: illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DefinitionsError {
    pub(crate) fn not_found(entity: &'static str, tenant_id: &str, id: &str) -> Self {
        DefinitionsError::NotFound {
            entity,
            tenant_id: tenant_id.to_string(),
            id: id.to_string(),
        }
    }
}

pub type DefinitionsResult<T> = std::result::Result<T, DefinitionsError>;
