use org_common::PrincipalId;
use org_errors::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Principal not found: {0}")]
    PrincipalNotFound(PrincipalId),
    #[error("Permission load for {principal_id} timed out after {timeout_ms} ms")]
    LoadTimeout {
        principal_id: PrincipalId,
        timeout_ms: u128,
    },
    #[error("Store listener not found: {0}")]
    ListenerNotFound(String),
    #[error("Store error: {0}")]
    Store(String),
}

impl From<AccessError> for AppError {
    fn from(error: AccessError) -> Self {
        match error {
            AccessError::PrincipalNotFound(_) | AccessError::ListenerNotFound(_) => {
                AppError::NotFound(error.to_string())
            }
            AccessError::LoadTimeout { .. } => AppError::Timeout(error.to_string()),
            AccessError::Store(msg) => AppError::ExternalService(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_maps_to_retryable_timeout() {
        let err: AppError = AccessError::LoadTimeout {
            principal_id: PrincipalId::new("u1"),
            timeout_ms: 250,
        }
        .into();
        assert!(matches!(err, AppError::Timeout(_)));
        assert!(err.to_string().contains("u1"));
    }

    #[test]
    fn test_missing_principal_is_not_found() {
        let err: AppError = AccessError::PrincipalNotFound(PrincipalId::new("ghost")).into();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(!err.is_retryable());
    }
}
