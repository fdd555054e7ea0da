//! org-errors - 统一错误处理
//!
//! 错误只携带字符串，可以克隆给多个等待方

use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn external_service(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// 是否为瞬时错误（可重试）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExternalService(_) | Self::Timeout(_) | Self::Unavailable(_)
        )
    }

    /// 错误类别，用于日志和指标标签
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Internal(_) => "internal",
            Self::ExternalService(_) => "external_service",
            Self::Timeout(_) => "timeout",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(AppError::external_service("store down").is_retryable());
        assert!(AppError::timeout("slow").is_retryable());
        assert!(AppError::unavailable("offline").is_retryable());
        assert!(!AppError::not_found("principal").is_retryable());
        assert!(!AppError::internal("bug").is_retryable());
        assert!(!AppError::validation("bad code").is_retryable());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(AppError::timeout("load took too long").kind(), "timeout");
        assert_eq!(AppError::not_found("principal").kind(), "not_found");
    }

    #[test]
    fn test_clone_preserves_message() {
        let err = AppError::external_service("connection reset");
        assert_eq!(err.clone(), err);
    }
}
