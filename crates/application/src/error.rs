use domain::{DomainError, RepositoryError};
use thiserror::Error;

/// 实时核心对外暴露的错误分类，每一类对应一个稳定的错误码。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    /// 存储暂时不可用，调用方可以重试
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ApplicationError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// 出站 `error` 事件里携带的错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Persistence(_) => "PERSISTENCE_FAILURE",
        }
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        ApplicationError::Validation(value.to_string())
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => ApplicationError::NotFound("record".into()),
            RepositoryError::Conflict => {
                ApplicationError::Persistence("unexpected unique constraint conflict".into())
            }
            RepositoryError::Storage { message } => ApplicationError::Persistence(message),
        }
    }
}
