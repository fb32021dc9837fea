use thiserror::Error;

/// What went wrong, independent of the human-readable detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    #[error("invalid URL")]
    InvalidUrl,
    #[error("invalid click limit")]
    InvalidLimit,
    #[error("invalid owner identity")]
    InvalidIdentity,
    #[error("link not found")]
    LinkNotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("link expired")]
    LinkExpired,
    #[error("link click limit reached")]
    LinkLimitReached,
    #[error("short code space exhausted")]
    GenerationExhausted,
}

/// Coarse grouping used by the interactive surface to pick a message prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Access,
    NotFound,
    Unavailable,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::InvalidUrl | Self::InvalidLimit | Self::InvalidIdentity => {
                ErrorCategory::Validation
            }
            Self::AccessDenied => ErrorCategory::Access,
            Self::LinkNotFound => ErrorCategory::NotFound,
            Self::LinkExpired | Self::LinkLimitReached => ErrorCategory::Unavailable,
            Self::GenerationExhausted => ErrorCategory::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct LinkError {
    kind: ErrorKind,
    detail: String,
}

impl LinkError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn not_found(code: &str) -> Self {
        Self::new(ErrorKind::LinkNotFound, format!("no live link for code {code}"))
    }
}

pub type LinkResult<T> = Result<T, LinkError>;
