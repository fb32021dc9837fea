use std::fmt;

use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ErrorKind, LinkError, LinkResult};

pub const SHORT_CODE_LEN: usize = 8;
pub const SHORT_CODE_ALPHABET: &[u8; 62] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShortCodeValidationError {
    #[error("short code must be {SHORT_CODE_LEN} characters, got {len}")]
    InvalidLength { len: usize },
    #[error("short code contains characters outside [0-9a-zA-Z]: {invalid_chars}")]
    InvalidCharacters { invalid_chars: String },
}

/// An 8-character base62 link identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShortCode(String);

impl ShortCode {
    /// # Errors
    /// Will return [`Err`] if `code` is not exactly [`SHORT_CODE_LEN`] base62 characters.
    pub fn new(code: String) -> Result<Self, ShortCodeValidationError> {
        let invalid_chars: String = code
            .chars()
            .filter(|c| !c.is_ascii_alphanumeric())
            .collect();
        if !invalid_chars.is_empty() {
            return Err(ShortCodeValidationError::InvalidCharacters { invalid_chars });
        }
        if code.len() != SHORT_CODE_LEN {
            return Err(ShortCodeValidationError::InvalidLength { len: code.len() });
        }
        Ok(Self(code))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// The full short URL under `base_url`.
    #[must_use]
    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.0)
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored link record. Mutations produce a new value via the `with_*` methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortLink {
    code: ShortCode,
    owner: Uuid,
    original_url: String,
    created_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    max_clicks: u32,
    clicks_used: u32,
    limit_notified: bool,
}

impl ShortLink {
    /// # Errors
    /// Will return [`ErrorKind::InvalidLimit`] if `max_clicks` is zero.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        code: ShortCode,
        owner: Uuid,
        original_url: String,
        created_at: OffsetDateTime,
        expires_at: OffsetDateTime,
        max_clicks: u32,
        clicks_used: u32,
        limit_notified: bool,
    ) -> LinkResult<Self> {
        if max_clicks == 0 {
            return Err(LinkError::new(
                ErrorKind::InvalidLimit,
                "click limit must be greater than zero",
            ));
        }
        Ok(Self {
            code,
            owner,
            original_url,
            created_at,
            expires_at,
            max_clicks,
            clicks_used,
            limit_notified,
        })
    }

    #[must_use]
    pub const fn code(&self) -> &ShortCode {
        &self.code
    }

    #[must_use]
    pub const fn owner(&self) -> Uuid {
        self.owner
    }

    #[must_use]
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    #[must_use]
    pub const fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    #[must_use]
    pub const fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    #[must_use]
    pub const fn max_clicks(&self) -> u32 {
        self.max_clicks
    }

    #[must_use]
    pub const fn clicks_used(&self) -> u32 {
        self.clicks_used
    }

    #[must_use]
    pub const fn limit_notified(&self) -> bool {
        self.limit_notified
    }

    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub const fn is_limit_reached(&self) -> bool {
        self.clicks_used >= self.max_clicks
    }

    #[must_use]
    pub fn with_clicks_used(&self, clicks_used: u32, limit_notified: bool) -> Self {
        Self {
            clicks_used,
            limit_notified,
            ..self.clone()
        }
    }

    /// `max_clicks` must be non-zero; callers validate before calling.
    #[must_use]
    pub fn with_max_clicks(&self, max_clicks: u32) -> Self {
        debug_assert!(max_clicks > 0);
        Self {
            max_clicks,
            ..self.clone()
        }
    }
}
