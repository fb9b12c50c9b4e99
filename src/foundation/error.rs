pub type EmojiGridResult<T> = Result<T, EmojiGridError>;

#[derive(thiserror::Error, Debug)]
pub enum EmojiGridError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("media error: {0}")]
    Media(#[from] crate::media::MediaError),

    #[error("render error: {0}")]
    Render(String),

    #[error("platform error: {0}")]
    Platform(#[from] crate::platform::PlatformError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EmojiGridError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    /// Validation failures are reported to the requester verbatim.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            EmojiGridError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            EmojiGridError::render("x")
                .to_string()
                .contains("render error:")
        );
        assert!(
            EmojiGridError::serde("x")
                .to_string()
                .contains("serialization error:")
        );
        assert_eq!(EmojiGridError::Cancelled.to_string(), "operation cancelled");
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = EmojiGridError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn platform_errors_convert() {
        let err: EmojiGridError = crate::platform::PlatformError::StickerSetInvalid.into();
        assert!(err.to_string().starts_with("platform error:"));
        assert!(!err.is_validation());
    }
}
