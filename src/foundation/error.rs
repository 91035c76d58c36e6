pub type OverblitResult<T> = Result<T, OverblitError>;

#[derive(thiserror::Error, Debug)]
pub enum OverblitError {
    /// Bad format, degenerate crop, rejected parameter combination. Non-fatal;
    /// the caller decides between retry-next-frame and cancel.
    #[error("configuration error: {0}")]
    Config(String),

    /// Buffer allocation failed. The affected slot stays Free and retryable.
    #[error("allocation error: {0}")]
    Allocation(String),

    /// No free slot / no queued entry was available in non-blocking mode.
    #[error("exhausted: {0}")]
    Exhausted(String),

    /// A resource-lifecycle invariant was violated (stale job handle, invalid
    /// slot transition). See `foundation::diag` for the production policy.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// The hardware backend refused a submission it had previously accepted.
    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OverblitError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::Exhausted(msg.into())
    }

    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            OverblitError::config("x")
                .to_string()
                .contains("configuration error:")
        );
        assert!(
            OverblitError::allocation("x")
                .to_string()
                .contains("allocation error:")
        );
        assert!(OverblitError::exhausted("x").to_string().contains("exhausted:"));
        assert!(
            OverblitError::lifecycle("x")
                .to_string()
                .contains("lifecycle error:")
        );
        assert!(
            OverblitError::backend("x")
                .to_string()
                .contains("backend error:")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = OverblitError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
