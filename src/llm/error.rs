//! Model-host errors

/// Failure talking to the model host
///
/// This is the only error class allowed to abort an orchestration round.
#[derive(Debug, thiserror::Error)]
pub enum ModelHostError {
    /// Network or transport failure (includes client-side timeouts)
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-success HTTP status (rate limits, overload, bad requests)
    #[error("model host returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ModelHostError {
    /// Whether the host signalled throttling or overload
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ModelHostError::Api { status, .. } if *status == 429 || *status == 529)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_detection() {
        let err = ModelHostError::Api {
            status: 429,
            message: "slow down".to_string(),
        };
        assert!(err.is_rate_limited());
        assert!(err.to_string().contains("429"));

        let err = ModelHostError::Decode("missing content".to_string());
        assert!(!err.is_rate_limited());
    }
}
