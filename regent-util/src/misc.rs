use rand::{distributions::Alphanumeric, thread_rng, Rng};

/// Utility functions for random generation
pub struct RngUtils;

impl RngUtils {
    /// Generate a random token of default length (16 characters)
    pub fn random_token() -> String {
        Self::random_token_with_length(16)
    }

    /// Generate a random token of specified length using alphanumeric characters
    pub fn random_token_with_length(length: usize) -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }

    /// Generate a random u64
    pub fn random_u64() -> u64 {
        thread_rng().gen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_token_default_length() {
        let s = RngUtils::random_token();
        assert_eq!(s.len(), 16);
        assert!(s.chars().all(|c| c.is_alphanumeric()));
    }

    #[test]
    fn test_random_token_custom_length() {
        let s = RngUtils::random_token_with_length(10);
        assert_eq!(s.len(), 10);
        assert!(s.chars().all(|c| c.is_alphanumeric()));
    }

    #[test]
    fn test_tokens_differ() {
        assert_ne!(RngUtils::random_token(), RngUtils::random_token());
    }
}
