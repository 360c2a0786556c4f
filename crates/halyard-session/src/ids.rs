//! Session id generation.

use std::fmt::Write;

/// Source of candidate session ids.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// 128 random bits as 32 uppercase hex characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> String {
        let bytes: [u8; 16] = rand::random();
        bytes.iter().fold(String::with_capacity(32), |mut out, b| {
            let _ = write!(out, "{b:02X}");
            out
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_shape() {
        let id = RandomIdGenerator.generate();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_distinct() {
        let ids: HashSet<String> = (0..1000).map(|_| RandomIdGenerator.generate()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
