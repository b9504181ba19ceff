//! # Domain Traits
//!
//! Abstract interfaces for the components the core consumes but does not
//! own. Implementations live in the Infrastructure layer.

use crate::domain::types::{Action, IterationRecord};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Abstract interface for a text-generation backend.
///
/// The core treats this as an opaque capability; it never inspects which
/// implementation is active.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for the given prompt.
    async fn generate(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
        top_p: f64,
    ) -> Result<String, String>;

    /// Generate a completion as a lazy sequence of text chunks.
    /// Backends without native streaming fall back to a single chunk.
    async fn generate_stream(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
        top_p: f64,
    ) -> Result<BoxStream<'static, Result<String, String>>, String> {
        let full = self.generate(prompt, temperature, max_tokens, top_p).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(full) })))
    }

    /// Tokenize the input text. The default is the rough whitespace
    /// approximation used when no real tokenizer is available.
    fn tokenize(&self, text: &str) -> Vec<u32> {
        let approx = text.split_whitespace().count() * 3 / 4;
        vec![0; approx]
    }

    /// Count tokens in the text.
    fn num_tokens(&self, text: &str) -> usize {
        self.tokenize(text).len()
    }
}

/// Decision hook consulted per action in approval mode.
/// Returns true to approve dispatch, false to reject.
pub type ApprovalHook = Box<dyn Fn(&Action) -> bool + Send + Sync>;

/// Observation hook fired after every completed iteration.
pub type IterationHook = Box<dyn Fn(&IterationRecord) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct Echo;

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(
            &self,
            prompt: &str,
            _temperature: f64,
            _max_tokens: u32,
            _top_p: f64,
        ) -> Result<String, String> {
            Ok(prompt.to_string())
        }
    }

    #[tokio::test]
    async fn test_default_stream_is_single_chunk() {
        let chunks: Vec<_> = Echo
            .generate_stream("hello", 0.7, 16, 0.9)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks, vec![Ok("hello".to_string())]);
    }

    #[test]
    fn test_token_approximation() {
        assert_eq!(Echo.num_tokens("one two three four"), 3);
        assert_eq!(Echo.num_tokens(""), 0);
    }
}
