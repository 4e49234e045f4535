//! Candidate Generator Contract
//!
//! A generator samples one candidate per call. Calls are stochastic, may fail
//! independently, and must be safe to issue concurrently from several tasks.

use crate::core::candidate::{Candidate, Metadata};
use crate::core::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Per-call sampling options
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    /// Sampling temperature
    pub temperature: f64,
    /// 0-based position of this sample within the run
    pub index: usize,
    /// 0-based batch number within the run
    pub batch: usize,
    pub metadata: Metadata,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            index: 0,
            batch: 0,
            metadata: Metadata::new(),
        }
    }
}

/// Errors from a single generation call
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorError {
    /// The generator reported a failure
    Failed {
        message: String,
    },
    /// The call exceeded its per-call timeout
    Timeout {
        limit: Duration,
    },
}

impl GeneratorError {
    pub fn failed(message: impl Into<String>) -> Self {
        GeneratorError::Failed {
            message: message.into(),
        }
    }
}

impl fmt::Display for GeneratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratorError::Failed { message } => write!(f, "generation failed: {}", message),
            GeneratorError::Timeout { limit } => {
                write!(f, "generation timed out after {:?}", limit)
            }
        }
    }
}

impl std::error::Error for GeneratorError {}

/// Produces candidates for a prompt.
pub trait Generator: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        "generator"
    }

    /// Sample one candidate
    fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> BoxFuture<'_, Result<Candidate, GeneratorError>>;
}

/// One scripted behaviour of `MockGenerator`
#[derive(Debug, Clone, PartialEq)]
pub enum MockStep {
    /// Return a candidate with this content
    Answer(String),
    /// Return a generation error
    Fail(String),
    /// Panic inside the generation future
    Panic(String),
}

impl From<&str> for MockStep {
    fn from(answer: &str) -> Self {
        MockStep::Answer(answer.to_string())
    }
}

/// Mock generator for testing
///
/// Cycles through a script of answers, failures and panics. The step is
/// picked by the sample index, so concurrent batches stay deterministic. The
/// call counter is shared between clones.
#[derive(Debug, Clone)]
pub struct MockGenerator {
    script: Vec<MockStep>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MockGenerator {
    /// Create a mock cycling through `responses`
    pub fn new(responses: Vec<String>) -> Self {
        Self::scripted(responses.into_iter().map(MockStep::Answer).collect())
    }

    /// Create a mock cycling through an arbitrary script
    pub fn scripted(script: Vec<MockStep>) -> Self {
        let script = if script.is_empty() {
            vec![MockStep::Fail("empty mock script".to_string())]
        } else {
            script
        };
        Self {
            script,
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    /// Create a mock that always returns the same answer
    pub fn constant(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }

    /// Create a mock whose every call fails
    pub fn failing(message: &str) -> Self {
        Self::scripted(vec![MockStep::Fail(message.to_string())])
    }

    /// Create a mock with biased answers (fraction `p` correct)
    pub fn biased(correct: &str, incorrect: &str, p: f64, total: usize) -> Self {
        let correct_count = ((total as f64 * p).round() as usize).min(total);
        let mut responses = vec![correct.to_string(); correct_count];
        responses.extend(vec![incorrect.to_string(); total - correct_count]);
        Self::new(responses)
    }

    /// Add simulated latency to every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls issued so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Generator for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    fn generate(
        &self,
        _prompt: &str,
        options: &GenerateOptions,
    ) -> BoxFuture<'_, Result<Candidate, GeneratorError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script[options.index % self.script.len()].clone();
        let delay = self.delay;
        let sample = options.index;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            match step {
                MockStep::Answer(content) => {
                    let tokens = content.split_whitespace().count();
                    Ok(Candidate::new(format!("cand-{}", sample), content).with_tokens(tokens))
                }
                MockStep::Fail(message) => Err(GeneratorError::Failed { message }),
                MockStep::Panic(message) => panic!("{}", message),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_constant_mock() {
        let generator = MockGenerator::constant("4");
        let candidate = generator
            .generate("2+2?", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(candidate.content, "4");
        assert_eq!(candidate.id, "cand-0");
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_scripted_mock_cycles() {
        let generator = MockGenerator::scripted(vec!["a".into(), MockStep::Fail("boom".into())]);
        let at = |index| GenerateOptions {
            index,
            ..GenerateOptions::default()
        };
        assert!(generator.generate("p", &at(0)).await.is_ok());
        assert_eq!(
            generator.generate("p", &at(1)).await,
            Err(GeneratorError::failed("boom"))
        );
        let third = generator.generate("p", &at(2)).await.unwrap();
        assert_eq!(third.id, "cand-2");
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_clones_share_counter() {
        let generator = MockGenerator::constant("x");
        let clone = generator.clone();
        clone
            .generate("p", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_delay() {
        let generator = MockGenerator::constant("slow").with_delay(Duration::from_millis(30));
        let start = Instant::now();
        generator
            .generate("p", &GenerateOptions::default())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_biased_mock_counts() {
        let generator = MockGenerator::biased("right", "wrong", 0.8, 10);
        let rights = generator
            .script
            .iter()
            .filter(|s| **s == MockStep::Answer("right".into()))
            .count();
        assert_eq!(rights, 8);
    }
}
