use crate::error::EmbedError;
use crate::traits::{EmbeddingBackend, Sleeper, TokioSleeper};
use async_trait::async_trait;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_PAUSE_EVERY: usize = 300;
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(5);
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1_536;

/// Backoff for throttled embedding calls: `base * 2^attempt` plus a random
/// jitter in `[0, max_jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` (zero based), with the jitter
    /// given as a fraction in `[0, 1)`.
    pub fn delay(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let jitter = self.max_jitter.mul_f64(jitter_fraction.clamp(0.0, 1.0));
        self.base_delay.saturating_mul(factor).saturating_add(jitter)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let fraction: f64 = rand::thread_rng().gen_range(0.0..1.0);
        self.delay(attempt, fraction)
    }
}

/// Batching, pacing and retry around an [`EmbeddingBackend`].
pub struct EmbeddingClient<B, S = TokioSleeper> {
    backend: B,
    sleeper: S,
    model: String,
    batch_size: usize,
    pause_every: usize,
    pause: Duration,
    retry: RetryPolicy,
}

impl<B: EmbeddingBackend> EmbeddingClient<B, TokioSleeper> {
    pub fn new(backend: B, model: impl Into<String>) -> Self {
        Self::with_sleeper(backend, model, TokioSleeper)
    }
}

impl<B: EmbeddingBackend, S: Sleeper> EmbeddingClient<B, S> {
    pub fn with_sleeper(backend: B, model: impl Into<String>, sleeper: S) -> Self {
        Self {
            backend,
            sleeper,
            model: model.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            pause_every: DEFAULT_PAUSE_EVERY,
            pause: DEFAULT_PAUSE,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// A zero `pause_every` disables the pause.
    pub fn with_pause(mut self, pause_every: usize, pause: Duration) -> Self {
        self.pause_every = pause_every;
        self.pause = pause;
        self
    }

    /// At least one attempt is always made.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            max_attempts: retry.max_attempts.max(1),
            ..retry
        };
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embeds `texts` in order. Any batch that cannot be embedded aborts the
    /// whole call and nothing partial is returned.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let total = texts.len();
        let mut vectors = Vec::with_capacity(total);
        let mut start = 0;

        while start < total {
            let end = (start + self.batch_size).min(total);
            let batch = &texts[start..end];
            let embedded = self.embed_batch(batch).await?;
            if embedded.len() != batch.len() {
                return Err(EmbedError::CountMismatch {
                    expected: batch.len(),
                    actual: embedded.len(),
                });
            }
            vectors.extend(embedded);
            debug!(start, end, total, "embedding batch complete");

            if self.pause_every > 0 && end % self.pause_every == 0 && end < total {
                info!(
                    processed = end,
                    total,
                    pause_secs = self.pause.as_secs_f64(),
                    "pausing between embedding batches"
                );
                self.sleeper.sleep(self.pause).await;
            }
            start = end;
        }

        if let Some(first) = vectors.first() {
            let expected = first.len();
            if let Some(bad) = vectors.iter().find(|vector| vector.len() != expected) {
                return Err(EmbedError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }
        }

        Ok(vectors)
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let max_attempts = self.retry.max_attempts;
        for attempt in 0..max_attempts {
            match self.backend.create_embeddings(&self.model, batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(error) if error.is_throttled() => {
                    if attempt + 1 >= max_attempts {
                        break;
                    }
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "embedding request throttled, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }

        Err(EmbedError::RateLimitExceeded {
            attempts: max_attempts,
        })
    }
}

/// Offline backend: hashed character trigrams, L2 normalised.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbeddings {
    pub dimensions: usize,
}

impl Default for HashingEmbeddings {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl HashingEmbeddings {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Counts each lowercase character trigram into a bucket chosen by
    /// its SHA-256 digest, then scales the counts to unit length.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let buckets = self.dimensions.max(1);
        let mut counts = vec![0f32; buckets];
        let chars: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();

        let mut trigram = String::with_capacity(12);
        for window in chars.windows(3) {
            trigram.clear();
            trigram.extend(window);
            counts[bucket_of(&trigram, buckets)] += 1.0;
        }

        let norm = counts.iter().map(|count| count * count).sum::<f32>().sqrt();
        if norm > 0.0 {
            counts.iter_mut().for_each(|count| *count /= norm);
        }
        counts
    }
}

fn bucket_of(trigram: &str, buckets: usize) -> usize {
    let digest = Sha256::digest(trigram.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(prefix) % buckets as u64) as usize
}

#[async_trait]
impl EmbeddingBackend for HashingEmbeddings {
    async fn create_embeddings(
        &self,
        _model: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(inputs.iter().map(|text| self.embed_one(text)).collect())
    }
}
