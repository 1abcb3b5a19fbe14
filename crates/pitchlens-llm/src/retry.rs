use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use pitchlens_core::config::{ModelConfig, RetryConfig};
use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::traits::StructuredExtractor;
use pitchlens_core::types::*;

/// An extractor that retries failed requests and falls back to alternative models.
pub struct RetryingExtractor {
    primary: Box<dyn StructuredExtractor>,
    fallbacks: Vec<(ModelConfig, Box<dyn StructuredExtractor>)>,
    retry_config: RetryConfig,
    retries: AtomicU32,
}

impl RetryingExtractor {
    pub fn new(
        primary: Box<dyn StructuredExtractor>,
        fallbacks: Vec<(ModelConfig, Box<dyn StructuredExtractor>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
            retries: AtomicU32::new(0),
        }
    }

    /// Total retries performed since construction.
    pub fn retry_count(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }
}

fn is_retryable(e: &PitchlensError) -> bool {
    match e {
        PitchlensError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = (config.initial_backoff_ms * 2u64.pow(attempt)).min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl StructuredExtractor for RetryingExtractor {
    fn extract(&self, request: ExtractionRequest) -> BoxFuture<'_, Result<Extraction>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            // Try primary with retries
            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.extract(request.clone()).await {
                    Ok(out) => return Ok(out),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying extraction request"
                            );
                            self.retries.fetch_add(1, Ordering::Relaxed);
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            // Primary exhausted, try fallbacks
            if !self.fallbacks.is_empty() {
                info!("Primary model exhausted, trying fallback models");
            }
            for (fb_config, fb_client) in &self.fallbacks {
                match fb_client.extract(request.clone()).await {
                    Ok(out) => {
                        info!(
                            model = %fb_config.model_id,
                            provider = %fb_config.provider,
                            "Fell back to alternative model"
                        );
                        return Ok(out);
                    }
                    Err(e) => {
                        warn!(
                            model = %fb_config.model_id,
                            error = %e,
                            "Fallback model also failed"
                        );
                        continue;
                    }
                }
            }

            Err(last_err
                .unwrap_or_else(|| PitchlensError::LlmRequest("All providers failed".into())))
        })
    }
}
