pub mod providers;
pub mod retry;

use pitchlens_core::config::ModelConfig;
use pitchlens_core::traits::StructuredExtractor;

pub use providers::openai::OpenAiExtractor;
pub use retry::RetryingExtractor;

/// Create an extractor for the configured provider.
///
/// Every supported provider speaks the OpenAI chat-completions dialect;
/// `base_url` selects Ollama, vLLM, Groq, OpenRouter and friends.
pub fn create_extractor(config: &ModelConfig) -> Box<dyn StructuredExtractor> {
    Box::new(OpenAiExtractor::new(config.clone()))
}

/// Primary extractor wrapped with retry and the given fallbacks.
pub fn create_retrying_extractor(
    primary: &ModelConfig,
    fallbacks: &[ModelConfig],
) -> RetryingExtractor {
    RetryingExtractor::new(
        create_extractor(primary),
        fallbacks
            .iter()
            .map(|fb| (fb.clone(), create_extractor(fb)))
            .collect(),
        primary.retry.clone().unwrap_or_default(),
    )
}
