use thiserror::Error;

#[derive(Debug, Error)]
pub enum PitchlensError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    #[error("Structured extraction failed: {0}")]
    Extraction(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Collaborator errors
    #[error("Search failed: {0}")]
    Search(String),

    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    // Stage errors
    #[error("{0}")]
    Precondition(String),

    #[error("{label} failed: {source}")]
    StageFailed {
        label: &'static str,
        #[source]
        source: Box<PitchlensError>,
    },

    // Fan-out errors
    #[error("Task {index} failed: {message}")]
    TaskFailed { index: usize, message: String },

    #[error("Task {index} timed out after {timeout_secs}s")]
    TaskTimedOut { index: usize, timeout_secs: u64 },

    #[error("Task {index} panicked")]
    TaskPanicked { index: usize },

    #[error("Fan-out worker was cancelled")]
    FanOutCancelled,

    // Graph errors
    #[error("Graph configuration error: {0}")]
    GraphConfig(String),

    #[error("Recursion limit of {0} reached without hitting a stop condition")]
    RecursionLimit(usize),

    #[error("Run {0} has no suspended task to resume")]
    NothingToResume(String),

    #[error("Unknown run: {0}")]
    UnknownRun(String),

    #[error("{0}")]
    RunFailed(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PitchlensError {
    /// Label a failure with the step that produced it.
    pub fn stage(label: &'static str, source: PitchlensError) -> Self {
        Self::StageFailed {
            label,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, PitchlensError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_failed_carries_message_verbatim() {
        let err = PitchlensError::RunFailed("Pitch deck analysis failed: boom".into());
        assert_eq!(err.to_string(), "Pitch deck analysis failed: boom");
    }

    #[test]
    fn stage_label_prefixes_message() {
        let err = PitchlensError::stage(
            "Market analysis",
            PitchlensError::Precondition(
                "No pitch deck summary available for market analysis".into(),
            ),
        );
        assert_eq!(
            err.to_string(),
            "Market analysis failed: No pitch deck summary available for market analysis"
        );
    }

    #[test]
    fn task_failure_names_index() {
        let err = PitchlensError::TaskFailed {
            index: 2,
            message: "vision model refused".into(),
        };
        assert_eq!(err.to_string(), "Task 2 failed: vision model refused");
    }
}
