use serde::de::DeserializeOwned;
use serde::Serialize;

/// State threaded through one graph run.
///
/// Each workflow defines its own state struct. The only field the engine
/// knows about is the error slot: once set, it stays set, and every routing
/// decision reads it as "stop".
pub trait RunState: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Current error, if any stage has failed.
    fn error(&self) -> Option<&str>;

    /// Mutable access to the error slot. Write through [`RunState::record_error`].
    fn error_slot(&mut self) -> &mut Option<String>;

    /// Record a failure. The first message wins; returns `false` when an
    /// earlier error is already present.
    fn record_error(&mut self, message: impl Into<String>) -> bool {
        let slot = self.error_slot();
        if slot.is_some() {
            return false;
        }
        *slot = Some(message.into());
        true
    }

    fn has_error(&self) -> bool {
        self.error().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Probe {
        error: Option<String>,
    }

    impl RunState for Probe {
        fn error(&self) -> Option<&str> {
            self.error.as_deref()
        }
        fn error_slot(&mut self) -> &mut Option<String> {
            &mut self.error
        }
    }

    #[test]
    fn first_error_wins() {
        let mut s = Probe::default();
        assert!(!s.has_error());
        assert!(s.record_error("extraction failed"));
        assert!(!s.record_error("scoring failed"));
        assert_eq!(s.error(), Some("extraction failed"));
    }
}
