//! Tunables for one resolution run.
//!
//! Builder-style, following the rest of this crate's configuration structs:
//! construct with [`EngineConfig::new`] and chain `with_*` overrides.

/// Configuration for a single [`crate::scheduler::Scheduler::resolve`] call.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many times to re-prompt the adjudicator after a malformed verdict
    /// before synthesizing a default "hesitates" action.
    pub max_parse_retries: u32,
    /// How many previous log entries to include in the adjudicator prompt.
    pub log_window: usize,
    /// Seconds without a turn-update before the resolution is declared stalled.
    pub stall_timeout_secs: u64,
    /// Seconds after which the resolution is force-terminated regardless of progress.
    pub total_timeout_secs: u64,
    /// Model id passed to the LLM client; empty defers to the client's default.
    pub model_id: String,
    pub temperature: Option<f32>,
    pub max_tokens: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parse_retries: 2,
            log_window: 8,
            stall_timeout_secs: 120,
            total_timeout_secs: 300,
            model_id: String::new(),
            temperature: Some(0.7),
            max_tokens: 1024,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_parse_retries(mut self, n: u32) -> Self {
        self.max_parse_retries = n;
        self
    }

    pub fn with_log_window(mut self, n: usize) -> Self {
        self.log_window = n;
        self
    }

    pub fn with_stall_timeout_secs(mut self, secs: u64) -> Self {
        self.stall_timeout_secs = secs;
        self
    }

    pub fn with_total_timeout_secs(mut self, secs: u64) -> Self {
        self.total_timeout_secs = secs;
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}
