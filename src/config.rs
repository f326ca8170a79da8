use serde::{Deserialize, Serialize};

/// Turn-scoped configuration.
///
/// One instance is attached to every turn; the session shell may rebuild
/// it per message from user settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Model id used for all four LLM calls of the turn.
    pub model: String,

    /// Sampling temperature passed through to every LLM call.
    pub temperature: f32,

    /// Base system prompt. The placeholder `{mcp_tools_list}` is
    /// substituted with the registry's one-line summary at turn start.
    pub system_prompt_template: String,

    /// If false the turn skips the decision step and answers directly
    /// from conversation, files and general knowledge.
    pub tools_enabled: bool,

    /// Bound on refinement cycles. Clamped to at least 1.
    pub max_iterations: usize,

    /// How many trailing history messages enter the conversation context.
    pub max_history_messages: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            model:                  "gpt-oss:20b".to_string(),
            temperature:            0.2,
            system_prompt_template: String::new(),
            tools_enabled:          true,
            max_iterations:         3,
            max_history_messages:   6,
        }
    }
}

impl TurnConfig {
    /// Effective iteration bound — a configured 0 is treated as 1.
    pub fn iteration_bound(&self) -> usize {
        self.max_iterations.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_bound_never_below_one() {
        let mut config = TurnConfig::default();
        config.max_iterations = 0;
        assert_eq!(config.iteration_bound(), 1);
        config.max_iterations = 5;
        assert_eq!(config.iteration_bound(), 5);
    }
}
