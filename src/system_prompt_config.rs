use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// How an injected system prompt combines with the client's own system messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectionMode {
    /// Injected prompt first, client system messages after it.
    #[default]
    Prepend,
    /// Client system messages are discarded.
    Replace,
}

/// System prompt configuration loaded from a JSON file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemPromptConfig {
    /// Prompt applied to every model without a model-specific entry
    #[serde(default)]
    pub global: Option<String>,

    /// Model-specific prompts keyed by public model id
    #[serde(default)]
    pub per_model: HashMap<String, String>,

    #[serde(default)]
    pub injection_mode: InjectionMode,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for SystemPromptConfig {
    fn default() -> Self {
        Self::empty()
    }
}

impl SystemPromptConfig {
    /// Load system prompt configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!(
                "Failed to read system prompt config file: {}",
                path.as_ref().display()
            )
        })?;

        let config: SystemPromptConfig = serde_json::from_str(&content)
            .with_context(|| "Failed to parse system prompt config JSON")?;

        Ok(config)
    }

    /// Prompt for a public model id. Priority: per_model > global.
    pub fn get_prompt(&self, model: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        self.per_model
            .get(model)
            .cloned()
            .or_else(|| self.global.clone())
            .filter(|p| !p.trim().is_empty())
    }

    /// Create a default configuration with no prompts
    pub fn empty() -> Self {
        Self {
            global: None,
            per_model: HashMap::new(),
            injection_mode: InjectionMode::Prepend,
            enabled: true,
        }
    }
}
