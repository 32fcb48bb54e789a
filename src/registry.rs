//! Static table of the public model ids the relay serves.
//!
//! Capabilities are data: adding a model means adding a row to [`MODEL_TABLE`].

use std::collections::HashMap;

use crate::error::RelayError;
use crate::models::chat::{ModelList, ModelObject};
use crate::models::upstream::ChatModelConfig;
use crate::system_prompt_config::{InjectionMode, SystemPromptConfig};

/// Capability switch for deep-think output.
pub const ACTION_DEEP: &str = "deep";
/// Capability switch for web search.
pub const ACTION_ONLINE: &str = "online";
/// Web search switch the upstream expects for `qwq-plus`.
pub const ACTION_SEARCH: &str = "search";

/// Resolved description of one public model id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub public_id: String,
    pub upstream_id: String,
    pub supports_thinking: bool,
    pub supports_search: bool,
    /// Switch sent when `supports_search` is set.
    pub search_action: &'static str,
    pub injected_system_prompt: Option<String>,
}

impl ModelSpec {
    /// Upstream capability switches in the order the web client sends them.
    pub fn user_actions(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(2);
        if self.supports_thinking {
            out.push(ACTION_DEEP.to_string());
        }
        if self.supports_search {
            out.push(self.search_action.to_string());
        }
        out
    }

    pub fn chat_model_config(&self) -> ChatModelConfig {
        ChatModelConfig {
            model: self.upstream_id.clone(),
            options: self.user_actions(),
        }
    }
}

/// (public id, upstream id, deep-think, web search switch)
pub const MODEL_TABLE: &[(&str, &str, bool, Option<&str>)] = &[
    ("deepseek-r1", "deepseek", true, None),
    ("deepseek-r1-search", "deepseek", true, Some(ACTION_ONLINE)),
    ("deepseek-v3", "deepseek", false, None),
    ("deepseek-v3-search", "deepseek", false, Some(ACTION_ONLINE)),
    ("doubao", "doubao", false, None),
    ("doubao-search", "doubao", false, Some(ACTION_ONLINE)),
    ("doubao-thinking", "doubao-thinking", true, None),
    ("doubao-thinking-search", "doubao-thinking", true, Some(ACTION_ONLINE)),
    ("qwen", "qwen", false, None),
    ("qwen-search", "qwen", false, Some(ACTION_ONLINE)),
    ("qwen-plus", "qwen-plus", false, None),
    ("qwen-plus-search", "qwen-plus", false, Some(ACTION_ONLINE)),
    ("qwq-plus", "qwq-plus", true, None),
    ("qwq-plus-search", "qwq-plus", true, Some(ACTION_SEARCH)),
    ("qwen-long", "qwen-long", false, None),
    ("qwen-long-search", "qwen-long", false, Some(ACTION_ONLINE)),
    ("moonshot-v1-32k", "moonshot", false, None),
    ("moonshot-v1-32k-search", "moonshot", false, Some(ACTION_ONLINE)),
    ("ernie-4.5-turbo-32k", "ernie-4.5-turbo", false, None),
    ("ernie-4.5-turbo-32k-search", "ernie-4.5-turbo", false, Some(ACTION_ONLINE)),
];

/// Read-only lookup from public model id to [`ModelSpec`].
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    specs: HashMap<String, ModelSpec>,
    /// Public ids in table order, for listing.
    order: Vec<String>,
    injection_mode: InjectionMode,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelRegistry {
    /// Registry over [`MODEL_TABLE`] with no injected prompts.
    pub fn builtin() -> Self {
        Self::with_system_prompts(&SystemPromptConfig::empty())
    }

    /// Registry over [`MODEL_TABLE`], attaching injected system prompts from `prompts`.
    pub fn with_system_prompts(prompts: &SystemPromptConfig) -> Self {
        let mut specs = HashMap::with_capacity(MODEL_TABLE.len());
        let mut order = Vec::with_capacity(MODEL_TABLE.len());
        for &(public_id, upstream_id, thinking, search) in MODEL_TABLE {
            specs.insert(
                public_id.to_string(),
                ModelSpec {
                    public_id: public_id.to_string(),
                    upstream_id: upstream_id.to_string(),
                    supports_thinking: thinking,
                    supports_search: search.is_some(),
                    search_action: search.unwrap_or(ACTION_ONLINE),
                    injected_system_prompt: prompts.get_prompt(public_id),
                },
            );
            order.push(public_id.to_string());
        }
        Self {
            specs,
            order,
            injection_mode: prompts.injection_mode,
        }
    }

    /// Look up a public model id.
    pub fn resolve(&self, public_id: &str) -> Result<&ModelSpec, RelayError> {
        self.specs
            .get(public_id)
            .ok_or_else(|| RelayError::UnknownModel(public_id.to_string()))
    }

    pub fn injection_mode(&self) -> InjectionMode {
        self.injection_mode
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelSpec> {
        self.order.iter().filter_map(|id| self.specs.get(id))
    }

    /// OpenAI `GET /v1/models` body.
    pub fn model_list(&self, created: u64) -> ModelList {
        ModelList {
            object: "list".into(),
            data: self
                .iter()
                .map(|spec| ModelObject {
                    id: spec.public_id.clone(),
                    object: "model".into(),
                    created,
                    owned_by: "dangbei".into(),
                })
                .collect(),
        }
    }
}
