use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Model selection sent when a conversation is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatModelConfig {
    pub model: String,
    /// Capability switches, e.g. `["deep", "online"]`.
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetaData {
    pub write_code: String,
    pub chat_model_config: ChatModelConfig,
}

/// Body of `POST /ai-search/conversationApi/v1/create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub meta_data: ConversationMetaData,
    pub is_anonymous: bool,
}

impl CreateConversationRequest {
    pub fn new(config: ChatModelConfig) -> Self {
        Self {
            meta_data: ConversationMetaData {
                write_code: String::new(),
                chat_model_config: config,
            },
            is_anonymous: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedConversation {
    pub conversation_id: String,
}

/// Envelope returned by the conversation API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<CreatedConversation>,
    #[serde(default)]
    pub err_code: Option<String>,
    #[serde(default)]
    pub err_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOption {
    /// Always serialized, `null` when unset.
    pub write_code: Option<String>,
    pub search_knowledge: bool,
}

/// Body of `POST /ai-search/chatApi/v1/chat`.
///
/// Field order matters: the request signature is computed over the compact
/// JSON encoding of this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamChatPayload {
    pub role: String,
    pub stream: bool,
    pub bot_code: String,
    /// Comma-joined capability switches.
    pub user_action: String,
    pub model: String,
    pub conversation_id: String,
    pub question: String,
    pub anonymous_key: String,
    pub chat_option: ChatOption,
    pub files: Vec<serde_json::Value>,
    pub status: String,
    pub agent_id: String,
}

impl UpstreamChatPayload {
    pub fn new(model: &str, user_action: String, question: String) -> Self {
        Self {
            role: "user".into(),
            stream: true,
            bot_code: "AI_SEARCH".into(),
            user_action,
            model: model.to_string(),
            conversation_id: String::new(),
            question,
            anonymous_key: String::new(),
            chat_option: ChatOption {
                write_code: None,
                search_knowledge: false,
            },
            files: Vec::new(),
            status: "local".into(),
            agent_id: String::new(),
        }
    }
}

/// JSON carried in one `data:` line of the upstream chat stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamMessage {
    #[serde(default)]
    pub content: Option<String>,
    /// "thinking" | "text" | "card" | ...
    #[serde(default)]
    pub content_type: Option<String>,
    /// Present on error envelopes.
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default, rename = "errMessage")]
    pub err_message: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// ============================================================================
// Search citation cards
// ============================================================================

pub const SEARCH_CARD_TYPE: &str = "DB-CARD-2";
pub const SEARCH_SOURCE_ITEM_TYPE: &str = "2002";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    #[serde(default)]
    pub card_type: String,
    #[serde(default)]
    pub card_info: CardInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardInfo {
    #[serde(default)]
    pub card_items: Vec<CardItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardItem {
    #[serde(default, rename = "type")]
    pub kind: String,
    /// JSON-encoded list of [`SearchSource`] for search items.
    #[serde(default)]
    pub content: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSource {
    /// Number or string depending on upstream version.
    #[serde(default)]
    pub id_index: Option<serde_json::Value>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub site_name: String,
}

impl Card {
    /// Collect the search sources of a `DB-CARD-2` card.
    ///
    /// Returns `None` for other card types or when the embedded source lists
    /// are not valid JSON.
    pub fn search_sources(&self) -> Option<Vec<SearchSource>> {
        if self.card_type != SEARCH_CARD_TYPE {
            return None;
        }
        let mut out = Vec::new();
        for item in &self.card_info.card_items {
            if item.kind != SEARCH_SOURCE_ITEM_TYPE {
                continue;
            }
            let sources: Vec<SearchSource> = serde_json::from_str(&item.content).ok()?;
            out.extend(sources);
        }
        Some(out)
    }
}

impl SearchSource {
    fn index_label(&self) -> String {
        match &self.id_index {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    /// One markdown table row: `| 1 | [name](url) | site |`.
    pub fn table_row(&self) -> String {
        format!(
            "| {} | [{}]({}) | {} |",
            self.index_label(),
            self.name,
            self.url,
            self.site_name
        )
    }
}

/// Render search sources as a markdown reference table.
pub fn render_reference_table(sources: &[SearchSource]) -> Option<String> {
    if sources.is_empty() {
        return None;
    }
    let mut out = String::from("| # | Source | Site |\n| ---- | ---- | ---- |");
    for s in sources {
        out.push('\n');
        out.push_str(&s.table_row());
    }
    Some(out)
}
