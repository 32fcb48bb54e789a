//! Flattening of a multi-turn conversation into the single prompt the upstream accepts.
//!
//! Each turn renders as `"<Role>: <content>"`, turns are joined with `"\n"`,
//! and system turns always come first. When the rendering exceeds the
//! character budget the oldest non-system turns are dropped, then the most
//! recent user turn is cut from its start. Truncation is lossy.

use crate::models::chat::Role;
use crate::util::strip_tagged_blocks;

pub const TURN_DELIMITER: &str = "\n";

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// One role-tagged message as received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Result of [`pack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedContext {
    pub prompt_text: String,
    /// Diagnostics only; never surfaced to the client.
    pub truncated: bool,
    /// Character count of the full rendering before truncation.
    pub original_chars: usize,
    pub dropped_turns: usize,
}

impl PackedContext {
    pub fn chars(&self) -> usize {
        self.prompt_text.chars().count()
    }
}

/// Remove `<think>...</think>` blocks that clients echo back from earlier
/// reasoning output, then trim. An unterminated `<think>` is left as is.
pub fn strip_think_blocks(content: &str) -> String {
    strip_tagged_blocks(content, THINK_OPEN, THINK_CLOSE)
        .trim()
        .to_string()
}

fn label_prefix(role: Role) -> String {
    format!("{}: ", role.label())
}

/// Render a single turn in the upstream's flat representation.
pub fn render_turn(role: Role, content: &str) -> String {
    format!("{}{}", label_prefix(role), content)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn prefix_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn suffix_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

struct Rendered {
    role: Role,
    content: String,
    text: String,
    chars: usize,
}

impl Rendered {
    fn new(role: Role, content: String) -> Self {
        let text = render_turn(role, &content);
        let chars = char_len(&text);
        Self {
            role,
            content,
            text,
            chars,
        }
    }
}

fn joined_len(pieces: &[&Rendered]) -> usize {
    let body: usize = pieces.iter().map(|p| p.chars).sum();
    body + pieces.len().saturating_sub(1) * TURN_DELIMITER.len()
}

fn join(pieces: &[&Rendered]) -> String {
    pieces
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join(TURN_DELIMITER)
}

/// Pack `turns` into one prompt of at most `max_chars` characters.
pub fn pack(turns: &[ConversationTurn], max_chars: usize) -> PackedContext {
    let mut system = Vec::new();
    let mut others = Vec::new();
    for turn in turns {
        let content = strip_think_blocks(&turn.content);
        if content.is_empty() {
            continue;
        }
        let rendered = Rendered::new(turn.role, content);
        if turn.role == Role::System {
            system.push(rendered);
        } else {
            others.push(rendered);
        }
    }

    let all: Vec<&Rendered> = system.iter().chain(others.iter()).collect();
    let original_chars = joined_len(&all);
    if original_chars <= max_chars {
        return PackedContext {
            prompt_text: join(&all),
            truncated: false,
            original_chars,
            dropped_turns: 0,
        };
    }

    let anchor = others
        .iter()
        .rposition(|t| t.role == Role::User)
        .or_else(|| others.len().checked_sub(1));

    // Drop oldest non-anchor turns until the rendering fits.
    let mut keep = vec![true; others.len()];
    let mut total = original_chars;
    let mut dropped_turns = 0;
    for (i, turn) in others.iter().enumerate() {
        if total <= max_chars {
            break;
        }
        if Some(i) == anchor {
            continue;
        }
        keep[i] = false;
        total -= turn.chars + TURN_DELIMITER.len();
        dropped_turns += 1;
    }

    let prompt_text = if total <= max_chars {
        let kept: Vec<&Rendered> = system
            .iter()
            .chain(others.iter().zip(&keep).filter(|(_, k)| **k).map(|(t, _)| t))
            .collect();
        join(&kept)
    } else {
        let sys_refs: Vec<&Rendered> = system.iter().collect();
        let system_text = join(&sys_refs);
        match anchor {
            Some(idx) => cut_anchor(&system_text, &others[idx], max_chars),
            None => prefix_chars(&system_text, max_chars).to_string(),
        }
    };

    tracing::info!(
        original_chars,
        packed_chars = char_len(&prompt_text),
        dropped_turns,
        max_chars,
        "Conversation truncated to fit the character budget"
    );

    PackedContext {
        prompt_text,
        truncated: true,
        original_chars,
        dropped_turns,
    }
}

/// System block plus the anchor turn, with the anchor content cut from its
/// start. The system block stays whole whenever it fits next to the anchor's
/// role label; otherwise it is cut from its end and the anchor keeps up to
/// half of the budget.
fn cut_anchor(system_text: &str, anchor: &Rendered, max_chars: usize) -> String {
    let prefix = label_prefix(anchor.role);
    let prefix_len = char_len(&prefix);
    if max_chars <= prefix_len {
        // Budget smaller than the role label itself.
        return suffix_chars(&anchor.text, max_chars).to_string();
    }
    let content_len = char_len(&anchor.content);
    let system_len = char_len(system_text);
    let sep = if system_len > 0 { TURN_DELIMITER.len() } else { 0 };

    let fixed = system_len + sep + prefix_len;
    let (system_text, keep) = if fixed <= max_chars {
        (system_text, content_len.min(max_chars - fixed))
    } else {
        let keep = content_len.min((max_chars / 2).saturating_sub(prefix_len));
        let system_budget =
            max_chars.saturating_sub(prefix_len + keep + TURN_DELIMITER.len());
        (prefix_chars(system_text, system_budget), keep)
    };

    let tail = suffix_chars(&anchor.content, keep);
    let mut out = String::with_capacity(system_text.len() + prefix.len() + tail.len() + 1);
    out.push_str(system_text);
    if !system_text.is_empty() {
        out.push_str(TURN_DELIMITER);
    }
    out.push_str(&prefix);
    out.push_str(tail);
    out
}
