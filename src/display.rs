//! Plain-text rendering of conversation messages for the terminal

use crate::chat::{Message, MessageStatus, Sender};
use regex::Regex;
use std::sync::LazyLock;

/// Markdown subset the server uses, with the replacement keeping the inner
/// text. Bold runs before italic so `**x**` is not read as two italics.
static MARKDOWN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\*\*\*(.+?)\*\*\*",
        r"\*\*(.+?)\*\*",
        r"`([^`]+?)`",
        r"(?m)(?:^|\B)\*([^*\s][^*]*?)\*",
    ]
    .into_iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Strip inline Markdown markers, keeping the text they wrap
pub fn render_plain(text: &str) -> String {
    MARKDOWN_PATTERNS
        .iter()
        .fold(text.to_string(), |acc, re| re.replace_all(&acc, "$1").into_owned())
}

fn status_marker(status: Option<MessageStatus>) -> &'static str {
    match status {
        Some(MessageStatus::Pending) => "…",
        Some(MessageStatus::Success) => "✓",
        Some(MessageStatus::Error) => "✗",
        None => "•",
    }
}

/// One history entry as printed by the CLI: `[index] HH:MM who: text`
pub fn format_message(index: usize, message: &Message) -> String {
    let time = message
        .timestamp
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());

    let who = match message.sender {
        Sender::User => "You".to_string(),
        Sender::Bot if message.is_status() => format!("Agent {}", status_marker(message.status)),
        Sender::Bot => "Assistant".to_string(),
    };

    let body = if message.text.is_empty() {
        "…".to_string()
    } else {
        render_plain(&message.text)
    };

    let indent = " ".repeat(format!("[{index}] {time} {who}: ").chars().count());
    let mut lines = body.lines();
    let mut out = format!("[{index}] {time} {who}: {}", lines.next().unwrap_or_default());
    for line in lines {
        out.push('\n');
        out.push_str(&indent);
        out.push_str(line);
    }
    out
}
