use chrono::NaiveDate;

use crate::attachments::Attachment;
use crate::models::chat::{ Conversation, Role };

pub const TITLE_MAX_CHARS: usize = 30;
pub const TITLE_KEEP_CHARS: usize = 27;
pub const FALLBACK_TITLE: &str = "File Upload";
pub const NEW_CONVERSATION_TITLE: &str = "New Conversation";

/// Title for a conversation whose first user turn is `text`.
pub fn derive_title(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return FALLBACK_TITLE.to_string();
    }
    if text.chars().count() > TITLE_MAX_CHARS {
        let head: String = text.chars().take(TITLE_KEEP_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// User text followed by one delimited block per attachment.
pub fn compose_user_content(text: &str, attachments: &[Attachment]) -> String {
    let mut content = text.trim().to_string();
    for file in attachments {
        if !content.is_empty() {
            content.push_str("\n\n");
        }
        content.push_str(&format!(
            "--- CONTENT OF FILE: {} ---\n{}\n--- END OF FILE CONTENT ---",
            file.name,
            file.content
        ));
    }
    content
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedTranscript {
    pub file_name: String,
    pub content: String,
}

pub fn sanitize_file_name(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_underscore = false;
    for c in title.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() { "conversation".to_string() } else { trimmed.to_string() }
}

pub fn export_transcript(conversation: &Conversation, date: NaiveDate) -> ExportedTranscript {
    let content = conversation.messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let speaker = if m.role == Role::User { "You" } else { "Assistant" };
            format!("{}: {}", speaker, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    ExportedTranscript {
        file_name: format!("{}_{}.txt", sanitize_file_name(&conversation.title), date.format("%Y-%m-%d")),
        content,
    }
}

/// Reply text with markdown decoration removed, suitable for a speech engine.
pub fn speakable_text(text: &str) -> String {
    let mut lines = Vec::new();
    let mut in_code = false;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_code = !in_code;
            continue;
        }
        if in_code {
            continue;
        }
        let line = trimmed.trim_start_matches('#').trim_start_matches('>').trim_start();
        let line = line
            .strip_prefix("- ")
            .or_else(|| line.strip_prefix("* "))
            .unwrap_or(line);
        lines.push(strip_links(line).replace("**", "").replace("__", "").replace(['`', '*'], ""));
    }
    let cleaned = lines.join("\n");
    cleaned.replace("\n\n\n", "\n\n").trim().to_string()
}

/// `[label](url)` becomes `label`.
fn strip_links(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        match after.find("](") {
            Some(close) if !after[..close].contains('[') => {
                let url_part = &after[close + 2..];
                match url_part.find(')') {
                    Some(end) => {
                        out.push_str(&rest[..open]);
                        out.push_str(&after[..close]);
                        rest = &url_part[end + 1..];
                    }
                    None => {
                        break;
                    }
                }
            }
            _ => {
                out.push_str(&rest[..open + 1]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::ChatMessage;

    #[test]
    fn long_titles_are_truncated() {
        assert_eq!(derive_title("Explain quicksort in detail please"), "Explain quicksort in detail...");
    }

    #[test]
    fn short_titles_are_kept() {
        assert_eq!(derive_title("hi"), "hi");
        let exactly_thirty = "a".repeat(30);
        assert_eq!(derive_title(&exactly_thirty), exactly_thirty);
    }

    #[test]
    fn empty_text_uses_fallback() {
        assert_eq!(derive_title(""), FALLBACK_TITLE);
        assert_eq!(derive_title("   "), FALLBACK_TITLE);
    }

    #[test]
    fn truncation_counts_characters() {
        let title = derive_title(&"é".repeat(40));
        assert_eq!(title.chars().count(), 30);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn file_blocks_are_delimited() {
        let files = vec![Attachment::new("a.txt", "alpha"), Attachment::new("b.rs", "fn main() {}")];
        let content = compose_user_content("look at these", &files);
        assert_eq!(
            content,
            "look at these\n\n--- CONTENT OF FILE: a.txt ---\nalpha\n--- END OF FILE CONTENT ---\n\n--- CONTENT OF FILE: b.rs ---\nfn main() {}\n--- END OF FILE CONTENT ---"
        );
        assert!(compose_user_content("", &files[..1]).starts_with("--- CONTENT OF FILE: a.txt"));
    }

    #[test]
    fn export_skips_system_and_names_file() {
        let mut conversation = Conversation::new("Rust: ownership & borrowing?", vec![
            ChatMessage::system("sys"),
            ChatMessage::user("What is a borrow?"),
            ChatMessage::assistant("A reference.")
        ]);
        conversation.id = "abc".into();
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let export = export_transcript(&conversation, date);
        assert_eq!(export.file_name, "rust_ownership_borrowing_2024-03-09.txt");
        assert_eq!(export.content, "You: What is a borrow?\n\nAssistant: A reference.");
    }

    #[test]
    fn sanitize_falls_back_for_symbols_only() {
        assert_eq!(sanitize_file_name("???"), "conversation");
    }

    #[test]
    fn speakable_strips_markdown() {
        let reply = "# Heading\n\nSome **bold** and `code`.\n\n```rust\nfn x() {}\n```\n- item with [link](https://x.y)\n> quoted";
        assert_eq!(
            speakable_text(reply),
            "Heading\n\nSome bold and code.\n\nitem with link\nquoted"
        );
    }
}
