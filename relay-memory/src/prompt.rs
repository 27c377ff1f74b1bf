//! The memory prompt block.
//!
//! Retrieved memory reads as the assistant's own recall, so the block ends
//! with an explicit reminder that this *is* the system's memory rather than
//! external reference material.

use relay_types::{MemoryContext, MemoryEntry};

const SESSION_HEADER: &str = "Current Session Context";
const USER_HEADER: &str = "User History";
const RETRIEVED_HEADER: &str = "Retrieved Information from Previous Conversations";

const CLOSING_REMINDER: &str = "The information above is your memory of this user and your \
prior conversations with them. Treat it as things you know, not as external documents.";

/// Render the structured memory block for the system prompt.
///
/// Empty sections are omitted; an entirely empty memory state renders as
/// an empty string so nothing is injected.
#[must_use]
pub fn render_memory_block(context: &MemoryContext, retrieved: &[MemoryEntry]) -> String {
    let mut sections = Vec::new();

    if !context.session_memory.is_empty() {
        sections.push(render_section(SESSION_HEADER, &context.session_memory));
    }
    if !context.user_memory.is_empty() {
        sections.push(render_section(USER_HEADER, &context.user_memory));
    }
    if !retrieved.is_empty() {
        sections.push(render_section(RETRIEVED_HEADER, retrieved));
    }

    if sections.is_empty() {
        return String::new();
    }
    sections.push(CLOSING_REMINDER.to_string());
    sections.join("\n\n")
}

fn render_section(header: &str, entries: &[MemoryEntry]) -> String {
    let mut lines = vec![format!("### {header}")];
    lines.extend(entries.iter().map(|entry| format!("- {}", entry.content)));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_types::MemoryKind;

    fn entry(kind: MemoryKind, content: &str) -> MemoryEntry {
        MemoryEntry {
            kind,
            content: content.into(),
            timestamp: Utc::now(),
            importance: 0.5,
            keywords: vec![],
            user_id: None,
            session_id: None,
        }
    }

    #[test]
    fn renders_all_sections_with_reminder() {
        let mut context = MemoryContext::default();
        context.session_memory.push(entry(MemoryKind::Session, "asked about billing"));
        context.user_memory.push(entry(MemoryKind::User, "prefers terse answers"));
        let retrieved = [entry(MemoryKind::Semantic, "chose postgres last month")];

        let block = render_memory_block(&context, &retrieved);
        assert!(block.contains("### Current Session Context"));
        assert!(block.contains("### User History"));
        assert!(block.contains("### Retrieved Information from Previous Conversations"));
        assert!(block.contains("- chose postgres last month"));
        assert!(block.ends_with(super::CLOSING_REMINDER));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let context = MemoryContext::default();
        let retrieved = [entry(MemoryKind::Semantic, "one fact")];
        let block = render_memory_block(&context, &retrieved);
        assert!(!block.contains(SESSION_HEADER));
        assert!(!block.contains(USER_HEADER));
        assert!(block.contains(RETRIEVED_HEADER));
    }

    #[test]
    fn fully_empty_memory_renders_nothing() {
        assert_eq!(render_memory_block(&MemoryContext::default(), &[]), "");
    }
}
