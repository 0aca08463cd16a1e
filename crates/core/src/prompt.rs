use crate::chat::ChatMessage;
use crate::models::{RetrievalCandidate, TutorMode};
use tracing::info;

pub const GROUNDED_TUTOR_SYSTEM_PROMPT: &str = "\
You are an Exam Tutor for competitive exams (GATE/UPSC).
Follow these rules strictly:
1) Use the provided SOURCES for facts, formulas, constitutional articles, dates, and definitions.
2) If the SOURCES do not contain the needed information, say you do not have enough information and ask a clarifying question.
3) Do not invent citations. Every factual claim must be supported by a source.
4) Be clear, step-by-step, and exam-oriented. Avoid unnecessary fluff.
5) If the user asks for only the final answer, comply but still remain grounded.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptParts {
    pub system: String,
    pub user: String,
}

/// Budget for retrieved context stuffed into the prompt; essential for
/// small-context local inference servers.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub max_chunks: usize,
    pub max_source_tokens: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_chunks: 4,
            max_source_tokens: 1200,
        }
    }
}

fn mode_hint(mode: TutorMode) -> &'static str {
    match mode {
        TutorMode::Doubt => {
            "Answer as a teacher. Show steps and explain why each step is taken."
        }
        TutorMode::Practice => {
            "Create practice: give a question, then hints, then a full solution. Keep it exam-style."
        }
        TutorMode::Pyq => {
            "Answer like PYQ trainer: show approach, key formula/framework, and a final solution."
        }
    }
}

pub fn style_hint(exam: &str) -> &'static str {
    if exam.starts_with("UPSC") {
        "Write in UPSC style: intro (1-2 lines), body (headings/bullets), conclusion. \
         Use examples and constitutional references when relevant."
    } else {
        "Write in GATE style: define concept, list given/required, show steps with formulas, then final answer. \
         Include common mistakes and quick checks when helpful."
    }
}

fn format_sources(sources: &[RetrievalCandidate]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for candidate in sources {
        let chunk = &candidate.chunk;
        let section_part = chunk
            .section_path
            .as_deref()
            .map(|section| format!(", section={section}"))
            .unwrap_or_default();
        lines.push(format!(
            "[chunk:{}] {} (exam={}, subject={}, topic={}{})",
            chunk.chunk_id(),
            chunk.source_title,
            chunk.exam,
            chunk.subject.as_deref().unwrap_or("-"),
            chunk.topic.as_deref().unwrap_or("-"),
            section_part,
        ));
        lines.push(chunk.content.clone());
        lines.push("---".to_string());
    }
    lines.join("\n").trim().to_string()
}

/// Build a single-turn prompt with grounding and optional conversation
/// memory. Kept structurally simple for compatibility with OpenAI-style
/// servers.
pub fn build_prompt(
    mode: TutorMode,
    exam: &str,
    language: &str,
    question: &str,
    sources: &[RetrievalCandidate],
    memory: Option<&str>,
) -> PromptParts {
    let sources_block = if sources.is_empty() {
        "(no sources retrieved)".to_string()
    } else {
        format_sources(sources)
    };

    let memory_block = memory
        .filter(|block| !block.trim().is_empty())
        .map(|block| format!("\n\nCHAT MEMORY (summary + recent context):\n{block}"))
        .unwrap_or_default();

    let system = format!(
        "{GROUNDED_TUTOR_SYSTEM_PROMPT}\n\nMode instructions: {}\nLanguage: {language}\nTarget exam: {exam}",
        mode_hint(mode),
    );

    let user = format!(
        "SOURCES:\n{sources_block}{memory_block}\n\nUSER QUESTION:\n{question}\n\n\
         RESPONSE REQUIREMENTS:\n\
         - If you use facts/formulas/articles, cite chunk ids like [chunk:123].\n\
         - If sources are insufficient, say so and ask a clarifying question.\n"
    );

    PromptParts { system, user }
}

pub fn to_chat_messages(parts: &PromptParts) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(parts.system.clone()),
        ChatMessage::user(parts.user.clone()),
    ]
}

const TRUNCATION_SUFFIX: &str = "\n\n[TRUNCATED]\n";

/// Cap retrieved context by chunk count and token budget. A too-large head
/// chunk (common with OCR output) is truncated to fit rather than dropped.
pub fn cap_sources(
    chunks: Vec<RetrievalCandidate>,
    config: &PromptConfig,
) -> Vec<RetrievalCandidate> {
    if chunks.is_empty() {
        return chunks;
    }

    let max_chunks = config.max_chunks.max(1);
    let max_tokens = config.max_source_tokens.max(1);
    let total_in = chunks.len();

    let mut capped: Vec<RetrievalCandidate> = Vec::new();
    let mut total = 0usize;

    for mut candidate in chunks {
        if capped.len() >= max_chunks {
            break;
        }
        let remaining = max_tokens.saturating_sub(total);
        if remaining == 0 {
            break;
        }

        let estimate = if candidate.chunk.token_count > 0 {
            candidate.chunk.token_count
        } else {
            (candidate.chunk.content.len() / 4).max(1)
        };

        if estimate <= remaining {
            total += estimate;
            capped.push(candidate);
            continue;
        }

        if capped.is_empty() {
            let max_chars = (remaining * 4).saturating_sub(TRUNCATION_SUFFIX.len()).max(1);
            let cut = floor_char_boundary(&candidate.chunk.content, max_chars);
            let mut truncated = candidate.chunk.content[..cut].trim_end().to_string();
            truncated.push_str(TRUNCATION_SUFFIX);
            candidate.chunk.content = truncated;
            candidate.chunk.token_count = remaining;
            capped.push(candidate);
        }
        break;
    }

    if capped.len() < total_in {
        info!(
            kept = capped.len(),
            dropped = total_in - capped.len(),
            token_budget = max_tokens,
            "prompt sources capped"
        );
    }

    capped
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut cut = index;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkAttributes, ChunkRecord};
    use uuid::Uuid;

    fn candidate(index: usize, content: &str, token_count: usize) -> RetrievalCandidate {
        RetrievalCandidate {
            chunk: ChunkRecord {
                document_id: Uuid::nil(),
                chunk_index: index,
                content: content.to_string(),
                token_count,
                embedding: Vec::new(),
                exam: "GATE_DA".to_string(),
                subject: Some("maths".to_string()),
                topic: None,
                doc_type: None,
                year: None,
                source_title: "Calculus Notes".to_string(),
                section_path: Some("Integrals".to_string()),
                attributes: ChunkAttributes::default(),
                content_hash: format!("hash-{index}"),
            },
            distance: 0.1,
            score: 0.9,
            rerank_score: None,
        }
    }

    #[test]
    fn prompt_includes_sources_mode_and_exam() {
        let sources = vec![candidate(0, "Integration by parts states ...", 30)];
        let parts = build_prompt(
            TutorMode::Doubt,
            "GATE_DA",
            "en",
            "How does integration by parts work?",
            &sources,
            None,
        );
        assert!(parts.system.contains("Target exam: GATE_DA"));
        assert!(parts.system.contains("Answer as a teacher"));
        assert!(parts.user.contains("[chunk:"));
        assert!(parts.user.contains("Integration by parts"));
        assert!(parts.user.contains("section=Integrals"));
    }

    #[test]
    fn empty_sources_render_a_placeholder() {
        let parts = build_prompt(TutorMode::Pyq, "UPSC_GS", "en", "question", &[], None);
        assert!(parts.user.contains("(no sources retrieved)"));
    }

    #[test]
    fn memory_block_is_included_when_present() {
        let parts = build_prompt(
            TutorMode::Doubt,
            "GATE_DA",
            "en",
            "question",
            &[],
            Some("User previously asked about limits."),
        );
        assert!(parts.user.contains("CHAT MEMORY"));
        assert!(parts.user.contains("limits"));
    }

    #[test]
    fn style_hint_differs_by_exam_family() {
        assert!(style_hint("UPSC_GS").contains("UPSC style"));
        assert!(style_hint("GATE_DA").contains("GATE style"));
    }

    #[test]
    fn cap_sources_respects_chunk_count() {
        let chunks = (0..6).map(|i| candidate(i, "text", 10)).collect();
        let capped = cap_sources(
            chunks,
            &PromptConfig {
                max_chunks: 4,
                max_source_tokens: 1000,
            },
        );
        assert_eq!(capped.len(), 4);
    }

    #[test]
    fn cap_sources_respects_token_budget() {
        let chunks = (0..4).map(|i| candidate(i, "text", 100)).collect();
        let capped = cap_sources(
            chunks,
            &PromptConfig {
                max_chunks: 10,
                max_source_tokens: 250,
            },
        );
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn oversized_head_chunk_is_truncated_to_fit() {
        let long_content = "word ".repeat(400);
        let chunks = vec![candidate(0, &long_content, 500)];
        let capped = cap_sources(
            chunks,
            &PromptConfig {
                max_chunks: 4,
                max_source_tokens: 100,
            },
        );
        assert_eq!(capped.len(), 1);
        assert!(capped[0].chunk.content.ends_with(TRUNCATION_SUFFIX));
        assert_eq!(capped[0].chunk.token_count, 100);
        assert!(capped[0].chunk.content.len() <= 100 * 4 + TRUNCATION_SUFFIX.len());
    }

    #[test]
    fn chat_messages_carry_system_then_user() {
        let parts = build_prompt(TutorMode::Doubt, "GATE_DA", "en", "q", &[], None);
        let messages = to_chat_messages(&parts);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
    }
}
