use crate::models::ChunkDraft;
use crate::normalize::IMAGE_MARKER;

/// Deterministic token counting, swappable per deployment. Ingestion and any
/// later re-chunking must use the same counter to avoid drift.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Roughly four characters per token, the conservative transformer-family
/// estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            0
        } else {
            (trimmed.chars().count() / 4).max(1)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub max_tokens: usize,
    /// Headings at or below this level are hard chunk boundaries.
    pub parent_section_level: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 900,
            parent_section_level: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BlockKind {
    Heading(usize),
    Paragraph,
    List,
    Table,
    Code,
    Image,
}

#[derive(Debug, Clone)]
struct Block {
    text: String,
    token_count: usize,
    kind: BlockKind,
    section_path: Option<String>,
    parent_section: Option<String>,
}

impl Block {
    fn is_heading(&self) -> bool {
        matches!(self.kind, BlockKind::Heading(_))
    }
}

/// Section-bounded hierarchical chunker for extractor markdown.
///
/// Blocks (headings, paragraphs, lists, tables, fenced code, image markers)
/// are grouped greedily up to `max_tokens`, never across a heading at or
/// below `parent_section_level`. A single block beyond the limit becomes its
/// own chunk, flagged oversize rather than truncated.
pub struct SectionChunker {
    counter: Box<dyn TokenCounter>,
    config: ChunkerConfig,
}

impl SectionChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self::with_counter(Box::new(HeuristicCounter), config)
    }

    pub fn with_counter(counter: Box<dyn TokenCounter>, config: ChunkerConfig) -> Self {
        Self { counter, config }
    }

    pub fn chunk(&self, text: &str) -> Vec<ChunkDraft> {
        let blocks = self.scan_blocks(text);

        let mut drafts: Vec<ChunkDraft> = Vec::new();
        let mut current: Vec<Block> = Vec::new();
        let mut current_tokens = 0usize;

        for block in blocks {
            if let BlockKind::Heading(level) = block.kind {
                if level <= self.config.parent_section_level {
                    self.emit(&mut drafts, &mut current, false);
                    current_tokens = 0;
                }
            }

            if block.token_count > self.config.max_tokens {
                let mut head = take_trailing_headings(&mut current);
                self.emit(&mut drafts, &mut current, false);
                head.push(block);
                self.emit(&mut drafts, &mut head, true);
                current_tokens = 0;
                continue;
            }

            if !current.is_empty() && current_tokens + block.token_count > self.config.max_tokens {
                // Close the chunk, but keep a trailing section title with the
                // body it introduces.
                let carried = take_trailing_headings(&mut current);
                self.emit(&mut drafts, &mut current, false);
                current = carried;
                current_tokens = current.iter().map(|b| b.token_count).sum();
            }

            current_tokens += block.token_count;
            current.push(block);
        }

        self.emit(&mut drafts, &mut current, false);
        drafts
    }

    fn emit(&self, drafts: &mut Vec<ChunkDraft>, current: &mut Vec<Block>, oversize: bool) {
        if current.is_empty() || current.iter().all(Block::is_heading) {
            current.clear();
            return;
        }

        let text = current
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let token_count = current.iter().map(|block| block.token_count).sum();
        let section_path = current.iter().find_map(|block| block.section_path.clone());
        let parent_section = current
            .iter()
            .find_map(|block| block.parent_section.clone());
        current.clear();

        if token_count == 0 {
            return;
        }

        drafts.push(ChunkDraft {
            index: drafts.len(),
            text,
            token_count,
            section_path,
            parent_section,
            oversize,
        });
    }

    fn scan_blocks(&self, text: &str) -> Vec<Block> {
        let lines: Vec<&str> = text.lines().collect();
        let mut blocks: Vec<Block> = Vec::new();
        let mut paragraph: Vec<&str> = Vec::new();
        let mut stack: Vec<(usize, String)> = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let line = lines[i];
            let stripped = line.trim();

            if stripped.is_empty() {
                self.flush_paragraph(&mut blocks, &stack, &mut paragraph);
                i += 1;
                continue;
            }

            if let Some((level, title)) = parse_heading(line) {
                self.flush_paragraph(&mut blocks, &stack, &mut paragraph);
                while stack.last().is_some_and(|(existing, _)| *existing >= level) {
                    stack.pop();
                }
                stack.push((level, title));
                self.push_block(
                    &mut blocks,
                    &stack,
                    stripped.to_string(),
                    BlockKind::Heading(level),
                );
                i += 1;
                continue;
            }

            if stripped == IMAGE_MARKER {
                self.flush_paragraph(&mut blocks, &stack, &mut paragraph);
                self.push_block(&mut blocks, &stack, IMAGE_MARKER.to_string(), BlockKind::Image);
                i += 1;
                continue;
            }

            if stripped.starts_with("```") || stripped.starts_with("~~~") {
                self.flush_paragraph(&mut blocks, &stack, &mut paragraph);
                let fence = &stripped[..3];
                let mut code_lines = vec![line];
                i += 1;
                while i < lines.len() {
                    code_lines.push(lines[i]);
                    if lines[i].trim().starts_with(fence) {
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                self.push_block(
                    &mut blocks,
                    &stack,
                    code_lines.join("\n").trim().to_string(),
                    BlockKind::Code,
                );
                continue;
            }

            if stripped.starts_with('|') && i + 1 < lines.len() {
                let next = lines[i + 1].trim();
                if next.starts_with('|') && next.contains("---") {
                    self.flush_paragraph(&mut blocks, &stack, &mut paragraph);
                    let mut table_lines = vec![lines[i], lines[i + 1]];
                    i += 2;
                    while i < lines.len() && lines[i].trim().starts_with('|') {
                        table_lines.push(lines[i]);
                        i += 1;
                    }
                    self.push_block(
                        &mut blocks,
                        &stack,
                        table_lines.join("\n").trim().to_string(),
                        BlockKind::Table,
                    );
                    continue;
                }
            }

            if is_list_line(stripped) {
                self.flush_paragraph(&mut blocks, &stack, &mut paragraph);
                let mut list_lines = vec![line];
                i += 1;
                while i < lines.len() {
                    let next = lines[i];
                    if next.trim().is_empty() {
                        break;
                    }
                    if next.starts_with(' ') || next.starts_with('\t') || is_list_line(next.trim())
                    {
                        list_lines.push(next);
                        i += 1;
                        continue;
                    }
                    break;
                }
                self.push_block(
                    &mut blocks,
                    &stack,
                    list_lines.join("\n").trim().to_string(),
                    BlockKind::List,
                );
                continue;
            }

            paragraph.push(line);
            i += 1;
        }

        self.flush_paragraph(&mut blocks, &stack, &mut paragraph);
        blocks
    }

    fn flush_paragraph(
        &self,
        blocks: &mut Vec<Block>,
        stack: &[(usize, String)],
        paragraph: &mut Vec<&str>,
    ) {
        if paragraph.is_empty() {
            return;
        }
        let text = paragraph.join("\n").trim().to_string();
        paragraph.clear();
        if !text.is_empty() {
            self.push_block(blocks, stack, text, BlockKind::Paragraph);
        }
    }

    fn push_block(
        &self,
        blocks: &mut Vec<Block>,
        stack: &[(usize, String)],
        text: String,
        kind: BlockKind,
    ) {
        let token_count = if kind == BlockKind::Image {
            1
        } else {
            self.counter.count(&text)
        };
        blocks.push(Block {
            text,
            token_count,
            kind,
            section_path: section_path(stack),
            parent_section: parent_section(stack, self.config.parent_section_level),
        });
    }
}

fn take_trailing_headings(current: &mut Vec<Block>) -> Vec<Block> {
    let mut tail: Vec<Block> = Vec::new();
    while current.last().is_some_and(Block::is_heading) {
        if let Some(block) = current.pop() {
            tail.push(block);
        }
    }
    tail.reverse();
    tail
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    let title = rest.trim().to_string();
    if title.is_empty() {
        return None;
    }
    Some((hashes, title))
}

pub(crate) fn is_list_line(line: &str) -> bool {
    let s = line.trim_start();
    if s.starts_with("- ") || s.starts_with("* ") || s.starts_with("+ ") {
        return true;
    }
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && s[digits..].starts_with(". ")
}

fn section_path(stack: &[(usize, String)]) -> Option<String> {
    if stack.is_empty() {
        return None;
    }
    Some(
        stack
            .iter()
            .map(|(_, title)| title.as_str())
            .collect::<Vec<_>>()
            .join(" > "),
    )
}

fn parent_section(stack: &[(usize, String)], parent_level: usize) -> Option<String> {
    if stack.is_empty() {
        return None;
    }
    let kept: Vec<&str> = stack
        .iter()
        .filter(|(level, _)| *level <= parent_level)
        .map(|(_, title)| title.as_str())
        .collect();
    if kept.is_empty() {
        // Document starts below the parent level; anchor to the top heading.
        return stack.first().map(|(_, title)| title.clone());
    }
    Some(kept.join(" > "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(count: usize) -> String {
        (0..count)
            .map(|i| format!("word{i:03}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn chunker(max_tokens: usize) -> SectionChunker {
        SectionChunker::new(ChunkerConfig {
            max_tokens,
            parent_section_level: 2,
        })
    }

    #[test]
    fn chunks_never_exceed_max_tokens_unless_oversize() {
        let text = format!(
            "# Section\n\n{}\n\n{}\n\n{}\n\n{}",
            words(15),
            words(15),
            words(15),
            words(15)
        );
        let drafts = chunker(40).chunk(&text);
        assert!(drafts.len() >= 2);
        for draft in &drafts {
            assert!(!draft.oversize);
            assert!(draft.token_count <= 40, "{draft:?}");
        }
    }

    #[test]
    fn indexes_are_contiguous_and_zero_based() {
        let text = format!("# A\n\n{}\n\n# B\n\n{}", words(50), words(50));
        let drafts = chunker(30).chunk(&text);
        for (expected, draft) in drafts.iter().enumerate() {
            assert_eq!(draft.index, expected);
        }
    }

    #[test]
    fn no_chunk_spans_a_parent_section_boundary() {
        let text = format!("# Alpha\n\n{}\n\n# Beta\n\n{}", words(10), words(10));
        let drafts = chunker(500).chunk(&text);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].parent_section.as_deref(), Some("Alpha"));
        assert_eq!(drafts[1].parent_section.as_deref(), Some("Beta"));
        assert!(!drafts[0].text.contains("Beta"));
    }

    #[test]
    fn deep_headings_do_not_split_their_parent_section() {
        let text = format!(
            "# Top\n\n{}\n\n### Detail\n\n{}",
            words(10),
            words(10)
        );
        let drafts = chunker(500).chunk(&text);
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].text.contains("### Detail"));
    }

    #[test]
    fn oversize_block_becomes_its_own_flagged_chunk() {
        let text = format!("# Big\n\n{}", words(100));
        let drafts = chunker(20).chunk(&text);
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].oversize);
        assert!(drafts[0].token_count > 20);
    }

    #[test]
    fn heading_with_no_body_produces_no_chunk() {
        let drafts = chunker(100).chunk("# Lonely Heading\n\n## Also Empty");
        assert!(drafts.is_empty());
    }

    #[test]
    fn heading_rides_with_the_body_it_introduces() {
        let text = format!("# Intro\n\n{}", words(8));
        let drafts = chunker(100).chunk(&text);
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].text.starts_with("# Intro"));
        assert_eq!(drafts[0].section_path.as_deref(), Some("Intro"));
    }

    #[test]
    fn image_markers_are_single_token_blocks() {
        let text = format!("# Figures\n\n{IMAGE_MARKER}\n\n{}", words(6));
        let drafts = chunker(100).chunk(&text);
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].text.contains(IMAGE_MARKER));
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunker(100).chunk("").is_empty());
        assert!(chunker(100).chunk("\n\n\n").is_empty());
    }

    #[test]
    fn heuristic_counter_is_deterministic() {
        let counter = HeuristicCounter;
        let text = words(25);
        assert_eq!(counter.count(&text), counter.count(&text));
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("ab"), 1);
    }
}
