use crate::error::IngestError;
use crate::models::{ChunkAttributes, ChunkDraft, ChunkTag, TaggedChunk};
use crate::normalize::IMAGE_MARKER;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Section titles that mark non-substantive leading content in textbooks.
const FRONT_MATTER_KEYWORDS: [&str; 10] = [
    "acknowledgements",
    "foreword",
    "preface",
    "table of contents",
    "copyright",
    "publication",
    "all rights reserved",
    "isbn",
    "first edition",
    "textbook development committee",
];

const BOILERPLATE_PATTERNS: [&str; 5] = [
    r"\ball rights reserved\b",
    r"\bno part of this publication may be reproduced\b",
    r"\bprinted on\b",
    r"\bpublished at\b",
    r"\bphone\s*:",
];

#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Chunks below this token count are tagged low_signal.
    pub min_tokens: usize,
    /// Front-matter suspicion window: only the first N chunks qualify.
    pub front_matter_max_index: usize,
    /// Alphanumeric density below which an early chunk reads as front matter.
    pub front_matter_max_density: f64,
    /// Alphanumeric density below which a chunk is image_only.
    pub image_only_max_ratio: f64,
    /// Short content repeated this often within a document is boilerplate.
    pub boilerplate_min_repeats: usize,
    /// Only chunks at or below this token count are header/footer candidates.
    pub boilerplate_max_tokens: usize,
    pub max_chunks_per_doc: usize,
    pub max_chunks_per_parent: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_tokens: 40,
            front_matter_max_index: 8,
            front_matter_max_density: 0.65,
            image_only_max_ratio: 0.2,
            boilerplate_min_repeats: 3,
            boilerplate_max_tokens: 24,
            max_chunks_per_doc: 2000,
            max_chunks_per_parent: 400,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterStats {
    pub total_in: usize,
    pub total_out: usize,
    pub tag_counts: HashMap<String, usize>,
    pub dropped_parent_cap: usize,
    pub dropped_doc_cap: usize,
}

impl FilterStats {
    pub fn dropped(&self) -> usize {
        self.total_in - self.total_out
    }
}

/// Deterministic hash of normalized chunk content, the de-duplication key.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Structural/lexical chunk classifier. Tags demote; only the per-document
/// and per-section caps drop chunks. Runs before embedding so discarded
/// chunks never cost an embedding call.
pub struct ChunkFilter {
    config: FilterConfig,
    boilerplate_patterns: Vec<Regex>,
    seen_boilerplate: HashSet<String>,
}

impl ChunkFilter {
    pub fn new(config: FilterConfig) -> Result<Self, IngestError> {
        let boilerplate_patterns = BOILERPLATE_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            boilerplate_patterns,
            seen_boilerplate: HashSet::new(),
        })
    }

    pub fn apply(&mut self, drafts: Vec<ChunkDraft>) -> (Vec<TaggedChunk>, FilterStats) {
        let mut stats = FilterStats {
            total_in: drafts.len(),
            ..FilterStats::default()
        };

        let hashes: Vec<String> = drafts
            .iter()
            .map(|draft| content_hash(&draft.text))
            .collect();

        // Short content repeated across the document (headers/footers).
        let mut short_counts: HashMap<&str, usize> = HashMap::new();
        for (draft, hash) in drafts.iter().zip(&hashes) {
            if draft.token_count <= self.config.boilerplate_max_tokens {
                *short_counts.entry(hash.as_str()).or_insert(0) += 1;
            }
        }
        let repeated: HashSet<String> = short_counts
            .into_iter()
            .filter(|(_, count)| *count >= self.config.boilerplate_min_repeats)
            .map(|(hash, _)| hash.to_string())
            .collect();

        let mut tagged: Vec<TaggedChunk> = Vec::with_capacity(drafts.len());
        let mut seen: HashSet<&str> = HashSet::new();

        for (position, (draft, hash)) in drafts.iter().zip(&hashes).enumerate() {
            let tags = self.classify(draft, position, &seen, &repeated, hash);
            for tag in &tags {
                *stats.tag_counts.entry(tag.as_str().to_string()).or_insert(0) += 1;
            }
            let quality_score = quality_score(draft.token_count, &tags);
            seen.insert(hash.as_str());
            tagged.push(TaggedChunk {
                draft: draft.clone(),
                attributes: ChunkAttributes {
                    tags,
                    quality_score,
                },
                content_hash: hash.clone(),
            });
        }

        self.seen_boilerplate.extend(repeated);

        let kept = self.enforce_caps(tagged, &mut stats);
        stats.total_out = kept.len();
        (kept, stats)
    }

    fn classify(
        &self,
        draft: &ChunkDraft,
        position: usize,
        seen: &HashSet<&str>,
        repeated: &HashSet<String>,
        hash: &str,
    ) -> BTreeSet<ChunkTag> {
        let mut tags = BTreeSet::new();
        let text = draft.text.trim();
        let lowered = text.to_lowercase();

        let section = draft
            .parent_section
            .as_deref()
            .or(draft.section_path.as_deref())
            .unwrap_or("")
            .to_lowercase();
        let early = position < self.config.front_matter_max_index;
        let sparse = alphanumeric_density(text) < self.config.front_matter_max_density;
        if (early && sparse)
            || FRONT_MATTER_KEYWORDS
                .iter()
                .any(|keyword| section.contains(keyword))
        {
            tags.insert(ChunkTag::FrontMatter);
        }

        if repeated.contains(hash)
            || self.seen_boilerplate.contains(hash)
            || self
                .boilerplate_patterns
                .iter()
                .any(|pattern| pattern.is_match(&lowered))
        {
            tags.insert(ChunkTag::Boilerplate);
        }

        if text == IMAGE_MARKER || alphanumeric_density(text) < self.config.image_only_max_ratio {
            tags.insert(ChunkTag::ImageOnly);
        }

        if seen.contains(hash) {
            tags.insert(ChunkTag::Duplicate);
        }

        if draft.token_count < self.config.min_tokens {
            tags.insert(ChunkTag::LowSignal);
        }

        if draft.oversize {
            tags.insert(ChunkTag::Oversize);
        }

        tags
    }

    /// Drop the lowest-scoring chunks until both caps hold, then reindex the
    /// survivors densely in original order.
    fn enforce_caps(&self, tagged: Vec<TaggedChunk>, stats: &mut FilterStats) -> Vec<TaggedChunk> {
        let mut dropped: HashSet<usize> = HashSet::new();

        let mut by_parent: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, chunk) in tagged.iter().enumerate() {
            let parent = chunk.draft.parent_section.clone().unwrap_or_default();
            by_parent.entry(parent).or_default().push(position);
        }
        for group in by_parent.values() {
            if group.len() > self.config.max_chunks_per_parent {
                let excess = group.len() - self.config.max_chunks_per_parent;
                for position in lowest_scoring(group, &tagged, excess) {
                    dropped.insert(position);
                }
                stats.dropped_parent_cap += excess;
            }
        }

        let remaining: Vec<usize> = (0..tagged.len())
            .filter(|position| !dropped.contains(position))
            .collect();
        if remaining.len() > self.config.max_chunks_per_doc {
            let excess = remaining.len() - self.config.max_chunks_per_doc;
            for position in lowest_scoring(&remaining, &tagged, excess) {
                dropped.insert(position);
            }
            stats.dropped_doc_cap += excess;
        }

        tagged
            .into_iter()
            .enumerate()
            .filter(|(position, _)| !dropped.contains(position))
            .map(|(_, chunk)| chunk)
            .enumerate()
            .map(|(index, mut chunk)| {
                chunk.draft.index = index;
                chunk
            })
            .collect()
    }
}

/// Positions of the `excess` lowest-quality chunks; equal scores resolve by
/// original chunk index so the outcome is reproducible.
fn lowest_scoring(group: &[usize], tagged: &[TaggedChunk], excess: usize) -> Vec<usize> {
    let mut ranked: Vec<usize> = group.to_vec();
    ranked.sort_by(|a, b| {
        tagged[*a]
            .attributes
            .quality_score
            .total_cmp(&tagged[*b].attributes.quality_score)
            .then_with(|| tagged[*b].draft.index.cmp(&tagged[*a].draft.index))
    });
    ranked.truncate(excess);
    ranked
}

/// Deterministic quality score in [0, 1]: each tag demotes, substantial
/// token counts nudge upward, and any tagged chunk scores strictly below an
/// otherwise identical untagged one.
fn quality_score(token_count: usize, tags: &BTreeSet<ChunkTag>) -> f64 {
    let mut score: f64 = 1.0;
    for tag in tags {
        score -= match tag {
            ChunkTag::FrontMatter => 0.7,
            ChunkTag::Boilerplate => 0.6,
            ChunkTag::ImageOnly => 0.7,
            ChunkTag::Duplicate => 1.0,
            ChunkTag::LowSignal => 0.3,
            ChunkTag::Oversize => 0.2,
        };
    }
    if token_count >= 200 {
        score += 0.05;
    }
    score.clamp(0.0, 1.0)
}

fn alphanumeric_density(text: &str) -> f64 {
    let mut total = 0usize;
    let mut alphanumeric = 0usize;
    for ch in text.chars() {
        if ch.is_whitespace() {
            continue;
        }
        total += 1;
        if ch.is_alphanumeric() {
            alphanumeric += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        alphanumeric as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(index: usize, text: &str, token_count: usize) -> ChunkDraft {
        ChunkDraft {
            index,
            text: text.to_string(),
            token_count,
            section_path: None,
            parent_section: Some("Body".to_string()),
            oversize: false,
        }
    }

    fn filter() -> ChunkFilter {
        ChunkFilter::new(FilterConfig::default()).expect("patterns compile")
    }

    fn prose(seed: usize, sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Sentence {i} of passage {seed} explains the idea in plain words."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn duplicate_tags_only_the_later_occurrence() {
        let text = prose(1, 5);
        let (tagged, _) = filter().apply(vec![
            draft(0, &text, 60),
            draft(1, &text, 60),
        ]);
        assert!(!tagged[0].attributes.tags.contains(&ChunkTag::Duplicate));
        assert!(tagged[1].attributes.tags.contains(&ChunkTag::Duplicate));
        assert_eq!(tagged[0].content_hash, tagged[1].content_hash);
    }

    #[test]
    fn low_token_chunks_are_low_signal() {
        let (tagged, _) = filter().apply(vec![draft(0, &prose(2, 6), 10)]);
        assert!(tagged[0].attributes.tags.contains(&ChunkTag::LowSignal));
    }

    #[test]
    fn image_marker_is_image_only() {
        let (tagged, _) = filter().apply(vec![draft(0, IMAGE_MARKER, 1)]);
        assert!(tagged[0].attributes.tags.contains(&ChunkTag::ImageOnly));
    }

    #[test]
    fn sparse_early_chunk_is_front_matter() {
        let toc = "Contents ........... 3\n1.1 ........... 9\n1.2 ........... 17";
        let (tagged, _) = filter().apply(vec![draft(0, toc, 50)]);
        assert!(tagged[0].attributes.tags.contains(&ChunkTag::FrontMatter));
    }

    #[test]
    fn dense_late_chunk_is_not_front_matter() {
        let drafts: Vec<ChunkDraft> = (0..12)
            .map(|i| draft(i, &prose(i, 6), 60))
            .collect();
        let (tagged, _) = filter().apply(drafts);
        assert!(!tagged[11].attributes.tags.contains(&ChunkTag::FrontMatter));
    }

    #[test]
    fn front_matter_section_title_triggers_the_tag() {
        let mut suspicious = draft(9, &prose(3, 6), 60);
        suspicious.parent_section = Some("Acknowledgements".to_string());
        let (tagged, _) = filter().apply(vec![suspicious]);
        assert!(tagged[0].attributes.tags.contains(&ChunkTag::FrontMatter));
    }

    #[test]
    fn repeated_short_content_is_boilerplate() {
        let mut drafts: Vec<ChunkDraft> = (0..3)
            .map(|i| draft(i * 2, "Standard Textbook Series - Unit Page", 8))
            .collect();
        for (i, extra) in (0..3).zip([4usize, 5, 6]) {
            drafts.push(draft(extra * 2 + 1, &prose(i + 10, 6), 60));
        }
        let (tagged, _) = filter().apply(drafts);
        let repeated_tagged = tagged
            .iter()
            .filter(|chunk| chunk.attributes.tags.contains(&ChunkTag::Boilerplate))
            .count();
        assert_eq!(repeated_tagged, 3);
    }

    #[test]
    fn boilerplate_phrases_are_tagged() {
        let notice = format!(
            "{} All rights reserved. No part of this publication may be reproduced.",
            prose(4, 3)
        );
        let (tagged, _) = filter().apply(vec![draft(0, &notice, 60)]);
        assert!(tagged[0].attributes.tags.contains(&ChunkTag::Boilerplate));
    }

    #[test]
    fn quality_score_drops_with_every_tag() {
        let clean = quality_score(100, &BTreeSet::new());
        for tag in [
            ChunkTag::FrontMatter,
            ChunkTag::Boilerplate,
            ChunkTag::ImageOnly,
            ChunkTag::Duplicate,
            ChunkTag::LowSignal,
            ChunkTag::Oversize,
        ] {
            let tagged = quality_score(100, &BTreeSet::from([tag]));
            assert!(tagged < clean, "{tag:?} must demote");
        }
    }

    #[test]
    fn caps_drop_exactly_the_lowest_scoring_chunks() {
        let config = FilterConfig {
            max_chunks_per_parent: 3,
            ..FilterConfig::default()
        };
        let mut chunk_filter = ChunkFilter::new(config).expect("patterns compile");

        let mut drafts: Vec<ChunkDraft> = (0..4).map(|i| draft(i, &prose(i, 6), 60)).collect();
        // A fifth chunk that repeats the first; the duplicate scores lowest.
        drafts.push(draft(4, &prose(0, 6), 60));

        let (kept, stats) = chunk_filter.apply(drafts);
        assert_eq!(kept.len(), 3);
        assert_eq!(stats.dropped_parent_cap, 2);
        assert!(kept
            .iter()
            .all(|chunk| !chunk.attributes.tags.contains(&ChunkTag::Duplicate)));
        // Survivors are reindexed densely in original order.
        let indexes: Vec<usize> = kept.iter().map(|chunk| chunk.draft.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn oversize_flag_becomes_a_tag() {
        let mut big = draft(0, &prose(5, 40), 400);
        big.oversize = true;
        let (tagged, _) = filter().apply(vec![big]);
        assert!(tagged[0].attributes.tags.contains(&ChunkTag::Oversize));
    }

    #[test]
    fn stats_count_inputs_outputs_and_tags() {
        let (_, stats) = filter().apply(vec![
            draft(0, &prose(6, 6), 60),
            draft(1, &prose(6, 6), 60),
        ]);
        assert_eq!(stats.total_in, 2);
        assert_eq!(stats.total_out, 2);
        assert_eq!(stats.dropped(), 0);
        assert_eq!(stats.tag_counts.get("duplicate"), Some(&1));
    }
}
