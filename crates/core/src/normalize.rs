use std::collections::HashMap;

/// Marker the extractor emits for figures with no extractable text.
pub const IMAGE_MARKER: &str = "[IMAGE]";

/// Lines repeated at least this often are treated as running headers/footers.
pub const DEFAULT_MIN_REPEATS: usize = 6;

/// Normalize extractor markdown: unify line endings, strip trailing
/// whitespace, collapse blank-line runs, fold image placeholders to
/// [`IMAGE_MARKER`], and drop consecutive duplicate paragraphs (common in
/// OCR/PDF exports).
pub fn normalize_markdown(input: &str) -> String {
    let unified = input
        .replace("\r\n", "\n")
        .replace("<!-- image -->", IMAGE_MARKER);

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let flush = |current: &mut Vec<&str>, paragraphs: &mut Vec<String>| {
        if current.is_empty() {
            return;
        }
        let paragraph = current.join("\n").trim().to_string();
        current.clear();
        if paragraphs.last().map(String::as_str) != Some(paragraph.as_str()) {
            paragraphs.push(paragraph);
        }
    };

    for line in unified.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            flush(&mut current, &mut paragraphs);
        } else {
            current.push(line);
        }
    }
    flush(&mut current, &mut paragraphs);

    paragraphs.join("\n\n")
}

/// Remove short lines that repeat `min_repeats` times or more across the
/// document. Rules-first and conservative: headings, tables, lists and image
/// markers are never touched.
pub fn cleanup_markdown(input: &str, min_repeats: usize) -> String {
    let lines: Vec<&str> = input.lines().collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in &lines {
        let trimmed = line.trim();
        if is_header_footer_candidate(trimmed) {
            *counts.entry(trimmed).or_insert(0) += 1;
        }
    }

    let repeated: Vec<&str> = counts
        .into_iter()
        .filter(|(_, count)| *count >= min_repeats.max(1))
        .map(|(line, _)| line)
        .collect();

    if repeated.is_empty() {
        return input.trim().to_string();
    }

    let mut out: Vec<&str> = Vec::new();
    let mut blank_run = 0usize;
    for line in lines {
        if repeated.contains(&line.trim()) {
            continue;
        }
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push(line);
    }

    out.join("\n").trim().to_string()
}

fn is_header_footer_candidate(line: &str) -> bool {
    if line.is_empty() || line == IMAGE_MARKER {
        return false;
    }
    if line.starts_with('#') || line.starts_with('|') {
        return false;
    }
    if crate::chunking::is_list_line(line) {
        return false;
    }
    (3..=80).contains(&line.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_runs_are_collapsed() {
        let out = normalize_markdown("a\n\n\n\n  b  \n");
        assert!(!out.contains("\n\n\n"));
        assert_eq!(out, "a\n\nb");
    }

    #[test]
    fn image_placeholders_are_folded_to_marker() {
        let out = normalize_markdown("before\n\n<!-- image -->\n\nafter");
        assert_eq!(out, format!("before\n\n{IMAGE_MARKER}\n\nafter"));
    }

    #[test]
    fn consecutive_duplicate_paragraphs_are_dropped() {
        let out = normalize_markdown("same text\n\nsame text\n\nother");
        assert_eq!(out, "same text\n\nother");
    }

    #[test]
    fn repeated_short_lines_are_removed() {
        let footer = "Physics Vol. 1 - Page";
        let body: Vec<String> = (0..6)
            .map(|i| format!("Paragraph number {i} with enough words to stay.\n\n{footer}"))
            .collect();
        let cleaned = cleanup_markdown(&body.join("\n\n"), 6);
        assert!(!cleaned.contains(footer));
        assert!(cleaned.contains("Paragraph number 3"));
    }

    #[test]
    fn headings_survive_cleanup_even_when_repeated() {
        let input = (0..8)
            .map(|_| "# Chapter\n\nbody text here")
            .collect::<Vec<_>>()
            .join("\n\n");
        let cleaned = cleanup_markdown(&input, 6);
        assert!(cleaned.contains("# Chapter"));
    }
}
