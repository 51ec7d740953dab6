//! Boundary-aware text chunker.
//!
//! Splits document body text into [`Chunk`]s that respect a per-format
//! [`ChunkProfile`]: a token target, an overlap budget, and a minimum size.
//! Text is first segmented into structural units (headings, fenced code
//! blocks, table runs, paragraphs); chunks are then packed from whole
//! segments. Fences and tables are never split across chunks — a segment
//! bigger than the target becomes its own oversized chunk instead.
//!
//! Consecutive chunks can share trailing context: the last `overlap_tokens`
//! worth of whole segments from one chunk are prepended to the next.
//!
//! Each chunk records 1-based line references into the (LF-normalized) body,
//! the heading path active at its first segment, and topic tags derived from
//! that path. Chunk text is hashed with SHA-256 for staleness detection.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio; a real tokenizer is out of scope.
pub const CHARS_PER_TOKEN: usize = 4;

/// Chunking parameters for one document type. Token counts are converted
/// to character budgets internally.
#[derive(Debug, Clone, Copy)]
pub struct ChunkProfile {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
    pub min_tokens: usize,
}

impl ChunkProfile {
    fn max_chars(&self) -> usize {
        self.target_tokens * CHARS_PER_TOKEN
    }
    fn overlap_chars(&self) -> usize {
        self.overlap_tokens * CHARS_PER_TOKEN
    }
    fn min_chars(&self) -> usize {
        self.min_tokens * CHARS_PER_TOKEN
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SegmentKind {
    Heading,
    Fence,
    Table,
    Paragraph,
}

/// One structural unit of the body. Line numbers are 1-based and inclusive.
#[derive(Debug, Clone)]
struct Segment {
    kind: SegmentKind,
    text: String,
    start_line: i64,
    end_line: i64,
    section: Option<String>,
    tags: Vec<String>,
}

impl Segment {
    /// Fences and tables must land in a single chunk.
    fn atomic(&self) -> bool {
        matches!(self.kind, SegmentKind::Fence | SegmentKind::Table)
    }
}

/// Split text into chunks per the profile. Returns chunks with contiguous
/// indices starting at 0; at least one chunk is always produced.
pub fn chunk_document(document_id: &str, text: &str, profile: &ChunkProfile) -> Vec<Chunk> {
    let normalized = text.replace("\r\n", "\n");
    if normalized.trim().is_empty() {
        return vec![make_chunk(document_id, 0, "", 1, 1, None, Vec::new())];
    }

    let segments = split_oversized(segment_text(&normalized), profile.max_chars());

    let max_chars = profile.max_chars();
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut buf: Vec<Segment> = Vec::new();
    let mut carry: Vec<Segment> = Vec::new();

    for seg in segments {
        let seg_len = seg.text.len();

        // Oversized atomic segment: flush, then emit it as its own chunk.
        if seg_len > max_chars {
            if !buf.is_empty() {
                let next_carry = tail_overlap(&buf, profile.overlap_chars());
                emit(&mut chunks, document_id, &carry, &buf);
                carry = next_carry;
                buf.clear();
            }
            emit(&mut chunks, document_id, &carry, std::slice::from_ref(&seg));
            // The segment itself never fits the overlap budget.
            carry.clear();
            continue;
        }

        if assembled_len(&carry, &buf) + joined_len(seg_len, !buf.is_empty() || !carry.is_empty())
            > max_chars
            && !buf.is_empty()
        {
            let next_carry = tail_overlap(&buf, profile.overlap_chars());
            emit(&mut chunks, document_id, &carry, &buf);
            carry = next_carry;
            buf.clear();
        }

        buf.push(seg);
    }

    if !buf.is_empty() {
        // Fold a trailing runt into the previous chunk instead of emitting it.
        let own_len: usize = buf.iter().map(|s| s.text.len()).sum();
        if own_len < profile.min_chars() && !chunks.is_empty() {
            let last = chunks.last_mut().expect("non-empty");
            for seg in &buf {
                last.text.push_str("\n\n");
                last.text.push_str(&seg.text);
                last.end_line = seg.end_line;
            }
            last.hash = hash_text(&last.text);
        } else {
            emit(&mut chunks, document_id, &carry, &buf);
        }
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(
            document_id,
            0,
            normalized.trim(),
            1,
            normalized.lines().count().max(1) as i64,
            None,
            Vec::new(),
        ));
    }

    chunks
}

/// Length of the assembled chunk text (overlap + own segments, `\n\n` joined).
fn assembled_len(carry: &[Segment], buf: &[Segment]) -> usize {
    let mut total = 0usize;
    let mut first = true;
    for seg in carry.iter().chain(buf.iter()) {
        total += joined_len(seg.text.len(), !first);
        first = false;
    }
    total
}

fn joined_len(seg_len: usize, needs_separator: bool) -> usize {
    if needs_separator {
        seg_len + 2
    } else {
        seg_len
    }
}

/// Trailing whole segments of `buf` that fit the overlap budget, in order.
fn tail_overlap(buf: &[Segment], overlap_chars: usize) -> Vec<Segment> {
    if overlap_chars == 0 {
        return Vec::new();
    }
    let mut total = 0usize;
    let mut taken = 0usize;
    for seg in buf.iter().rev() {
        if total + seg.text.len() > overlap_chars {
            break;
        }
        total += seg.text.len();
        taken += 1;
    }
    buf[buf.len() - taken..].to_vec()
}

/// Emit one chunk built from overlap context plus owned segments. Line
/// references cover the owned segments only; overlap text is context.
fn emit(chunks: &mut Vec<Chunk>, document_id: &str, carry: &[Segment], own: &[Segment]) {
    let text = carry
        .iter()
        .chain(own.iter())
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let first = own.first().expect("emit requires owned segments");
    let last = own.last().expect("emit requires owned segments");

    let mut tags: Vec<String> = Vec::new();
    for seg in own {
        for tag in &seg.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
    }
    tags.truncate(8);

    let index = chunks.len() as i64;
    chunks.push(make_chunk(
        document_id,
        index,
        &text,
        first.start_line,
        last.end_line,
        first.section.clone(),
        tags,
    ));
}

// ============ Segmentation ============

/// Split normalized text into structural segments. Blank lines separate
/// paragraphs; headings update the active section path.
fn segment_text(text: &str) -> Vec<Segment> {
    let lines: Vec<&str> = text.lines().collect();
    let mut segments = Vec::new();
    let mut sections: Vec<(u8, String)> = Vec::new();
    let mut para: Vec<(usize, &str)> = Vec::new();
    let mut i = 0usize;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();

        if is_fence_delimiter(trimmed) {
            flush_paragraph(&mut segments, &mut para, &sections);
            let start = i;
            let mut end = lines.len() - 1;
            for (j, candidate) in lines.iter().enumerate().skip(i + 1) {
                if is_fence_delimiter(candidate.trim_start()) {
                    end = j;
                    break;
                }
            }
            segments.push(build_segment(
                SegmentKind::Fence,
                lines[start..=end].join("\n"),
                start + 1,
                end + 1,
                &sections,
            ));
            i = end + 1;
            continue;
        }

        if trimmed.starts_with('|') {
            flush_paragraph(&mut segments, &mut para, &sections);
            let start = i;
            let mut end = i;
            while end + 1 < lines.len() && lines[end + 1].trim_start().starts_with('|') {
                end += 1;
            }
            segments.push(build_segment(
                SegmentKind::Table,
                lines[start..=end].join("\n"),
                start + 1,
                end + 1,
                &sections,
            ));
            i = end + 1;
            continue;
        }

        if let Some((level, title)) = parse_heading(trimmed) {
            flush_paragraph(&mut segments, &mut para, &sections);
            while sections.last().is_some_and(|(l, _)| *l >= level) {
                sections.pop();
            }
            sections.push((level, title.to_string()));
            segments.push(build_segment(
                SegmentKind::Heading,
                line.trim_end().to_string(),
                i + 1,
                i + 1,
                &sections,
            ));
            i += 1;
            continue;
        }

        if line.trim().is_empty() {
            flush_paragraph(&mut segments, &mut para, &sections);
            i += 1;
            continue;
        }

        para.push((i + 1, line));
        i += 1;
    }

    flush_paragraph(&mut segments, &mut para, &sections);
    segments
}

fn is_fence_delimiter(trimmed: &str) -> bool {
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// ATX heading: 1-6 `#` followed by a space.
fn parse_heading(trimmed: &str) -> Option<(u8, &str)> {
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if (1..=6).contains(&hashes) {
        let rest = &trimmed[hashes..];
        if let Some(title) = rest.strip_prefix(' ') {
            let title = title.trim();
            if !title.is_empty() {
                return Some((hashes as u8, title));
            }
        }
    }
    None
}

fn flush_paragraph(
    segments: &mut Vec<Segment>,
    para: &mut Vec<(usize, &str)>,
    sections: &[(u8, String)],
) {
    if para.is_empty() {
        return;
    }
    let start = para[0].0;
    let end = para[para.len() - 1].0;
    let text = para
        .iter()
        .map(|(_, l)| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    segments.push(build_segment(
        SegmentKind::Paragraph,
        text,
        start,
        end,
        sections,
    ));
    para.clear();
}

fn build_segment(
    kind: SegmentKind,
    text: String,
    start_line: usize,
    end_line: usize,
    sections: &[(u8, String)],
) -> Segment {
    let section = if sections.is_empty() {
        None
    } else {
        Some(
            sections
                .iter()
                .map(|(_, t)| t.as_str())
                .collect::<Vec<_>>()
                .join(" > "),
        )
    };
    Segment {
        kind,
        text,
        start_line: start_line as i64,
        end_line: end_line as i64,
        section,
        tags: section_tags(sections),
    }
}

/// Topic tags: lowercased alphanumeric words (length > 2) from the heading
/// path, deduplicated in order.
fn section_tags(sections: &[(u8, String)]) -> Vec<String> {
    let mut tags = Vec::new();
    for (_, title) in sections {
        for word in title.split(|c: char| !c.is_alphanumeric()) {
            if word.len() > 2 {
                let tag = word.to_lowercase();
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }
    }
    tags
}

// ============ Oversized paragraph splitting ============

/// Split paragraphs bigger than the budget at sentence, newline, or space
/// boundaries. Atomic segments pass through untouched.
fn split_oversized(segments: Vec<Segment>, max_chars: usize) -> Vec<Segment> {
    let mut out = Vec::new();
    for seg in segments {
        if seg.text.len() <= max_chars || seg.atomic() {
            out.push(seg);
            continue;
        }

        let mut line_cursor = seg.start_line;
        let mut remaining = seg.text.as_str();
        while !remaining.is_empty() {
            let split_at = remaining.len().min(max_chars);
            let actual = if split_at < remaining.len() {
                let window = nearest_char_boundary(remaining, split_at);
                let window_str = &remaining[..window];
                window_str
                    .rfind(". ")
                    .map(|p| p + 2)
                    .or_else(|| window_str.rfind('\n').map(|p| p + 1))
                    .or_else(|| window_str.rfind(' ').map(|p| p + 1))
                    .unwrap_or(window)
            } else {
                split_at
            };

            let piece = &remaining[..actual];
            let piece_lines = piece.matches('\n').count() as i64;
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                out.push(Segment {
                    kind: SegmentKind::Paragraph,
                    text: trimmed.to_string(),
                    start_line: line_cursor,
                    end_line: line_cursor + piece_lines,
                    section: seg.section.clone(),
                    tags: seg.tags.clone(),
                });
            }
            line_cursor += piece_lines;
            remaining = &remaining[actual..];
        }
    }
    out
}

fn nearest_char_boundary(s: &str, mut at: usize) -> usize {
    while at > 0 && !s.is_char_boundary(at) {
        at -= 1;
    }
    at.max(1)
}

// ============ Chunk construction ============

fn make_chunk(
    document_id: &str,
    index: i64,
    text: &str,
    start_line: i64,
    end_line: i64,
    section: Option<String>,
    tags: Vec<String>,
) -> Chunk {
    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: hash_text(text),
        start_line,
        end_line,
        section,
        tags,
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(target: usize, overlap: usize) -> ChunkProfile {
        ChunkProfile {
            target_tokens: target,
            overlap_tokens: overlap,
            min_tokens: 0,
        }
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_document("doc1", "Hello, world!", &profile(700, 0));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
    }

    #[test]
    fn empty_text_yields_one_chunk() {
        let chunks = chunk_document("doc1", "", &profile(700, 0));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn indices_contiguous_from_zero() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {} with a bit of padding text.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_document("doc1", &text, &profile(10, 0));
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "index mismatch at {}", i);
        }
    }

    #[test]
    fn fence_is_never_split() {
        let fence = format!("```\n{}\n```", vec!["let x = 1;"; 40].join("\n"));
        let text = format!("Intro paragraph.\n\n{}\n\nOutro paragraph.", fence);
        // Target far smaller than the fence.
        let chunks = chunk_document("doc1", &text, &profile(20, 0));
        for c in &chunks {
            let delimiters = c.text.lines().filter(|l| l.trim_start().starts_with("```")).count();
            assert_eq!(delimiters % 2, 0, "chunk splits a fence: {:?}", c.text);
        }
        assert!(chunks.iter().any(|c| c.text.contains("let x = 1;")));
    }

    #[test]
    fn table_run_stays_together() {
        let table = "| a | b |\n|---|---|\n| 1 | 2 |\n| 3 | 4 |";
        let text = format!("Before.\n\n{}\n\nAfter.", table);
        let chunks = chunk_document("doc1", &text, &profile(8, 0));
        let with_table: Vec<_> = chunks.iter().filter(|c| c.text.contains("| a | b |")).collect();
        assert_eq!(with_table.len(), 1);
        assert!(with_table[0].text.contains("| 3 | 4 |"));
    }

    #[test]
    fn overlap_carries_trailing_segment() {
        let text = "First paragraph with enough words here.\n\n\
                    Second paragraph with enough words here.\n\n\
                    Third paragraph with enough words here.\n\n\
                    Fourth paragraph with enough words here.";
        let chunks = chunk_document("doc1", text, &profile(20, 12));
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            // The follow-up chunk must open with text from its predecessor.
            let prev_tail = pair[0].text.split("\n\n").last().unwrap();
            assert!(
                pair[1].text.starts_with(prev_tail),
                "expected overlap {:?} at start of {:?}",
                prev_tail,
                pair[1].text
            );
        }
    }

    #[test]
    fn overlap_carries_into_oversized_fence_chunk() {
        let fence_body: String = (0..40).map(|i| format!("let x{} = {};\n", i, i)).collect();
        let text = format!(
            "First paragraph with some words.\n\n\
             Second paragraph also with words.\n\n\
             ```\n{}```",
            fence_body
        );
        let chunks = chunk_document("doc1", &text, &profile(20, 10));
        let fence_chunk = chunks
            .iter()
            .find(|c| c.text.contains("```"))
            .expect("fence chunk");
        assert!(
            fence_chunk.text.starts_with("Second paragraph also with words."),
            "expected trailing paragraph as context before the fence, got {:?}",
            &fence_chunk.text[..60.min(fence_chunk.text.len())]
        );
        // Line refs still cover the fence only, not the carried context.
        let fence_open = text.lines().position(|l| l == "```").unwrap() as i64 + 1;
        assert_eq!(fence_chunk.start_line, fence_open);
    }

    #[test]
    fn zero_overlap_means_disjoint_text() {
        let text = "Alpha paragraph one here.\n\nBeta paragraph two here.\n\nGamma paragraph three here.";
        let chunks = chunk_document("doc1", text, &profile(8, 0));
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(!pair[1].text.contains(pair[0].text.split('\n').next().unwrap()));
        }
    }

    #[test]
    fn line_references_are_ordered_and_in_bounds() {
        let text = "# Title\n\nPara one.\n\nPara two.\n\n```\ncode\n```\n\nPara three.";
        let total_lines = text.lines().count() as i64;
        let chunks = chunk_document("doc1", text, &profile(6, 0));
        let mut prev_start = 0;
        for c in &chunks {
            assert!(c.start_line >= 1 && c.end_line <= total_lines);
            assert!(c.start_line <= c.end_line);
            assert!(c.start_line >= prev_start, "start lines must be non-decreasing");
            prev_start = c.start_line;
        }
    }

    #[test]
    fn section_path_tracks_headings() {
        let text = "# Guide\n\nIntro text.\n\n## Install\n\nRun the installer now.";
        let chunks = chunk_document("doc1", text, &profile(6, 0));
        let install_chunk = chunks
            .iter()
            .find(|c| c.text.contains("installer"))
            .expect("install chunk");
        let section = install_chunk.section.as_deref().unwrap();
        assert!(section.contains("Guide"));
        assert!(section.contains("Install"));
        assert!(install_chunk.tags.iter().any(|t| t == "install"));
    }

    #[test]
    fn sibling_heading_replaces_previous() {
        let text = "# Guide\n\n## Install\n\nInstall text.\n\n## Usage\n\nUsage text goes here.";
        let chunks = chunk_document("doc1", text, &profile(6, 0));
        let usage_chunk = chunks
            .iter()
            .find(|c| c.text.contains("Usage text"))
            .expect("usage chunk");
        let section = usage_chunk.section.as_deref().unwrap();
        assert!(section.contains("Usage"));
        assert!(!section.contains("Install"));
    }

    #[test]
    fn oversized_paragraph_hard_splits_on_word_boundary() {
        let text = vec!["word"; 300].join(" ");
        let chunks = chunk_document("doc1", &text, &profile(10, 0));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(!c.text.starts_with(' '));
            assert!(!c.text.ends_with(' '));
        }
    }

    #[test]
    fn crlf_input_is_normalized() {
        let chunks = chunk_document("doc1", "One.\r\n\r\nTwo.", &profile(700, 0));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "One.\n\nTwo.");
    }

    #[test]
    fn deterministic_text_and_hashes() {
        let text = "# H\n\nAlpha\n\nBeta\n\n| t | r |\n| 1 | 2 |\n\nGamma";
        let p = profile(5, 2);
        let c1 = chunk_document("doc1", text, &p);
        let c2 = chunk_document("doc1", text, &p);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
            assert_eq!(a.chunk_index, b.chunk_index);
            assert_eq!((a.start_line, a.end_line), (b.start_line, b.end_line));
        }
    }

    #[test]
    fn runt_tail_merges_into_previous_chunk() {
        let p = ChunkProfile {
            target_tokens: 12,
            overlap_tokens: 0,
            min_tokens: 6,
        };
        let text = "A paragraph that is long enough to fill one chunk fully.\n\nTiny.";
        let chunks = chunk_document("doc1", text, &p);
        assert!(chunks.last().unwrap().text.contains("Tiny."));
        // The runt must not stand alone.
        assert!(chunks.last().unwrap().text.len() > "Tiny.".len());
    }

    #[test]
    fn every_nonblank_line_is_covered() {
        let text = "# A\n\nOne.\n\nTwo.\n\n```\nthree\n```\n\n| x |\n| y |\n\nFour.";
        let chunks = chunk_document("doc1", text, &profile(6, 0));
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let lineno = (i + 1) as i64;
            assert!(
                chunks
                    .iter()
                    .any(|c| c.start_line <= lineno && lineno <= c.end_line),
                "line {} not covered",
                lineno
            );
        }
    }
}
