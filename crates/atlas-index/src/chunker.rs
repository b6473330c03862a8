//! Entity-aligned content chunking.
//!
//! Splits file content into bounded chunks for embedding. Chunk
//! boundaries snap to entity starts (functions, classes) when one exists
//! near the target size; a hard cut is the fallback for oversized spans.
//! Each chunk may carry a bounded overlap prefix from the previous chunk,
//! recorded explicitly so the original content can be reconstructed.

use serde::{Deserialize, Serialize};

use atlas_config::ChunkConfig;

use crate::extractor::content_hash;
use crate::graph::FileNode;

/// A bounded span of file text, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Owning file path (project-relative).
    pub file_path: String,
    /// Byte offset where this chunk's exclusive span begins.
    pub byte_start: usize,
    /// Byte offset where the span ends (exclusive).
    pub byte_end: usize,
    /// 1-indexed first line of the span.
    pub line_start: usize,
    /// 1-indexed last line of the span.
    pub line_end: usize,
    /// Chunk text: overlap prefix followed by the exclusive span.
    pub text: String,
    /// Length in bytes of the overlap prefix borrowed from the previous
    /// chunk. Stripping it from each chunk and concatenating reproduces
    /// the file content exactly.
    pub overlap: usize,
    /// Sha256 of `text`; the embedding cache key.
    pub content_hash: String,
    /// Entity whose boundary starts this chunk, when aligned.
    pub entity: Option<String>,
    pub language: String,
}

/// Splits file content into chunks along entity boundaries.
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Chunk a file's content, preferring entity boundaries over hard
    /// cuts. Empty content yields no chunks.
    pub fn chunk(&self, node: &FileNode, content: &str) -> Vec<Chunk> {
        if content.is_empty() {
            return Vec::new();
        }

        let line_offsets = line_offsets(content);
        let boundaries = entity_boundaries(node, &line_offsets, content.len());

        let mut chunks = Vec::new();
        let mut cursor = 0usize;

        while cursor < content.len() {
            let end = self.next_cut(content, cursor, &boundaries);

            let overlap_start = if chunks.is_empty() {
                cursor
            } else {
                let mut start = cursor.saturating_sub(self.config.max_overlap);
                while !content.is_char_boundary(start) {
                    start += 1;
                }
                start
            };
            let overlap = cursor - overlap_start;

            let text = &content[overlap_start..end];
            let entity = boundaries
                .iter()
                .find(|b| b.offset == cursor)
                .map(|b| b.name.clone());

            chunks.push(Chunk {
                file_path: node.path.clone(),
                byte_start: cursor,
                byte_end: end,
                line_start: line_of(&line_offsets, cursor),
                line_end: line_of(&line_offsets, end.saturating_sub(1)),
                text: text.to_string(),
                overlap,
                content_hash: content_hash(text),
                entity,
                language: node.language.clone(),
            });

            cursor = end;
        }

        chunks
    }

    /// Pick the end of the chunk starting at `cursor`: the closest entity
    /// boundary within the tolerance window below the target, otherwise a
    /// hard cut at the target size.
    fn next_cut(&self, content: &str, cursor: usize, boundaries: &[Boundary]) -> usize {
        let remaining = content.len() - cursor;
        if remaining <= self.config.target_size {
            return content.len();
        }

        let ideal = cursor + self.config.target_size;
        let window_floor = ideal.saturating_sub(self.config.tolerance).max(cursor + 1);

        let best_boundary = boundaries
            .iter()
            .map(|b| b.offset)
            .filter(|&b| b >= window_floor && b <= ideal)
            .max();

        match best_boundary {
            Some(boundary) => boundary,
            None => snap_cut(content, ideal, cursor),
        }
    }
}

struct Boundary {
    offset: usize,
    name: String,
}

/// Byte offset of each line start.
fn line_offsets(content: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    for (i, b) in content.bytes().enumerate() {
        if b == b'\n' && i + 1 < content.len() {
            offsets.push(i + 1);
        }
    }
    offsets
}

/// 1-indexed line containing a byte offset.
fn line_of(line_offsets: &[usize], offset: usize) -> usize {
    match line_offsets.binary_search(&offset) {
        Ok(i) => i + 1,
        Err(i) => i,
    }
}

/// Entity start offsets (functions, methods, classes), sorted and
/// deduplicated.
fn entity_boundaries(node: &FileNode, line_offsets: &[usize], len: usize) -> Vec<Boundary> {
    let mut boundaries: Vec<Boundary> = Vec::new();

    let mut push = |line_start: usize, name: &str| {
        // line_start is 1-indexed.
        if line_start == 0 {
            return;
        }
        if let Some(&offset) = line_offsets.get(line_start - 1) {
            if offset < len {
                boundaries.push(Boundary {
                    offset,
                    name: name.to_string(),
                });
            }
        }
    };

    for func in &node.functions {
        push(func.line_start, &func.name);
    }
    for class in &node.classes {
        push(class.line_start, &class.name);
        for method in &class.methods {
            push(method.line_start, &method.name);
        }
    }

    boundaries.sort_by_key(|b| b.offset);
    boundaries.dedup_by_key(|b| b.offset);
    boundaries
}

/// Snap a hard cut to a char boundary, preferring a nearby line start.
/// Never returns an offset at or before `floor`, so chunking always makes
/// progress.
fn snap_cut(content: &str, ideal: usize, floor: usize) -> usize {
    if ideal >= content.len() {
        return content.len();
    }
    let mut offset = ideal;
    while offset > floor + 1 && !content.is_char_boundary(offset) {
        offset -= 1;
    }
    while offset < content.len() && !content.is_char_boundary(offset) {
        offset += 1;
    }

    // Prefer starting the next chunk on a fresh line when one is close.
    let window = offset.saturating_sub(80).max(floor + 1);
    if window < offset {
        if let Some(pos) = content[window..offset].rfind('\n') {
            let candidate = window + pos + 1;
            if candidate > floor {
                return candidate;
            }
        }
    }
    offset.min(content.len())
}

/// Reassemble file content from ordered chunks by stripping overlaps.
/// Used by coverage tests and store verification.
pub fn reassemble(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| &c.text[c.overlap..])
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FileKind, FunctionInfo};

    fn node_with_functions(funcs: &[(&str, usize)]) -> FileNode {
        let mut node = FileNode::new("src/lib.rs", FileKind::File, "rust");
        for (name, line) in funcs {
            node.functions.push(FunctionInfo {
                name: name.to_string(),
                line_start: *line,
                line_end: *line + 2,
                complexity: 1,
                ..FunctionInfo::default()
            });
        }
        node
    }

    fn config(target: usize, overlap: usize, tolerance: usize) -> ChunkConfig {
        ChunkConfig {
            target_size: target,
            max_overlap: overlap,
            tolerance,
        }
    }

    #[test]
    fn empty_content_has_no_chunks() {
        let node = node_with_functions(&[]);
        let chunks = Chunker::new(ChunkConfig::default()).chunk(&node, "");
        assert!(chunks.is_empty());
    }

    #[test]
    fn small_file_is_one_chunk() {
        let node = node_with_functions(&[("f", 1)]);
        let content = "fn f() {}\n";
        let chunks = Chunker::new(ChunkConfig::default()).chunk(&node, content);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, content);
        assert_eq!(chunks[0].overlap, 0);
        assert_eq!(chunks[0].entity.as_deref(), Some("f"));
    }

    #[test]
    fn cuts_prefer_entity_boundaries() {
        // Three 60-byte functions; target 100 with a wide tolerance should
        // cut at a function start, not mid-body.
        let mut content = String::new();
        let mut lines = Vec::new();
        for (i, name) in ["alpha", "beta", "gamma"].iter().enumerate() {
            lines.push((name.to_string(), content.lines().count() + 1));
            content.push_str(&format!("fn {name}() {{\n    let x = {i};\n    x\n}}\n"));
        }
        let funcs: Vec<(&str, usize)> = lines.iter().map(|(n, l)| (n.as_str(), *l)).collect();
        let node = node_with_functions(&funcs);

        let chunks = Chunker::new(config(50, 0, 45)).chunk(&node, &content);
        assert!(chunks.len() > 1);
        // Every cut after the first chunk lands on a function start.
        for chunk in &chunks[1..] {
            assert!(
                chunk.entity.is_some(),
                "chunk at byte {} should start on an entity",
                chunk.byte_start
            );
        }
    }

    #[test]
    fn reassembly_reproduces_content() {
        let node = node_with_functions(&[("a", 1), ("b", 4), ("c", 7)]);
        let content = "fn a() {\n}\n\nfn b() {\n}\n\nfn c() {\n}\n";
        for (target, overlap) in [(8, 0), (8, 4), (12, 6), (1000, 10)] {
            let chunks = Chunker::new(config(target, overlap, 4)).chunk(&node, content);
            assert_eq!(reassemble(&chunks), content, "target={target}");
        }
    }

    #[test]
    fn overlap_is_bounded_and_recorded() {
        let node = node_with_functions(&[]);
        let content = "0123456789\n".repeat(20);
        let chunks = Chunker::new(config(40, 8, 4)).chunk(&node, &content);

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].overlap, 0);
        for chunk in &chunks[1..] {
            assert!(chunk.overlap <= 8, "overlap {}", chunk.overlap);
            assert!(chunk.text.len() > chunk.overlap);
        }
        assert_eq!(reassemble(&chunks), content);
    }

    #[test]
    fn identical_text_hashes_identically() {
        let node_a = {
            let mut n = node_with_functions(&[]);
            n.path = "src/a.rs".to_string();
            n
        };
        let node_b = {
            let mut n = node_with_functions(&[]);
            n.path = "src/b.rs".to_string();
            n
        };
        let content = "fn shared() {}\n";
        let chunker = Chunker::new(ChunkConfig::default());
        let a = chunker.chunk(&node_a, content);
        let b = chunker.chunk(&node_b, content);
        assert_eq!(a[0].content_hash, b[0].content_hash);
        assert_ne!(a[0].file_path, b[0].file_path);
    }

    #[test]
    fn hard_cut_when_no_boundary_in_window() {
        // One giant single-line blob, no entities: must still terminate
        // with multiple hard-cut chunks.
        let node = node_with_functions(&[]);
        let content = "x".repeat(5000);
        let chunks = Chunker::new(config(1000, 100, 200)).chunk(&node, &content);
        assert!(chunks.len() >= 5);
        assert_eq!(reassemble(&chunks), content);
    }
}
