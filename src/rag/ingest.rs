//! Markdown knowledge-base ingestion: load, chunk, upsert.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use text_splitter::{ChunkConfig, MarkdownSplitter};
use tracing::{debug, info};

use super::{RagError, Retriever};

pub const DOC_TYPE_KB_MD: &str = "kb_md";
/// Stored chunk text is cut to this many characters.
pub const MAX_STORED_CHARS: usize = 1500;
/// Chunking defaults shared with `[rag]` config.
pub const DEFAULT_CHUNK_SIZE: usize = 1500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// A Markdown file read from the knowledge-base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownDoc {
    /// Path relative to the ingested directory, `/`-separated.
    pub source: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KbChunk {
    pub id: String,
    pub source: String,
    pub chunk_index: usize,
    pub text: String,
    pub doc_type: String,
}

impl KbChunk {
    /// The id is a content hash, so re-ingesting identical text upserts the
    /// same record.
    pub fn new(source: &str, chunk_index: usize, text: &str) -> Self {
        let text: String = text.chars().take(MAX_STORED_CHARS).collect();
        Self {
            id: chunk_id(source, chunk_index, &text),
            source: source.to_string(),
            chunk_index,
            text,
            doc_type: DOC_TYPE_KB_MD.to_string(),
        }
    }
}

fn chunk_id(source: &str, chunk_index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{source}|{chunk_index}|{text}").as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub docs: usize,
    pub chunks: usize,
}

/// Every `*.md` file under `dir` (recursively), sorted by relative path.
/// Unreadable or non-UTF-8 files are skipped with a warning.
pub fn load_markdown_docs(dir: &Path) -> Result<Vec<MarkdownDoc>, RagError> {
    if !dir.is_dir() {
        return Err(RagError::Config(format!("{} is not a directory", dir.display())));
    }
    let mut paths = Vec::new();
    collect_markdown(dir, &mut paths)?;
    paths.sort();

    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ingest: skipping unreadable file");
                continue;
            }
        };
        let source = path
            .strip_prefix(dir)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        docs.push(MarkdownDoc { source, text });
    }
    Ok(docs)
}

fn collect_markdown(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RagError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_markdown(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("md")) {
            out.push(path);
        }
    }
    Ok(())
}

/// Split one document on Markdown structure into overlapping chunks.
pub fn chunk_document(
    source: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<KbChunk>, RagError> {
    let config = ChunkConfig::new(chunk_size)
        .with_overlap(overlap)
        .map_err(|e| RagError::Config(format!("chunking: {e}")))?;
    let splitter = MarkdownSplitter::new(config);
    Ok(splitter
        .chunks(text)
        .filter(|t| !t.trim().is_empty())
        .enumerate()
        .map(|(i, t)| KbChunk::new(source, i, t))
        .collect())
}

/// Load, chunk and upsert every Markdown file under `dir`.
pub async fn ingest_dir(
    retriever: &Retriever,
    dir: &Path,
    opts: IngestOptions,
) -> Result<IngestStats, RagError> {
    let docs = load_markdown_docs(dir)?;
    let mut chunks = Vec::new();
    for doc in &docs {
        let doc_chunks = chunk_document(&doc.source, &doc.text, opts.chunk_size, opts.chunk_overlap)?;
        debug!(source = %doc.source, chunks = doc_chunks.len(), "ingest: chunked");
        chunks.extend(doc_chunks);
    }

    let batch_size = opts.batch_size.max(1);
    let mut written = 0;
    for batch in chunks.chunks(batch_size) {
        written += retriever.upsert(batch).await?;
        debug!(written, total = chunks.len(), "ingest: batch upserted");
    }

    let stats = IngestStats { docs: docs.len(), chunks: written };
    info!(backend = retriever.name(), docs = stats.docs, chunks = stats.chunks, "ingest complete");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ids_are_stable_content_hashes() {
        let a = KbChunk::new("db.md", 0, "raise pool");
        let b = KbChunk::new("db.md", 0, "raise pool");
        let c = KbChunk::new("db.md", 1, "raise pool");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 64);
        assert_eq!(a.doc_type, DOC_TYPE_KB_MD);
    }

    #[test]
    fn stored_text_is_truncated() {
        let long = "가".repeat(MAX_STORED_CHARS + 10);
        assert_eq!(KbChunk::new("x.md", 0, &long).text.chars().count(), MAX_STORED_CHARS);
    }

    #[test]
    fn chunking_respects_size_and_numbers_chunks() {
        let text = (0..60)
            .map(|i| format!("## Step {i}\n\nRestart the worker and check the queue depth.\n"))
            .collect::<String>();
        let chunks = chunk_document("ops.md", &text, 300, 50).unwrap();
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert!(c.text.chars().count() <= 300);
        }
    }

    #[test]
    fn overlap_not_smaller_than_size_is_rejected() {
        assert!(chunk_document("x.md", "text", 100, 100).is_err());
    }

    #[test]
    fn loads_markdown_recursively_in_sorted_order() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("net")).unwrap();
        fs::write(temp.path().join("b.md"), "# B").unwrap();
        fs::write(temp.path().join("a.MD"), "# A").unwrap();
        fs::write(temp.path().join("notes.txt"), "ignored").unwrap();
        fs::write(temp.path().join("net/dns.md"), "# DNS").unwrap();

        let docs = load_markdown_docs(temp.path()).unwrap();
        let sources: Vec<_> = docs.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["a.MD", "b.md", "net/dns.md"]);
    }

    #[test]
    fn missing_dir_is_an_error() {
        assert!(load_markdown_docs(Path::new("/nonexistent/kb")).is_err());
    }
}
