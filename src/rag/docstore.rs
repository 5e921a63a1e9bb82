//! `docstore`: knowledge-base chunks in a SQLite FTS5 index on local disk.
//!
//! Every call opens its own connection, so a `DocStore` is just a path and is
//! cheap to clone into `spawn_blocking`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};

use super::{KbChunk, RagError, SearchHit};

const DB_FILENAME: &str = "kb.db";
const SCHEMA_VERSION: i64 = 1;
/// Upper bound on OR-ed terms in one FTS query.
const MAX_QUERY_TERMS: usize = 32;

#[derive(Debug, Clone)]
pub struct DocStore {
    db_path: PathBuf,
}

impl DocStore {
    /// Open (creating if needed) the index under `dir`.
    pub fn open(dir: &Path) -> Result<Self, RagError> {
        fs::create_dir_all(dir).map_err(|e| {
            RagError::Store(format!("docstore: cannot create {}: {e}", dir.display()))
        })?;
        let store = Self { db_path: dir.join(DB_FILENAME) };
        store.init_db()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Insert or replace chunks by id in one transaction.
    pub fn upsert(&self, chunks: &[KbChunk]) -> Result<usize, RagError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let mut conn = self.open_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RagError::Store(format!("docstore: begin upsert tx: {e}")))?;

        let indexed_at = now_iso8601();
        for chunk in chunks {
            tx.execute("DELETE FROM chunks WHERE id = ?1", params![chunk.id])
                .map_err(|e| RagError::Store(format!("docstore: replace chunk {}: {e}", chunk.id)))?;
            tx.execute(
                "INSERT INTO chunks (id, source, chunk_index, doc_type, indexed_at, text) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    chunk.id,
                    chunk.source,
                    chunk.chunk_index as i64,
                    chunk.doc_type,
                    indexed_at,
                    chunk.text,
                ],
            )
            .map_err(|e| RagError::Store(format!("docstore: insert chunk: {e}")))?;
        }

        tx.commit()
            .map_err(|e| RagError::Store(format!("docstore: commit upsert tx: {e}")))?;
        Ok(chunks.len())
    }

    /// BM25-ranked search; `score` is the negated bm25 so higher is better.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, RagError> {
        let Some(fts_query) = fts5_or_query(query) else {
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.open_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT source, chunk_index, text, bm25(chunks) AS rank
                 FROM chunks
                 WHERE chunks MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
            )
            .map_err(|e| RagError::Store(format!("docstore: prepare search: {e}")))?;

        let rows = stmt
            .query_map(params![fts_query, top_k as i64], |row| {
                let bm25_score: f64 = row.get(3)?;
                Ok(SearchHit {
                    source: row.get(0)?,
                    chunk_index: row.get::<_, i64>(1)?.max(0) as usize,
                    text: row.get(2)?,
                    score: (-bm25_score) as f32,
                })
            })
            .map_err(|e| RagError::Store(format!("docstore: execute search: {e}")))?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row.map_err(|e| RagError::Store(format!("docstore: map search row: {e}")))?);
        }
        Ok(hits)
    }

    pub fn count(&self) -> Result<usize, RagError> {
        let conn = self.open_conn()?;
        let n: i64 = conn
            .query_row("SELECT count(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| RagError::Store(format!("docstore: count chunks: {e}")))?;
        Ok(n.max(0) as usize)
    }

    fn init_db(&self) -> Result<(), RagError> {
        let conn = self.open_conn()?;
        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .map_err(|e| RagError::Store(format!("docstore: read schema version: {e}")))?;

        if version == 0 {
            conn.execute_batch(
                "
                CREATE VIRTUAL TABLE IF NOT EXISTS chunks USING fts5(
                    id UNINDEXED,
                    source UNINDEXED,
                    chunk_index UNINDEXED,
                    doc_type UNINDEXED,
                    indexed_at UNINDEXED,
                    text
                );

                PRAGMA user_version = 1;
                ",
            )
            .map_err(|e| RagError::Store(format!("docstore: initialize schema: {e}")))?;
            return Ok(());
        }

        if version != SCHEMA_VERSION {
            return Err(RagError::Store(format!(
                "docstore: unsupported schema version {version}, expected {SCHEMA_VERSION}"
            )));
        }
        Ok(())
    }

    fn open_conn(&self) -> Result<Connection, RagError> {
        let conn = Connection::open(&self.db_path).map_err(|e| {
            RagError::Store(format!("docstore: open {}: {e}", self.db_path.display()))
        })?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| RagError::Store(format!("docstore: set journal_mode WAL: {e}")))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| RagError::Store(format!("docstore: set busy_timeout: {e}")))?;

        Ok(conn)
    }
}

/// Turn free text (often a whole stack trace) into an FTS5 `MATCH` argument.
///
/// Text is split on anything that is not alphanumeric, lowercased, and each
/// term of two or more characters is double-quoted so FTS5 operators in the
/// input are inert. Terms are de-duplicated in first-seen order, capped, and
/// OR-ed: a log line rarely shares every word with a runbook. `None` when no
/// usable term remains.
pub(crate) fn fts5_or_query(text: &str) -> Option<String> {
    let mut seen = HashSet::new();
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|t| seen.insert(t.clone()))
        .take(MAX_QUERY_TERMS)
        .map(|t| format!("\"{t}\""))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" OR "))
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
