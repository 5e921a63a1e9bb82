//! Markdown directory → local FTS5 store → search.

use std::fs;

use tempfile::TempDir;
use trouble_shooter::rag::docstore::DocStore;
use trouble_shooter::rag::{IngestOptions, Retriever, ingest_dir};

#[tokio::test]
async fn ingested_markdown_is_searchable() {
    let kb = TempDir::new().unwrap();
    fs::create_dir(kb.path().join("db")).unwrap();
    fs::write(
        kb.path().join("db/pool.md"),
        "# Connection pool\n\nWhen Postgres reports `too many clients`, raise max_connections \
         or shrink the application pool size.\n",
    )
    .unwrap();
    fs::write(
        kb.path().join("tls.md"),
        "# TLS\n\nCertificate verify failed usually means the CA bundle is missing.\n",
    )
    .unwrap();
    fs::write(kb.path().join("notes.txt"), "not markdown, skipped").unwrap();

    let store_dir = TempDir::new().unwrap();
    let store = DocStore::open(store_dir.path()).unwrap();
    let retriever = Retriever::Local(store.clone());

    let stats = ingest_dir(&retriever, kb.path(), IngestOptions::default()).await.unwrap();
    assert_eq!(stats.docs, 2);
    assert_eq!(stats.chunks, 2);
    assert_eq!(store.count().unwrap(), 2);

    let hits = retriever.search("FATAL: sorry, too many clients already", 3).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].source, "db/pool.md");
}

#[tokio::test]
async fn reingesting_does_not_duplicate_chunks() {
    let kb = TempDir::new().unwrap();
    fs::write(kb.path().join("a.md"), "# A\n\nsegfault in worker thread\n").unwrap();

    let store_dir = TempDir::new().unwrap();
    let store = DocStore::open(store_dir.path()).unwrap();
    let retriever = Retriever::Local(store.clone());

    ingest_dir(&retriever, kb.path(), IngestOptions::default()).await.unwrap();
    ingest_dir(&retriever, kb.path(), IngestOptions::default()).await.unwrap();
    assert_eq!(store.count().unwrap(), 1);
}
