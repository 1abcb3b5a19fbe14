use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::traits::ContentIndex;
use pitchlens_core::types::{IndexHit, IndexedDocument};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        source TEXT,
        indexed_at TEXT NOT NULL
    );

    CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
        title,
        body,
        doc_id UNINDEXED,
        tokenize='porter unicode61'
    );";

fn db_err(e: impl std::fmt::Display) -> PitchlensError {
    PitchlensError::Database(e.to_string())
}

/// SQLite-backed content index with FTS5 full-text search.
pub struct SqliteContentIndex {
    conn: Mutex<Connection>,
}

impl SqliteContentIndex {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| db_err(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Content index opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of indexed documents.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(db_err)?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(n as usize)
    }

    /// Fetch a document by id.
    pub fn get(&self, id: &str) -> Result<Option<IndexedDocument>> {
        let conn = self.conn.lock().map_err(db_err)?;
        conn.query_row(
            "SELECT id, title, body, source FROM documents WHERE id = ?1",
            params![id],
            |row| {
                Ok(IndexedDocument {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    body: row.get(2)?,
                    source: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    fn upsert(&self, doc: &IndexedDocument) -> Result<()> {
        let mut conn = self.conn.lock().map_err(db_err)?;
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT OR REPLACE INTO documents (id, title, body, source, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![doc.id, doc.title, doc.body, doc.source, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        tx.execute("DELETE FROM documents_fts WHERE doc_id = ?1", params![doc.id])
            .map_err(db_err)?;
        tx.execute(
            "INSERT INTO documents_fts (title, body, doc_id) VALUES (?1, ?2, ?3)",
            params![doc.title, doc.body, doc.id],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)
    }

    fn query(&self, query: &str, limit: usize) -> Result<Vec<IndexHit>> {
        let Some(expr) = match_expression(query) else {
            return Ok(vec![]);
        };

        let conn = self.conn.lock().map_err(db_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT d.id, d.title, d.body, d.indexed_at, f.rank
                 FROM documents_fts f
                 JOIN documents d ON d.id = f.doc_id
                 WHERE documents_fts MATCH ?1
                 ORDER BY f.rank
                 LIMIT ?2",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![expr, limit as i64], |row| {
                Ok(IndexHit {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    body: row.get(2)?,
                    indexed_at: {
                        let ts_str: String = row.get(3)?;
                        DateTime::parse_from_rfc3339(&ts_str)
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now())
                    },
                    rank: row.get(4)?,
                })
            })
            .map_err(db_err)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(db_err)?);
        }
        Ok(results)
    }
}

/// Build an FTS5 expression from free text: every word quoted, OR-joined.
fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(|w| format!("\"{}\"", w.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

impl ContentIndex for SqliteContentIndex {
    fn index(&self, document: IndexedDocument) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.upsert(&document)?;
            debug!(id = %document.id, "Document indexed");
            Ok(())
        })
    }

    fn search(&self, query: &str, limit: usize) -> BoxFuture<'_, Result<Vec<IndexHit>>> {
        let query = query.to_string();
        Box::pin(async move { self.query(&query, limit) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, title: &str, body: &str) -> IndexedDocument {
        IndexedDocument {
            id: id.into(),
            title: title.into(),
            body: body.into(),
            source: None,
        }
    }

    #[tokio::test]
    async fn test_index_and_search() {
        let index = SqliteContentIndex::in_memory().unwrap();
        index
            .index(doc("acme", "Acme pitch", "Acme builds payroll software for clinics."))
            .await
            .unwrap();
        index
            .index(doc("globex", "Globex pitch", "Globex sells industrial robots."))
            .await
            .unwrap();

        let hits = index.search("What does the payroll company do?", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "acme");
    }

    #[tokio::test]
    async fn test_reindex_replaces_document() {
        let index = SqliteContentIndex::in_memory().unwrap();
        index.index(doc("acme", "Acme", "robots")).await.unwrap();
        index.index(doc("acme", "Acme", "payroll")).await.unwrap();

        assert_eq!(index.count().unwrap(), 1);
        assert!(index.search("robots", 5).await.unwrap().is_empty());
        assert_eq!(index.search("payroll", 5).await.unwrap().len(), 1);
        assert_eq!(index.get("acme").unwrap().unwrap().body, "payroll");
    }

    #[tokio::test]
    async fn test_punctuation_only_query_is_empty() {
        let index = SqliteContentIndex::in_memory().unwrap();
        index.index(doc("a", "A", "text")).await.unwrap();
        assert!(index.search("?!", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.db");
        {
            let index = SqliteContentIndex::open(&path).unwrap();
            index.index(doc("acme", "Acme", "fintech platform")).await.unwrap();
        }
        let index = SqliteContentIndex::open(&path).unwrap();
        assert_eq!(index.search("fintech", 5).await.unwrap().len(), 1);
    }

    #[test]
    fn test_match_expression_quotes_terms() {
        assert_eq!(
            match_expression("SaaS, TAM?").as_deref(),
            Some("\"saas\" OR \"tam\"")
        );
        assert_eq!(match_expression("a ?"), None);
    }
}
