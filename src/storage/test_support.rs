//! In-memory store fixtures shared by unit tests.

use super::DocumentStore;
use sqlx::sqlite::SqlitePoolOptions;

/// Fresh in-memory database with the tables the extraction step creates.
pub(crate) async fn memory_store() -> DocumentStore {
    // A single long-lived connection keeps the in-memory database alive.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    sqlx::query("CREATE TABLE guidelines (id INTEGER PRIMARY KEY, extracted_text TEXT)")
        .execute(&pool)
        .await
        .expect("guidelines table");
    sqlx::query(
        "CREATE TABLE prompts (promptid INTEGER PRIMARY KEY AUTOINCREMENT, prompt_text TEXT)",
    )
    .execute(&pool)
    .await
    .expect("prompts table");
    DocumentStore::from_pool(pool)
}

pub(crate) async fn insert_document(store: &DocumentStore, id: i64, text: Option<&str>) -> i64 {
    sqlx::query("INSERT INTO guidelines (id, extracted_text) VALUES (?1, ?2)")
        .bind(id)
        .bind(text)
        .execute(store.pool())
        .await
        .expect("insert document");
    id
}

pub(crate) async fn insert_prompt(store: &DocumentStore, text: &str) {
    sqlx::query("INSERT INTO prompts (prompt_text) VALUES (?1)")
        .bind(text)
        .execute(store.pool())
        .await
        .expect("insert prompt");
}

/// `(compressed_text, summary_status, summary_attempts)` of a document.
pub(crate) async fn row_state(
    store: &DocumentStore,
    id: i64,
) -> (Option<String>, Option<String>, i64) {
    sqlx::query_as(
        "SELECT compressed_text, summary_status, summary_attempts FROM guidelines WHERE id = ?1",
    )
    .bind(id)
    .fetch_one(store.pool())
    .await
    .expect("row state")
}
