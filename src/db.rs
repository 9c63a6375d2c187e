use log::info;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::config::Config;

const CREATE_TODO_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS todo (
        todo_id     INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT    NOT NULL UNIQUE,
        time        INTEGER NOT NULL
    );
";

pub struct TaskStore {
    pub pool: SqlitePool,
}

impl TaskStore {
    pub async fn init(config: &Config) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.store_timeout)
            .connect(&config.database_url)
            .await?;
        create_tables(&pool).await?;
        info!("Task store ready at {}", config.database_url);
        Ok(TaskStore { pool })
    }
}

/// `AUTOINCREMENT` keeps deleted ids from being handed out again.
pub async fn create_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_TODO_TABLE).execute(pool).await?;
    Ok(())
}

/// Single-connection in-memory store for tests. The connection never expires,
/// otherwise the database would vanish with it.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    create_tables(&pool).await.expect("create todo table");
    pool
}

/// File-backed store under `dir`, opened the way the binary opens it
/// (default pool size and busy timeout).
#[cfg(test)]
pub async fn file_pool(dir: &std::path::Path) -> SqlitePool {
    let url = format!("sqlite://{}?mode=rwc", dir.join("todo.db").display());
    let config = Config::from_vars(|key| (key == "DATABASE_URL").then(|| url.clone()));
    TaskStore::init(&config).await.expect("file-backed sqlite").pool
}
