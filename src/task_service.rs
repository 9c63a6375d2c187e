use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::error::TaskError;
use crate::models::task::{DeleteConfirmation, Task, TaskInfo, TaskUpdate};

/// CRUD over the `todo` table. Every operation checks out its own pooled
/// connection, which goes back to the pool when the operation returns,
/// fails or times out.
///
/// Existence and name checks run as plain reads; the write that follows is a
/// single autocommit statement, so it waits on SQLite's busy timeout instead of
/// failing a read-to-write lock upgrade. The `UNIQUE` index on `name` settles
/// creates and renames that race past the name check.
#[derive(Clone)]
pub struct TaskService {
    pool: SqlitePool,
    timeout: Duration,
}

impl TaskService {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub async fn create(&self, task: Task) -> Result<TaskInfo, TaskError> {
        let name = validate_name(&task.name)?;
        with_timeout(self.timeout, insert_task(&self.pool, name, task.time)).await
    }

    /// Negative limits are treated as zero.
    pub async fn list(&self, limit: i64) -> Result<Vec<TaskInfo>, TaskError> {
        with_timeout(self.timeout, select_tasks(&self.pool, limit.max(0))).await
    }

    pub async fn get(&self, task_id: i64) -> Result<TaskInfo, TaskError> {
        with_timeout(self.timeout, select_task(&self.pool, task_id)).await
    }

    /// Partial update: fields missing from `patch` keep their stored value.
    /// Returns the merged record, which is what was written.
    pub async fn update(&self, task_id: i64, patch: TaskUpdate) -> Result<TaskInfo, TaskError> {
        let patch = TaskUpdate {
            name: patch.name.as_deref().map(validate_name).transpose()?,
            time: patch.time,
        };
        with_timeout(self.timeout, apply_update(&self.pool, task_id, patch)).await
    }

    pub async fn delete(&self, task_id: i64) -> Result<DeleteConfirmation, TaskError> {
        with_timeout(self.timeout, remove_task(&self.pool, task_id)).await
    }
}

async fn insert_task(pool: &SqlitePool, name: String, time: i64) -> Result<TaskInfo, TaskError> {
    let mut conn = pool.acquire().await?;

    if find_by_name(&mut conn, &name).await?.is_some() {
        warn!("Rejected duplicate task name {:?}", name);
        return Err(TaskError::Conflict { name });
    }

    insert_row(&mut conn, &name, time).await
}

async fn insert_row(
    conn: &mut SqliteConnection,
    name: &str,
    time: i64,
) -> Result<TaskInfo, TaskError> {
    sqlx::query_as::<_, TaskInfo>(
        "INSERT INTO todo (name, time) VALUES (?, ?) RETURNING todo_id, name, time",
    )
    .bind(name)
    .bind(time)
    .fetch_one(conn)
    .await
    .map_err(|e| TaskError::from_store(e, name))
}

async fn select_tasks(pool: &SqlitePool, limit: i64) -> Result<Vec<TaskInfo>, TaskError> {
    let tasks = sqlx::query_as::<_, TaskInfo>(
        "SELECT todo_id, name, time FROM todo ORDER BY todo_id LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(tasks)
}

async fn select_task(pool: &SqlitePool, task_id: i64) -> Result<TaskInfo, TaskError> {
    let mut conn = pool.acquire().await?;
    find_by_id(&mut conn, task_id)
        .await?
        .ok_or(TaskError::NotFound { task_id })
}

async fn apply_update(
    pool: &SqlitePool,
    task_id: i64,
    patch: TaskUpdate,
) -> Result<TaskInfo, TaskError> {
    let mut conn = pool.acquire().await?;

    let current = find_by_id(&mut conn, task_id)
        .await?
        .ok_or(TaskError::NotFound { task_id })?;
    let merged = patch.apply_to(&current);

    if merged.name != current.name {
        if let Some(other) = find_by_name(&mut conn, &merged.name).await? {
            debug!("Name {:?} already used by task {}", merged.name, other.todo_id);
            return Err(TaskError::Conflict { name: merged.name });
        }
    }

    update_row(&mut conn, task_id, &patch)
        .await?
        .ok_or(TaskError::NotFound { task_id })
}

/// Writes only the fields present in `patch` and returns the stored row, or
/// `None` when the task no longer exists.
async fn update_row(
    conn: &mut SqliteConnection,
    task_id: i64,
    patch: &TaskUpdate,
) -> Result<Option<TaskInfo>, TaskError> {
    sqlx::query_as::<_, TaskInfo>(
        "UPDATE todo SET name = COALESCE(?, name), time = COALESCE(?, time) \
         WHERE todo_id = ? RETURNING todo_id, name, time",
    )
    .bind(patch.name.as_deref())
    .bind(patch.time)
    .bind(task_id)
    .fetch_optional(conn)
    .await
    .map_err(|e| TaskError::from_store(e, patch.name.as_deref().unwrap_or_default()))
}

async fn remove_task(pool: &SqlitePool, task_id: i64) -> Result<DeleteConfirmation, TaskError> {
    let mut conn = pool.acquire().await?;

    if find_by_id(&mut conn, task_id).await?.is_none() {
        return Err(TaskError::NotFound { task_id });
    }

    let deleted = sqlx::query("DELETE FROM todo WHERE todo_id = ?")
        .bind(task_id)
        .execute(&mut *conn)
        .await?;

    // a concurrent delete may have won since the check
    if deleted.rows_affected() == 0 {
        return Err(TaskError::NotFound { task_id });
    }
    Ok(DeleteConfirmation::deleted())
}

fn validate_name(name: &str) -> Result<String, TaskError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TaskError::Validation("Task name must not be empty.".to_string()));
    }
    Ok(name.to_string())
}

async fn find_by_id(
    conn: &mut SqliteConnection,
    task_id: i64,
) -> Result<Option<TaskInfo>, sqlx::Error> {
    sqlx::query_as::<_, TaskInfo>("SELECT todo_id, name, time FROM todo WHERE todo_id = ?")
        .bind(task_id)
        .fetch_optional(conn)
        .await
}

async fn find_by_name(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<Option<TaskInfo>, sqlx::Error> {
    sqlx::query_as::<_, TaskInfo>("SELECT todo_id, name, time FROM todo WHERE name = ?")
        .bind(name)
        .fetch_optional(conn)
        .await
}

/// Bounds a store operation. When the limit is hit the operation future is
/// dropped, which releases its connection and rolls back any open transaction.
async fn with_timeout<T, F>(limit: Duration, operation: F) -> Result<T, TaskError>
where
    F: Future<Output = Result<T, TaskError>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Task store operation exceeded {:?}", limit);
            Err(TaskError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{file_pool, memory_pool};
    use tempfile::TempDir;

    async fn service() -> TaskService {
        TaskService::new(memory_pool().await, Duration::from_secs(5))
    }

    fn task(name: &str, time: i64) -> Task {
        Task { name: name.to_string(), time }
    }

    #[actix_web::test]
    async fn create_assigns_fresh_ids() {
        let svc = service().await;
        let a = svc.create(task("dishes", 10)).await.unwrap();
        let b = svc.create(task("laundry", 20)).await.unwrap();
        assert_ne!(a.todo_id, b.todo_id);
        assert_eq!(svc.get(a.todo_id).await.unwrap(), a);
        assert_eq!(svc.get(b.todo_id).await.unwrap(), b);
    }

    #[actix_web::test]
    async fn create_rejects_taken_name() {
        let svc = service().await;
        svc.create(task("dishes", 10)).await.unwrap();
        let err = svc.create(task("dishes", 99)).await.unwrap_err();
        assert!(matches!(err, TaskError::Conflict { ref name } if name == "dishes"));
        assert_eq!(svc.list(100).await.unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn create_rejects_blank_name() {
        let svc = service().await;
        let err = svc.create(task("   ", 1)).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[actix_web::test]
    async fn list_honours_limit() {
        let svc = service().await;
        for i in 0..5 {
            svc.create(task(&format!("task {i}"), i)).await.unwrap();
        }
        assert_eq!(svc.list(3).await.unwrap().len(), 3);
        assert_eq!(svc.list(100).await.unwrap().len(), 5);
        assert!(svc.list(0).await.unwrap().is_empty());
        assert!(svc.list(-1).await.unwrap().is_empty());

        let ids: Vec<i64> = svc.list(100).await.unwrap().iter().map(|t| t.todo_id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[actix_web::test]
    async fn missing_ids_are_not_found() {
        let svc = service().await;
        assert!(matches!(svc.get(42).await, Err(TaskError::NotFound { task_id: 42 })));
        assert!(matches!(
            svc.update(42, TaskUpdate::default()).await,
            Err(TaskError::NotFound { task_id: 42 })
        ));
        assert!(matches!(svc.delete(42).await, Err(TaskError::NotFound { task_id: 42 })));
    }

    #[actix_web::test]
    async fn update_keeps_omitted_fields_across_repeated_updates() {
        let svc = service().await;
        let created = svc.create(task("read book", 30)).await.unwrap();

        let patch = TaskUpdate { name: None, time: Some(45) };
        let updated = svc.update(created.todo_id, patch).await.unwrap();
        assert_eq!(updated, TaskInfo { todo_id: created.todo_id, name: "read book".into(), time: 45 });
        assert_eq!(svc.get(created.todo_id).await.unwrap(), updated);

        let patch = TaskUpdate { name: Some("read two books".into()), time: None };
        let updated = svc.update(created.todo_id, patch).await.unwrap();
        assert_eq!(updated.time, 45);
        assert_eq!(svc.get(created.todo_id).await.unwrap(), updated);
    }

    #[actix_web::test]
    async fn update_to_another_tasks_name_conflicts() {
        let svc = service().await;
        svc.create(task("first", 1)).await.unwrap();
        let second = svc.create(task("second", 2)).await.unwrap();

        let patch = TaskUpdate { name: Some("first".into()), time: None };
        let err = svc.update(second.todo_id, patch).await.unwrap_err();
        assert!(matches!(err, TaskError::Conflict { .. }));
        assert_eq!(svc.get(second.todo_id).await.unwrap().name, "second");

        // renaming to its own name is not a conflict
        let patch = TaskUpdate { name: Some("second".into()), time: Some(5) };
        assert_eq!(svc.update(second.todo_id, patch).await.unwrap().time, 5);
    }

    #[actix_web::test]
    async fn deleted_ids_are_never_reused() {
        let svc = service().await;
        let first = svc.create(task("temporary", 1)).await.unwrap();
        assert_eq!(svc.delete(first.todo_id).await.unwrap(), DeleteConfirmation::deleted());
        assert!(matches!(svc.get(first.todo_id).await, Err(TaskError::NotFound { .. })));

        let next = svc.create(task("temporary", 2)).await.unwrap();
        assert!(next.todo_id > first.todo_id);
    }

    async fn file_service(dir: &TempDir) -> TaskService {
        TaskService::new(file_pool(dir.path()).await, Duration::from_secs(5))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_with_distinct_names_all_succeed() {
        let dir = TempDir::new().unwrap();
        let svc = file_service(&dir).await;

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let svc = svc.clone();
                tokio::spawn(async move { svc.create(task(&format!("chore {i}"), i)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(svc.list(100).await.unwrap().len(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_with_same_name_admit_exactly_one() {
        let dir = TempDir::new().unwrap();
        let svc = file_service(&dir).await;

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let svc = svc.clone();
                tokio::spawn(async move { svc.create(task("race", i)).await })
            })
            .collect();

        let (mut created, mut conflicts) = (0, 0);
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(TaskError::Conflict { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!((created, conflicts), (1, 9));
        assert_eq!(svc.list(100).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_and_deletes_do_not_fail_the_store() {
        let dir = TempDir::new().unwrap();
        let svc = file_service(&dir).await;
        let mut ids = Vec::new();
        for i in 0..10 {
            ids.push(svc.create(task(&format!("item {i}"), i)).await.unwrap().todo_id);
        }

        let handles: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(i, &id)| {
                let svc = svc.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        svc.update(id, TaskUpdate { name: None, time: Some(100) })
                            .await
                            .map(|_| ())
                    } else {
                        svc.delete(id).await.map(|_| ())
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let remaining = svc.list(100).await.unwrap();
        assert_eq!(remaining.len(), 5);
        assert!(remaining.iter().all(|t| t.time == 100));
    }

    #[actix_web::test]
    async fn unique_index_violation_is_a_conflict() {
        let pool = memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        insert_row(&mut conn, "taken", 1).await.unwrap();
        let other = insert_row(&mut conn, "other", 2).await.unwrap();

        let err = insert_row(&mut conn, "taken", 3).await.unwrap_err();
        assert!(matches!(err, TaskError::Conflict { ref name } if name == "taken"));

        let rename = TaskUpdate { name: Some("taken".into()), time: None };
        let err = update_row(&mut conn, other.todo_id, &rename).await.unwrap_err();
        assert!(matches!(err, TaskError::Conflict { ref name } if name == "taken"));
    }

    #[actix_web::test]
    async fn update_row_of_vanished_task_is_none() {
        let pool = memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let patch = TaskUpdate { name: None, time: Some(1) };
        assert!(update_row(&mut conn, 77, &patch).await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn timeout_surfaces_as_timeout_error() {
        let result: Result<(), TaskError> =
            with_timeout(Duration::from_millis(10), std::future::pending()).await;
        assert!(matches!(result, Err(TaskError::Timeout)));
    }

    #[actix_web::test]
    async fn failed_operations_release_their_connection() {
        // The test pool has a single connection, so a leaked checkout would
        // make every later call time out.
        let svc = TaskService::new(memory_pool().await, Duration::from_secs(2));
        svc.create(task("only", 1)).await.unwrap();
        for _ in 0..3 {
            assert!(svc.create(task("only", 1)).await.is_err());
            assert!(svc.get(999).await.is_err());
            assert!(svc.delete(999).await.is_err());
        }
        assert_eq!(svc.list(10).await.unwrap().len(), 1);
    }
}
