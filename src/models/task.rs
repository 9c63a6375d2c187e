use serde::{Deserialize, Serialize};

pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Request payload for creating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub time: i64,
}

/// A stored task row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskInfo {
    pub todo_id: i64,
    pub name: String,
    pub time: i64,
}

/// Request payload for updating a task. Omitted fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub time: Option<i64>,
}

impl TaskUpdate {
    /// Overlays the provided fields on `current`, keeping its identifier.
    pub fn apply_to(&self, current: &TaskInfo) -> TaskInfo {
        TaskInfo {
            todo_id: current.todo_id,
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            time: self.time.unwrap_or(current.time),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    DEFAULT_LIST_LIMIT
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteConfirmation {
    pub status: String,
    pub message: String,
}

impl DeleteConfirmation {
    pub fn deleted() -> Self {
        Self {
            status: "success".to_string(),
            message: "Task has been deleted".to_string(),
        }
    }
}
