use crate::task_service::TaskService;

#[derive(Clone)]
pub struct AppState {
    pub tasks: TaskService,
}
