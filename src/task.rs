use actix_web::{web, HttpResponse};
use log::{debug, info};

use crate::app_state::AppState;
use crate::error::TaskError;
use crate::models::task::{ListQuery, Task, TaskUpdate};

/// Registers the task routes along with extractor configs that turn malformed
/// input into 422 responses.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        invalid_request(err.to_string())
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        invalid_request(err.to_string())
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        invalid_request(err.to_string())
    }))
    .service(
        web::scope("/task")
            .route("/", web::post().to(create_task))
            .route("/", web::get().to(list_tasks))
            .route("/{task_id}", web::get().to(get_task))
            .route("/{task_id}", web::put().to(update_task))
            .route("/{task_id}", web::delete().to(delete_task)),
    )
    // Published delete path, kept alongside the /task/{task_id} form.
    .route("/tasks/{task_id}", web::delete().to(delete_task));
}

fn invalid_request(message: String) -> actix_web::Error {
    actix_web::Error::from(TaskError::Validation(message))
}

/// POST /task/
pub async fn create_task(
    data: web::Data<AppState>,
    payload: web::Json<Task>,
) -> Result<HttpResponse, TaskError> {
    debug!("Received create_task request: {:?}", payload);
    let created = data.tasks.create(payload.into_inner()).await?;
    info!("Task created: {}", created.todo_id);
    Ok(HttpResponse::Ok().json(created))
}

/// GET /task/?limit=N
pub async fn list_tasks(
    data: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, TaskError> {
    let tasks = data.tasks.list(query.limit).await?;
    debug!("Listed {} tasks (limit {})", tasks.len(), query.limit);
    Ok(HttpResponse::Ok().json(tasks))
}

/// GET /task/{task_id}
pub async fn get_task(
    data: web::Data<AppState>,
    task_id: web::Path<i64>,
) -> Result<HttpResponse, TaskError> {
    let task = data.tasks.get(task_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(task))
}

/// PUT /task/{task_id}
pub async fn update_task(
    data: web::Data<AppState>,
    task_id: web::Path<i64>,
    payload: web::Json<TaskUpdate>,
) -> Result<HttpResponse, TaskError> {
    let task_id = task_id.into_inner();
    debug!("Received update_task request for {}: {:?}", task_id, payload);
    let updated = data.tasks.update(task_id, payload.into_inner()).await?;
    info!("Task updated: {}", task_id);
    Ok(HttpResponse::Ok().json(updated))
}

/// DELETE /tasks/{task_id} (also /task/{task_id})
pub async fn delete_task(
    data: web::Data<AppState>,
    task_id: web::Path<i64>,
) -> Result<HttpResponse, TaskError> {
    let task_id = task_id.into_inner();
    let confirmation = data.tasks.delete(task_id).await?;
    info!("Task deleted: {}", task_id);
    Ok(HttpResponse::Ok().json(confirmation))
}
