mod app_state;
mod config;
mod db;
mod error;
mod models;
mod task;
mod task_service;

use std::io;

use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{error, info};

use crate::app_state::AppState;
use crate::db::TaskStore;
use crate::task_service::TaskService;

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config = config::Config::from_env();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let store = TaskStore::init(&config).await.map_err(|e| {
        error!("Failed to open task store {}: {}", config.database_url, e);
        io::Error::other(e)
    })?;
    let tasks = TaskService::new(store.pool, config.store_timeout);

    info!("Server running at http://{}", config.bind_address);
    info!("Allowed CORS Origin: {}", config.frontend_origin);

    let frontend_origin = config.frontend_origin.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![http::header::CONTENT_TYPE, http::header::ACCEPT])
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(AppState { tasks: tasks.clone() }))
            .configure(task::configure)
    })
    .bind(&config.bind_address)?
    .run()
    .await
}
