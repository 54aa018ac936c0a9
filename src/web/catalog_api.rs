//! Handlers for the planning screen: projects, coils, tasks and their G-code.

use crate::catalog::{CatalogError, Coil, CoilInput, Project, ProjectInput, Task, TaskInput};
use crate::coordinator::CommandOutcome;
use crate::printer::{Printer, PrinterId};
use crate::uploads::UploadError;
use crate::web::api::{json_error, AppState};
use crate::web::models::{GcodeResponse, GcodeView, TaskView};
use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;

fn catalog_error(error: CatalogError) -> Response {
    let status = match &error {
        CatalogError::NotFound { .. } => StatusCode::NOT_FOUND,
        CatalogError::MissingField(_) | CatalogError::Invalid(_) => StatusCode::BAD_REQUEST,
        CatalogError::InUse(_) => StatusCode::CONFLICT,
        CatalogError::Storage(_) => {
            tracing::error!("{}", error);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    json_error(&error.to_string(), status)
}

fn upload_error(error: UploadError) -> Response {
    let status = match &error {
        UploadError::Empty | UploadError::InvalidName(_) => StatusCode::BAD_REQUEST,
        UploadError::Missing(_) => StatusCode::NOT_FOUND,
        UploadError::Io(_) => {
            tracing::error!("G-code storage failed: {}", error);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    json_error(&error.to_string(), status)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| json_error(&e.body_text(), e.status()))
}

fn check_printer(state: &AppState, printer_id: Option<PrinterId>) -> Result<(), Response> {
    match printer_id {
        Some(id) if !state.registry.contains(id) => {
            Err(json_error(&format!("Printer {} not found", id), StatusCode::NOT_FOUND))
        }
        _ => Ok(()),
    }
}

// --- projects ---

pub async fn list_projects(State(state): State<AppState>) -> Json<Vec<Project>> {
    Json(state.catalog.projects().await)
}

pub async fn create_project(
    State(state): State<AppState>,
    payload: Result<Json<ProjectInput>, JsonRejection>,
) -> Result<Json<Project>, Response> {
    let input = body(payload)?;
    state.catalog.create_project(input).await.map(Json).map_err(catalog_error)
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    payload: Result<Json<ProjectInput>, JsonRejection>,
) -> Result<Json<Project>, Response> {
    let input = body(payload)?;
    state.catalog.update_project(id, input).await.map(Json).map_err(catalog_error)
}

pub async fn delete_project(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Json<CommandOutcome>, Response> {
    let project = state.catalog.delete_project(id).await.map_err(catalog_error)?;
    Ok(Json(CommandOutcome::ok(format!("Project {} deleted", project.name))))
}

// --- coils ---

pub async fn list_coils(State(state): State<AppState>) -> Json<Vec<Coil>> {
    Json(state.catalog.coils().await)
}

pub async fn create_coil(
    State(state): State<AppState>,
    payload: Result<Json<CoilInput>, JsonRejection>,
) -> Result<Json<Coil>, Response> {
    let input = body(payload)?;
    state.catalog.create_coil(input).await.map(Json).map_err(catalog_error)
}

pub async fn update_coil(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    payload: Result<Json<CoilInput>, JsonRejection>,
) -> Result<Json<Coil>, Response> {
    let input = body(payload)?;
    state.catalog.update_coil(id, input).await.map(Json).map_err(catalog_error)
}

pub async fn delete_coil(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Json<CommandOutcome>, Response> {
    let coil = state.catalog.delete_coil(id).await.map_err(catalog_error)?;
    Ok(Json(CommandOutcome::ok(format!("Coil {} deleted", coil.name))))
}

// --- tasks ---

/// Resolves project, printer and coil references for display.
async fn task_views(state: &AppState, tasks: Vec<Task>) -> Vec<TaskView> {
    let projects: HashMap<u64, Project> = state.catalog.projects().await.into_iter().map(|p| (p.id, p)).collect();
    let coils: HashMap<u64, Coil> = state.catalog.coils().await.into_iter().map(|c| (c.id, c)).collect();
    let printers: HashMap<PrinterId, Printer> = state.registry.list().into_iter().map(|p| (p.id, p)).collect();
    tasks
        .into_iter()
        .map(|task| {
            let project = projects.get(&task.project_id);
            let printer = task.printer_id.and_then(|id| printers.get(&id));
            let coil = task.coil_id.and_then(|id| coils.get(&id));
            TaskView::new(task, project, printer, coil)
        })
        .collect()
}

async fn task_view(state: &AppState, task: Task) -> Json<TaskView> {
    let mut views = task_views(state, vec![task]).await;
    Json(views.remove(0))
}

pub async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskView>> {
    let tasks = state.catalog.tasks().await;
    Json(task_views(&state, tasks).await)
}

pub async fn get_task(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Json<TaskView>, Response> {
    let task = state.catalog.task(id).await.map_err(catalog_error)?;
    Ok(task_view(&state, task).await)
}

pub async fn create_task(
    State(state): State<AppState>,
    payload: Result<Json<TaskInput>, JsonRejection>,
) -> Result<Json<TaskView>, Response> {
    let input = body(payload)?;
    check_printer(&state, input.printer_id)?;
    let task = state.catalog.create_task(input).await.map_err(catalog_error)?;
    Ok(task_view(&state, task).await)
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    payload: Result<Json<TaskInput>, JsonRejection>,
) -> Result<Json<TaskView>, Response> {
    let input = body(payload)?;
    check_printer(&state, input.printer_id)?;
    let task = state.catalog.update_task(id, input).await.map_err(catalog_error)?;
    Ok(task_view(&state, task).await)
}

pub async fn delete_task(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Json<CommandOutcome>, Response> {
    let task = state.catalog.delete_task(id).await.map_err(catalog_error)?;
    if let Some(file) = &task.gcode {
        if let Err(e) = state.uploads.remove(file).await {
            tracing::warn!(task_id = id, "Failed to remove G-code of deleted task: {}", e);
        }
    }
    Ok(Json(CommandOutcome::ok(format!("Task {} deleted", id))))
}

// --- G-code ---

pub async fn upload_gcode(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    mut multipart: Multipart,
) -> Result<Json<GcodeResponse>, Response> {
    state.catalog.task(id).await.map_err(catalog_error)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| json_error(&e.body_text(), e.status()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload.gcode").to_string();
        let bytes = field.bytes().await.map_err(|e| json_error(&e.body_text(), e.status()))?;
        upload = Some((name, bytes));
        break;
    }
    let Some((name, bytes)) = upload else {
        return Err(json_error("Multipart field 'file' is required", StatusCode::BAD_REQUEST));
    };

    let file = state.uploads.save(&name, &bytes).await.map_err(upload_error)?;
    match state.catalog.set_task_gcode(id, Some(file.clone())).await {
        Ok(previous) => {
            if let Some(previous) = previous {
                if let Err(e) = state.uploads.remove(&previous).await {
                    tracing::warn!(task_id = id, "Failed to remove replaced G-code: {}", e);
                }
            }
            tracing::info!(task_id = id, size = file.size, "G-code attached to task");
            Ok(Json(GcodeResponse {
                success: true,
                message: format!("{} uploaded", file.original_name),
                gcode: GcodeView::new(id, Some(&file)),
            }))
        }
        Err(e) => {
            // the task vanished or the catalog could not be saved
            if let Err(remove) = state.uploads.remove(&file).await {
                tracing::warn!(task_id = id, "Failed to clean up orphaned upload: {}", remove);
            }
            Err(catalog_error(e))
        }
    }
}

pub async fn download_gcode(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Response, Response> {
    let task = state.catalog.task(id).await.map_err(catalog_error)?;
    let Some(file) = task.gcode else {
        return Err(json_error(&format!("Task {} has no G-code file", id), StatusCode::NOT_FOUND));
    };
    let contents = state.uploads.read(&file).await.map_err(upload_error)?;
    let disposition = format!("attachment; filename=\"{}\"", file.original_name.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, "text/x-gcode".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        contents,
    )
        .into_response())
}

pub async fn remove_gcode(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Json<GcodeResponse>, Response> {
    let previous = state.catalog.set_task_gcode(id, None).await.map_err(catalog_error)?;
    let message = match &previous {
        Some(file) => {
            if let Err(e) = state.uploads.remove(file).await {
                tracing::warn!(task_id = id, "Failed to remove G-code file: {}", e);
            }
            format!("{} removed", file.original_name)
        }
        None => format!("Task {} has no G-code file", id),
    };
    Ok(Json(GcodeResponse {
        success: true,
        message,
        gcode: GcodeView::new(id, None),
    }))
}
