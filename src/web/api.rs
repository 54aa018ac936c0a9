//! Defines the Axum API routes and handlers.

use crate::catalog::Catalog;
use crate::command::Command;
use crate::coordinator::{CommandCoordinator, CommandOutcome};
use crate::error::PrinterError;
use crate::printer::{PrinterDescriptor, PrinterId, PrinterStatus, DEFAULT_MOONRAKER_PORT};
use crate::registry::PrinterRegistry;
use crate::snapshot::{StateSnapshotService, StateSubscription};
use crate::uploads::GcodeStore;
use crate::web::catalog_api;
use crate::web::models::{
    AddPrinterRequest, AddVirtualPrinterRequest, EmergencyStopRequest, HomeRequest, MoveRequest, PrinterQuery,
    PrinterSummary, RawCommandRequest, RegistrationResponse, TemperatureRequest,
};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, patch, post},
    Json, Router,
};
use futures_core::Stream;
use std::convert::Infallible;
use std::sync::Arc;

/// Upper bound for a single G-code upload.
const MAX_GCODE_UPLOAD: usize = 512 * 1024 * 1024;

/// Helper to create a JSON error response with a message and status code
pub(crate) fn json_error(message: &str, status: StatusCode) -> Response {
    (status, Json(serde_json::json!({ "success": false, "message": message }))).into_response()
}

pub(crate) fn printer_error(error: PrinterError) -> Response {
    let status = match &error {
        PrinterError::NotFound(_) => StatusCode::NOT_FOUND,
        PrinterError::InUse(_) | PrinterError::Busy(_) => StatusCode::CONFLICT,
        PrinterError::InvalidDescriptor(_) => StatusCode::BAD_REQUEST,
        PrinterError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PrinterError::DeviceError(_) => StatusCode::BAD_GATEWAY,
    };
    json_error(&error.to_string(), status)
}

pub struct AppStateInner {
    pub registry: Arc<PrinterRegistry>,
    pub coordinator: CommandCoordinator,
    pub snapshots: StateSnapshotService,
    pub catalog: Catalog,
    pub uploads: GcodeStore,
}
pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn new(registry: Arc<PrinterRegistry>, catalog: Catalog, uploads: GcodeStore, console_history: usize) -> AppState {
        Arc::new(Self {
            coordinator: CommandCoordinator::new(registry.clone(), console_history),
            snapshots: StateSnapshotService::new(registry.clone()),
            registry,
            catalog,
            uploads,
        })
    }
}

/// Creates the Axum router with all the API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/printers", get(list_printers).post(add_printer))
        .route("/api/printers/virtual", post(add_virtual_printer))
        .route("/api/printers/{id}", delete(remove_printer))
        .route("/api/state", get(get_state))
        .route("/api/state/stream", get(state_stream))
        .route("/api/command", post(send_command))
        .route("/api/home", post(home_axis))
        .route("/api/temperature", post(set_temperature))
        .route("/api/move", post(move_axis))
        .route("/api/emergency_stop", post(emergency_stop))
        .route("/api/console", get(get_console))
        .route("/api/projects", get(catalog_api::list_projects).post(catalog_api::create_project))
        .route(
            "/api/projects/{id}",
            patch(catalog_api::update_project).delete(catalog_api::delete_project),
        )
        .route("/api/coils", get(catalog_api::list_coils).post(catalog_api::create_coil))
        .route(
            "/api/coils/{id}",
            patch(catalog_api::update_coil).delete(catalog_api::delete_coil),
        )
        .route("/api/tasks", get(catalog_api::list_tasks).post(catalog_api::create_task))
        .route(
            "/api/tasks/{id}",
            get(catalog_api::get_task)
                .patch(catalog_api::update_task)
                .delete(catalog_api::delete_task),
        )
        .route(
            "/api/tasks/{id}/gcode",
            get(catalog_api::download_gcode)
                .post(catalog_api::upload_gcode)
                .delete(catalog_api::remove_gcode)
                .layer(DefaultBodyLimit::max(MAX_GCODE_UPLOAD)),
        )
        .with_state(state)
}

/// Dashboard cards, in registration order.
async fn list_printers(State(state): State<AppState>) -> Json<Vec<PrinterSummary>> {
    let mut printers = Vec::new();
    for session in state.registry.sessions() {
        let mut summary = PrinterSummary::new(session.printer(), &session.current_state());
        if let Some((task, coil)) = state.catalog.printing_on(session.id()).await {
            summary.model = task
                .name
                .clone()
                .or_else(|| task.gcode.as_ref().map(|g| g.original_name.clone()));
            summary.material = coil.and_then(|c| c.material);
        }
        printers.push(summary);
    }
    Json(printers)
}

fn registered(result: Result<PrinterId, PrinterError>) -> Json<RegistrationResponse> {
    Json(match result {
        Ok(id) => RegistrationResponse {
            success: true,
            message: format!("Printer {} registered", id),
            id: Some(id),
        },
        Err(e) => {
            tracing::warn!("Printer registration rejected: {}", e);
            RegistrationResponse {
                success: false,
                message: e.to_string(),
                id: None,
            }
        }
    })
}

async fn add_printer(
    State(state): State<AppState>,
    payload: Result<Json<AddPrinterRequest>, JsonRejection>,
) -> Json<RegistrationResponse> {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => return registered(Err(PrinterError::InvalidDescriptor(e.body_text()))),
    };
    let descriptor = PrinterDescriptor::Physical {
        name: req.name,
        host: req.host,
        port: req.port.unwrap_or(DEFAULT_MOONRAKER_PORT),
        last_service: req.last_service,
    };
    registered(state.registry.register(descriptor))
}

async fn add_virtual_printer(
    State(state): State<AppState>,
    payload: Result<Json<AddVirtualPrinterRequest>, JsonRejection>,
) -> Json<RegistrationResponse> {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => return registered(Err(PrinterError::InvalidDescriptor(e.body_text()))),
    };
    let status = match req.status.as_deref().map(str::parse::<PrinterStatus>).transpose() {
        Ok(status) => status.unwrap_or_default(),
        Err(e) => return registered(Err(PrinterError::InvalidDescriptor(e))),
    };
    let descriptor = PrinterDescriptor::Virtual {
        name: req.name,
        status,
        last_service: req.last_service,
    };
    registered(state.registry.register(descriptor))
}

async fn remove_printer(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    let id = PrinterId(id);
    match state.registry.remove(id) {
        Ok(printer) => {
            state.coordinator.forget(id);
            Json(CommandOutcome::ok(format!("Printer {} removed", printer.name))).into_response()
        }
        Err(e) => printer_error(e),
    }
}

async fn get_state(State(state): State<AppState>, Query(query): Query<PrinterQuery>) -> Response {
    match state.snapshots.snapshot_or_default(query.printer_id) {
        Ok((_, printer_state)) => Json(printer_state).into_response(),
        Err(e) => printer_error(e),
    }
}

/// Pushes a `state` event on every change, and at least once per liveness
/// period so a silent printer is seen going offline.
fn state_events(subscription: StateSubscription) -> impl Stream<Item = Result<Event, Infallible>> {
    let StateSubscription { printer_id, mut receiver, liveness } = subscription;
    async_stream::stream! {
        loop {
            let current = receiver.borrow_and_update().resolve(liveness);
            match Event::default().event("state").json_data(&current) {
                Ok(event) => yield Ok::<Event, Infallible>(event),
                Err(e) => {
                    tracing::warn!(printer_id = %printer_id, "Failed to encode state event: {}", e);
                    break;
                }
            }
            tokio::select! {
                changed = receiver.changed() => {
                    if changed.is_err() {
                        tracing::debug!(printer_id = %printer_id, "State stream closed");
                        break;
                    }
                }
                _ = tokio::time::sleep(liveness) => {}
            }
        }
    }
}

async fn state_stream(State(state): State<AppState>, Query(query): Query<PrinterQuery>) -> Response {
    match state.snapshots.subscribe(query.printer_id) {
        Ok(subscription) => Sse::new(state_events(subscription))
            .keep_alive(KeepAlive::default())
            .into_response(),
        Err(e) => printer_error(e),
    }
}

/// Runs a parsed command, or reports why the request could not be turned into one.
async fn dispatch(state: &AppState, printer_id: Option<PrinterId>, command: Result<Command, String>) -> Json<CommandOutcome> {
    match command {
        Ok(command) => Json(state.coordinator.execute_on(printer_id, command).await),
        Err(message) => Json(CommandOutcome::failed(message)),
    }
}

fn rejected(rejection: JsonRejection) -> Json<CommandOutcome> {
    Json(CommandOutcome::failed(rejection.body_text()))
}

async fn send_command(
    State(state): State<AppState>,
    payload: Result<Json<RawCommandRequest>, JsonRejection>,
) -> Json<CommandOutcome> {
    match payload {
        Ok(Json(req)) => dispatch(&state, req.printer_id, Command::raw(&req.command)).await,
        Err(e) => rejected(e),
    }
}

async fn home_axis(
    State(state): State<AppState>,
    payload: Result<Json<HomeRequest>, JsonRejection>,
) -> Json<CommandOutcome> {
    match payload {
        Ok(Json(req)) => dispatch(&state, req.printer_id, Command::home(&req.axis)).await,
        Err(e) => rejected(e),
    }
}

async fn set_temperature(
    State(state): State<AppState>,
    payload: Result<Json<TemperatureRequest>, JsonRejection>,
) -> Json<CommandOutcome> {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => return rejected(e),
    };
    let command = req
        .temperature
        .ok_or_else(|| "temperature is required".to_string())
        .and_then(|value| Command::set_temperature(&req.target, value));
    dispatch(&state, req.printer_id, command).await
}

async fn move_axis(
    State(state): State<AppState>,
    payload: Result<Json<MoveRequest>, JsonRejection>,
) -> Json<CommandOutcome> {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => return rejected(e),
    };
    let command = req
        .distance
        .ok_or_else(|| "distance is required".to_string())
        .and_then(|distance| Command::jog(&req.axis, distance));
    dispatch(&state, req.printer_id, command).await
}

async fn emergency_stop(State(state): State<AppState>, body: Bytes) -> Json<CommandOutcome> {
    // An empty body stops the default printer.
    let printer_id = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<EmergencyStopRequest>(&body) {
            Ok(req) => req.printer_id,
            Err(e) => return Json(CommandOutcome::failed(format!("Invalid request body: {}", e))),
        }
    };
    dispatch(&state, printer_id, Ok(Command::EmergencyStop)).await
}

async fn get_console(State(state): State<AppState>, Query(query): Query<PrinterQuery>) -> Response {
    match state.registry.resolve(query.printer_id) {
        Ok(session) => Json(state.coordinator.console(session.id())).into_response(),
        Err(e) => printer_error(e),
    }
}
