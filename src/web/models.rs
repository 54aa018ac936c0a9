//! Contains the data models for API requests and responses.

use crate::catalog::{Coil, GcodeFile, Project, Task, TaskStatus};
use crate::printer::{Printer, PrinterId, PrinterKind, PrinterState, PrinterStatus};
use serde::{Deserialize, Serialize};

/// `?printer_id=` on read endpoints; absent means the first printer.
#[derive(Debug, Default, Deserialize)]
pub struct PrinterQuery {
    pub printer_id: Option<PrinterId>,
}

/// Registers a Moonraker-backed printer.
#[derive(Debug, Deserialize)]
pub struct AddPrinterRequest {
    #[serde(default)]
    pub host: String,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub last_service: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddVirtualPrinterRequest {
    #[serde(default)]
    pub name: String,
    pub status: Option<String>,
    pub last_service: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<PrinterId>,
}

/// Raw G-code, possibly several lines.
#[derive(Debug, Deserialize)]
pub struct RawCommandRequest {
    #[serde(default)]
    pub command: String,
    pub printer_id: Option<PrinterId>,
}

#[derive(Debug, Deserialize)]
pub struct HomeRequest {
    #[serde(default = "default_home_axis")]
    pub axis: String,
    pub printer_id: Option<PrinterId>,
}

fn default_home_axis() -> String {
    "all".to_string()
}

#[derive(Debug, Deserialize)]
pub struct TemperatureRequest {
    #[serde(default)]
    pub target: String,
    pub temperature: Option<f64>,
    pub printer_id: Option<PrinterId>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    #[serde(default)]
    pub axis: String,
    pub distance: Option<f64>,
    pub printer_id: Option<PrinterId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmergencyStopRequest {
    pub printer_id: Option<PrinterId>,
}

/// One dashboard card.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterSummary {
    pub id: PrinterId,
    pub name: String,
    pub kind: PrinterKind,
    pub status: &'static str,
    pub percent: u8,
    pub material: Option<String>,
    pub model: Option<String>,
    pub last_served: Option<String>,
}

impl PrinterSummary {
    pub fn new(printer: &Printer, state: &PrinterState) -> Self {
        Self {
            id: printer.id,
            name: printer.name.clone(),
            kind: printer.kind,
            status: dashboard_status(state.status),
            percent: state.percent(),
            material: None,
            model: None,
            last_served: printer.last_service.clone(),
        }
    }
}

/// The dashboard calls a printing machine "work".
fn dashboard_status(status: PrinterStatus) -> &'static str {
    match status {
        PrinterStatus::Printing => "work",
        other => other.as_str(),
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectRef {
    pub id: u64,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Serialize)]
pub struct PrinterRef {
    pub id: PrinterId,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CoilRef {
    pub id: u64,
    pub name: String,
    pub material: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GcodeView {
    pub has_file: bool,
    pub download_url: Option<String>,
    pub original_name: Option<String>,
    pub size: Option<u64>,
}

impl GcodeView {
    pub fn new(task_id: u64, file: Option<&GcodeFile>) -> Self {
        match file {
            Some(file) => Self {
                has_file: true,
                download_url: Some(format!("/api/tasks/{}/gcode", task_id)),
                original_name: Some(file.original_name.clone()),
                size: Some(file.size),
            },
            None => Self {
                has_file: false,
                download_url: None,
                original_name: None,
                size: None,
            },
        }
    }
}

/// Upload/removal answer: the client reads both `success` and the file fields.
#[derive(Debug, Serialize)]
pub struct GcodeResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub gcode: GcodeView,
}

/// A task with its references resolved for display.
#[derive(Debug, Serialize)]
pub struct TaskView {
    pub id: u64,
    pub name: Option<String>,
    pub project_id: u64,
    pub printer_id: Option<PrinterId>,
    pub coil_id: Option<u64>,
    pub status: TaskStatus,
    pub progress: u8,
    pub material_amount: Option<f64>,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    pub notes: Option<String>,
    pub project: Option<ProjectRef>,
    pub printer: Option<PrinterRef>,
    pub coil: Option<CoilRef>,
    pub gcode: GcodeView,
}

impl TaskView {
    pub fn new(task: Task, project: Option<&Project>, printer: Option<&Printer>, coil: Option<&Coil>) -> Self {
        let gcode = GcodeView::new(task.id, task.gcode.as_ref());
        Self {
            id: task.id,
            name: task.name,
            project_id: task.project_id,
            printer_id: task.printer_id,
            coil_id: task.coil_id,
            status: task.status,
            progress: task.progress,
            material_amount: task.material_amount,
            time_start: task.time_start,
            time_end: task.time_end,
            notes: task.notes,
            project: project.map(|p| ProjectRef {
                id: p.id,
                name: p.name.clone(),
                color: p.color.clone(),
            }),
            printer: printer.map(|p| PrinterRef {
                id: p.id,
                name: p.name.clone(),
            }),
            coil: coil.map(|c| CoilRef {
                id: c.id,
                name: c.name.clone(),
                material: c.material.clone(),
            }),
            gcode,
        }
    }
}
