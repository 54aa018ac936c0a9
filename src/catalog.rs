// src/catalog.rs - Tasks, projects and material coils
//
// The planning screen's data. Kept in memory and, when a path is configured,
// mirrored to a JSON file after every successful mutation.
use crate::printer::PrinterId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },
    #[error("Field '{0}' is required")]
    MissingField(&'static str),
    #[error("Invalid value: {0}")]
    Invalid(String),
    #[error("{0}")]
    InUse(String),
    #[error("Catalog storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Queued,
    Printing,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coil {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub material: Option<String>,
    /// Filament left on the coil, grams.
    #[serde(default)]
    pub remains: f64,
}

/// A G-code file attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcodeFile {
    pub stored_name: String,
    pub original_name: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub name: Option<String>,
    pub project_id: u64,
    pub printer_id: Option<PrinterId>,
    pub coil_id: Option<u64>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: u8,
    pub material_amount: Option<f64>,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub gcode: Option<GcodeFile>,
}

/// Create/update body for projects. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectInput {
    pub name: Option<String>,
    pub desc: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoilInput {
    pub name: Option<String>,
    pub material: Option<String>,
    pub remains: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskInput {
    pub name: Option<String>,
    pub project_id: Option<u64>,
    pub printer_id: Option<PrinterId>,
    pub coil_id: Option<u64>,
    pub status: Option<TaskStatus>,
    pub progress: Option<f64>,
    pub material_amount: Option<f64>,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogData {
    #[serde(default)]
    next_project_id: u64,
    #[serde(default)]
    next_coil_id: u64,
    #[serde(default)]
    next_task_id: u64,
    #[serde(default)]
    projects: BTreeMap<u64, Project>,
    #[serde(default)]
    coils: BTreeMap<u64, Coil>,
    #[serde(default)]
    tasks: BTreeMap<u64, Task>,
}

pub struct Catalog {
    data: RwLock<CatalogData>,
    path: Option<PathBuf>,
}

impl Catalog {
    pub fn in_memory() -> Self {
        Self {
            data: RwLock::new(CatalogData::default()),
            path: None,
        }
    }

    /// Opens a file-backed catalog, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CatalogError::Storage(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CatalogData::default(),
            Err(e) => return Err(CatalogError::Storage(format!("{}: {}", path.display(), e))),
        };
        tracing::info!(
            "Catalog loaded from {} ({} projects, {} coils, {} tasks)",
            path.display(),
            data.projects.len(),
            data.coils.len(),
            data.tasks.len()
        );
        Ok(Self {
            data: RwLock::new(data),
            path: Some(path),
        })
    }

    /// Applies `change` to a copy, persists it, then makes it current.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut CatalogData) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let mut data = self.data.write().await;
        let mut next = data.clone();
        let out = change(&mut next)?;
        self.persist(&next).await?;
        *data = next;
        Ok(out)
    }

    async fn persist(&self, data: &CatalogData) -> Result<(), CatalogError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(data).map_err(|e| CatalogError::Storage(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| CatalogError::Storage(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| CatalogError::Storage(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    // --- projects ---

    pub async fn projects(&self) -> Vec<Project> {
        self.data.read().await.projects.values().cloned().collect()
    }

    pub async fn project(&self, id: u64) -> Result<Project, CatalogError> {
        self.data
            .read()
            .await
            .projects
            .get(&id)
            .cloned()
            .ok_or(CatalogError::NotFound { kind: "Project", id })
    }

    pub async fn create_project(&self, input: ProjectInput) -> Result<Project, CatalogError> {
        let name = required(input.name, "name")?;
        let project = self
            .mutate(|data| {
                data.next_project_id += 1;
                let project = Project {
                    id: data.next_project_id,
                    name,
                    desc: input.desc.unwrap_or_default(),
                    color: input.color.unwrap_or_default(),
                };
                data.projects.insert(project.id, project.clone());
                Ok(project)
            })
            .await?;
        tracing::info!(project_id = project.id, "Project created");
        Ok(project)
    }

    pub async fn update_project(&self, id: u64, input: ProjectInput) -> Result<Project, CatalogError> {
        let name = input.name.map(|n| required(Some(n), "name")).transpose()?;
        self.mutate(|data| {
            let project = data
                .projects
                .get_mut(&id)
                .ok_or(CatalogError::NotFound { kind: "Project", id })?;
            if let Some(name) = name {
                project.name = name;
            }
            if let Some(desc) = input.desc {
                project.desc = desc;
            }
            if let Some(color) = input.color {
                project.color = color;
            }
            Ok(project.clone())
        })
        .await
    }

    pub async fn delete_project(&self, id: u64) -> Result<Project, CatalogError> {
        let project = self
            .mutate(|data| {
                let count = data.tasks.values().filter(|t| t.project_id == id).count();
                if data.projects.contains_key(&id) && count > 0 {
                    return Err(CatalogError::InUse(format!("Project {} still has {} task(s)", id, count)));
                }
                data.projects
                    .remove(&id)
                    .ok_or(CatalogError::NotFound { kind: "Project", id })
            })
            .await?;
        tracing::info!(project_id = id, "Project deleted");
        Ok(project)
    }

    // --- coils ---

    pub async fn coils(&self) -> Vec<Coil> {
        self.data.read().await.coils.values().cloned().collect()
    }

    pub async fn coil(&self, id: u64) -> Result<Coil, CatalogError> {
        self.data
            .read()
            .await
            .coils
            .get(&id)
            .cloned()
            .ok_or(CatalogError::NotFound { kind: "Coil", id })
    }

    pub async fn create_coil(&self, input: CoilInput) -> Result<Coil, CatalogError> {
        let name = required(input.name, "name")?;
        let remains = non_negative(input.remains.unwrap_or(0.0), "remains")?;
        self.mutate(|data| {
            data.next_coil_id += 1;
            let coil = Coil {
                id: data.next_coil_id,
                name,
                material: input.material.filter(|m| !m.trim().is_empty()),
                remains,
            };
            data.coils.insert(coil.id, coil.clone());
            Ok(coil)
        })
        .await
    }

    pub async fn update_coil(&self, id: u64, input: CoilInput) -> Result<Coil, CatalogError> {
        let name = input.name.map(|n| required(Some(n), "name")).transpose()?;
        let remains = input.remains.map(|r| non_negative(r, "remains")).transpose()?;
        self.mutate(|data| {
            let coil = data.coils.get_mut(&id).ok_or(CatalogError::NotFound { kind: "Coil", id })?;
            if let Some(name) = name {
                coil.name = name;
            }
            if let Some(material) = input.material {
                coil.material = Some(material).filter(|m| !m.trim().is_empty());
            }
            if let Some(remains) = remains {
                coil.remains = remains;
            }
            Ok(coil.clone())
        })
        .await
    }

    pub async fn delete_coil(&self, id: u64) -> Result<Coil, CatalogError> {
        self.mutate(|data| {
            if data.coils.contains_key(&id) && data.tasks.values().any(|t| t.coil_id == Some(id)) {
                return Err(CatalogError::InUse(format!("Coil {} is assigned to a task", id)));
            }
            data.coils.remove(&id).ok_or(CatalogError::NotFound { kind: "Coil", id })
        })
        .await
    }

    // --- tasks ---

    pub async fn tasks(&self) -> Vec<Task> {
        self.data.read().await.tasks.values().cloned().collect()
    }

    pub async fn task(&self, id: u64) -> Result<Task, CatalogError> {
        self.data
            .read()
            .await
            .tasks
            .get(&id)
            .cloned()
            .ok_or(CatalogError::NotFound { kind: "Task", id })
    }

    /// Creates a task. The caller vouches that `printer_id`, if any, exists.
    pub async fn create_task(&self, input: TaskInput) -> Result<Task, CatalogError> {
        let project_id = input.project_id.ok_or(CatalogError::MissingField("project_id"))?;
        let progress = input.progress.map(progress_percent).transpose()?.unwrap_or(0);
        let task = self
            .mutate(|data| {
                check_references(data, Some(project_id), input.coil_id)?;
                data.next_task_id += 1;
                let task = Task {
                    id: data.next_task_id,
                    name: input.name.filter(|n| !n.trim().is_empty()),
                    project_id,
                    printer_id: input.printer_id,
                    coil_id: input.coil_id,
                    status: input.status.unwrap_or_default(),
                    progress,
                    material_amount: input.material_amount,
                    time_start: input.time_start,
                    time_end: input.time_end,
                    notes: input.notes,
                    gcode: None,
                };
                data.tasks.insert(task.id, task.clone());
                Ok(task)
            })
            .await?;
        tracing::info!(task_id = task.id, project_id, "Task created");
        Ok(task)
    }

    pub async fn update_task(&self, id: u64, input: TaskInput) -> Result<Task, CatalogError> {
        let progress = input.progress.map(progress_percent).transpose()?;
        self.mutate(|data| {
            check_references(data, input.project_id, input.coil_id)?;
            let task = data.tasks.get_mut(&id).ok_or(CatalogError::NotFound { kind: "Task", id })?;
            if let Some(name) = input.name {
                task.name = Some(name).filter(|n| !n.trim().is_empty());
            }
            if let Some(project_id) = input.project_id {
                task.project_id = project_id;
            }
            if input.printer_id.is_some() {
                task.printer_id = input.printer_id;
            }
            if input.coil_id.is_some() {
                task.coil_id = input.coil_id;
            }
            if let Some(status) = input.status {
                task.status = status;
            }
            if let Some(progress) = progress {
                task.progress = progress;
            }
            if input.material_amount.is_some() {
                task.material_amount = input.material_amount;
            }
            if input.time_start.is_some() {
                task.time_start = input.time_start;
            }
            if input.time_end.is_some() {
                task.time_end = input.time_end;
            }
            if input.notes.is_some() {
                task.notes = input.notes;
            }
            Ok(task.clone())
        })
        .await
    }

    pub async fn delete_task(&self, id: u64) -> Result<Task, CatalogError> {
        let task = self
            .mutate(|data| data.tasks.remove(&id).ok_or(CatalogError::NotFound { kind: "Task", id }))
            .await?;
        tracing::info!(task_id = id, "Task deleted");
        Ok(task)
    }

    /// Attaches (or with `None` detaches) a G-code file; returns the replaced one.
    pub async fn set_task_gcode(&self, id: u64, file: Option<GcodeFile>) -> Result<Option<GcodeFile>, CatalogError> {
        self.mutate(|data| {
            let task = data.tasks.get_mut(&id).ok_or(CatalogError::NotFound { kind: "Task", id })?;
            Ok(std::mem::replace(&mut task.gcode, file))
        })
        .await
    }

    /// The task currently printing on a printer, with its coil if assigned.
    pub async fn printing_on(&self, printer_id: PrinterId) -> Option<(Task, Option<Coil>)> {
        let data = self.data.read().await;
        let task = data
            .tasks
            .values()
            .find(|t| t.printer_id == Some(printer_id) && t.status == TaskStatus::Printing)?
            .clone();
        let coil = task.coil_id.and_then(|id| data.coils.get(&id).cloned());
        Some((task, coil))
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, CatalogError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(CatalogError::MissingField(field)),
    }
}

fn non_negative(value: f64, field: &str) -> Result<f64, CatalogError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(CatalogError::Invalid(format!("{} must be a non-negative number", field)))
    }
}

fn progress_percent(value: f64) -> Result<u8, CatalogError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(value.round() as u8)
    } else {
        Err(CatalogError::Invalid(format!("progress {} is outside 0..100", value)))
    }
}

fn check_references(data: &CatalogData, project_id: Option<u64>, coil_id: Option<u64>) -> Result<(), CatalogError> {
    if let Some(id) = project_id {
        if !data.projects.contains_key(&id) {
            return Err(CatalogError::NotFound { kind: "Project", id });
        }
    }
    if let Some(id) = coil_id {
        if !data.coils.contains_key(&id) {
            return Err(CatalogError::NotFound { kind: "Coil", id });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio_test::assert_ok;

    fn project(name: &str) -> ProjectInput {
        ProjectInput { name: Some(name.to_string()), ..Default::default() }
    }

    #[tokio::test]
    async fn project_name_is_required() {
        let catalog = Catalog::in_memory();
        let err = catalog.create_project(project("   ")).await.unwrap_err();
        assert_eq!(err, CatalogError::MissingField("name"));
        assert!(catalog.projects().await.is_empty());
    }

    #[tokio::test]
    async fn task_requires_existing_project_and_coil() {
        let catalog = Catalog::in_memory();
        let err = catalog.create_task(TaskInput::default()).await.unwrap_err();
        assert_eq!(err, CatalogError::MissingField("project_id"));

        let input = TaskInput { project_id: Some(7), ..Default::default() };
        let err = catalog.create_task(input).await.unwrap_err();
        assert_eq!(err, CatalogError::NotFound { kind: "Project", id: 7 });

        let p = catalog.create_project(project("Brackets")).await.unwrap();
        let input = TaskInput { project_id: Some(p.id), coil_id: Some(3), ..Default::default() };
        let err = catalog.create_task(input).await.unwrap_err();
        assert_eq!(err, CatalogError::NotFound { kind: "Coil", id: 3 });
    }

    #[tokio::test]
    async fn patch_leaves_absent_fields_alone() {
        let catalog = Catalog::in_memory();
        let p = catalog.create_project(project("Brackets")).await.unwrap();
        let task = catalog
            .create_task(TaskInput {
                name: Some("Left bracket".to_string()),
                project_id: Some(p.id),
                progress: Some(12.4),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(task.progress, 12);
        assert_eq!(task.status, TaskStatus::Pending);

        let patched = catalog
            .update_task(task.id, TaskInput { status: Some(TaskStatus::Printing), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(patched.status, TaskStatus::Printing);
        assert_eq!(patched.name.as_deref(), Some("Left bracket"));
        assert_eq!(patched.progress, 12);
    }

    #[tokio::test]
    async fn referenced_project_and_coil_cannot_be_deleted() {
        let catalog = Catalog::in_memory();
        let p = catalog.create_project(project("Brackets")).await.unwrap();
        let coil = catalog
            .create_coil(CoilInput { name: Some("Black #1".to_string()), material: Some("PLA".to_string()), remains: Some(750.0) })
            .await
            .unwrap();
        let task = catalog
            .create_task(TaskInput { project_id: Some(p.id), coil_id: Some(coil.id), ..Default::default() })
            .await
            .unwrap();
        assert!(matches!(catalog.delete_project(p.id).await, Err(CatalogError::InUse(_))));
        assert!(matches!(catalog.delete_coil(coil.id).await, Err(CatalogError::InUse(_))));
        assert_ok!(catalog.delete_task(task.id).await);
        assert_ok!(catalog.delete_coil(coil.id).await);
        assert_ok!(catalog.delete_project(p.id).await);
        assert_eq!(catalog.delete_project(p.id).await, Err(CatalogError::NotFound { kind: "Project", id: p.id }));
    }

    #[tokio::test]
    async fn printing_task_is_found_per_printer() {
        let catalog = Catalog::in_memory();
        let p = catalog.create_project(project("Brackets")).await.unwrap();
        let coil = catalog
            .create_coil(CoilInput { name: Some("Grey".to_string()), material: Some("PETG".to_string()), remains: None })
            .await
            .unwrap();
        catalog
            .create_task(TaskInput {
                name: Some("Hinge".to_string()),
                project_id: Some(p.id),
                printer_id: Some(PrinterId(2)),
                coil_id: Some(coil.id),
                status: Some(TaskStatus::Printing),
                ..Default::default()
            })
            .await
            .unwrap();
        let (task, coil) = catalog.printing_on(PrinterId(2)).await.unwrap();
        assert_eq!(task.name.as_deref(), Some("Hinge"));
        assert_eq!(coil.unwrap().material.as_deref(), Some("PETG"));
        assert!(catalog.printing_on(PrinterId(1)).await.is_none());
    }

    #[tokio::test]
    async fn file_backed_catalog_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        {
            let catalog = Catalog::open(&path).await.unwrap();
            catalog.create_project(project("Brackets")).await.unwrap();
            catalog.create_project(project("Enclosure")).await.unwrap();
        }
        let reopened = Catalog::open(&path).await.unwrap();
        let names: Vec<String> = reopened.projects().await.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Brackets", "Enclosure"]);
        // ids keep counting after reopen
        let next = reopened.create_project(project("Spares")).await.unwrap();
        assert_eq!(next.id, 3);
    }

    #[tokio::test]
    async fn corrupt_catalog_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(Catalog::open(&path).await, Err(CatalogError::Storage(_))));
    }
}
