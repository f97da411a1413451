// libs/agenda-cell/src/handlers.rs
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::error::SchedulingError;
use crate::models::{
    AddSlotRequest, AssignWaitlistRequest, BlockSlotRequest, BookSlotRequest, CancelSlotRequest,
    DateRange, EnqueueWaitlistRequest, EventRequest, MonthGoalRequest, MonthId, PatientSync,
    ResolveConflictRequest, SlotTransition, WorkTemplate,
};
use crate::slot_key::SlotKey;
use crate::state::AgendaState;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct ConflictQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct PatientSearchQuery {
    pub name: String,
}

// ==============================================================================
// ERROR MAPPING
// ==============================================================================

pub fn map_error(e: SchedulingError) -> AppError {
    match &e {
        SchedulingError::Validation(msg) => AppError::ValidationError(msg.clone()),
        SchedulingError::MonthNotInitialized(_)
        | SchedulingError::SlotNotFound(_)
        | SchedulingError::PatientNotFound(_)
        | SchedulingError::EventNotFound(_)
        | SchedulingError::WaitlistEntryNotFound(_)
        | SchedulingError::TemplateNotConfigured(_) => AppError::NotFound(e.to_string()),
        SchedulingError::InvalidTransition { .. }
        | SchedulingError::StaleSlot { .. }
        | SchedulingError::SlotAlreadyExists(_) => AppError::Conflict(e.to_string()),
        SchedulingError::Storage(msg) => {
            error!("Agenda storage failure: {}", msg);
            AppError::Database(msg.clone())
        }
        SchedulingError::Directory(msg) => AppError::ExternalService(msg.clone()),
    }
}

fn month_id(professional_id: Uuid, year: i32, month: u32) -> Result<MonthId, AppError> {
    MonthId::new(professional_id, year, month).map_err(map_error)
}

fn slot_key(raw: &str) -> Result<SlotKey, AppError> {
    SlotKey::parse(raw).map_err(map_error)
}

fn transition_response(transition: SlotTransition, message: &str) -> Json<Value> {
    let warning = match &transition.patient_sync {
        PatientSync::Failed { message: reason } => Some(format!(
            "Slot updated, but the patient record was not: {}",
            reason
        )),
        _ => None,
    };

    Json(json!({
        "success": true,
        "transition": transition,
        "message": message,
        "warning": warning
    }))
}

// ==============================================================================
// SETTINGS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_settings(
    State(state): State<AgendaState>,
    Path(professional_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let template = state.settings.get_template(professional_id).await.map_err(map_error)?;
    Ok(Json(json!({ "success": true, "template": template })))
}

#[axum::debug_handler]
pub async fn update_settings(
    State(state): State<AgendaState>,
    Path(professional_id): Path<Uuid>,
    Json(template): Json<WorkTemplate>,
) -> Result<Json<Value>, AppError> {
    let template = state
        .settings
        .update_template(professional_id, template)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "template": template,
        "message": "Work template saved"
    })))
}

// ==============================================================================
// MONTHS AND SLOTS
// ==============================================================================

#[axum::debug_handler]
pub async fn initialize_month(
    State(state): State<AgendaState>,
    Path((professional_id, year, month)): Path<(Uuid, i32, u32)>,
) -> Result<Json<Value>, AppError> {
    let id = month_id(professional_id, year, month)?;
    let agenda = state.agenda.initialize_month(id).await.map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "slot_count": agenda.slots.len(),
        "agenda": agenda
    })))
}

#[axum::debug_handler]
pub async fn get_month(
    State(state): State<AgendaState>,
    Path((professional_id, year, month)): Path<(Uuid, i32, u32)>,
) -> Result<Json<Value>, AppError> {
    let id = month_id(professional_id, year, month)?;
    let agenda = state.agenda.get_month(&id).await.map_err(map_error)?;
    debug!("Serving {} with {} slots", id, agenda.slots.len());

    Ok(Json(json!({ "success": true, "agenda": agenda })))
}

#[axum::debug_handler]
pub async fn set_month_goal(
    State(state): State<AgendaState>,
    Path((professional_id, year, month)): Path<(Uuid, i32, u32)>,
    Json(request): Json<MonthGoalRequest>,
) -> Result<Json<Value>, AppError> {
    let id = month_id(professional_id, year, month)?;
    let agenda = state.agenda.set_month_goal(&id, request.goal).await.map_err(map_error)?;

    Ok(Json(json!({ "success": true, "month_goal": agenda.month_goal })))
}

#[axum::debug_handler]
pub async fn add_slot(
    State(state): State<AgendaState>,
    Path((professional_id, year, month)): Path<(Uuid, i32, u32)>,
    Json(request): Json<AddSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let id = month_id(professional_id, year, month)?;
    let transition = state.agenda.add_slot(&id, request).await.map_err(map_error)?;
    Ok(transition_response(transition, "Slot added"))
}

#[axum::debug_handler]
pub async fn remove_slot(
    State(state): State<AgendaState>,
    Path((professional_id, year, month, key)): Path<(Uuid, i32, u32, String)>,
) -> Result<Json<Value>, AppError> {
    let id = month_id(professional_id, year, month)?;
    let key = slot_key(&key)?;
    state.agenda.remove_slot(&id, &key).await.map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Slot {} removed", key)
    })))
}

#[axum::debug_handler]
pub async fn book_slot(
    State(state): State<AgendaState>,
    Path((professional_id, year, month, key)): Path<(Uuid, i32, u32, String)>,
    Json(request): Json<BookSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let id = month_id(professional_id, year, month)?;
    let key = slot_key(&key)?;
    let transition = state.agenda.book_slot(&id, &key, request).await.map_err(map_error)?;
    Ok(transition_response(transition, "Slot booked"))
}

#[axum::debug_handler]
pub async fn cancel_slot(
    State(state): State<AgendaState>,
    Path((professional_id, year, month, key)): Path<(Uuid, i32, u32, String)>,
    Json(request): Json<CancelSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let id = month_id(professional_id, year, month)?;
    let key = slot_key(&key)?;
    let message = request.kind.label();
    let transition = state.agenda.cancel_slot(&id, &key, request).await.map_err(map_error)?;
    Ok(transition_response(transition, message))
}

#[axum::debug_handler]
pub async fn reopen_slot(
    State(state): State<AgendaState>,
    Path((professional_id, year, month, key)): Path<(Uuid, i32, u32, String)>,
) -> Result<Json<Value>, AppError> {
    let id = month_id(professional_id, year, month)?;
    let key = slot_key(&key)?;
    let transition = state.agenda.reopen_slot(&id, &key).await.map_err(map_error)?;
    Ok(transition_response(transition, "Slot reopened"))
}

#[axum::debug_handler]
pub async fn block_slot(
    State(state): State<AgendaState>,
    Path((professional_id, year, month, key)): Path<(Uuid, i32, u32, String)>,
    Json(request): Json<BlockSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let id = month_id(professional_id, year, month)?;
    let key = slot_key(&key)?;
    let transition = state.agenda.block_slot(&id, &key, request.reason).await.map_err(map_error)?;
    Ok(transition_response(transition, "Slot blocked"))
}

#[axum::debug_handler]
pub async fn toggle_payment(
    State(state): State<AgendaState>,
    Path((professional_id, year, month, key)): Path<(Uuid, i32, u32, String)>,
) -> Result<Json<Value>, AppError> {
    let id = month_id(professional_id, year, month)?;
    let key = slot_key(&key)?;
    let transition = state.agenda.toggle_payment(&id, &key).await.map_err(map_error)?;
    Ok(transition_response(transition, "Payment status updated"))
}

// ==============================================================================
// EVENTS AND CONFLICTS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_events(
    State(state): State<AgendaState>,
    Path(professional_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let events = state.events.list_events(professional_id).await.map_err(map_error)?;
    Ok(Json(json!({ "success": true, "events": events, "total": events.len() })))
}

#[axum::debug_handler]
pub async fn create_event(
    State(state): State<AgendaState>,
    Path(professional_id): Path<Uuid>,
    Json(request): Json<EventRequest>,
) -> Result<Json<Value>, AppError> {
    let application = state
        .events
        .create_event(professional_id, request)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "application": application,
        "has_conflicts": !application.conflicts.is_empty()
    })))
}

#[axum::debug_handler]
pub async fn update_event(
    State(state): State<AgendaState>,
    Path((professional_id, event_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<EventRequest>,
) -> Result<Json<Value>, AppError> {
    let application = state
        .events
        .update_event(professional_id, event_id, request)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "application": application,
        "has_conflicts": !application.conflicts.is_empty()
    })))
}

#[axum::debug_handler]
pub async fn delete_event(
    State(state): State<AgendaState>,
    Path((professional_id, event_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    let release = state
        .events
        .delete_event(professional_id, event_id)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({ "success": true, "release": release })))
}

#[axum::debug_handler]
pub async fn detect_conflicts(
    State(state): State<AgendaState>,
    Path(professional_id): Path<Uuid>,
    Query(query): Query<ConflictQuery>,
) -> Result<Json<Value>, AppError> {
    let range = DateRange::new(query.start, query.end).map_err(map_error)?;
    let conflicts = state
        .events
        .detect_conflicts(professional_id, range)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "conflicts": conflicts,
        "total": conflicts.len()
    })))
}

#[axum::debug_handler]
pub async fn resolve_conflict(
    State(state): State<AgendaState>,
    Path(professional_id): Path<Uuid>,
    Json(request): Json<ResolveConflictRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = state
        .events
        .resolve_conflict(professional_id, request)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({ "success": true, "outcome": outcome })))
}

// ==============================================================================
// PATIENTS
// ==============================================================================

#[axum::debug_handler]
pub async fn search_patients(
    State(state): State<AgendaState>,
    Path(_professional_id): Path<Uuid>,
    Query(query): Query<PatientSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let patients = state.agenda.search_patients(&query.name).await.map_err(map_error)?;
    Ok(Json(json!({ "success": true, "patients": patients, "total": patients.len() })))
}

// ==============================================================================
// WAITLIST
// ==============================================================================

#[axum::debug_handler]
pub async fn list_waitlist(
    State(state): State<AgendaState>,
    Path(professional_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let entries = state.waitlist.list(professional_id).await.map_err(map_error)?;
    Ok(Json(json!({ "success": true, "entries": entries, "total": entries.len() })))
}

#[axum::debug_handler]
pub async fn enqueue_waitlist(
    State(state): State<AgendaState>,
    Path(professional_id): Path<Uuid>,
    Json(request): Json<EnqueueWaitlistRequest>,
) -> Result<Json<Value>, AppError> {
    let entry = state.waitlist.enqueue(professional_id, request).await.map_err(map_error)?;
    Ok(Json(json!({ "success": true, "entry": entry })))
}

#[axum::debug_handler]
pub async fn remove_waitlist_entry(
    State(state): State<AgendaState>,
    Path((professional_id, entry_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    state.waitlist.remove(professional_id, entry_id).await.map_err(map_error)?;
    Ok(Json(json!({ "success": true, "message": "Waitlist entry removed" })))
}

#[axum::debug_handler]
pub async fn assign_waitlist_entry(
    State(state): State<AgendaState>,
    Path((professional_id, entry_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<AssignWaitlistRequest>,
) -> Result<Json<Value>, AppError> {
    let assignment = state
        .waitlist
        .assign(professional_id, entry_id, request)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({ "success": true, "assignment": assignment })))
}

// ==============================================================================
// AUDIT
// ==============================================================================

#[axum::debug_handler]
pub async fn run_audit(
    State(state): State<AgendaState>,
    Path(professional_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let now = Local::now().naive_local();
    let report = state.auditor.audit(professional_id, now).await.map_err(map_error)?;

    Ok(Json(json!({ "success": true, "report": report })))
}
