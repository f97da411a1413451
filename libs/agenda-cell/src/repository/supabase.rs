// libs/agenda-cell/src/repository/supabase.rs
//
// PostgREST-backed repositories. Tables:
//   agenda_months   (id, professional_id, year, month, slots jsonb, month_goal, updated_at, version)
//   professionals   (id, agenda_settings jsonb, ...)
//   annual_events   (id, professional_id, title, start_date, end_date, created_at, updated_at)
//   waitlist        (id, professional_id, patient_id, patient_name, phone, notes, created_at)
//   patients        (id, display_name, phone, email, care_team jsonb, ...)

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::error::SchedulingError;
use crate::models::{
    AgendaSlot, AnnualEvent, CareTeamLink, MonthId, MonthlyAgenda, PatientRecord, WaitlistEntry,
    WorkTemplate,
};
use crate::slot_key::SlotKey;

use super::{
    apply_batch, AgendaRepository, EventRepository, PatientDirectory, SlotUpdate,
    TemplateRepository, WaitlistRepository,
};

fn storage(e: anyhow::Error) -> SchedulingError {
    SchedulingError::Storage(e.to_string())
}

fn directory(e: anyhow::Error) -> SchedulingError {
    SchedulingError::Directory(e.to_string())
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, SchedulingError> {
    serde_json::from_value(value).map_err(|e| SchedulingError::Storage(format!("Malformed row: {}", e)))
}

fn row_id(id: &MonthId) -> String {
    format!("{}_{}", id.professional_id, id.partition_key())
}

// ==============================================================================
// MONTHLY PARTITIONS
// ==============================================================================

#[derive(Debug, Deserialize)]
struct AgendaRow {
    professional_id: Uuid,
    year: i32,
    month: u32,
    #[serde(default)]
    slots: BTreeMap<SlotKey, AgendaSlot>,
    month_goal: Option<String>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    version: i64,
}

impl AgendaRow {
    fn into_agenda(self) -> (MonthlyAgenda, i64) {
        let agenda = MonthlyAgenda {
            professional_id: self.professional_id,
            year: self.year,
            month: self.month,
            slots: self.slots,
            month_goal: self.month_goal,
            updated_at: self.updated_at,
        };
        (agenda, self.version)
    }
}

pub struct SupabaseAgendaRepository {
    supabase: Arc<SupabaseClient>,
    max_retries: u32,
}

impl SupabaseAgendaRepository {
    pub fn new(supabase: Arc<SupabaseClient>, max_retries: u32) -> Self {
        Self { supabase, max_retries }
    }

    async fn fetch(&self, id: &MonthId) -> Result<Option<(MonthlyAgenda, i64)>, SchedulingError> {
        let path = format!("/rest/v1/agenda_months?id=eq.{}&select=*", row_id(id));
        let rows: Vec<Value> = self.supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage)?;

        match rows.into_iter().next() {
            Some(row) => {
                let row: AgendaRow = decode(row)?;
                Ok(Some(row.into_agenda()))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AgendaRepository for SupabaseAgendaRepository {
    async fn get_month(&self, id: &MonthId) -> Result<Option<MonthlyAgenda>, SchedulingError> {
        debug!("Fetching agenda partition {}", id);
        Ok(self.fetch(id).await?.map(|(agenda, _)| agenda))
    }

    async fn initialize_month(&self, agenda: MonthlyAgenda) -> Result<(), SchedulingError> {
        let id = agenda.id();
        let version = self.fetch(&id).await?.map(|(_, v)| v + 1).unwrap_or(1);

        let body = json!({
            "id": row_id(&id),
            "professional_id": agenda.professional_id,
            "year": agenda.year,
            "month": agenda.month,
            "slots": agenda.slots,
            "month_goal": agenda.month_goal,
            "updated_at": agenda.updated_at.to_rfc3339(),
            "version": version,
        });

        let mut headers = HeaderMap::new();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("resolution=merge-duplicates,return=representation"),
        );
        let _: Vec<Value> = self.supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/agenda_months?on_conflict=id",
                Some(body),
                Some(headers),
            )
            .await
            .map_err(storage)?;

        info!("Initialized agenda partition {} with {} slots", id, agenda.slots.len());
        Ok(())
    }

    async fn apply_updates(
        &self,
        id: &MonthId,
        updates: Vec<SlotUpdate>,
    ) -> Result<MonthlyAgenda, SchedulingError> {
        for attempt in 1..=self.max_retries.max(1) {
            let (mut agenda, version) = self
                .fetch(id)
                .await?
                .ok_or_else(|| SchedulingError::MonthNotInitialized(id.partition_key()))?;

            // Guards are evaluated against the freshest copy on every attempt, so a
            // concurrent write to a different slot only costs a retry.
            apply_batch(&mut agenda, updates.clone())?;

            let path = format!("/rest/v1/agenda_months?id=eq.{}&version=eq.{}", row_id(id), version);
            let body = json!({
                "slots": agenda.slots,
                "updated_at": agenda.updated_at.to_rfc3339(),
                "version": version + 1,
            });
            let written = self.supabase
                .request_returning(Method::PATCH, &path, Some(body))
                .await
                .map_err(storage)?;

            if !written.is_empty() {
                debug!("Committed {} slot updates to {} at version {}", updates.len(), id, version + 1);
                return Ok(agenda);
            }

            warn!(
                "Concurrent write on {} (version {}), retrying {}/{}",
                id, version, attempt, self.max_retries
            );
        }

        Err(SchedulingError::Storage(format!(
            "Gave up writing {} after {} concurrent updates",
            id, self.max_retries
        )))
    }

    async fn set_month_goal(&self, id: &MonthId, goal: Option<String>) -> Result<(), SchedulingError> {
        let path = format!("/rest/v1/agenda_months?id=eq.{}", row_id(id));
        let written = self.supabase
            .request_returning(Method::PATCH, &path, Some(json!({ "month_goal": goal })))
            .await
            .map_err(storage)?;

        if written.is_empty() {
            return Err(SchedulingError::MonthNotInitialized(id.partition_key()));
        }
        Ok(())
    }
}

// ==============================================================================
// WORK TEMPLATES
// ==============================================================================

pub struct SupabaseTemplateRepository {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseTemplateRepository {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl TemplateRepository for SupabaseTemplateRepository {
    async fn get_work_template(&self, professional_id: Uuid) -> Result<Option<WorkTemplate>, SchedulingError> {
        let path = format!("/rest/v1/professionals?id=eq.{}&select=agenda_settings", professional_id);
        let rows: Vec<Value> = self.supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage)?;

        let settings = rows
            .into_iter()
            .next()
            .and_then(|mut row| row.get_mut("agenda_settings").map(Value::take));
        match settings {
            Some(Value::Null) | None => Ok(None),
            Some(settings) => decode(settings).map(Some),
        }
    }

    async fn save_work_template(
        &self,
        professional_id: Uuid,
        template: &WorkTemplate,
    ) -> Result<(), SchedulingError> {
        let path = format!("/rest/v1/professionals?id=eq.{}", professional_id);
        let written = self.supabase
            .request_returning(Method::PATCH, &path, Some(json!({ "agenda_settings": template })))
            .await
            .map_err(storage)?;

        if written.is_empty() {
            return Err(SchedulingError::Storage(format!("Professional {} not found", professional_id)));
        }
        Ok(())
    }
}

// ==============================================================================
// ANNUAL EVENTS
// ==============================================================================

pub struct SupabaseEventRepository {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseEventRepository {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl EventRepository for SupabaseEventRepository {
    async fn list_events(&self, professional_id: Uuid) -> Result<Vec<AnnualEvent>, SchedulingError> {
        let path = format!(
            "/rest/v1/annual_events?professional_id=eq.{}&order=start_date.asc,id.asc",
            professional_id
        );
        let rows: Vec<Value> = self.supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage)?;
        rows.into_iter().map(decode).collect()
    }

    async fn get_event(&self, professional_id: Uuid, event_id: Uuid) -> Result<Option<AnnualEvent>, SchedulingError> {
        let path = format!(
            "/rest/v1/annual_events?id=eq.{}&professional_id=eq.{}",
            event_id, professional_id
        );
        let rows: Vec<Value> = self.supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage)?;
        rows.into_iter().next().map(decode).transpose()
    }

    async fn save_event(&self, event: &AnnualEvent) -> Result<(), SchedulingError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("resolution=merge-duplicates,return=representation"),
        );
        let _: Vec<Value> = self.supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/annual_events?on_conflict=id",
                Some(json!(event)),
                Some(headers),
            )
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn delete_event(&self, professional_id: Uuid, event_id: Uuid) -> Result<(), SchedulingError> {
        let path = format!(
            "/rest/v1/annual_events?id=eq.{}&professional_id=eq.{}",
            event_id, professional_id
        );
        let deleted = self.supabase
            .request_returning(Method::DELETE, &path, None)
            .await
            .map_err(storage)?;
        if deleted.is_empty() {
            return Err(SchedulingError::EventNotFound(event_id.to_string()));
        }
        Ok(())
    }
}

// ==============================================================================
// WAITLIST
// ==============================================================================

pub struct SupabaseWaitlistRepository {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseWaitlistRepository {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl WaitlistRepository for SupabaseWaitlistRepository {
    async fn insert(&self, entry: &WaitlistEntry) -> Result<(), SchedulingError> {
        let _ = self.supabase
            .request_returning(Method::POST, "/rest/v1/waitlist", Some(json!(entry)))
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn list(&self, professional_id: Uuid) -> Result<Vec<WaitlistEntry>, SchedulingError> {
        let path = format!(
            "/rest/v1/waitlist?professional_id=eq.{}&order=created_at.asc,id.asc",
            professional_id
        );
        let rows: Vec<Value> = self.supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage)?;
        rows.into_iter().map(decode).collect()
    }

    async fn get(&self, entry_id: Uuid) -> Result<Option<WaitlistEntry>, SchedulingError> {
        let path = format!("/rest/v1/waitlist?id=eq.{}", entry_id);
        let rows: Vec<Value> = self.supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage)?;
        rows.into_iter().next().map(decode).transpose()
    }

    async fn delete(&self, entry_id: Uuid) -> Result<(), SchedulingError> {
        let path = format!("/rest/v1/waitlist?id=eq.{}", entry_id);
        let deleted = self.supabase
            .request_returning(Method::DELETE, &path, None)
            .await
            .map_err(storage)?;
        if deleted.is_empty() {
            return Err(SchedulingError::WaitlistEntryNotFound(entry_id.to_string()));
        }
        Ok(())
    }
}

// ==============================================================================
// PATIENT DIRECTORY
// ==============================================================================

pub struct SupabasePatientDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabasePatientDirectory {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn fetch_patient(&self, patient_id: Uuid) -> Result<Option<PatientRecord>, SchedulingError> {
        let path = format!("/rest/v1/patients?id=eq.{}&select=id,display_name,phone,email,care_team", patient_id);
        let rows: Vec<Value> = self.supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(directory)?;
        rows.into_iter().next().map(decode).transpose()
    }

    /// Read-modify-write of one care-team entry.
    async fn update_care_link<F>(
        &self,
        patient_id: Uuid,
        professional_id: Uuid,
        change: F,
    ) -> Result<(), SchedulingError>
    where
        F: FnOnce(&mut CareTeamLink) + Send,
    {
        let mut patient = self
            .fetch_patient(patient_id)
            .await?
            .ok_or_else(|| SchedulingError::PatientNotFound(patient_id.to_string()))?;
        change(patient.care_team.entry(professional_id).or_default());

        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let written = self.supabase
            .request_returning(Method::PATCH, &path, Some(json!({ "care_team": patient.care_team })))
            .await
            .map_err(directory)?;
        if written.is_empty() {
            return Err(SchedulingError::Directory(format!(
                "Update of patient {} was not applied",
                patient_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PatientDirectory for SupabasePatientDirectory {
    async fn find_by_id(&self, patient_id: Uuid) -> Result<Option<PatientRecord>, SchedulingError> {
        self.fetch_patient(patient_id).await
    }

    async fn search_by_name(&self, name: &str) -> Result<Vec<PatientRecord>, SchedulingError> {
        let pattern = urlencoding::encode(&format!("*{}*", name.trim())).into_owned();
        let path = format!(
            "/rest/v1/patients?display_name=ilike.{}&select=id,display_name,phone,email,care_team&order=display_name.asc",
            pattern
        );
        let rows: Vec<Value> = self.supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(directory)?;
        rows.into_iter().map(decode).collect()
    }

    async fn create_patient(
        &self,
        name: &str,
        phone: Option<&str>,
        email: Option<&str>,
        professional_id: Uuid,
    ) -> Result<PatientRecord, SchedulingError> {
        let mut care_team = HashMap::new();
        care_team.insert(professional_id, CareTeamLink::default());
        let body = json!({
            "id": Uuid::new_v4(),
            "display_name": name.trim(),
            "phone": phone,
            "email": email,
            "care_team": care_team,
            "created_at": Utc::now().to_rfc3339(),
        });

        let created = self.supabase
            .request_returning(Method::POST, "/rest/v1/patients", Some(body))
            .await
            .map_err(directory)?;
        let row = created
            .into_iter()
            .next()
            .ok_or_else(|| SchedulingError::Directory("Failed to create patient record".to_string()))?;

        let patient: PatientRecord = decode(row)?;
        info!("Created walk-in patient record {}", patient.id);
        Ok(patient)
    }

    async fn list_for_professional(&self, professional_id: Uuid) -> Result<Vec<PatientRecord>, SchedulingError> {
        let path = format!(
            "/rest/v1/patients?care_team->{}=not.is.null&select=id,display_name,phone,email,care_team&order=id.asc",
            professional_id
        );
        let rows: Vec<Value> = self.supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(directory)?;
        rows.into_iter().map(decode).collect()
    }

    async fn set_next_appointment(
        &self,
        patient_id: Uuid,
        professional_id: Uuid,
        next: Option<NaiveDateTime>,
    ) -> Result<(), SchedulingError> {
        self.update_care_link(patient_id, professional_id, |link| link.next_appointment = next)
            .await
    }

    async fn increment_no_show(&self, patient_id: Uuid, professional_id: Uuid) -> Result<(), SchedulingError> {
        self.update_care_link(patient_id, professional_id, |link| link.no_show_count += 1)
            .await
    }
}
