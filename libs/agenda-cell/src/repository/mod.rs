// libs/agenda-cell/src/repository/mod.rs
//
// Storage seams for the scheduling services. Every service receives these
// as `Arc<dyn ...>` so tests can swap in the in-memory implementations.

use async_trait::async_trait;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::models::{
    AgendaSlot, AnnualEvent, MonthId, MonthlyAgenda, PatientRecord, SlotStatus, WaitlistEntry,
    WorkTemplate,
};
use crate::slot_key::SlotKey;

pub mod memory;
pub mod supabase;

pub use memory::{
    InMemoryAgendaRepository, InMemoryEventRepository, InMemoryPatientDirectory,
    InMemoryTemplateRepository, InMemoryWaitlistRepository,
};
pub use supabase::{
    SupabaseAgendaRepository, SupabaseEventRepository, SupabasePatientDirectory,
    SupabaseTemplateRepository, SupabaseWaitlistRepository,
};

/// What a writer saw in a slot before computing its update.
///
/// Occupied slots are identified by who booked them and when, so a slot that
/// was cancelled, reopened and booked again by someone else no longer matches.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotGuard {
    pub status: SlotStatus,
    pub patient_id: Option<Uuid>,
    pub booked_at: Option<DateTime<Utc>>,
}

impl SlotGuard {
    pub fn of(slot: &AgendaSlot) -> Self {
        let booking = slot.booking();
        Self {
            status: slot.status(),
            patient_id: booking.and_then(|b| b.patient_id),
            booked_at: booking.map(|b| b.booked_at),
        }
    }

    /// Guard for an available or blocked slot.
    pub fn unoccupied(status: SlotStatus) -> Self {
        Self { status, patient_id: None, booked_at: None }
    }
}

impl fmt::Display for SlotGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.patient_id, self.booked_at) {
            (Some(patient_id), Some(booked_at)) => {
                write!(f, "{} by {} at {}", self.status, patient_id, booked_at.to_rfc3339())
            }
            (None, Some(booked_at)) => write!(f, "{} at {}", self.status, booked_at.to_rfc3339()),
            _ => write!(f, "{}", self.status),
        }
    }
}

/// A typed write against one slot of a monthly partition.
///
/// `expected` is the slot as the caller read it; `None` means the key must not
/// exist yet. A batch is applied only if every guard still holds.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotUpdate {
    Put {
        key: SlotKey,
        expected: Option<SlotGuard>,
        slot: AgendaSlot,
    },
    Remove {
        key: SlotKey,
        expected: SlotGuard,
    },
}

impl SlotUpdate {
    pub fn key(&self) -> &SlotKey {
        match self {
            SlotUpdate::Put { key, .. } | SlotUpdate::Remove { key, .. } => key,
        }
    }

    pub fn expected(&self) -> Option<&SlotGuard> {
        match self {
            SlotUpdate::Put { expected, .. } => expected.as_ref(),
            SlotUpdate::Remove { expected, .. } => Some(expected),
        }
    }

    /// Check the guard against the current partition contents.
    pub fn check(&self, agenda: &MonthlyAgenda) -> Result<(), SchedulingError> {
        let actual = agenda.slots.get(self.key()).map(SlotGuard::of);
        let expected = self.expected();
        if actual.as_ref() != expected {
            return Err(SchedulingError::StaleSlot {
                key: self.key().clone(),
                expected: describe(expected),
                actual: describe(actual.as_ref()),
            });
        }
        Ok(())
    }

    pub fn apply_to(self, agenda: &mut MonthlyAgenda) {
        match self {
            SlotUpdate::Put { key, slot, .. } => {
                agenda.slots.insert(key, slot);
            }
            SlotUpdate::Remove { key, .. } => {
                agenda.slots.remove(&key);
            }
        }
    }
}

fn describe(guard: Option<&SlotGuard>) -> String {
    guard.map(|g| g.to_string()).unwrap_or_else(|| "absent".to_string())
}

/// Check every guard, then apply every write. All-or-nothing.
pub fn apply_batch(agenda: &mut MonthlyAgenda, updates: Vec<SlotUpdate>) -> Result<(), SchedulingError> {
    for update in &updates {
        update.check(agenda)?;
    }
    for update in updates {
        update.apply_to(agenda);
    }
    agenda.updated_at = chrono::Utc::now();
    Ok(())
}

#[async_trait]
pub trait AgendaRepository: Send + Sync {
    async fn get_month(&self, id: &MonthId) -> Result<Option<MonthlyAgenda>, SchedulingError>;

    /// Replace the whole partition.
    async fn initialize_month(&self, agenda: MonthlyAgenda) -> Result<(), SchedulingError>;

    /// Atomically apply a batch of guarded slot writes to one partition.
    async fn apply_updates(
        &self,
        id: &MonthId,
        updates: Vec<SlotUpdate>,
    ) -> Result<MonthlyAgenda, SchedulingError>;

    async fn set_month_goal(&self, id: &MonthId, goal: Option<String>) -> Result<(), SchedulingError>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn get_work_template(&self, professional_id: Uuid) -> Result<Option<WorkTemplate>, SchedulingError>;

    async fn save_work_template(
        &self,
        professional_id: Uuid,
        template: &WorkTemplate,
    ) -> Result<(), SchedulingError>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn list_events(&self, professional_id: Uuid) -> Result<Vec<AnnualEvent>, SchedulingError>;

    async fn get_event(&self, professional_id: Uuid, event_id: Uuid) -> Result<Option<AnnualEvent>, SchedulingError>;

    async fn save_event(&self, event: &AnnualEvent) -> Result<(), SchedulingError>;

    async fn delete_event(&self, professional_id: Uuid, event_id: Uuid) -> Result<(), SchedulingError>;
}

#[async_trait]
pub trait WaitlistRepository: Send + Sync {
    async fn insert(&self, entry: &WaitlistEntry) -> Result<(), SchedulingError>;

    /// Entries for one professional, oldest first.
    async fn list(&self, professional_id: Uuid) -> Result<Vec<WaitlistEntry>, SchedulingError>;

    async fn get(&self, entry_id: Uuid) -> Result<Option<WaitlistEntry>, SchedulingError>;

    async fn delete(&self, entry_id: Uuid) -> Result<(), SchedulingError>;
}

/// The patient-record subsystem. The scheduling core reads it and writes the
/// per-professional care-team cache, but does not own it.
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn find_by_id(&self, patient_id: Uuid) -> Result<Option<PatientRecord>, SchedulingError>;

    async fn search_by_name(&self, name: &str) -> Result<Vec<PatientRecord>, SchedulingError>;

    /// Create a record for a walk-in and link it to the professional.
    async fn create_patient(
        &self,
        name: &str,
        phone: Option<&str>,
        email: Option<&str>,
        professional_id: Uuid,
    ) -> Result<PatientRecord, SchedulingError>;

    async fn list_for_professional(&self, professional_id: Uuid) -> Result<Vec<PatientRecord>, SchedulingError>;

    async fn set_next_appointment(
        &self,
        patient_id: Uuid,
        professional_id: Uuid,
        next: Option<NaiveDateTime>,
    ) -> Result<(), SchedulingError>;

    async fn increment_no_show(&self, patient_id: Uuid, professional_id: Uuid) -> Result<(), SchedulingError>;
}
