// libs/agenda-cell/src/services/agenda.rs
use std::future::Future;
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::models::{
    AddSlotRequest, AgendaSlot, BookSlotRequest, Booking, CancelSlotRequest, CancellationKind,
    MonthId, MonthlyAgenda, PatientRecord, PatientRef, PatientSync, SlotStatus, SlotTransition,
    MAX_SESSION_MINUTES,
};
use crate::repository::{AgendaRepository, PatientDirectory, SlotGuard, SlotUpdate, TemplateRepository};
use crate::services::current_template;
use crate::services::generator::ScheduleGenerator;
use crate::services::lifecycle::{SlotAction, SlotLifecycle};
use crate::slot_key::SlotKey;

/// Month partitions and single-slot operations.
///
/// Every slot write is guarded by the status the slot had when it was read,
/// so two operators racing on the same slot cannot both win. Patient-record
/// side effects run after the slot is committed and never undo it.
pub struct AgendaService {
    agendas: Arc<dyn AgendaRepository>,
    templates: Arc<dyn TemplateRepository>,
    patients: Arc<dyn PatientDirectory>,
}

struct PatientContact {
    id: Uuid,
    name: String,
    phone: Option<String>,
    email: Option<String>,
}

impl From<PatientRecord> for PatientContact {
    fn from(record: PatientRecord) -> Self {
        Self {
            id: record.id,
            name: record.display_name,
            phone: record.phone,
            email: record.email,
        }
    }
}

impl AgendaService {
    pub fn new(
        agendas: Arc<dyn AgendaRepository>,
        templates: Arc<dyn TemplateRepository>,
        patients: Arc<dyn PatientDirectory>,
    ) -> Self {
        Self { agendas, templates, patients }
    }

    // ==============================================================================
    // MONTH PARTITIONS
    // ==============================================================================

    /// Generate the month from the current template and overwrite whatever the
    /// partition held before.
    pub async fn initialize_month(&self, id: MonthId) -> Result<MonthlyAgenda, SchedulingError> {
        let template = current_template(self.templates.as_ref(), id.professional_id).await?;
        let slots = ScheduleGenerator::generate(id.year, id.month, &template);
        let agenda = MonthlyAgenda::new(id, slots);

        if self.agendas.get_month(&id).await?.is_some() {
            warn!("Re-initializing {} overwrites its existing slots", id);
        }
        self.agendas.initialize_month(agenda.clone()).await?;

        info!("Initialized {} with {} slots", id, agenda.slots.len());
        Ok(agenda)
    }

    pub async fn get_month(&self, id: &MonthId) -> Result<MonthlyAgenda, SchedulingError> {
        self.agendas
            .get_month(id)
            .await?
            .ok_or_else(|| SchedulingError::MonthNotInitialized(id.partition_key()))
    }

    pub async fn set_month_goal(
        &self,
        id: &MonthId,
        goal: Option<String>,
    ) -> Result<MonthlyAgenda, SchedulingError> {
        let goal = goal.map(|g| g.trim().to_string()).filter(|g| !g.is_empty());
        self.agendas.set_month_goal(id, goal).await?;
        self.get_month(id).await
    }

    /// Add one free slot outside the generated skeleton.
    pub async fn add_slot(
        &self,
        id: &MonthId,
        request: AddSlotRequest,
    ) -> Result<SlotTransition, SchedulingError> {
        if request.day == 0 || request.day > id.days() {
            return Err(SchedulingError::Validation(format!(
                "Day {} does not exist in {}",
                request.day,
                id.partition_key()
            )));
        }
        let key = SlotKey::from_time(request.day, request.time)?;

        let (duration, price) = match (request.duration, request.price) {
            (Some(duration), Some(price)) => (duration, price),
            (duration, price) => {
                let template = current_template(self.templates.as_ref(), id.professional_id).await?;
                (
                    duration.unwrap_or(template.session_duration_minutes),
                    price.unwrap_or(template.default_price),
                )
            }
        };
        if duration == 0 || duration > MAX_SESSION_MINUTES {
            return Err(SchedulingError::Validation(format!(
                "Duration must be between 1 and {} minutes",
                MAX_SESSION_MINUTES
            )));
        }
        if !price.is_finite() || price < 0.0 {
            return Err(SchedulingError::Validation("Price must be zero or positive".to_string()));
        }

        let agenda = self.get_month(id).await?;
        if agenda.slots.contains_key(&key) {
            return Err(SchedulingError::SlotAlreadyExists(key));
        }

        let slot = AgendaSlot::available(request.time, duration, price);
        self.agendas
            .apply_updates(id, vec![SlotUpdate::Put { key: key.clone(), expected: None, slot: slot.clone() }])
            .await?;

        info!("Added slot {} to {}", key, id);
        Ok(SlotTransition { month: *id, key, slot, patient_sync: PatientSync::Skipped })
    }

    /// Remove a slot nobody is using. Occupied or blocked slots must go through
    /// their own transitions first.
    pub async fn remove_slot(&self, id: &MonthId, key: &SlotKey) -> Result<(), SchedulingError> {
        let slot = self.load_slot(id, key).await?;
        if slot.status() != SlotStatus::Available {
            warn!("Refusing to remove slot {} in status {}", key, slot.status());
            return Err(SchedulingError::InvalidTransition {
                key: key.clone(),
                from: slot.status(),
                action: "remove",
            });
        }

        self.agendas
            .apply_updates(id, vec![SlotUpdate::Remove { key: key.clone(), expected: SlotGuard::of(&slot) }])
            .await?;

        info!("Removed slot {} from {}", key, id);
        Ok(())
    }

    // ==============================================================================
    // SLOT TRANSITIONS
    // ==============================================================================

    pub async fn book_slot(
        &self,
        id: &MonthId,
        key: &SlotKey,
        request: BookSlotRequest,
    ) -> Result<SlotTransition, SchedulingError> {
        let current = self.load_slot(id, key).await?;
        // Checked before the patient is resolved so a doomed booking never
        // creates a walk-in record.
        if current.status() != SlotStatus::Available {
            warn!("Rejected booking of slot {} in status {}", key, current.status());
            return Err(SchedulingError::InvalidTransition {
                key: key.clone(),
                from: current.status(),
                action: "book",
            });
        }

        let patient = self.resolve_patient(id.professional_id, request.patient).await?;
        let booking = Booking {
            patient_id: Some(patient.id),
            patient_name: patient.name,
            phone: patient.phone,
            email: patient.email,
            admin_notes: request.admin_notes,
            payment_status: request.payment_status.unwrap_or_default(),
            payment_method: request.payment_method,
            booked_at: Utc::now(),
        };
        let price = request.price.unwrap_or(current.price);

        let slot = self.commit(id, key, &current, SlotAction::Book { booking, price }).await?;
        info!("Booked slot {} of {} for patient {}", key, id, patient.id);

        let patient_sync = match slot_start(id, key) {
            Some(at) => {
                self.best_effort(
                    patient.id,
                    "set next appointment",
                    self.patients.set_next_appointment(patient.id, id.professional_id, Some(at)),
                )
                .await
            }
            None => PatientSync::Skipped,
        };

        Ok(SlotTransition { month: *id, key: key.clone(), slot, patient_sync })
    }

    /// Soft cancel or no-show. The booking is kept on the slot for history.
    pub async fn cancel_slot(
        &self,
        id: &MonthId,
        key: &SlotKey,
        request: CancelSlotRequest,
    ) -> Result<SlotTransition, SchedulingError> {
        let current = self.load_slot(id, key).await?;
        self.cancel_loaded(id, key, current, request).await
    }

    /// Cancel a slot the caller has already read and checked. The write fails
    /// with `StaleSlot` if the slot no longer matches `current`.
    pub(crate) async fn cancel_loaded(
        &self,
        id: &MonthId,
        key: &SlotKey,
        current: AgendaSlot,
        request: CancelSlotRequest,
    ) -> Result<SlotTransition, SchedulingError> {
        let kind = request.kind;
        let slot = self
            .commit(id, key, &current, SlotAction::Cancel { reason: request.reason, kind })
            .await?;
        info!("Cancelled slot {} of {} ({})", key, id, kind.label());

        let patient_sync = match current.patient_id() {
            Some(patient_id) => {
                let mut sync = self
                    .best_effort(
                        patient_id,
                        "clear next appointment",
                        self.patients.set_next_appointment(patient_id, id.professional_id, None),
                    )
                    .await;
                if kind == CancellationKind::NoShow {
                    let counted = self
                        .best_effort(
                            patient_id,
                            "increment no-show count",
                            self.patients.increment_no_show(patient_id, id.professional_id),
                        )
                        .await;
                    if !sync.is_failed() {
                        sync = counted;
                    }
                }
                sync
            }
            None => PatientSync::Skipped,
        };

        Ok(SlotTransition { month: *id, key: key.clone(), slot, patient_sync })
    }

    /// Back to available with the template's current duration and price.
    pub async fn reopen_slot(&self, id: &MonthId, key: &SlotKey) -> Result<SlotTransition, SchedulingError> {
        let template = current_template(self.templates.as_ref(), id.professional_id).await?;
        let current = self.load_slot(id, key).await?;
        let action = SlotAction::Reopen {
            duration: template.session_duration_minutes,
            price: template.default_price,
        };
        let slot = self.commit(id, key, &current, action).await?;
        info!("Reopened slot {} of {}", key, id);

        let patient_sync = match current.patient_id() {
            Some(patient_id) => {
                self.best_effort(
                    patient_id,
                    "clear next appointment",
                    self.patients.set_next_appointment(patient_id, id.professional_id, None),
                )
                .await
            }
            None => PatientSync::Skipped,
        };

        Ok(SlotTransition { month: *id, key: key.clone(), slot, patient_sync })
    }

    pub async fn block_slot(
        &self,
        id: &MonthId,
        key: &SlotKey,
        reason: String,
    ) -> Result<SlotTransition, SchedulingError> {
        let current = self.load_slot(id, key).await?;
        let slot = self.commit(id, key, &current, SlotAction::Block { reason }).await?;
        info!("Blocked slot {} of {}", key, id);
        Ok(SlotTransition { month: *id, key: key.clone(), slot, patient_sync: PatientSync::Skipped })
    }

    pub async fn toggle_payment(&self, id: &MonthId, key: &SlotKey) -> Result<SlotTransition, SchedulingError> {
        let current = self.load_slot(id, key).await?;
        let slot = self.commit(id, key, &current, SlotAction::TogglePayment).await?;
        debug!("Toggled payment on slot {} of {}", key, id);
        Ok(SlotTransition { month: *id, key: key.clone(), slot, patient_sync: PatientSync::Skipped })
    }

    // ==============================================================================
    // PATIENTS
    // ==============================================================================

    pub async fn search_patients(&self, name: &str) -> Result<Vec<PatientRecord>, SchedulingError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SchedulingError::Validation("Search name is required".to_string()));
        }
        self.patients.search_by_name(name).await
    }

    async fn resolve_patient(
        &self,
        professional_id: Uuid,
        patient: PatientRef,
    ) -> Result<PatientContact, SchedulingError> {
        match patient {
            PatientRef::Existing { patient_id } => self
                .patients
                .find_by_id(patient_id)
                .await?
                .map(PatientContact::from)
                .ok_or_else(|| SchedulingError::PatientNotFound(patient_id.to_string())),
            PatientRef::WalkIn { name, phone, email } => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(SchedulingError::Validation("Patient name is required".to_string()));
                }

                let known = self
                    .patients
                    .search_by_name(&name)
                    .await?
                    .into_iter()
                    .find(|p| {
                        p.display_name.trim().eq_ignore_ascii_case(&name)
                            && p.care_team.contains_key(&professional_id)
                    });
                if let Some(record) = known {
                    debug!("Walk-in '{}' matched existing patient {}", name, record.id);
                    return Ok(PatientContact::from(record));
                }

                let created = self
                    .patients
                    .create_patient(&name, phone.as_deref(), email.as_deref(), professional_id)
                    .await?;
                info!("Created patient {} for walk-in booking", created.id);
                Ok(PatientContact::from(created))
            }
        }
    }

    // ==============================================================================
    // INTERNALS
    // ==============================================================================

    async fn load_slot(&self, id: &MonthId, key: &SlotKey) -> Result<AgendaSlot, SchedulingError> {
        let agenda = self.get_month(id).await?;
        agenda
            .slots
            .get(key)
            .cloned()
            .ok_or_else(|| SchedulingError::SlotNotFound(key.clone()))
    }

    /// Compute the next slot value and write it only if the slot is still the
    /// one it was read as.
    async fn commit(
        &self,
        id: &MonthId,
        key: &SlotKey,
        current: &AgendaSlot,
        action: SlotAction,
    ) -> Result<AgendaSlot, SchedulingError> {
        let next = SlotLifecycle::apply(key, current, action, Utc::now())?;
        let update = SlotUpdate::Put {
            key: key.clone(),
            expected: Some(SlotGuard::of(current)),
            slot: next.clone(),
        };

        self.agendas.apply_updates(id, vec![update]).await.map_err(|e| {
            if e.requires_reread() {
                warn!("Slot {} of {} changed underneath the operation: {}", key, id, e);
            }
            e
        })?;
        Ok(next)
    }

    async fn best_effort<F>(&self, patient_id: Uuid, what: &str, write: F) -> PatientSync
    where
        F: Future<Output = Result<(), SchedulingError>>,
    {
        match write.await {
            Ok(()) => PatientSync::Applied,
            Err(e) => {
                warn!(
                    "Slot change kept, but failed to {} for patient {}: {}",
                    what, patient_id, e
                );
                PatientSync::Failed { message: e.to_string() }
            }
        }
    }
}

fn slot_start(id: &MonthId, key: &SlotKey) -> Option<NaiveDateTime> {
    key.to_datetime(id.year, id.month)
}
