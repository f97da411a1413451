// libs/agenda-cell/src/services/waitlist.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::models::{
    AssignWaitlistRequest, BookSlotRequest, EnqueueWaitlistRequest, MonthId, PatientRef,
    WaitlistAssignment, WaitlistEntry,
};
use crate::repository::{PatientDirectory, WaitlistRepository};
use crate::services::agenda::AgendaService;

/// Patients waiting for an earlier slot. Entries are listed oldest first but
/// the operator may pick any of them.
pub struct WaitlistService {
    waitlist: Arc<dyn WaitlistRepository>,
    patients: Arc<dyn PatientDirectory>,
    agenda: Arc<AgendaService>,
}

impl WaitlistService {
    pub fn new(
        waitlist: Arc<dyn WaitlistRepository>,
        patients: Arc<dyn PatientDirectory>,
        agenda: Arc<AgendaService>,
    ) -> Self {
        Self { waitlist, patients, agenda }
    }

    pub async fn enqueue(
        &self,
        professional_id: Uuid,
        request: EnqueueWaitlistRequest,
    ) -> Result<WaitlistEntry, SchedulingError> {
        let patient_name = request.patient_name.trim().to_string();
        if patient_name.is_empty() {
            return Err(SchedulingError::Validation("Patient name is required".to_string()));
        }
        if let Some(patient_id) = request.patient_id {
            if self.patients.find_by_id(patient_id).await?.is_none() {
                return Err(SchedulingError::PatientNotFound(patient_id.to_string()));
            }
        }

        let entry = WaitlistEntry {
            id: Uuid::new_v4(),
            professional_id,
            patient_id: request.patient_id,
            patient_name,
            phone: request.phone.filter(|p| !p.trim().is_empty()),
            notes: request.notes.filter(|n| !n.trim().is_empty()),
            created_at: Utc::now(),
        };
        self.waitlist.insert(&entry).await?;

        info!("Added {} to the waitlist of {}", entry.patient_name, professional_id);
        Ok(entry)
    }

    pub async fn list(&self, professional_id: Uuid) -> Result<Vec<WaitlistEntry>, SchedulingError> {
        let entries = self.waitlist.list(professional_id).await?;
        debug!("Waitlist of {} has {} entries", professional_id, entries.len());
        Ok(entries)
    }

    pub async fn remove(&self, professional_id: Uuid, entry_id: Uuid) -> Result<(), SchedulingError> {
        self.find_entry(professional_id, entry_id).await?;
        self.waitlist.delete(entry_id).await?;
        info!("Removed waitlist entry {}", entry_id);
        Ok(())
    }

    /// Book the entry's patient into a free slot, then drop the entry.
    ///
    /// The booking is the commit point: if the entry cannot be deleted
    /// afterwards the assignment still stands and `entry_removed` is false.
    pub async fn assign(
        &self,
        professional_id: Uuid,
        entry_id: Uuid,
        request: AssignWaitlistRequest,
    ) -> Result<WaitlistAssignment, SchedulingError> {
        let entry = self.find_entry(professional_id, entry_id).await?;
        let month = MonthId::new(professional_id, request.year, request.month)?;

        let patient = match entry.patient_id {
            Some(patient_id) => PatientRef::Existing { patient_id },
            None => PatientRef::WalkIn {
                name: entry.patient_name.clone(),
                phone: entry.phone.clone(),
                email: None,
            },
        };
        let booking = BookSlotRequest {
            patient,
            price: request.price,
            payment_status: request.payment_status,
            payment_method: request.payment_method,
            admin_notes: request.admin_notes.or_else(|| entry.notes.clone()),
        };

        let transition = self.agenda.book_slot(&month, &request.slot_key, booking).await?;

        let entry_removed = match self.waitlist.delete(entry.id).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Booked waitlist entry {} but could not remove it: {}", entry.id, e);
                false
            }
        };

        info!(
            "Assigned waitlist entry {} to slot {} of {}",
            entry.id, request.slot_key, month
        );
        Ok(WaitlistAssignment { entry, transition, entry_removed })
    }

    async fn find_entry(&self, professional_id: Uuid, entry_id: Uuid) -> Result<WaitlistEntry, SchedulingError> {
        self.waitlist
            .get(entry_id)
            .await?
            .filter(|e| e.professional_id == professional_id)
            .ok_or_else(|| SchedulingError::WaitlistEntryNotFound(entry_id.to_string()))
    }
}
