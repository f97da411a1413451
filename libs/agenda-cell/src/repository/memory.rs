// libs/agenda-cell/src/repository/memory.rs
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::models::{AnnualEvent, MonthId, MonthlyAgenda, PatientRecord, WaitlistEntry, WorkTemplate};

use super::{
    apply_batch, AgendaRepository, EventRepository, PatientDirectory, SlotUpdate,
    TemplateRepository, WaitlistRepository,
};

#[derive(Default)]
pub struct InMemoryAgendaRepository {
    months: RwLock<HashMap<MonthId, MonthlyAgenda>>,
}

impl InMemoryAgendaRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgendaRepository for InMemoryAgendaRepository {
    async fn get_month(&self, id: &MonthId) -> Result<Option<MonthlyAgenda>, SchedulingError> {
        Ok(self.months.read().await.get(id).cloned())
    }

    async fn initialize_month(&self, agenda: MonthlyAgenda) -> Result<(), SchedulingError> {
        self.months.write().await.insert(agenda.id(), agenda);
        Ok(())
    }

    async fn apply_updates(
        &self,
        id: &MonthId,
        updates: Vec<SlotUpdate>,
    ) -> Result<MonthlyAgenda, SchedulingError> {
        let mut months = self.months.write().await;
        let agenda = months
            .get_mut(id)
            .ok_or_else(|| SchedulingError::MonthNotInitialized(id.partition_key()))?;

        let count = updates.len();
        apply_batch(agenda, updates)?;
        debug!("Applied {} slot updates to {}", count, id);
        Ok(agenda.clone())
    }

    async fn set_month_goal(&self, id: &MonthId, goal: Option<String>) -> Result<(), SchedulingError> {
        let mut months = self.months.write().await;
        let agenda = months
            .get_mut(id)
            .ok_or_else(|| SchedulingError::MonthNotInitialized(id.partition_key()))?;
        agenda.month_goal = goal;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTemplateRepository {
    templates: RwLock<HashMap<Uuid, WorkTemplate>>,
}

impl InMemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn get_work_template(&self, professional_id: Uuid) -> Result<Option<WorkTemplate>, SchedulingError> {
        Ok(self.templates.read().await.get(&professional_id).cloned())
    }

    async fn save_work_template(
        &self,
        professional_id: Uuid,
        template: &WorkTemplate,
    ) -> Result<(), SchedulingError> {
        self.templates.write().await.insert(professional_id, template.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryEventRepository {
    events: RwLock<HashMap<Uuid, AnnualEvent>>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn list_events(&self, professional_id: Uuid) -> Result<Vec<AnnualEvent>, SchedulingError> {
        let mut events: Vec<_> = self
            .events
            .read()
            .await
            .values()
            .filter(|e| e.professional_id == professional_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.start_date, e.id));
        Ok(events)
    }

    async fn get_event(&self, professional_id: Uuid, event_id: Uuid) -> Result<Option<AnnualEvent>, SchedulingError> {
        Ok(self
            .events
            .read()
            .await
            .get(&event_id)
            .filter(|e| e.professional_id == professional_id)
            .cloned())
    }

    async fn save_event(&self, event: &AnnualEvent) -> Result<(), SchedulingError> {
        self.events.write().await.insert(event.id, event.clone());
        Ok(())
    }

    async fn delete_event(&self, professional_id: Uuid, event_id: Uuid) -> Result<(), SchedulingError> {
        let mut events = self.events.write().await;
        match events.get(&event_id) {
            Some(event) if event.professional_id == professional_id => {
                events.remove(&event_id);
                Ok(())
            }
            _ => Err(SchedulingError::EventNotFound(event_id.to_string())),
        }
    }
}

#[derive(Default)]
pub struct InMemoryWaitlistRepository {
    entries: RwLock<Vec<WaitlistEntry>>,
}

impl InMemoryWaitlistRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WaitlistRepository for InMemoryWaitlistRepository {
    async fn insert(&self, entry: &WaitlistEntry) -> Result<(), SchedulingError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn list(&self, professional_id: Uuid) -> Result<Vec<WaitlistEntry>, SchedulingError> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.professional_id == professional_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn get(&self, entry_id: Uuid) -> Result<Option<WaitlistEntry>, SchedulingError> {
        Ok(self.entries.read().await.iter().find(|e| e.id == entry_id).cloned())
    }

    async fn delete(&self, entry_id: Uuid) -> Result<(), SchedulingError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.id != entry_id);
        if entries.len() == before {
            return Err(SchedulingError::WaitlistEntryNotFound(entry_id.to_string()));
        }
        Ok(())
    }
}

/// Patient directory held in memory. `set_read_only(true)` makes every write
/// fail, the way a role without write access on patient records would.
#[derive(Default)]
pub struct InMemoryPatientDirectory {
    patients: RwLock<HashMap<Uuid, PatientRecord>>,
    read_only: AtomicBool,
}

impl InMemoryPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, patient: PatientRecord) {
        self.patients.write().await.insert(patient.id, patient);
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn ensure_writable(&self) -> Result<(), SchedulingError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(SchedulingError::Directory(
                "Permission denied: patient records are read-only for this user".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PatientDirectory for InMemoryPatientDirectory {
    async fn find_by_id(&self, patient_id: Uuid) -> Result<Option<PatientRecord>, SchedulingError> {
        Ok(self.patients.read().await.get(&patient_id).cloned())
    }

    async fn search_by_name(&self, name: &str) -> Result<Vec<PatientRecord>, SchedulingError> {
        let needle = name.trim().to_lowercase();
        let mut found: Vec<_> = self
            .patients
            .read()
            .await
            .values()
            .filter(|p| p.display_name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(found)
    }

    async fn create_patient(
        &self,
        name: &str,
        phone: Option<&str>,
        email: Option<&str>,
        professional_id: Uuid,
    ) -> Result<PatientRecord, SchedulingError> {
        self.ensure_writable()?;
        let mut care_team = HashMap::new();
        care_team.insert(professional_id, Default::default());
        let patient = PatientRecord {
            id: Uuid::new_v4(),
            display_name: name.trim().to_string(),
            phone: phone.map(str::to_string),
            email: email.map(str::to_string),
            care_team,
        };
        self.patients.write().await.insert(patient.id, patient.clone());
        Ok(patient)
    }

    async fn list_for_professional(&self, professional_id: Uuid) -> Result<Vec<PatientRecord>, SchedulingError> {
        let mut linked: Vec<_> = self
            .patients
            .read()
            .await
            .values()
            .filter(|p| p.care_team.contains_key(&professional_id))
            .cloned()
            .collect();
        linked.sort_by_key(|p| p.id);
        Ok(linked)
    }

    async fn set_next_appointment(
        &self,
        patient_id: Uuid,
        professional_id: Uuid,
        next: Option<NaiveDateTime>,
    ) -> Result<(), SchedulingError> {
        self.ensure_writable()?;
        let mut patients = self.patients.write().await;
        let patient = patients
            .get_mut(&patient_id)
            .ok_or_else(|| SchedulingError::PatientNotFound(patient_id.to_string()))?;
        patient.care_team.entry(professional_id).or_default().next_appointment = next;
        Ok(())
    }

    async fn increment_no_show(&self, patient_id: Uuid, professional_id: Uuid) -> Result<(), SchedulingError> {
        self.ensure_writable()?;
        let mut patients = self.patients.write().await;
        let patient = patients
            .get_mut(&patient_id)
            .ok_or_else(|| SchedulingError::PatientNotFound(patient_id.to_string()))?;
        patient.care_team.entry(professional_id).or_default().no_show_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn read_only_directory_still_serves_reads() {
        tokio_test::block_on(async {
            let directory = InMemoryPatientDirectory::new();
            let professional_id = Uuid::new_v4();
            let patient = directory
                .create_patient(" Ana Souza ", None, None, professional_id)
                .await
                .unwrap();
            assert_eq!(patient.display_name, "Ana Souza");
            assert!(patient.care_team.contains_key(&professional_id));

            directory.set_read_only(true);
            assert_matches!(
                directory.set_next_appointment(patient.id, professional_id, None).await,
                Err(SchedulingError::Directory(_))
            );
            assert_matches!(
                directory.increment_no_show(patient.id, professional_id).await,
                Err(SchedulingError::Directory(_))
            );
            assert_eq!(directory.search_by_name("ana").await.unwrap().len(), 1);
            assert_eq!(directory.list_for_professional(professional_id).await.unwrap().len(), 1);
        });
    }

    #[test]
    fn waitlist_delete_of_unknown_entry_is_not_found() {
        tokio_test::block_on(async {
            let waitlist = InMemoryWaitlistRepository::new();
            assert_matches!(
                waitlist.delete(Uuid::new_v4()).await,
                Err(SchedulingError::WaitlistEntryNotFound(_))
            );
        });
    }
}
