#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use agenda_cell::models::{
    BookSlotRequest, CareTeamLink, DaySchedule, MonthId, PatientRecord, PatientRef, TimeRange,
    WorkTemplate,
};
use agenda_cell::repository::InMemoryPatientDirectory;
use agenda_cell::{AgendaRepositories, AgendaState, SlotKey};

pub fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    date(y, m, d).and_time(t(h, min))
}

pub fn key(raw: &str) -> SlotKey {
    SlotKey::parse(raw).unwrap()
}

/// Monday to Friday, 09:00-11:00.
pub fn weekday_template(duration: u32, price: f64) -> WorkTemplate {
    let mut days = BTreeMap::new();
    for weekday in 1..=5 {
        days.insert(
            weekday,
            DaySchedule { active: true, ranges: vec![TimeRange::new(t(9, 0), t(11, 0))] },
        );
    }
    WorkTemplate { session_duration_minutes: duration, default_price: price, days }
}

pub fn book_existing(patient_id: Uuid) -> BookSlotRequest {
    BookSlotRequest {
        patient: PatientRef::Existing { patient_id },
        price: None,
        payment_status: None,
        payment_method: Some("pix".to_string()),
        admin_notes: None,
    }
}

pub fn book_walk_in(name: &str) -> BookSlotRequest {
    BookSlotRequest {
        patient: PatientRef::WalkIn { name: name.to_string(), phone: Some("555-0199".to_string()), email: None },
        price: None,
        payment_status: None,
        payment_method: None,
        admin_notes: None,
    }
}

pub struct Harness {
    pub professional_id: Uuid,
    pub state: AgendaState,
    pub repos: AgendaRepositories,
    pub directory: Arc<InMemoryPatientDirectory>,
}

impl Harness {
    /// Fresh in-memory stores with the weekday template (50 min, 60.0) saved.
    pub async fn new() -> Self {
        let directory = Arc::new(InMemoryPatientDirectory::new());
        let repos = AgendaRepositories::with_directory(directory.clone());
        let state = AgendaState::new(repos.clone());
        let professional_id = Uuid::new_v4();

        state
            .settings
            .update_template(professional_id, weekday_template(50, 60.0))
            .await
            .unwrap();

        Self { professional_id, state, repos, directory }
    }

    pub fn month(&self, year: i32, month: u32) -> MonthId {
        MonthId::new(self.professional_id, year, month).unwrap()
    }

    pub async fn initialize(&self, year: i32, month: u32) -> MonthId {
        let id = self.month(year, month);
        self.state.agenda.initialize_month(id).await.unwrap();
        id
    }

    /// A patient already linked to this professional.
    pub async fn patient(&self, name: &str) -> PatientRecord {
        self.patient_with_pointer(name, None).await
    }

    pub async fn patient_with_pointer(&self, name: &str, next: Option<NaiveDateTime>) -> PatientRecord {
        let mut care_team = HashMap::new();
        care_team.insert(
            self.professional_id,
            CareTeamLink { next_appointment: next, no_show_count: 0 },
        );
        let record = PatientRecord {
            id: Uuid::new_v4(),
            display_name: name.to_string(),
            phone: None,
            email: None,
            care_team,
        };
        self.directory.insert(record.clone()).await;
        record
    }

    pub async fn care_link(&self, patient_id: Uuid) -> CareTeamLink {
        use agenda_cell::repository::PatientDirectory;
        self.directory
            .find_by_id(patient_id)
            .await
            .unwrap()
            .unwrap()
            .care_link(self.professional_id)
    }
}
