// libs/agenda-cell/src/state.rs
use std::sync::Arc;

use tracing::{info, warn};

use shared_config::{AppConfig, StorageBackend};
use shared_database::SupabaseClient;

use crate::repository::{
    AgendaRepository, EventRepository, InMemoryAgendaRepository, InMemoryEventRepository,
    InMemoryPatientDirectory, InMemoryTemplateRepository, InMemoryWaitlistRepository,
    PatientDirectory, SupabaseAgendaRepository, SupabaseEventRepository,
    SupabasePatientDirectory, SupabaseTemplateRepository, SupabaseWaitlistRepository,
    TemplateRepository, WaitlistRepository,
};
use crate::services::agenda::AgendaService;
use crate::services::audit::ReconciliationAuditor;
use crate::services::event_blocker::EventBlockerService;
use crate::services::settings::SettingsService;
use crate::services::waitlist::WaitlistService;

/// Every storage seam the services need.
#[derive(Clone)]
pub struct AgendaRepositories {
    pub agendas: Arc<dyn AgendaRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub events: Arc<dyn EventRepository>,
    pub waitlist: Arc<dyn WaitlistRepository>,
    pub patients: Arc<dyn PatientDirectory>,
}

impl AgendaRepositories {
    pub fn in_memory() -> Self {
        Self::with_directory(Arc::new(InMemoryPatientDirectory::new()))
    }

    /// In-memory stores around a caller-provided patient directory.
    pub fn with_directory(patients: Arc<dyn PatientDirectory>) -> Self {
        Self {
            agendas: Arc::new(InMemoryAgendaRepository::new()),
            templates: Arc::new(InMemoryTemplateRepository::new()),
            events: Arc::new(InMemoryEventRepository::new()),
            waitlist: Arc::new(InMemoryWaitlistRepository::new()),
            patients,
        }
    }

    pub fn supabase(config: &AppConfig) -> Self {
        let client = Arc::new(SupabaseClient::new(config));
        Self {
            agendas: Arc::new(SupabaseAgendaRepository::new(client.clone(), config.write_retries)),
            templates: Arc::new(SupabaseTemplateRepository::new(client.clone())),
            events: Arc::new(SupabaseEventRepository::new(client.clone())),
            waitlist: Arc::new(SupabaseWaitlistRepository::new(client.clone())),
            patients: Arc::new(SupabasePatientDirectory::new(client)),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        match config.storage_backend {
            StorageBackend::Supabase if config.is_configured() => {
                info!("Agenda storage: Supabase at {}", config.supabase_url);
                Self::supabase(config)
            }
            StorageBackend::Supabase => {
                warn!("Supabase storage requested without credentials, using in-memory storage");
                Self::in_memory()
            }
            StorageBackend::Memory => {
                info!("Agenda storage: in-memory");
                Self::in_memory()
            }
        }
    }
}

/// Shared handler state: one instance of each service.
#[derive(Clone)]
pub struct AgendaState {
    pub agenda: Arc<AgendaService>,
    pub settings: Arc<SettingsService>,
    pub events: Arc<EventBlockerService>,
    pub waitlist: Arc<WaitlistService>,
    pub auditor: Arc<ReconciliationAuditor>,
}

impl AgendaState {
    pub fn new(repos: AgendaRepositories) -> Self {
        let agenda = Arc::new(AgendaService::new(
            repos.agendas.clone(),
            repos.templates.clone(),
            repos.patients.clone(),
        ));
        let waitlist = Arc::new(WaitlistService::new(
            repos.waitlist.clone(),
            repos.patients.clone(),
            agenda.clone(),
        ));
        let events = Arc::new(EventBlockerService::new(
            repos.agendas.clone(),
            repos.templates.clone(),
            repos.events.clone(),
            agenda.clone(),
            waitlist.clone(),
        ));

        Self {
            settings: Arc::new(SettingsService::new(repos.templates.clone())),
            auditor: Arc::new(ReconciliationAuditor::new(repos.agendas.clone(), repos.patients.clone())),
            agenda,
            events,
            waitlist,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(AgendaRepositories::from_config(config))
    }
}
