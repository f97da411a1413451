pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod router;
pub mod services;
pub mod slot_key;
pub mod state;

pub use error::SchedulingError;
pub use models::*;
pub use router::agenda_routes;
pub use slot_key::SlotKey;
pub use state::{AgendaRepositories, AgendaState};
