use thiserror::Error;

use crate::models::SlotStatus;
use crate::slot_key::SlotKey;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Month {0} has not been initialized")]
    MonthNotInitialized(String),

    #[error("Slot {0} not found")]
    SlotNotFound(SlotKey),

    #[error("Slot {0} already exists")]
    SlotAlreadyExists(SlotKey),

    #[error("Cannot {action} slot {key} while it is {from}")]
    InvalidTransition {
        key: SlotKey,
        from: SlotStatus,
        action: &'static str,
    },

    #[error("Slot {key} changed since it was read (expected {expected}, found {actual})")]
    StaleSlot {
        key: SlotKey,
        expected: String,
        actual: String,
    },

    #[error("Patient {0} not found")]
    PatientNotFound(String),

    #[error("Event {0} not found")]
    EventNotFound(String),

    #[error("Waitlist entry {0} not found")]
    WaitlistEntryNotFound(String),

    #[error("Professional {0} has no work template configured")]
    TemplateNotConfigured(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Patient directory error: {0}")]
    Directory(String),
}

impl SchedulingError {
    /// Errors that mean the caller acted on an outdated view of the calendar.
    pub fn requires_reread(&self) -> bool {
        matches!(
            self,
            SchedulingError::StaleSlot { .. }
                | SchedulingError::InvalidTransition { .. }
                | SchedulingError::SlotNotFound(_)
                | SchedulingError::SlotAlreadyExists(_)
        )
    }
}
