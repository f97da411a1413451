// libs/agenda-cell/src/services/lifecycle.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::SchedulingError;
use crate::models::{AgendaSlot, Booking, CancellationKind, SlotState};
use crate::slot_key::SlotKey;

/// A single-slot transition request.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotAction {
    Book { booking: Booking, price: f64 },
    Cancel { reason: String, kind: CancellationKind },
    /// Duration and price come from the template as it is *now*.
    Reopen { duration: u32, price: f64 },
    Block { reason: String },
    TogglePayment,
}

impl SlotAction {
    pub fn name(&self) -> &'static str {
        match self {
            SlotAction::Book { .. } => "book",
            SlotAction::Cancel { kind: CancellationKind::NoShow, .. } => "mark no-show on",
            SlotAction::Cancel { .. } => "cancel",
            SlotAction::Reopen { .. } => "reopen",
            SlotAction::Block { .. } => "block",
            SlotAction::TogglePayment => "toggle payment on",
        }
    }
}

/// The slot state machine. Pure: it validates and computes the next slot
/// value, persistence and patient side effects belong to the caller.
pub struct SlotLifecycle;

impl SlotLifecycle {
    pub fn apply(
        key: &SlotKey,
        slot: &AgendaSlot,
        action: SlotAction,
        now: DateTime<Utc>,
    ) -> Result<AgendaSlot, SchedulingError> {
        let from = slot.status();
        let action_name = action.name();
        debug!("Applying '{}' to slot {} ({})", action_name, key, from);

        let reject = || {
            warn!("Rejected '{}' on slot {} in status {}", action_name, key, from);
            SchedulingError::InvalidTransition { key: key.clone(), from, action: action_name }
        };

        let next = match (&slot.state, action) {
            (SlotState::Available, SlotAction::Book { booking, price }) => {
                if booking.patient_name.trim().is_empty() {
                    return Err(SchedulingError::Validation("Patient name is required".to_string()));
                }
                validate_price(price)?;
                AgendaSlot {
                    price,
                    state: SlotState::Booked { booking },
                    ..slot.clone()
                }
            }
            (SlotState::Booked { booking }, SlotAction::Cancel { reason, kind }) => {
                let reason = required(reason, "Cancellation reason")?;
                AgendaSlot {
                    state: SlotState::Cancelled {
                        booking: booking.clone(),
                        reason,
                        reason_kind: kind,
                        cancelled_at: now,
                    },
                    ..slot.clone()
                }
            }
            (
                SlotState::Cancelled { .. } | SlotState::Blocked { .. },
                SlotAction::Reopen { duration, price },
            ) => {
                validate_price(price)?;
                AgendaSlot::available(slot.time, duration, price)
            }
            (SlotState::Available, SlotAction::Block { reason }) => {
                let reason = required(reason, "Block reason")?;
                AgendaSlot {
                    price: 0.0,
                    state: SlotState::Blocked { reason },
                    ..slot.clone()
                }
            }
            (SlotState::Booked { booking }, SlotAction::TogglePayment) => {
                let mut booking = booking.clone();
                booking.payment_status = booking.payment_status.toggled();
                AgendaSlot {
                    state: SlotState::Booked { booking },
                    ..slot.clone()
                }
            }
            _ => return Err(reject()),
        };

        Ok(next)
    }
}

fn required(value: String, field: &str) -> Result<String, SchedulingError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SchedulingError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

fn validate_price(price: f64) -> Result<(), SchedulingError> {
    if !price.is_finite() || price < 0.0 {
        return Err(SchedulingError::Validation("Price must be zero or positive".to_string()));
    }
    Ok(())
}
