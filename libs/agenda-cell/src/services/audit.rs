// libs/agenda-cell/src/services/audit.rs
use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::models::{AuditCorrection, AuditFailure, AuditReport, MonthId, MonthlyAgenda, SlotState};
use crate::repository::{AgendaRepository, PatientDirectory};

/// Repairs the `next_appointment` pointer cached on patient records.
///
/// Runs on demand. It only looks at the current and the following month, so a
/// patient whose next booking is further out is reported as having none.
pub struct ReconciliationAuditor {
    agendas: Arc<dyn AgendaRepository>,
    patients: Arc<dyn PatientDirectory>,
}

impl ReconciliationAuditor {
    pub fn new(agendas: Arc<dyn AgendaRepository>, patients: Arc<dyn PatientDirectory>) -> Self {
        Self { agendas, patients }
    }

    #[instrument(skip(self))]
    pub async fn audit(&self, professional_id: Uuid, now: NaiveDateTime) -> Result<AuditReport, SchedulingError> {
        let current = MonthId::containing(professional_id, now.date());

        let mut agendas = Vec::new();
        for month in [current, current.next()] {
            match self.agendas.get_month(&month).await? {
                Some(agenda) => agendas.push(agenda),
                None => debug!("Partition {} not initialized, nothing to audit", month),
            }
        }
        let partitions_scanned = agendas.iter().map(|a| a.id().partition_key()).collect();

        let truth = compute_next_appointments(&agendas, now);
        let patients = self.patients.list_for_professional(professional_id).await?;

        let drifted: Vec<_> = patients
            .iter()
            .filter_map(|patient| {
                let cached = patient.next_appointment_with(professional_id);
                let computed = truth.get(&patient.id).copied();
                (cached != computed).then_some(AuditCorrection {
                    patient_id: patient.id,
                    previous: cached,
                    corrected: computed,
                })
            })
            .collect();

        let writes = drifted.iter().map(|correction| {
            self.patients
                .set_next_appointment(correction.patient_id, professional_id, correction.corrected)
        });
        let results = join_all(writes).await;

        let mut corrections = Vec::new();
        let mut failures = Vec::new();
        for (correction, result) in drifted.into_iter().zip(results) {
            match result {
                Ok(()) => corrections.push(correction),
                Err(e) => {
                    warn!("Could not correct next appointment of {}: {}", correction.patient_id, e);
                    failures.push(AuditFailure { patient_id: correction.patient_id, message: e.to_string() });
                }
            }
        }

        info!(
            "Audit of {} scanned {} patients: {} corrected, {} failed",
            professional_id,
            patients.len(),
            corrections.len(),
            failures.len()
        );

        Ok(AuditReport {
            professional_id,
            patients_scanned: patients.len(),
            partitions_scanned,
            corrections,
            failures,
        })
    }
}

/// Earliest booked slot starting at or after `now`, per patient.
pub fn compute_next_appointments(
    agendas: &[MonthlyAgenda],
    now: NaiveDateTime,
) -> HashMap<Uuid, NaiveDateTime> {
    let mut next: HashMap<Uuid, NaiveDateTime> = HashMap::new();

    for agenda in agendas {
        for (key, slot) in &agenda.slots {
            let SlotState::Booked { booking } = &slot.state else {
                continue;
            };
            let Some(patient_id) = booking.patient_id else {
                continue;
            };
            let Some(at) = agenda.slot_datetime(key) else {
                continue;
            };
            if at < now {
                continue;
            }
            next.entry(patient_id)
                .and_modify(|earliest| {
                    if at < *earliest {
                        *earliest = at;
                    }
                })
                .or_insert(at);
        }
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgendaSlot, Booking, PaymentStatus};
    use crate::slot_key::SlotKey;
    use chrono::{NaiveDate, Utc};
    use std::collections::BTreeMap;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
    }

    fn booked(patient_id: Uuid, time: NaiveDateTime) -> AgendaSlot {
        AgendaSlot {
            state: SlotState::Booked {
                booking: Booking {
                    patient_id: Some(patient_id),
                    patient_name: "Patient".to_string(),
                    phone: None,
                    email: None,
                    admin_notes: None,
                    payment_status: PaymentStatus::Pending,
                    payment_method: None,
                    booked_at: Utc::now(),
                },
            },
            ..AgendaSlot::available(time.time(), 50, 60.0)
        }
    }

    fn agenda(pro: Uuid, year: i32, month: u32, slots: Vec<(NaiveDateTime, AgendaSlot)>) -> MonthlyAgenda {
        let slots: BTreeMap<_, _> = slots
            .into_iter()
            .map(|(time, slot)| (SlotKey::from_datetime(time).unwrap(), slot))
            .collect();
        MonthlyAgenda::new(MonthId::new(pro, year, month).unwrap(), slots)
    }

    #[test]
    fn picks_earliest_future_booking_across_months() {
        let pro = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let now = at(2025, 5, 20, 12, 0);

        let may = agenda(pro, 2025, 5, vec![
            (at(2025, 5, 2, 9, 0), booked(patient, at(2025, 5, 2, 9, 0))),
            (at(2025, 5, 28, 15, 0), booked(patient, at(2025, 5, 28, 15, 0))),
        ]);
        let june = agenda(pro, 2025, 6, vec![(at(2025, 6, 3, 9, 0), booked(patient, at(2025, 6, 3, 9, 0)))]);

        let next = compute_next_appointments(&[may, june], now);
        assert_eq!(next.get(&patient), Some(&at(2025, 5, 28, 15, 0)));
    }

    #[test]
    fn past_bookings_are_not_next() {
        let pro = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let may = agenda(pro, 2025, 5, vec![(at(2025, 5, 2, 9, 0), booked(patient, at(2025, 5, 2, 9, 0)))]);

        let next = compute_next_appointments(&[may], at(2025, 5, 20, 12, 0));
        assert!(next.get(&patient).is_none());
    }

    #[test]
    fn booking_starting_exactly_now_counts_as_future() {
        let pro = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let now = at(2025, 5, 20, 9, 0);
        let may = agenda(pro, 2025, 5, vec![(now, booked(patient, now))]);

        assert_eq!(compute_next_appointments(&[may], now).get(&patient), Some(&now));
    }
}
