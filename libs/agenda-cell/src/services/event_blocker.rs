// libs/agenda-cell/src/services/event_blocker.rs
//
// Date-range blocks (vacations, congresses) applied across every month
// partition they touch. Bookings inside a block are never cancelled here:
// they come back as conflicts for the operator to resolve one by one.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::models::{
    AgendaSlot, AnnualEvent, CancelSlotRequest, CancellationKind, ConflictItem, ConflictOutcome,
    ConflictResolution, DateRange, EnqueueWaitlistRequest, EventApplication, EventRelease,
    EventRequest, MonthId, ResolveConflictRequest, SlotStatus, WorkTemplate,
};
use crate::repository::{AgendaRepository, EventRepository, SlotGuard, SlotUpdate, TemplateRepository};
use crate::services::agenda::AgendaService;
use crate::services::current_template;
use crate::services::lifecycle::{SlotAction, SlotLifecycle};
use crate::services::waitlist::WaitlistService;
use crate::slot_key::SlotKey;

/// Batches that lose a race with a single-slot write are recomputed this many
/// times before the error is surfaced.
const MAX_BATCH_ATTEMPTS: u32 = 3;

pub struct EventBlockerService {
    agendas: Arc<dyn AgendaRepository>,
    templates: Arc<dyn TemplateRepository>,
    events: Arc<dyn EventRepository>,
    agenda: Arc<AgendaService>,
    waitlist: Arc<WaitlistService>,
}

impl EventBlockerService {
    pub fn new(
        agendas: Arc<dyn AgendaRepository>,
        templates: Arc<dyn TemplateRepository>,
        events: Arc<dyn EventRepository>,
        agenda: Arc<AgendaService>,
        waitlist: Arc<WaitlistService>,
    ) -> Self {
        Self { agendas, templates, events, agenda, waitlist }
    }

    // ==============================================================================
    // EVENT LIFECYCLE
    // ==============================================================================

    #[instrument(skip(self, request))]
    pub async fn create_event(
        &self,
        professional_id: Uuid,
        request: EventRequest,
    ) -> Result<EventApplication, SchedulingError> {
        let (title, range) = validate_event(&request)?;
        let now = Utc::now();
        let event = AnnualEvent {
            id: Uuid::new_v4(),
            professional_id,
            title,
            start_date: range.start,
            end_date: range.end,
            created_at: now,
            updated_at: now,
        };

        self.events.save_event(&event).await?;
        info!("Created event '{}' ({} to {})", event.title, event.start_date, event.end_date);
        self.apply_event(&event).await
    }

    /// Edits are replayed as release(old range) then apply(new range).
    #[instrument(skip(self, request))]
    pub async fn update_event(
        &self,
        professional_id: Uuid,
        event_id: Uuid,
        request: EventRequest,
    ) -> Result<EventApplication, SchedulingError> {
        let (title, range) = validate_event(&request)?;
        let existing = self.find_event(professional_id, event_id).await?;

        self.release_event(professional_id, existing.range()).await?;

        let updated = AnnualEvent {
            title,
            start_date: range.start,
            end_date: range.end,
            updated_at: Utc::now(),
            ..existing
        };
        self.events.save_event(&updated).await?;
        info!("Updated event {}", updated.id);
        self.apply_event(&updated).await
    }

    #[instrument(skip(self))]
    pub async fn delete_event(&self, professional_id: Uuid, event_id: Uuid) -> Result<EventRelease, SchedulingError> {
        let existing = self.find_event(professional_id, event_id).await?;
        let release = self.release_event(professional_id, existing.range()).await?;
        self.events.delete_event(professional_id, event_id).await?;
        info!("Deleted event {} and released {} slots", event_id, release.released_slots);
        Ok(release)
    }

    pub async fn list_events(&self, professional_id: Uuid) -> Result<Vec<AnnualEvent>, SchedulingError> {
        self.events.list_events(professional_id).await
    }

    // ==============================================================================
    // APPLY / RELEASE
    // ==============================================================================

    /// Block every free slot inside the event and report the bookings it overlaps.
    /// Partitions that were never initialized are skipped.
    #[instrument(skip(self, event), fields(event_id = %event.id))]
    pub async fn apply_event(&self, event: &AnnualEvent) -> Result<EventApplication, SchedulingError> {
        let range = event.range();
        let mut blocked_slots = 0;
        let mut conflicts = Vec::new();
        let mut skipped_partitions = Vec::new();

        for month in range.partitions(event.professional_id) {
            match self.block_partition(&month, &range, &event.title).await? {
                Some((blocked, mut found)) => {
                    blocked_slots += blocked;
                    conflicts.append(&mut found);
                }
                None => skipped_partitions.push(month.partition_key()),
            }
        }

        if !conflicts.is_empty() {
            warn!("Event '{}' overlaps {} bookings", event.title, conflicts.len());
        }
        info!("Event '{}' blocked {} slots", event.title, blocked_slots);

        Ok(EventApplication {
            event: event.clone(),
            blocked_slots,
            conflicts,
            skipped_partitions,
        })
    }

    /// Free every blocked or available slot in the range, resetting it to the
    /// template's current defaults. Booked and cancelled slots are untouched.
    #[instrument(skip(self))]
    pub async fn release_event(
        &self,
        professional_id: Uuid,
        range: DateRange,
    ) -> Result<EventRelease, SchedulingError> {
        let template = current_template(self.templates.as_ref(), professional_id).await?;
        let mut released_slots = 0;
        let mut skipped_partitions = Vec::new();

        for month in range.partitions(professional_id) {
            match self.release_partition(&month, &range, &template).await? {
                Some(released) => released_slots += released,
                None => skipped_partitions.push(month.partition_key()),
            }
        }

        info!("Released {} slots between {} and {}", released_slots, range.start, range.end);
        Ok(EventRelease { range, released_slots, skipped_partitions })
    }

    // ==============================================================================
    // CONFLICTS
    // ==============================================================================

    /// Read-only: every booked slot whose date falls inside the range.
    pub async fn detect_conflicts(
        &self,
        professional_id: Uuid,
        range: DateRange,
    ) -> Result<Vec<ConflictItem>, SchedulingError> {
        let mut conflicts = Vec::new();
        for month in range.partitions(professional_id) {
            let Some(agenda) = self.agendas.get_month(&month).await? else {
                debug!("Partition {} not initialized, nothing to scan", month);
                continue;
            };
            conflicts.extend(
                agenda
                    .slots_in(&range)
                    .filter(|(_, slot, _)| slot.status() == SlotStatus::Booked)
                    .map(|(key, slot, at)| conflict_item(&month, key, slot, at)),
            );
        }
        Ok(conflicts)
    }

    pub async fn resolve_conflict(
        &self,
        professional_id: Uuid,
        request: ResolveConflictRequest,
    ) -> Result<ConflictOutcome, SchedulingError> {
        let conflict = request.conflict;
        if conflict.month.professional_id != professional_id {
            return Err(SchedulingError::Validation(
                "Conflict belongs to another professional".to_string(),
            ));
        }

        if request.resolution == ConflictResolution::KeepBooking {
            info!("Keeping booking {} of {} despite the overlap", conflict.slot_key, conflict.month);
            return Ok(ConflictOutcome {
                resolution: ConflictResolution::KeepBooking,
                transition: None,
                waitlist_entry: None,
            });
        }

        let reason = request.reason.trim().to_string();
        if reason.is_empty() {
            return Err(SchedulingError::Validation("Cancellation reason is required".to_string()));
        }

        // The conflict list may be stale; make sure the same patient still holds the slot.
        let agenda = self.agenda.get_month(&conflict.month).await?;
        let slot = agenda
            .slots
            .get(&conflict.slot_key)
            .cloned()
            .ok_or_else(|| SchedulingError::SlotNotFound(conflict.slot_key.clone()))?;
        if slot.status() != SlotStatus::Booked || slot.patient_id() != conflict.patient_id {
            return Err(SchedulingError::StaleSlot {
                key: conflict.slot_key.clone(),
                expected: format!("booked by {}", conflict.patient_name),
                actual: slot.status().to_string(),
            });
        }
        let phone = slot.booking().and_then(|b| b.phone.clone());

        let transition = self
            .agenda
            .cancel_loaded(
                &conflict.month,
                &conflict.slot_key,
                slot,
                CancelSlotRequest { reason: reason.clone(), kind: CancellationKind::Professional },
            )
            .await?;

        let entry = self
            .waitlist
            .enqueue(
                professional_id,
                EnqueueWaitlistRequest {
                    patient_id: conflict.patient_id,
                    patient_name: conflict.patient_name.clone(),
                    phone,
                    notes: Some(format!(
                        "Moved from {} {}: {}",
                        conflict.date,
                        conflict.time.format("%H:%M"),
                        reason
                    )),
                },
            )
            .await
            .map_err(|e| {
                error!("Cancelled {} but could not add its patient to the waitlist: {}", conflict.slot_key, e);
                e
            })?;

        info!("Moved {} from slot {} to the waitlist", conflict.patient_name, conflict.slot_key);
        Ok(ConflictOutcome {
            resolution: ConflictResolution::MoveToWaitlist,
            transition: Some(transition),
            waitlist_entry: Some(entry),
        })
    }

    // ==============================================================================
    // PER-PARTITION BATCHES
    // ==============================================================================

    async fn block_partition(
        &self,
        month: &MonthId,
        range: &DateRange,
        reason: &str,
    ) -> Result<Option<(usize, Vec<ConflictItem>)>, SchedulingError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(agenda) = self.agendas.get_month(month).await? else {
                debug!("Partition {} not initialized, skipping", month);
                return Ok(None);
            };

            let now = Utc::now();
            let mut updates = Vec::new();
            let mut conflicts = Vec::new();
            for (key, slot, at) in agenda.slots_in(range) {
                match slot.status() {
                    SlotStatus::Available => {
                        let blocked = SlotLifecycle::apply(
                            key,
                            slot,
                            SlotAction::Block { reason: reason.to_string() },
                            now,
                        )?;
                        updates.push(SlotUpdate::Put {
                            key: key.clone(),
                            expected: Some(SlotGuard::of(slot)),
                            slot: blocked,
                        });
                    }
                    SlotStatus::Booked => conflicts.push(conflict_item(month, key, slot, at)),
                    SlotStatus::Blocked | SlotStatus::Cancelled => {}
                }
            }

            let blocked = updates.len();
            if blocked == 0 {
                return Ok(Some((0, conflicts)));
            }
            match self.agendas.apply_updates(month, updates).await {
                Ok(_) => return Ok(Some((blocked, conflicts))),
                Err(e @ SchedulingError::StaleSlot { .. }) if attempt < MAX_BATCH_ATTEMPTS => {
                    warn!("Block batch on {} raced a slot write ({}), recomputing", month, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn release_partition(
        &self,
        month: &MonthId,
        range: &DateRange,
        template: &WorkTemplate,
    ) -> Result<Option<usize>, SchedulingError> {
        let duration = template.session_duration_minutes;
        let price = template.default_price;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(agenda) = self.agendas.get_month(month).await? else {
                debug!("Partition {} not initialized, skipping", month);
                return Ok(None);
            };

            let now = Utc::now();
            let mut updates = Vec::new();
            for (key, slot, _) in agenda.slots_in(range) {
                let released = match slot.status() {
                    SlotStatus::Blocked => {
                        SlotLifecycle::apply(key, slot, SlotAction::Reopen { duration, price }, now)?
                    }
                    SlotStatus::Available if slot.duration != duration || slot.price != price => {
                        AgendaSlot::available(slot.time, duration, price)
                    }
                    _ => continue,
                };
                updates.push(SlotUpdate::Put {
                    key: key.clone(),
                    expected: Some(SlotGuard::of(slot)),
                    slot: released,
                });
            }

            let released = updates.len();
            if released == 0 {
                return Ok(Some(0));
            }
            match self.agendas.apply_updates(month, updates).await {
                Ok(_) => return Ok(Some(released)),
                Err(e @ SchedulingError::StaleSlot { .. }) if attempt < MAX_BATCH_ATTEMPTS => {
                    warn!("Release batch on {} raced a slot write ({}), recomputing", month, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn find_event(&self, professional_id: Uuid, event_id: Uuid) -> Result<AnnualEvent, SchedulingError> {
        self.events
            .get_event(professional_id, event_id)
            .await?
            .ok_or_else(|| SchedulingError::EventNotFound(event_id.to_string()))
    }
}

fn validate_event(request: &EventRequest) -> Result<(String, DateRange), SchedulingError> {
    let title = request.title.trim().to_string();
    if title.is_empty() {
        return Err(SchedulingError::Validation("Event title is required".to_string()));
    }
    let range = DateRange::new(request.start_date, request.end_date)?;
    Ok((title, range))
}

fn conflict_item(month: &MonthId, key: &SlotKey, slot: &AgendaSlot, at: NaiveDateTime) -> ConflictItem {
    ConflictItem {
        month: *month,
        partition: month.partition_key(),
        slot_key: key.clone(),
        date: at.date(),
        time: slot.time,
        patient_id: slot.patient_id(),
        patient_name: slot
            .booking()
            .map(|b| b.patient_name.clone())
            .unwrap_or_default(),
    }
}
