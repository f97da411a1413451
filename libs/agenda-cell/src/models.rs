// libs/agenda-cell/src/models.rs
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::slot_key::SlotKey;

/// "HH:MM" wire format for local times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M").map_err(serde::de::Error::custom)
    }
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(0)
}

// ==============================================================================
// MONTH PARTITIONS
// ==============================================================================

/// Identity of one monthly partition: `(professional, year, month)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthId {
    pub professional_id: Uuid,
    pub year: i32,
    pub month: u32,
}

impl MonthId {
    pub fn new(professional_id: Uuid, year: i32, month: u32) -> Result<Self, SchedulingError> {
        if !(1..=12).contains(&month) {
            return Err(SchedulingError::Validation(format!("Month {} is outside 1..12", month)));
        }
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(SchedulingError::Validation(format!("Year {} is not supported", year)));
        }
        Ok(Self { professional_id, year, month })
    }

    pub fn containing(professional_id: Uuid, date: NaiveDate) -> Self {
        Self { professional_id, year: date.year(), month: date.month() }
    }

    /// "YYYY_MM", the document id of the partition.
    pub fn partition_key(&self) -> String {
        format!("{:04}_{:02}", self.year, self.month)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1, ..*self }
        } else {
            Self { month: self.month + 1, ..*self }
        }
    }

    pub fn days(&self) -> u32 {
        days_in_month(self.year, self.month)
    }

    pub fn date(&self, day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, day)
    }
}

impl fmt::Display for MonthId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.professional_id, self.partition_key())
    }
}

/// Inclusive date range, day granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, SchedulingError> {
        if end < start {
            return Err(SchedulingError::Validation(format!(
                "End date {} is before start date {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        let date = at.date();
        date >= self.start && date <= self.end
    }

    /// Every month partition the range touches, start month to end month
    /// inclusive, crossing year boundaries.
    pub fn partitions(&self, professional_id: Uuid) -> Vec<MonthId> {
        let last = MonthId::containing(professional_id, self.end);
        let mut current = MonthId::containing(professional_id, self.start);
        let mut months = vec![current];
        while current != last {
            current = current.next();
            months.push(current);
        }
        months
    }
}

// ==============================================================================
// WORK TEMPLATE
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub active: bool,
    #[serde(default)]
    pub ranges: Vec<TimeRange>,
}

/// No session is longer than a day.
pub const MAX_SESSION_MINUTES: u32 = 24 * 60;

/// Recurring weekly availability. Weekdays are keyed 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkTemplate {
    pub session_duration_minutes: u32,
    pub default_price: f64,
    #[serde(default)]
    pub days: BTreeMap<u8, DaySchedule>,
}

impl WorkTemplate {
    pub fn rule_for(&self, weekday: Weekday) -> Option<&DaySchedule> {
        self.days.get(&(weekday.num_days_from_sunday() as u8))
    }

    /// Editor-time validation. Generation itself never fails on a bad template.
    pub fn validate(&self) -> Result<(), SchedulingError> {
        if self.session_duration_minutes == 0 || self.session_duration_minutes > MAX_SESSION_MINUTES {
            return Err(SchedulingError::Validation(format!(
                "Session duration must be between 1 and {} minutes",
                MAX_SESSION_MINUTES
            )));
        }
        if !self.default_price.is_finite() || self.default_price < 0.0 {
            return Err(SchedulingError::Validation(
                "Default price must be zero or positive".to_string(),
            ));
        }

        for (weekday, schedule) in &self.days {
            if *weekday > 6 {
                return Err(SchedulingError::Validation(format!(
                    "Weekday {} must be between 0 (Sunday) and 6 (Saturday)",
                    weekday
                )));
            }

            let mut ranges = schedule.ranges.clone();
            ranges.sort_by_key(|r| r.start);
            for range in &ranges {
                if range.start >= range.end {
                    return Err(SchedulingError::Validation(format!(
                        "Range {}-{} on weekday {} must start before it ends",
                        range.start.format("%H:%M"),
                        range.end.format("%H:%M"),
                        weekday
                    )));
                }
            }
            for pair in ranges.windows(2) {
                if pair[0].overlaps(&pair[1]) {
                    return Err(SchedulingError::Validation(format!(
                        "Ranges {}-{} and {}-{} on weekday {} overlap",
                        pair[0].start.format("%H:%M"),
                        pair[0].end.format("%H:%M"),
                        pair[1].start.format("%H:%M"),
                        pair[1].end.format("%H:%M"),
                        weekday
                    )));
                }
            }
        }

        Ok(())
    }
}

// ==============================================================================
// SLOTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Booked,
    Blocked,
    Cancelled,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotStatus::Available => write!(f, "available"),
            SlotStatus::Booked => write!(f, "booked"),
            SlotStatus::Blocked => write!(f, "blocked"),
            SlotStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
}

impl PaymentStatus {
    pub fn toggled(self) -> Self {
        match self {
            PaymentStatus::Pending => PaymentStatus::Paid,
            PaymentStatus::Paid => PaymentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationKind {
    /// The patient called off the appointment.
    PatientCancelled,
    /// The patient did not show up; counts towards their no-show tally.
    NoShow,
    /// Displaced by the professional, e.g. by a blocking event.
    Professional,
}

impl CancellationKind {
    pub fn label(&self) -> &'static str {
        match self {
            CancellationKind::PatientCancelled => "Cancelled by patient",
            CancellationKind::NoShow => "Absence",
            CancellationKind::Professional => "Cancelled by professional",
        }
    }
}

/// Who occupies a slot and how they are paying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub patient_id: Option<Uuid>,
    pub patient_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub admin_notes: Option<String>,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub booked_at: DateTime<Utc>,
}

/// Status-specific payload. Only occupied states carry patient data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SlotState {
    Available,
    Booked {
        booking: Booking,
    },
    Blocked {
        reason: String,
    },
    Cancelled {
        booking: Booking,
        reason: String,
        reason_kind: CancellationKind,
        cancelled_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaSlot {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub duration: u32,
    pub price: f64,
    #[serde(flatten)]
    pub state: SlotState,
}

impl AgendaSlot {
    pub fn available(time: NaiveTime, duration: u32, price: f64) -> Self {
        Self { time, duration, price, state: SlotState::Available }
    }

    pub fn status(&self) -> SlotStatus {
        match self.state {
            SlotState::Available => SlotStatus::Available,
            SlotState::Booked { .. } => SlotStatus::Booked,
            SlotState::Blocked { .. } => SlotStatus::Blocked,
            SlotState::Cancelled { .. } => SlotStatus::Cancelled,
        }
    }

    pub fn booking(&self) -> Option<&Booking> {
        match &self.state {
            SlotState::Booked { booking } | SlotState::Cancelled { booking, .. } => Some(booking),
            SlotState::Available | SlotState::Blocked { .. } => None,
        }
    }

    pub fn patient_id(&self) -> Option<Uuid> {
        self.booking().and_then(|b| b.patient_id)
    }
}

/// One professional's slots for one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAgenda {
    pub professional_id: Uuid,
    pub year: i32,
    pub month: u32,
    pub slots: BTreeMap<SlotKey, AgendaSlot>,
    pub month_goal: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl MonthlyAgenda {
    pub fn new(id: MonthId, slots: BTreeMap<SlotKey, AgendaSlot>) -> Self {
        Self {
            professional_id: id.professional_id,
            year: id.year,
            month: id.month,
            slots,
            month_goal: None,
            updated_at: Utc::now(),
        }
    }

    pub fn id(&self) -> MonthId {
        MonthId {
            professional_id: self.professional_id,
            year: self.year,
            month: self.month,
        }
    }

    pub fn slot_datetime(&self, key: &SlotKey) -> Option<NaiveDateTime> {
        key.to_datetime(self.year, self.month)
    }

    /// Slots whose start falls inside `range`, in chronological order.
    pub fn slots_in<'a>(
        &'a self,
        range: &'a DateRange,
    ) -> impl Iterator<Item = (&'a SlotKey, &'a AgendaSlot, NaiveDateTime)> + 'a {
        self.slots.iter().filter_map(move |(key, slot)| {
            self.slot_datetime(key)
                .filter(|at| range.contains(*at))
                .map(|at| (key, slot, at))
        })
    }

    pub fn count_by_status(&self, status: SlotStatus) -> usize {
        self.slots.values().filter(|slot| slot.status() == status).count()
    }
}

// ==============================================================================
// EVENTS, WAITLIST, PATIENTS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnualEvent {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnnualEvent {
    pub fn range(&self) -> DateRange {
        DateRange { start: self.start_date, end: self.end_date }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub patient_name: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-professional cached state on a patient record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CareTeamLink {
    pub next_appointment: Option<NaiveDateTime>,
    #[serde(default)]
    pub no_show_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: Uuid,
    pub display_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub care_team: HashMap<Uuid, CareTeamLink>,
}

impl PatientRecord {
    pub fn care_link(&self, professional_id: Uuid) -> CareTeamLink {
        self.care_team.get(&professional_id).cloned().unwrap_or_default()
    }

    pub fn next_appointment_with(&self, professional_id: Uuid) -> Option<NaiveDateTime> {
        self.care_team.get(&professional_id).and_then(|link| link.next_appointment)
    }
}

// ==============================================================================
// OPERATION RESULTS
// ==============================================================================

/// Outcome of the best-effort patient-record write that follows a slot mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PatientSync {
    Applied,
    Skipped,
    Failed { message: String },
}

impl PatientSync {
    pub fn is_failed(&self) -> bool {
        matches!(self, PatientSync::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotTransition {
    pub month: MonthId,
    pub key: SlotKey,
    pub slot: AgendaSlot,
    pub patient_sync: PatientSync,
}

/// A booking that sits inside a blocking event's range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictItem {
    pub month: MonthId,
    pub partition: String,
    pub slot_key: SlotKey,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub patient_id: Option<Uuid>,
    pub patient_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    KeepBooking,
    MoveToWaitlist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventApplication {
    pub event: AnnualEvent,
    pub blocked_slots: usize,
    pub conflicts: Vec<ConflictItem>,
    pub skipped_partitions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRelease {
    pub range: DateRange,
    pub released_slots: usize,
    pub skipped_partitions: Vec<String>,
}

/// What happened to one conflict after the operator decided on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictOutcome {
    pub resolution: ConflictResolution,
    pub transition: Option<SlotTransition>,
    pub waitlist_entry: Option<WaitlistEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitlistAssignment {
    pub entry: WaitlistEntry,
    pub transition: SlotTransition,
    /// False when the slot was booked but the entry could not be deleted.
    pub entry_removed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditCorrection {
    pub patient_id: Uuid,
    pub previous: Option<NaiveDateTime>,
    pub corrected: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFailure {
    pub patient_id: Uuid,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub professional_id: Uuid,
    pub patients_scanned: usize,
    pub partitions_scanned: Vec<String>,
    pub corrections: Vec<AuditCorrection>,
    pub failures: Vec<AuditFailure>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

/// Who a booking is for: a known patient or a walk-in by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatientRef {
    Existing {
        patient_id: Uuid,
    },
    WalkIn {
        name: String,
        phone: Option<String>,
        email: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSlotRequest {
    pub patient: PatientRef,
    pub price: Option<f64>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_method: Option<String>,
    pub admin_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelSlotRequest {
    pub reason: String,
    pub kind: CancellationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSlotRequest {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddSlotRequest {
    pub day: u32,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub duration: Option<u32>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthGoalRequest {
    pub goal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRequest {
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueWaitlistRequest {
    pub patient_id: Option<Uuid>,
    pub patient_name: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignWaitlistRequest {
    pub year: i32,
    pub month: u32,
    pub slot_key: SlotKey,
    pub price: Option<f64>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_method: Option<String>,
    pub admin_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveConflictRequest {
    pub conflict: ConflictItem,
    pub resolution: ConflictResolution,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn template_with(ranges: Vec<TimeRange>) -> WorkTemplate {
        let mut days = BTreeMap::new();
        days.insert(1, DaySchedule { active: true, ranges });
        WorkTemplate { session_duration_minutes: 50, default_price: 60.0, days }
    }

    #[test]
    fn days_in_month_handles_leap_years() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2025, 2), 28);
        assert_eq!(days_in_month(2025, 12), 31);
        assert_eq!(days_in_month(2025, 4), 30);
    }

    #[test]
    fn month_id_rejects_invalid_month() {
        assert!(MonthId::new(Uuid::new_v4(), 2025, 0).is_err());
        assert!(MonthId::new(Uuid::new_v4(), 2025, 13).is_err());
        assert_eq!(MonthId::new(Uuid::nil(), 2025, 3).unwrap().partition_key(), "2025_03");
    }

    #[test]
    fn date_range_partitions_cross_year_boundary() {
        let pro = Uuid::new_v4();
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2025, 11, 20).unwrap(),
            NaiveDate::from_ymd_opt(2026, 2, 3).unwrap(),
        )
        .unwrap();
        let keys: Vec<_> = range.partitions(pro).iter().map(|m| m.partition_key()).collect();
        assert_eq!(keys, vec!["2025_11", "2025_12", "2026_01", "2026_02"]);
    }

    #[test]
    fn date_range_rejects_inverted_bounds() {
        let start = NaiveDate::from_ymd_opt(2025, 5, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 5, 9).unwrap();
        assert!(DateRange::new(start, end).is_err());
    }

    #[test]
    fn template_validation_rejects_overlapping_ranges() {
        let template = template_with(vec![
            TimeRange::new(t(9, 0), t(12, 0)),
            TimeRange::new(t(11, 30), t(14, 0)),
        ]);
        assert!(template.validate().is_err());
    }

    #[test]
    fn template_validation_accepts_adjacent_ranges() {
        let template = template_with(vec![
            TimeRange::new(t(14, 0), t(18, 0)),
            TimeRange::new(t(9, 0), t(14, 0)),
        ]);
        assert!(template.validate().is_ok());
    }

    #[test]
    fn template_validation_rejects_inverted_range_and_bad_settings() {
        assert!(template_with(vec![TimeRange::new(t(12, 0), t(9, 0))]).validate().is_err());

        let mut zero_duration = template_with(vec![]);
        zero_duration.session_duration_minutes = 0;
        assert!(zero_duration.validate().is_err());

        let mut day_long = template_with(vec![]);
        day_long.session_duration_minutes = MAX_SESSION_MINUTES;
        assert!(day_long.validate().is_ok());
        day_long.session_duration_minutes = MAX_SESSION_MINUTES + 1;
        assert!(day_long.validate().is_err());
        day_long.session_duration_minutes = u32::MAX;
        assert!(day_long.validate().is_err());

        let mut negative_price = template_with(vec![]);
        negative_price.default_price = -1.0;
        assert!(negative_price.validate().is_err());

        let mut bad_weekday = template_with(vec![]);
        bad_weekday.days.insert(7, DaySchedule::default());
        assert!(bad_weekday.validate().is_err());
    }

    #[test]
    fn slot_serializes_status_inline() {
        let slot = AgendaSlot::available(t(9, 0), 50, 60.0);
        let value = serde_json::to_value(&slot).unwrap();
        assert_eq!(value["status"], "available");
        assert_eq!(value["time"], "09:00");
        assert!(value.get("booking").is_none());

        let blocked = AgendaSlot {
            state: SlotState::Blocked { reason: "Congress".to_string() },
            price: 0.0,
            ..slot
        };
        let value = serde_json::to_value(&blocked).unwrap();
        let back: AgendaSlot = serde_json::from_value(value).unwrap();
        assert_eq!(back, blocked);
    }
}
