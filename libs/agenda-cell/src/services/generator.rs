// libs/agenda-cell/src/services/generator.rs
use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use tracing::debug;

use crate::models::{days_in_month, AgendaSlot, TimeRange, WorkTemplate};
use crate::slot_key::SlotKey;

/// Expands a weekly [`WorkTemplate`] into a month of empty bookable slots.
pub struct ScheduleGenerator;

impl ScheduleGenerator {
    /// Pure function of its inputs: the same template always yields the same
    /// skeleton. Slots that would run past the end of their range are dropped.
    pub fn generate(year: i32, month: u32, template: &WorkTemplate) -> BTreeMap<SlotKey, AgendaSlot> {
        let mut slots = BTreeMap::new();

        for day in 1..=days_in_month(year, month) {
            let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                continue;
            };
            let Some(rule) = template.rule_for(date.weekday()) else {
                continue;
            };
            if !rule.active {
                continue;
            }

            for range in &rule.ranges {
                for start in Self::session_starts(range, template.session_duration_minutes) {
                    // Within one day start times are unique per range; overlapping
                    // ranges are an editor error and the first writer wins.
                    if let Ok(key) = SlotKey::from_time(day, start) {
                        slots.entry(key).or_insert_with(|| {
                            AgendaSlot::available(
                                start,
                                template.session_duration_minutes,
                                template.default_price,
                            )
                        });
                    }
                }
            }
        }

        debug!(
            "Generated {} slots for {:04}-{:02}",
            slots.len(),
            year,
            month
        );
        slots
    }

    /// Start times of every whole session that fits inside `range`.
    pub fn session_starts(range: &TimeRange, duration_minutes: u32) -> Vec<NaiveTime> {
        let mut starts = Vec::new();
        if duration_minutes == 0 || range.start >= range.end {
            return starts;
        }

        let end_minutes = minutes_of_day(range.end);
        let mut cursor = minutes_of_day(range.start);

        while let Some(session_end) = cursor.checked_add(duration_minutes) {
            if session_end > end_minutes {
                break;
            }
            if let Some(time) = NaiveTime::from_num_seconds_from_midnight_opt(cursor * 60, 0) {
                starts.push(time);
            }
            cursor = session_end;
        }

        starts
    }
}

fn minutes_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DaySchedule;
    use chrono::Weekday;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday_template(start: NaiveTime, end: NaiveTime, duration: u32) -> WorkTemplate {
        let mut days = BTreeMap::new();
        days.insert(1, DaySchedule { active: true, ranges: vec![TimeRange::new(start, end)] });
        WorkTemplate { session_duration_minutes: duration, default_price: 80.0, days }
    }

    #[test]
    fn drops_sessions_that_overflow_the_range() {
        // 2025-05-05 is a Monday.
        let template = monday_template(t(9, 0), t(11, 0), 50);
        let slots = ScheduleGenerator::generate(2025, 5, &template);

        let monday: Vec<_> = slots.keys().filter(|k| k.day() == 5).map(|k| k.as_str().to_string()).collect();
        assert_eq!(monday, vec!["05_0900", "05_0950"]);
    }

    #[test]
    fn only_active_weekdays_get_slots() {
        let template = monday_template(t(9, 0), t(10, 0), 30);
        let slots = ScheduleGenerator::generate(2025, 5, &template);

        for key in slots.keys() {
            let date = NaiveDate::from_ymd_opt(2025, 5, key.day()).unwrap();
            assert_eq!(date.weekday(), Weekday::Mon);
        }
        // Mondays in May 2025: 5, 12, 19, 26.
        assert_eq!(slots.len(), 8);
    }

    #[test]
    fn inactive_day_is_skipped() {
        let mut template = monday_template(t(9, 0), t(10, 0), 30);
        template.days.get_mut(&1).unwrap().active = false;
        assert!(ScheduleGenerator::generate(2025, 5, &template).is_empty());
    }

    #[test]
    fn malformed_range_yields_nothing() {
        let template = monday_template(t(11, 0), t(9, 0), 30);
        assert!(ScheduleGenerator::generate(2025, 5, &template).is_empty());
    }

    #[test]
    fn slots_inherit_template_defaults_and_never_exceed_range_end() {
        let template = monday_template(t(8, 15), t(12, 0), 45);
        let slots = ScheduleGenerator::generate(2025, 5, &template);

        for slot in slots.values() {
            assert_eq!(slot.duration, 45);
            assert_eq!(slot.price, 80.0);
            assert!(minutes_of_day(slot.time) + slot.duration <= minutes_of_day(t(12, 0)));
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let mut template = monday_template(t(9, 0), t(13, 0), 40);
        template.days.insert(
            4,
            DaySchedule {
                active: true,
                ranges: vec![TimeRange::new(t(8, 0), t(9, 0)), TimeRange::new(t(15, 0), t(18, 30))],
            },
        );
        let first = ScheduleGenerator::generate(2024, 2, &template);
        let second = ScheduleGenerator::generate(2024, 2, &template);
        assert_eq!(first, second);
    }

    #[test]
    fn oversized_duration_yields_no_sessions() {
        let range = TimeRange::new(t(9, 0), t(11, 0));
        assert!(ScheduleGenerator::session_starts(&range, u32::MAX).is_empty());
        assert!(ScheduleGenerator::session_starts(&range, u32::MAX - 500).is_empty());

        let template = monday_template(t(0, 0), t(23, 59), u32::MAX);
        assert!(ScheduleGenerator::generate(2025, 5, &template).is_empty());
    }

    #[test]
    fn range_ending_at_midnight_boundary_fits_last_session() {
        let range = TimeRange::new(t(22, 0), t(23, 59));
        assert_eq!(ScheduleGenerator::session_starts(&range, 60), vec![t(22, 0)]);
    }
}
