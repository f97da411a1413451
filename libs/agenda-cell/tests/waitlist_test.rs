mod common;

use assert_matches::assert_matches;
use uuid::Uuid;

use agenda_cell::models::{AssignWaitlistRequest, EnqueueWaitlistRequest, PatientSync, SlotStatus};
use agenda_cell::SchedulingError;

use common::*;

fn request(name: &str, patient_id: Option<Uuid>) -> EnqueueWaitlistRequest {
    EnqueueWaitlistRequest {
        patient_id,
        patient_name: name.to_string(),
        phone: None,
        notes: Some("Prefers mornings".to_string()),
    }
}

fn assign_to(slot: &str) -> AssignWaitlistRequest {
    AssignWaitlistRequest {
        year: 2025,
        month: 5,
        slot_key: key(slot),
        price: Some(70.0),
        payment_status: None,
        payment_method: Some("cash".to_string()),
        admin_notes: None,
    }
}

#[tokio::test]
async fn entries_are_listed_oldest_first_per_professional() {
    let h = Harness::new().await;
    let other = Harness::new().await;

    let first = h.state.waitlist.enqueue(h.professional_id, request("Ana Souza", None)).await.unwrap();
    let second = h.state.waitlist.enqueue(h.professional_id, request("Bruno Lima", None)).await.unwrap();
    other.state.waitlist.enqueue(other.professional_id, request("Carla Dias", None)).await.unwrap();

    let names: Vec<_> = h
        .state
        .waitlist
        .list(h.professional_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(names, vec![first.id, second.id]);
}

#[tokio::test]
async fn enqueue_validates_name_and_patient() {
    let h = Harness::new().await;

    assert_matches!(
        h.state.waitlist.enqueue(h.professional_id, request("  ", None)).await,
        Err(SchedulingError::Validation(_))
    );
    assert_matches!(
        h.state.waitlist.enqueue(h.professional_id, request("Ghost", Some(Uuid::new_v4()))).await,
        Err(SchedulingError::PatientNotFound(_))
    );
}

#[tokio::test]
async fn assigning_any_entry_books_the_slot_and_removes_it() {
    let h = Harness::new().await;
    let may = h.initialize(2025, 5).await;
    let ana = h.patient("Ana Souza").await;
    let bruno = h.patient("Bruno Lima").await;

    h.state.waitlist.enqueue(h.professional_id, request("Ana Souza", Some(ana.id))).await.unwrap();
    let later = h
        .state
        .waitlist
        .enqueue(h.professional_id, request("Bruno Lima", Some(bruno.id)))
        .await
        .unwrap();

    // Operator picks the second entry, not the head.
    let assignment = h
        .state
        .waitlist
        .assign(h.professional_id, later.id, assign_to("06_0950"))
        .await
        .unwrap();

    assert!(assignment.entry_removed);
    assert_eq!(assignment.transition.patient_sync, PatientSync::Applied);
    assert_eq!(assignment.transition.slot.price, 70.0);
    assert_eq!(
        assignment.transition.slot.booking().unwrap().admin_notes.as_deref(),
        Some("Prefers mornings")
    );

    let agenda = h.state.agenda.get_month(&may).await.unwrap();
    assert_eq!(agenda.slots[&key("06_0950")].patient_id(), Some(bruno.id));
    assert_eq!(h.care_link(bruno.id).await.next_appointment, Some(at(2025, 5, 6, 9, 50)));

    let remaining = h.state.waitlist.list(h.professional_id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].patient_id, Some(ana.id));
}

#[tokio::test]
async fn walk_in_entry_creates_the_patient_on_assignment() {
    let h = Harness::new().await;
    h.initialize(2025, 5).await;
    let entry = h.state.waitlist.enqueue(h.professional_id, request("Elisa Prado", None)).await.unwrap();

    let assignment = h
        .state
        .waitlist
        .assign(h.professional_id, entry.id, assign_to("07_0900"))
        .await
        .unwrap();

    let created = assignment.transition.slot.patient_id().unwrap();
    assert_eq!(h.care_link(created).await.next_appointment, Some(at(2025, 5, 7, 9, 0)));
}

#[tokio::test]
async fn failed_assignment_keeps_the_entry() {
    let h = Harness::new().await;
    let may = h.initialize(2025, 5).await;
    let ana = h.patient("Ana Souza").await;
    let bruno = h.patient("Bruno Lima").await;
    h.state.agenda.book_slot(&may, &key("06_0950"), book_existing(ana.id)).await.unwrap();

    let entry = h
        .state
        .waitlist
        .enqueue(h.professional_id, request("Bruno Lima", Some(bruno.id)))
        .await
        .unwrap();

    assert_matches!(
        h.state.waitlist.assign(h.professional_id, entry.id, assign_to("06_0950")).await,
        Err(SchedulingError::InvalidTransition { from: SlotStatus::Booked, .. })
    );
    assert_eq!(h.state.waitlist.list(h.professional_id).await.unwrap(), vec![entry]);
}

#[tokio::test]
async fn entries_of_another_professional_are_invisible() {
    let h = Harness::new().await;
    let entry = h.state.waitlist.enqueue(h.professional_id, request("Ana Souza", None)).await.unwrap();

    assert_matches!(
        h.state.waitlist.remove(Uuid::new_v4(), entry.id).await,
        Err(SchedulingError::WaitlistEntryNotFound(_))
    );
    h.state.waitlist.remove(h.professional_id, entry.id).await.unwrap();
    assert!(h.state.waitlist.list(h.professional_id).await.unwrap().is_empty());
}
