//! Full lifecycle runs through the service: engine, store, notifier and
//! clock wired together.

use emr_lifecycle::{ActionPayload, AppointmentAction, Decision, DecisionOutcome};
use emr_schemas::{
    Actor, AppointmentStatus, NotificationEvent, Recipient, UpdateRequestStatus, UserId,
};
use emr_store::EntityStore;
use emr_testkit::{booking_form, day, update_form, Harness};

#[tokio::test]
async fn appointment_from_booking_to_completion() {
    let h = Harness::new();
    let student = UserId::new();
    let doctor = UserId::new();

    let booked = h
        .service
        .book_appointment(&Actor::student(student), &booking_form(student, day(0), 3))
        .await
        .unwrap();
    let id = booked.entity.id;

    let approved = h
        .service
        .apply_appointment_action(
            id,
            &Actor::doctor(doctor),
            AppointmentAction::Approve,
            &ActionPayload::default(),
        )
        .await
        .unwrap();
    assert_eq!(approved.entity.status, AppointmentStatus::Approved);
    assert_eq!(approved.entity.doctor_id, Some(doctor));
    assert!(approved
        .intents
        .iter()
        .any(|i| i.recipient == Recipient::Student(student)
            && i.event == NotificationEvent::AppointmentApproved));

    // Student moves the visit; the doctor hears about it.
    h.at_day(1);
    let moved = h
        .service
        .apply_appointment_action(
            id,
            &Actor::student(student),
            AppointmentAction::Reschedule,
            &ActionPayload::with_new_time(day(4)),
        )
        .await
        .unwrap();
    assert_eq!(moved.entity.scheduled_at, Some(day(4)));
    assert_eq!(moved.intents[0].recipient, Recipient::Doctor(doctor));

    // Completing without a note is refused and changes nothing.
    h.at_day(4);
    let err = h
        .service
        .apply_appointment_action(
            id,
            &Actor::doctor(doctor),
            AppointmentAction::Complete,
            &ActionPayload::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(h.store.get_appointment(id).await.unwrap().version, 2);

    let done = h
        .service
        .apply_appointment_action(
            id,
            &Actor::doctor(doctor),
            AppointmentAction::Complete,
            &ActionPayload::with_note("viral infection; rest and fluids"),
        )
        .await
        .unwrap();
    assert_eq!(done.entity.status, AppointmentStatus::Completed);
    assert_eq!(done.entity.version, 3);

    // Terminal: nothing else is accepted.
    for action in AppointmentAction::ALL {
        let err = h
            .service
            .apply_appointment_action(id, &Actor::admin(UserId::new()), action, &ActionPayload::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION", "{action:?}");
    }

    let events: Vec<NotificationEvent> = h.notifier.sent().await.iter().map(|i| i.event).collect();
    assert_eq!(
        events,
        vec![
            NotificationEvent::AppointmentApproved,
            NotificationEvent::AppointmentRescheduled,
            NotificationEvent::AppointmentCompleted,
        ]
    );
}

#[tokio::test]
async fn student_cannot_approve_their_own_booking() {
    let h = Harness::new();
    let student = UserId::new();
    let booked = h
        .service
        .book_appointment(&Actor::student(student), &booking_form(student, day(0), 2))
        .await
        .unwrap();

    let err = h
        .service
        .apply_appointment_action(
            booked.entity.id,
            &Actor::student(student),
            AppointmentAction::Approve,
            &ActionPayload::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

#[tokio::test]
async fn request_approved_in_window_updates_profile_once() {
    let h = Harness::new();
    let student = UserId::new();

    let submitted = h
        .service
        .submit_update_request(
            &Actor::student(student),
            &update_form(student, &[("address", "Dorm 2, Room 14"), ("blood_type", "O-")]),
        )
        .await
        .unwrap();

    h.at_day(7); // exactly the deadline is still in time
    let decided = h
        .service
        .decide_update_request(submitted.entity.id, &Actor::admin(UserId::new()), &Decision::Approve)
        .await
        .unwrap();
    assert_eq!(decided.request.status, UpdateRequestStatus::Approved);

    let first = h.store.get_profile(student).await.unwrap();
    assert_eq!(first.field("address"), Some("Dorm 2, Room 14"));
    assert_eq!(first.field("blood_type"), Some("O-"));

    h.at_day(9);
    let again = h.service.apply_approved_changes(submitted.entity.id).await.unwrap();
    assert_eq!(again, first);

    // A second decision on the now-terminal request is refused.
    let err = h
        .service
        .decide_update_request(
            submitted.entity.id,
            &Actor::admin(UserId::new()),
            &Decision::Reject { notes: None },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
}

#[tokio::test]
async fn expiration_wins_over_any_late_decision() {
    for decision in [Decision::Approve, Decision::Reject { notes: Some("late".into()) }] {
        for actor in [
            Actor::admin(UserId::new()),
            Actor::doctor(UserId::new()),
            Actor::student(UserId::new()),
        ] {
            let h = Harness::new();
            let student = UserId::new();
            let submitted = h
                .service
                .submit_update_request(&Actor::student(student), &update_form(student, &[("email", "s@school.edu")]))
                .await
                .unwrap();

            h.at_day(8);
            let decided = h
                .service
                .decide_update_request(submitted.entity.id, &actor, &decision)
                .await
                .unwrap();
            assert_eq!(decided.outcome, DecisionOutcome::Expired);
            assert_eq!(decided.request.status, UpdateRequestStatus::Expired);
            assert!(h.store.get_profile(student).await.unwrap().fields.is_empty());
        }
    }
}

#[tokio::test]
async fn day_eight_sweep_expires_day_zero_request() {
    let h = Harness::new();
    let student = UserId::new();
    let submitted = h
        .service
        .submit_update_request(&Actor::student(student), &update_form(student, &[("medications", "none")]))
        .await
        .unwrap();
    assert_eq!(submitted.entity.expires_at, day(7));

    h.at_day(8);
    let report = h.service.sweep_expired_update_requests().await.unwrap();
    assert_eq!(report.processed, 1);

    let stored = h.store.get_update_request(submitted.entity.id).await.unwrap();
    assert_eq!(stored.status, UpdateRequestStatus::Expired);
    assert_eq!(stored.decided_by, None);

    let sent = h.notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event, NotificationEvent::RequestExpired);
    assert_eq!(sent[0].recipient, Recipient::Student(student));
}
