//! Scenario: Transition table closure
//!
//! # Invariants under test
//!
//! 1. Every (status, action) pair outside the table yields `InvalidTransition`
//!    regardless of actor or payload.
//! 2. Terminal appointments and decided update requests accept nothing.
//! 3. A full happy path (book, approve, reschedule, complete) produces the
//!    expected notifications in order.

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use emr_lifecycle::{
    apply_action, book, decide, ActionPayload, AppointmentAction, Decision, DecisionOutcome,
    LifecycleError, NewAppointment,
};
use emr_schemas::{
    Actor, Appointment, AppointmentStatus, NotificationEvent, Recipient, ServiceType, TimeSlot,
    UpdateRequest, UpdateRequestStatus, UserId,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 14, 8, 0, 0).unwrap()
}

fn booked(student: UserId, doctor: Option<UserId>) -> Appointment {
    let form = NewAppointment {
        student_id: student,
        doctor_id: doctor,
        service_type: ServiceType::PhysicalExam,
        time_slot: TimeSlot::Morning,
        requested_at: t0() + Duration::days(3),
        reason: "annual exam".to_string(),
    };
    book(&Actor::student(student), &form, Uuid::new_v4(), t0())
        .unwrap()
        .snapshot
}

/// Payload that satisfies every action's requirements, so only the table
/// (and roles) can refuse.
fn full_payload() -> ActionPayload {
    ActionPayload {
        note: Some("all clear".to_string()),
        new_time: Some(t0() + Duration::days(5)),
        scheduled_at: Some(t0() + Duration::days(4)),
        doctor_id: None,
        reason: Some("schedule conflict".to_string()),
    }
}

fn in_table(from: AppointmentStatus, action: AppointmentAction) -> bool {
    use AppointmentAction as A;
    use AppointmentStatus as S;
    matches!(
        (from, action),
        (S::Pending, A::Approve | A::Decline | A::Cancel)
            | (S::Approved, A::Reschedule | A::Complete | A::Cancel | A::MarkNoShow)
    )
}

#[test]
fn pairs_outside_the_table_are_invalid_for_every_actor() {
    let student = UserId::new();
    let doctor = UserId::new();
    let actors = [
        Actor::student(student),
        Actor::doctor(doctor),
        Actor::admin(UserId::new()),
    ];

    for status in AppointmentStatus::ALL {
        let mut appt = booked(student, Some(doctor));
        appt.status = status;

        for action in AppointmentAction::ALL {
            if in_table(status, action) {
                continue;
            }
            for actor in &actors {
                let err = apply_action(&appt, action, actor, &full_payload(), t0()).unwrap_err();
                assert_eq!(
                    err,
                    LifecycleError::InvalidTransition {
                        from: status.as_str(),
                        action: action.as_str(),
                    },
                    "{status} / {}",
                    action.as_str()
                );
            }
        }
    }
}

#[test]
fn terminal_states_have_no_way_out() {
    let student = UserId::new();
    let doctor = UserId::new();
    for status in AppointmentStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
        let mut appt = booked(student, Some(doctor));
        appt.status = status;
        for action in AppointmentAction::ALL {
            assert!(matches!(
                apply_action(&appt, action, &Actor::doctor(doctor), &full_payload(), t0()),
                Err(LifecycleError::InvalidTransition { .. })
            ));
        }
    }

    for status in UpdateRequestStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
        let req = UpdateRequest {
            id: Uuid::new_v4(),
            student_id: student,
            changes: [("email".to_string(), "a@b.edu".to_string())].into(),
            reason: "typo".to_string(),
            status,
            submitted_at: t0(),
            expires_at: t0() + Duration::days(7),
            decided_at: None,
            decided_by: None,
            review_notes: None,
            version: 1,
        };
        assert!(matches!(
            decide(&req, &Decision::Approve, &Actor::admin(UserId::new()), t0()),
            Err(LifecycleError::InvalidTransition { .. })
        ));
    }
}

#[test]
fn happy_path_notifies_each_party() {
    let student = UserId::new();
    let doctor = UserId::new();
    let appt = booked(student, None);

    let approved = apply_action(
        &appt,
        AppointmentAction::Approve,
        &Actor::doctor(doctor),
        &ActionPayload::default(),
        t0() + Duration::hours(1),
    )
    .unwrap();
    assert_eq!(approved.snapshot.status, AppointmentStatus::Approved);
    assert_eq!(approved.snapshot.doctor_id, Some(doctor));
    assert_eq!(approved.intents[0].recipient, Recipient::Student(student));

    let moved = apply_action(
        &approved.snapshot,
        AppointmentAction::Reschedule,
        &Actor::student(student),
        &ActionPayload::with_new_time(t0() + Duration::days(6)),
        t0() + Duration::hours(2),
    )
    .unwrap();
    assert_eq!(moved.snapshot.status, AppointmentStatus::Approved);
    assert_eq!(moved.intents[0].recipient, Recipient::Doctor(doctor));
    assert_eq!(moved.intents[0].event, NotificationEvent::AppointmentRescheduled);

    let done = apply_action(
        &moved.snapshot,
        AppointmentAction::Complete,
        &Actor::doctor(doctor),
        &ActionPayload::with_note("BP 120/80, cleared"),
        t0() + Duration::days(6),
    )
    .unwrap();
    assert_eq!(done.snapshot.status, AppointmentStatus::Completed);
    assert_eq!(
        done.snapshot.clinical_note.as_deref(),
        Some("BP 120/80, cleared")
    );
    assert_eq!(done.intents[0].event, NotificationEvent::AppointmentCompleted);
}

#[test]
fn late_decision_is_forced_to_expired() {
    let student = UserId::new();
    let req = UpdateRequest {
        id: Uuid::new_v4(),
        student_id: student,
        changes: [("address".to_string(), "Dorm 9".to_string())].into(),
        reason: "moved".to_string(),
        status: UpdateRequestStatus::Pending,
        submitted_at: t0(),
        expires_at: t0() + Duration::days(7),
        decided_at: None,
        decided_by: None,
        review_notes: None,
        version: 0,
    };

    let d = decide(
        &req,
        &Decision::Approve,
        &Actor::doctor(UserId::new()),
        t0() + Duration::days(7) + Duration::minutes(1),
    )
    .unwrap();
    assert_eq!(d.outcome, DecisionOutcome::Expired);
    assert_eq!(d.snapshot.status, UpdateRequestStatus::Expired);
    assert_eq!(d.intents[0].event, NotificationEvent::RequestExpired);
}
