//! Concurrency stress tests for last-unit scenarios.
//!
//! These tests verify that under concurrent load a lot is never oversold and a
//! patient never receives two applications with the same dose.
//!
//! Run with: `cargo test --test concurrency_tests -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use futures::future::join_all;
use std::collections::BTreeSet;
use vaccine_scheduling_core::{
    ApplicationStatus, LaboratoryId, PatientId, SchedulingError, VaccineTypeId,
};
use vaccine_scheduling_testing::InMemorySchedulingStore;
use vaccine_scheduling_testing::fixtures::{self, booking, operator, reschedule};

const COVID: VaccineTypeId = VaccineTypeId::new(7);
const LAB: LaboratoryId = LaboratoryId::new(1);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_bookings_for_the_last_unit_only_one_wins() {
    let store = InMemorySchedulingStore::new();
    let lot = store.add_lot(COVID, LAB, 1).await;
    let scheduler = fixtures::scheduler(&store);

    let handles = (1..=2).map(|patient| {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler
                .book(&operator(), booking(PatientId::new(patient), COVID))
                .await
        })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let successes = results.iter().filter(|result| result.is_ok()).count();
    let no_stock = results
        .iter()
        .filter(|result| matches!(result, Err(SchedulingError::NoStockAvailable { .. })))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(no_stock, 1);
    assert_eq!(store.lot(lot).await.unwrap().remaining_quantity, 0);
    assert_eq!(store.applications().await.len(), 1);
    assert_eq!(store.appointments().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn fifty_bookings_for_ten_units_never_oversell() {
    let store = InMemorySchedulingStore::new();
    let first = store.add_lot(COVID, LAB, 4).await;
    let second = store.add_lot(COVID, LAB, 6).await;
    let scheduler = fixtures::scheduler(&store);

    let handles = (1..=50).map(|patient| {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler
                .book(&operator(), booking(PatientId::new(patient), COVID))
                .await
        })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let successes = results.iter().filter(|result| result.is_ok()).count();
    println!("{successes} of {} bookings succeeded", results.len());
    assert_eq!(successes, 10);
    assert!(results.iter().all(|result| match result {
        Ok(_) => true,
        Err(error) => matches!(error, SchedulingError::NoStockAvailable { .. }),
    }));

    assert_eq!(store.lot(first).await.unwrap().remaining_quantity, 0);
    assert_eq!(store.lot(second).await.unwrap().remaining_quantity, 0);

    let applications = store.applications().await;
    assert_eq!(applications.len(), 10);
    assert_eq!(
        applications.iter().filter(|application| application.lot_id == first).count(),
        4
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_for_one_patient_get_distinct_doses() {
    let store = InMemorySchedulingStore::new();
    store.add_lot(COVID, LAB, 20).await;
    let scheduler = fixtures::scheduler(&store);

    let handles = (0..10).map(|_| {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler
                .book(&operator(), booking(PatientId::new(1), COVID))
                .await
        })
    });
    for joined in join_all(handles).await {
        joined.expect("task panicked").expect("booking failed");
    }

    let doses: BTreeSet<u32> = store
        .applications()
        .await
        .iter()
        .map(|application| application.dose.get())
        .collect();
    assert_eq!(doses, (1..=10).collect::<BTreeSet<u32>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reschedules_leave_exactly_one_pending_application() {
    let store = InMemorySchedulingStore::new();
    let lot = store.add_lot(COVID, LAB, 10).await;
    let scheduler = fixtures::scheduler(&store);
    let booked = scheduler
        .book(&operator(), booking(PatientId::new(1), COVID))
        .await
        .unwrap();
    let appointment_id = booked.id;

    let handles = (0..5).map(|_| {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.reschedule(&operator(), reschedule(appointment_id)).await })
    });
    for joined in join_all(handles).await {
        joined.expect("task panicked").expect("reschedule failed");
    }

    let applications = store.applications().await;
    let pending: Vec<_> = applications
        .iter()
        .filter(|application| application.status == ApplicationStatus::Pending)
        .collect();
    assert_eq!(pending.len(), 1);
    assert!(pending.iter().all(|application| application.dose.get() == 1));
    assert_eq!(applications.len(), 6);
    assert_eq!(store.lot(lot).await.unwrap().remaining_quantity, 4);

    let appointment = scheduler.find_appointment(appointment_id).await.unwrap();
    assert_eq!(appointment.application.id, pending[0].id);
}
