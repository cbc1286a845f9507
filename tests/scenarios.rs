#![allow(unused_imports)]

use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use tempfile::tempdir;

use rental_engine::builder::RentalRequest;
use rental_engine::catalog::Car;
use rental_engine::error::RentalError;
use rental_engine::projector::MemoryProjector;
use rental_engine::rental::{
    AdditionalFees, CancellationPolicy, Condition, PaymentMethod, PickupDetails, RentalStatus,
    ReturnCondition, ReturnDetails, TimeStamp,
};
use rental_engine::service::{Actor, Clock, RentalService, ReturnReport};
use rental_engine::utils::new_id;

// Sled uses file-based locking to prevent concurrent access, so each
// test gets its own database on temp for simplified cleanup.
fn frozen_clock(start: DateTime<Utc>) -> (Arc<Mutex<DateTime<Utc>>>, Clock) {
    let handle = Arc::new(Mutex::new(start));
    let reader = Arc::clone(&handle);
    (handle, Arc::new(move || *reader.lock().unwrap()))
}

fn booking_request(car_id: &str, now: DateTime<Utc>, from: i64, to: i64) -> RentalRequest {
    let start = TimeStamp::from(now).plus_days(from);
    let end = TimeStamp::from(now).plus_days(to);

    RentalRequest::new()
        .set_car(car_id)
        .set_period(start, end)
        .set_pickup(PickupDetails::new("Airport terminal 2", "branch_main", start))
        .set_return(ReturnDetails::new("Airport terminal 2", "branch_main", end))
        .set_payment_method(PaymentMethod::CreditCard)
}

#[test]
fn reserve_confirm_activate_complete() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("full_lifecycle.db"))?;

    let now = Utc::now();
    let (handle, clock) = frozen_clock(now);
    let projector = Arc::new(MemoryProjector::new());
    let service = RentalService::open(&db)?
        .with_clock(clock)
        .with_projector(projector.clone());

    service
        .catalog()
        .insert(&Car::new("car_primera", "Nissan Primera", 50))?;

    let customer = Actor::customer(&new_id("user_"));
    let operator = Actor::operator(&new_id("user_"));

    let rental = service
        .reserve(&customer, booking_request("car_primera", now, 2, 5))
        .context("reserve failed: ")?;
    assert_eq!(rental.status, RentalStatus::Pending);
    assert_eq!(rental.duration, 3);
    assert_eq!(rental.final_amount, 150);
    assert!(!service.catalog().is_available("car_primera")?);

    let rental = service.confirm(&operator, &rental.id)?;
    assert_eq!(rental.status, RentalStatus::Confirmed);
    assert!(rental.confirmed_at.is_some());

    // pickup day arrives
    *handle.lock().unwrap() = now + Duration::days(2);
    let rental = service.activate(&operator, &rental.id)?;
    assert_eq!(rental.status, RentalStatus::Active);
    assert!(rental.activated_at.is_some());

    // drop-off
    *handle.lock().unwrap() = now + Duration::days(5);
    let report = ReturnReport {
        condition: Some(ReturnCondition {
            fuel_level: 80,
            mileage: Some(48_200),
            exterior: Condition::Good,
            interior: Condition::Good,
            damage_report: String::new(),
        }),
        actual_return_time: None,
    };
    let rental = service.complete(&operator, &rental.id, report)?;
    assert_eq!(rental.status, RentalStatus::Completed);
    assert!(rental.completed_at.is_some());
    assert!(rental.ret.actual_return_time.is_some());
    assert!(rental.return_condition.is_some());
    assert!(service.catalog().is_available("car_primera")?);

    let statuses: Vec<_> = projector.events().iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![
            RentalStatus::Pending,
            RentalStatus::Confirmed,
            RentalStatus::Active,
            RentalStatus::Completed,
        ]
    );

    Ok(())
}

#[test]
fn pricing_snapshot_and_partial_refund() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("pricing_refund.db"))?;

    let now = Utc::now();
    let (_handle, clock) = frozen_clock(now);
    let service = RentalService::open(&db)?.with_clock(clock);

    service
        .catalog()
        .insert(&Car::new("car_octavia", "Skoda Octavia", 50))?;

    let customer = Actor::customer(&new_id("user_"));

    // 3 days at 50 plus 20 insurance, cancellable at 80%
    let request = booking_request("car_octavia", now, 2, 5)
        .set_fees(AdditionalFees {
            insurance: 20,
            ..Default::default()
        })
        .set_policy(CancellationPolicy {
            allowed: true,
            deadline: None,
            refund_percentage: 80,
        });

    let rental = service.reserve(&customer, request)?;
    assert_eq!(rental.duration, 3);
    assert_eq!(rental.subtotal, 150);
    assert_eq!(rental.final_amount, 170);

    let cancellation = service.cancel(&customer, &rental.id)?;
    assert_eq!(cancellation.refund, 136);
    assert_eq!(cancellation.rental.status, RentalStatus::Cancelled);
    assert!(cancellation.rental.cancelled_at.is_some());

    // the car was never handed over, so the flag stays as reserve left it
    assert!(!service.catalog().is_available("car_octavia")?);

    Ok(())
}

#[test]
fn overlapping_interval_is_rejected() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("overlap.db"))?;

    let now = Utc::now();
    let service = RentalService::open(&db)?;
    service
        .catalog()
        .insert(&Car::new("car_golf", "VW Golf", 40))?;

    let first = Actor::customer(&new_id("user_"));
    let second = Actor::customer(&new_id("user_"));

    service.reserve(&first, booking_request("car_golf", now, 2, 5))?;

    // [D+4, D+6) overlaps [D+2, D+5): 4 < 5 and 2 < 6
    let err = service
        .reserve(&second, booking_request("car_golf", now, 4, 6))
        .unwrap_err();
    assert!(matches!(err, RentalError::IntervalConflict(_)));

    // a disjoint period trips over the coarse availability flag instead
    let err = service
        .reserve(&second, booking_request("car_golf", now, 6, 8))
        .unwrap_err();
    assert!(matches!(err, RentalError::ResourceUnavailable(_)));

    Ok(())
}

#[test]
fn cancellation_policy_is_enforced() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("cancel_policy.db"))?;

    let now = Utc::now();
    let (handle, clock) = frozen_clock(now);
    let service = RentalService::open(&db)?.with_clock(clock);

    service
        .catalog()
        .insert(&Car::new("car_corolla", "Toyota Corolla", 30))?;
    service
        .catalog()
        .insert(&Car::new("car_yaris", "Toyota Yaris", 25))?;

    let customer = Actor::customer(&new_id("user_"));
    let operator = Actor::operator(&new_id("user_"));

    // deadline one day out
    let deadlined = booking_request("car_corolla", now, 3, 6).set_policy(CancellationPolicy {
        allowed: true,
        deadline: Some(TimeStamp::from(now).plus_days(1)),
        refund_percentage: 100,
    });
    let rental = service.reserve(&customer, deadlined)?;

    *handle.lock().unwrap() = now + Duration::days(2);
    let err = service.cancel(&customer, &rental.id).unwrap_err();
    assert!(matches!(err, RentalError::NotCancellable));

    // a policy that forbids cancellation outright
    *handle.lock().unwrap() = now;
    let locked = booking_request("car_yaris", now, 3, 6).set_policy(CancellationPolicy {
        allowed: false,
        deadline: None,
        refund_percentage: 0,
    });
    let rental = service.reserve(&customer, locked)?;
    let err = service.cancel(&customer, &rental.id).unwrap_err();
    assert!(matches!(err, RentalError::NotCancellable));

    service.confirm(&operator, &rental.id)?;
    // still not cancellable: the policy snapshot travels with the record
    let err = service.cancel(&customer, &rental.id).unwrap_err();
    assert!(matches!(err, RentalError::NotCancellable));

    Ok(())
}

#[test]
fn cancelling_a_confirmed_rental_releases_the_car() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("cancel_confirmed.db"))?;

    let now = Utc::now();
    let service = RentalService::open(&db)?;
    service
        .catalog()
        .insert(&Car::new("car_ibiza", "Seat Ibiza", 35))?;

    let customer = Actor::customer(&new_id("user_"));
    let operator = Actor::operator(&new_id("user_"));

    let rental = service.reserve(&customer, booking_request("car_ibiza", now, 2, 4))?;
    service.confirm(&operator, &rental.id)?;
    assert!(!service.catalog().is_available("car_ibiza")?);

    let cancellation = service.cancel(&customer, &rental.id)?;
    assert_eq!(cancellation.refund, cancellation.rental.final_amount);
    assert!(service.catalog().is_available("car_ibiza")?);

    // terminal states stay terminal
    let err = service.cancel(&customer, &rental.id).unwrap_err();
    assert!(matches!(err, RentalError::InvalidTransition { .. }));

    Ok(())
}

#[test]
fn delete_rules() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("delete_rules.db"))?;

    let now = Utc::now();
    let (handle, clock) = frozen_clock(now);
    let service = RentalService::open(&db)?.with_clock(clock);

    service
        .catalog()
        .insert(&Car::new("car_astra", "Opel Astra", 45))?;

    let customer = Actor::customer(&new_id("user_"));
    let operator = Actor::operator(&new_id("user_"));

    // deleting a pending rental works and leaves the flag alone
    let rental = service.reserve(&customer, booking_request("car_astra", now, 2, 4))?;
    service.delete(&customer, &rental.id)?;
    let err = service.get_by_id(&customer, &rental.id).unwrap_err();
    assert!(matches!(err, RentalError::NotFound(_)));
    assert!(!service.catalog().is_available("car_astra")?);

    // a completed rental is immutable history
    service.catalog().set_available("car_astra", true)?;
    let rental = service.reserve(&customer, booking_request("car_astra", now, 2, 4))?;
    service.confirm(&operator, &rental.id)?;
    *handle.lock().unwrap() = now + Duration::days(2);
    service.activate(&operator, &rental.id)?;
    let rental = service.complete(&operator, &rental.id, ReturnReport::default())?;
    let err = service.delete(&operator, &rental.id).unwrap_err();
    assert!(matches!(err, RentalError::InvalidTransition { .. }));

    Ok(())
}

#[test]
fn deleting_a_cancelled_rental_that_was_confirmed() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("delete_after_cancel.db"))?;

    let now = Utc::now();
    let service = RentalService::open(&db)?;
    service
        .catalog()
        .insert(&Car::new("car_focus", "Ford Focus", 38))?;

    let customer = Actor::customer(&new_id("user_"));
    let operator = Actor::operator(&new_id("user_"));

    let rental = service.reserve(&customer, booking_request("car_focus", now, 2, 4))?;
    service.confirm(&operator, &rental.id)?;
    service.cancel(&customer, &rental.id)?;

    service.delete(&customer, &rental.id)?;
    let err = service.get_by_id(&operator, &rental.id).unwrap_err();
    assert!(matches!(err, RentalError::NotFound(_)));
    assert!(service.catalog().is_available("car_focus")?);

    Ok(())
}

#[test]
fn concurrent_confirms_commit_exactly_once() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("confirm_race.db"))?;

    let now = Utc::now();
    let service = Arc::new(RentalService::open(&db)?);
    service
        .catalog()
        .insert(&Car::new("car_308", "Peugeot 308", 42))?;

    let customer = Actor::customer(&new_id("user_"));
    let rental = service.reserve(&customer, booking_request("car_308", now, 2, 5))?;

    let mut workers = Vec::new();
    for _ in 0..6 {
        let service = Arc::clone(&service);
        let rental_id = rental.id.clone();
        workers.push(std::thread::spawn(move || {
            let operator = Actor::operator(&new_id("user_"));
            service.confirm(&operator, &rental_id)
        }));
    }

    let results: Vec<_> = workers
        .into_iter()
        .map(|w| w.join().expect("confirm thread panicked"))
        .collect();

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one confirm may commit");
    for result in results {
        if let Err(err) = result {
            assert!(matches!(
                err,
                RentalError::InvalidTransition {
                    from: RentalStatus::Confirmed,
                    ..
                }
            ));
        }
    }

    Ok(())
}

#[test]
fn concurrent_overlapping_reserves_admit_exactly_one() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("race.db"))?;

    let now = Utc::now();
    let service = Arc::new(RentalService::open(&db)?);
    service
        .catalog()
        .insert(&Car::new("car_race", "Mazda 6", 40))?;

    let mut workers = Vec::new();
    for _ in 0..4 {
        let service = Arc::clone(&service);
        workers.push(std::thread::spawn(move || {
            let customer = Actor::customer(&new_id("user_"));
            service.reserve(&customer, booking_request("car_race", now, 2, 5))
        }));
    }

    let results: Vec<_> = workers
        .into_iter()
        .map(|w| w.join().expect("reserve thread panicked"))
        .collect();

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one overlapping reserve may commit");
    for result in results {
        if let Err(err) = result {
            assert!(matches!(err, RentalError::IntervalConflict(_)));
        }
    }

    Ok(())
}
