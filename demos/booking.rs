#![allow(warnings)]

//! Walks one rental through its whole life: reserve, confirm, pick up,
//! return, plus a second overlapping request that gets rejected. Time is
//! driven by an injected clock so the whole story runs in one go.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};

use rental_engine::builder::RentalRequest;
use rental_engine::catalog::Car;
use rental_engine::rental::{
    AdditionalFees, PaymentMethod, PickupDetails, ReturnDetails, TimeStamp,
};
use rental_engine::service::{Actor, RentalService, ReturnReport};
use rental_engine::utils::new_id;

fn main() -> anyhow::Result<()> {
    let db = sled::open("booking_demo.db")?;
    db.drop_tree("cars")?;
    db.drop_tree("rentals")?;
    db.drop_tree("live_by_car")?;

    let now = Utc::now();
    let clock = Arc::new(Mutex::new(now));
    let reader = Arc::clone(&clock);

    let service =
        RentalService::open(&db)?.with_clock(Arc::new(move || *reader.lock().unwrap()));

    let car_id = new_id("car_");
    service
        .catalog()
        .insert(&Car::new(&car_id, "Skoda Octavia", 50))?;

    let alice = Actor::customer(&new_id("user_"));
    let operator = Actor::operator(&new_id("user_"));

    let start = TimeStamp::from(now).plus_days(2);
    let end = TimeStamp::from(now).plus_days(5);

    let rental = service.reserve(
        &alice,
        RentalRequest::new()
            .set_car(&car_id)
            .set_period(start, end)
            .set_pickup(PickupDetails::new("Airport desk 3", "branch_airport", start))
            .set_return(ReturnDetails::new("Airport desk 3", "branch_airport", end))
            .set_fees(AdditionalFees {
                insurance: 20,
                ..Default::default()
            })
            .set_payment_method(PaymentMethod::CreditCard),
    )?;
    println!(
        "reserved {} for {} days, total {}",
        rental.id, rental.duration, rental.final_amount
    );

    // a second customer asking for an overlapping period bounces off
    let bob = Actor::customer(&new_id("user_"));
    let rejected = service.reserve(
        &bob,
        RentalRequest::new()
            .set_car(&car_id)
            .set_period(TimeStamp::from(now).plus_days(4), TimeStamp::from(now).plus_days(7))
            .set_pickup(PickupDetails::new("Airport desk 3", "branch_airport", start))
            .set_return(ReturnDetails::new("Airport desk 3", "branch_airport", end))
            .set_payment_method(PaymentMethod::CreditCard),
    );
    println!("overlapping request: {:?}", rejected.unwrap_err());

    service.confirm(&operator, &rental.id)?;

    // pickup day
    *clock.lock().unwrap() = now + Duration::days(2);
    let rental = service.activate(&operator, &rental.id)?;
    println!("picked up, status {}", rental.status);

    // return day
    *clock.lock().unwrap() = now + Duration::days(5);
    let rental = service.complete(&operator, &rental.id, ReturnReport::default())?;
    println!("returned, status {}", rental.status);

    let history = service.list_by_user(&alice, &alice.id)?;
    println!("{:#?}", history);

    Ok(())
}
