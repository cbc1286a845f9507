//! Reservation lifecycle engine. The only component that transitions a
//! rental's status. Reserve and every transition run as a single sled
//! transaction, so the conflict check, the record write and the
//! availability flip commit together or not at all; a racing writer is
//! re-run against fresh state and fails its precondition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sled::transaction::{TransactionError, abort};
use sled::{Db, Transactional, Tree};
use tracing::{debug, info};

use crate::builder::RentalRequest;
use crate::catalog::CarCatalog;
use crate::error::{RentalError, ValidationError};
use crate::projector::{HistoryProjector, NullProjector, RentalEvent};
use crate::rental::{Interval, Rental, RentalStatus, ReturnCondition, TimeStamp};
use crate::store;
use crate::utils;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Customer,
    Operator,
}

/// A verified caller. The engine performs no authentication; it trusts
/// the id and role handed to it.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn customer(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            role: Role::Customer,
        }
    }

    pub fn operator(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            role: Role::Operator,
        }
    }

    fn is_operator(&self) -> bool {
        self.role == Role::Operator
    }

    fn owns(&self, rental: &Rental) -> bool {
        self.id == rental.user_id
    }
}

/// End-of-rental data supplied on completion.
#[derive(Debug, Default, Clone)]
pub struct ReturnReport {
    pub condition: Option<ReturnCondition>,
    pub actual_return_time: Option<TimeStamp<Utc>>,
}

/// Outcome of a cancellation. The refund is informational output of
/// the policy snapshot; no money moves here.
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub rental: Rental,
    pub refund: u64,
}

pub struct RentalService {
    catalog: CarCatalog,
    rentals: Tree,
    live: Tree,
    projector: Arc<dyn HistoryProjector>,
    clock: Clock,
}

impl RentalService {
    pub fn open(db: &Db) -> Result<Self, RentalError> {
        Ok(Self {
            catalog: CarCatalog::new(db.open_tree(store::CARS_TREE)?),
            rentals: db.open_tree(store::RENTALS_TREE)?,
            live: db.open_tree(store::LIVE_TREE)?,
            projector: Arc::new(NullProjector),
            clock: Arc::new(Utc::now),
        })
    }

    pub fn with_projector(mut self, projector: Arc<dyn HistoryProjector>) -> Self {
        self.projector = projector;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn catalog(&self) -> &CarCatalog {
        &self.catalog
    }

    /// Advisory conflict probe over the live index. The authoritative
    /// check re-runs inside the reserve transaction; a `false` here is
    /// never a promise that a subsequent reserve will succeed.
    pub fn has_conflict(&self, car_id: &str, interval: &Interval) -> Result<bool, RentalError> {
        Ok(store::read_live(&self.live, car_id)?.conflicts(interval))
    }

    /// Book a car for the requesting actor. Conflict check, record
    /// insert and availability flip are one atomic unit; of two racing
    /// overlapping requests exactly one commits and the other gets
    /// `IntervalConflict`.
    pub fn reserve(&self, actor: &Actor, request: RentalRequest) -> Result<Rental, RentalError> {
        let now = (self.clock)();
        let valid = request.validate(now)?;
        let rental_id = utils::new_id("rental_");

        let result = (self.catalog.tree(), &self.rentals, &self.live).transaction(
            |(cars, rentals, live)| {
                let mut car = store::tx_read_car(cars, &valid.car_id)?;

                // Interval overlap is the source of truth; the catalog
                // flag is only a coarse hint and is checked second.
                let mut live_set = store::tx_read_live(live, &car.id)?;
                if live_set.conflicts(&valid.interval) {
                    return abort(RentalError::IntervalConflict(car.id.clone()));
                }
                if !car.available {
                    return abort(RentalError::ResourceUnavailable(car.id.clone()));
                }

                let rental = Rental::create(
                    &rental_id,
                    &actor.id,
                    &valid,
                    car.price_per_day,
                    now.into(),
                );

                live_set.insert(&rental);
                store::tx_write_live(live, &car.id, &live_set)?;
                store::tx_write_rental(rentals, &rental)?;

                car.available = false;
                store::tx_write_car(cars, &car)?;

                Ok(rental)
            },
        );

        let rental = Self::commit(result)?;
        info!(rental = %rental.id, car = %rental.car_id, amount = rental.final_amount, "rental reserved");
        self.projector.record(&RentalEvent::from(&rental));
        Ok(rental)
    }

    /// pending -> confirmed. Operator only.
    pub fn confirm(&self, actor: &Actor, rental_id: &str) -> Result<Rental, RentalError> {
        self.require_operator(actor)?;
        let now: TimeStamp<Utc> = (self.clock)().into();

        let result = self.rentals.transaction(|rentals| {
            let mut rental = store::tx_read_rental(rentals, rental_id)?;
            if rental.status != RentalStatus::Pending {
                return abort(RentalError::InvalidTransition {
                    from: rental.status,
                    op: "confirm",
                });
            }

            rental.status = RentalStatus::Confirmed;
            rental.confirmed_at = Some(now);
            store::tx_write_rental(rentals, &rental)?;
            Ok(rental)
        });

        let rental = Self::commit(result)?;
        info!(rental = %rental.id, "rental confirmed");
        self.projector.record(&RentalEvent::from(&rental));
        Ok(rental)
    }

    /// confirmed -> active, no earlier than the start date. Operator only.
    pub fn activate(&self, actor: &Actor, rental_id: &str) -> Result<Rental, RentalError> {
        self.require_operator(actor)?;
        let now: TimeStamp<Utc> = (self.clock)().into();

        let result = self.rentals.transaction(|rentals| {
            let mut rental = store::tx_read_rental(rentals, rental_id)?;
            if rental.status != RentalStatus::Confirmed {
                return abort(RentalError::InvalidTransition {
                    from: rental.status,
                    op: "activate",
                });
            }
            if now < rental.interval.start {
                return abort(RentalError::TooEarly);
            }

            rental.status = RentalStatus::Active;
            rental.activated_at = Some(now);
            store::tx_write_rental(rentals, &rental)?;
            Ok(rental)
        });

        let rental = Self::commit(result)?;
        info!(rental = %rental.id, "rental activated");
        self.projector.record(&RentalEvent::from(&rental));
        Ok(rental)
    }

    /// active -> completed. Merges the return report, stamps the actual
    /// return time and hands the car back to the catalog. Operator only.
    pub fn complete(
        &self,
        actor: &Actor,
        rental_id: &str,
        report: ReturnReport,
    ) -> Result<Rental, RentalError> {
        self.require_operator(actor)?;
        if let Some(condition) = &report.condition {
            if condition.fuel_level > 100 {
                return Err(ValidationError::FuelLevel(condition.fuel_level).into());
            }
        }
        let now: TimeStamp<Utc> = (self.clock)().into();

        let result = (self.catalog.tree(), &self.rentals, &self.live).transaction(
            |(cars, rentals, live)| {
                let mut rental = store::tx_read_rental(rentals, rental_id)?;
                if rental.status != RentalStatus::Active {
                    return abort(RentalError::InvalidTransition {
                        from: rental.status,
                        op: "complete",
                    });
                }

                rental.return_condition = report.condition.clone();
                rental.ret.actual_return_time = Some(report.actual_return_time.unwrap_or(now));
                rental.status = RentalStatus::Completed;
                rental.completed_at = Some(now);

                let mut live_set = store::tx_read_live(live, &rental.car_id)?;
                live_set.remove(&rental.id);
                store::tx_write_live(live, &rental.car_id, &live_set)?;
                store::tx_write_rental(rentals, &rental)?;

                let mut car = store::tx_read_car(cars, &rental.car_id)?;
                car.available = true;
                store::tx_write_car(cars, &car)?;

                Ok(rental)
            },
        );

        let rental = Self::commit(result)?;
        info!(rental = %rental.id, car = %rental.car_id, "rental completed");
        self.projector.record(&RentalEvent::from(&rental));
        Ok(rental)
    }

    /// Cancel a live rental under its policy snapshot. Owner or
    /// operator. The car goes back to the catalog only if the rental
    /// had already claimed it (prior status confirmed or active).
    pub fn cancel(&self, actor: &Actor, rental_id: &str) -> Result<Cancellation, RentalError> {
        let current = self.load(rental_id)?;
        self.require_owner_or_operator(actor, &current)?;
        let now: TimeStamp<Utc> = (self.clock)().into();

        let result = (self.catalog.tree(), &self.rentals, &self.live).transaction(
            |(cars, rentals, live)| {
                let mut rental = store::tx_read_rental(rentals, rental_id)?;
                if !rental.status.is_live() {
                    return abort(RentalError::InvalidTransition {
                        from: rental.status,
                        op: "cancel",
                    });
                }
                if !rental.can_cancel(now) {
                    return abort(RentalError::NotCancellable);
                }

                let prior = rental.status;
                rental.status = RentalStatus::Cancelled;
                rental.cancelled_at = Some(now);

                let mut live_set = store::tx_read_live(live, &rental.car_id)?;
                live_set.remove(&rental.id);
                store::tx_write_live(live, &rental.car_id, &live_set)?;
                store::tx_write_rental(rentals, &rental)?;

                if matches!(prior, RentalStatus::Confirmed | RentalStatus::Active) {
                    let mut car = store::tx_read_car(cars, &rental.car_id)?;
                    car.available = true;
                    store::tx_write_car(cars, &car)?;
                }

                Ok(rental)
            },
        );

        let rental = Self::commit(result)?;
        let refund = rental.refund_amount();
        info!(rental = %rental.id, refund, "rental cancelled");
        self.projector.record(&RentalEvent::from(&rental));
        Ok(Cancellation { rental, refund })
    }

    /// Remove a pending or cancelled record. Owner or operator. The
    /// availability flag is re-flipped only if the record had reached
    /// confirmed at some point.
    pub fn delete(&self, actor: &Actor, rental_id: &str) -> Result<(), RentalError> {
        let current = self.load(rental_id)?;
        self.require_owner_or_operator(actor, &current)?;

        let result = (self.catalog.tree(), &self.rentals, &self.live).transaction(
            |(cars, rentals, live)| {
                let rental = store::tx_read_rental(rentals, rental_id)?;
                if !matches!(
                    rental.status,
                    RentalStatus::Pending | RentalStatus::Cancelled
                ) {
                    return abort(RentalError::InvalidTransition {
                        from: rental.status,
                        op: "delete",
                    });
                }

                rentals.remove(rental.id.as_bytes())?;

                if rental.status == RentalStatus::Pending {
                    let mut live_set = store::tx_read_live(live, &rental.car_id)?;
                    live_set.remove(&rental.id);
                    store::tx_write_live(live, &rental.car_id, &live_set)?;
                }

                if rental.confirmed_at.is_some() {
                    let mut car = store::tx_read_car(cars, &rental.car_id)?;
                    car.available = true;
                    store::tx_write_car(cars, &car)?;
                }

                Ok(())
            },
        );

        Self::commit(result)?;
        info!(rental = %rental_id, "rental deleted");
        Ok(())
    }

    pub fn get_by_id(&self, actor: &Actor, rental_id: &str) -> Result<Rental, RentalError> {
        let rental = self.load(rental_id)?;
        self.require_owner_or_operator(actor, &rental)?;
        debug!(rental = %rental.id, "rental read");
        Ok(rental)
    }

    /// All rentals for a car, optionally narrowed to those overlapping
    /// a period. Operator only.
    pub fn list_by_car(
        &self,
        actor: &Actor,
        car_id: &str,
        period: Option<&Interval>,
    ) -> Result<Vec<Rental>, RentalError> {
        self.require_operator(actor)?;
        store::scan_rentals(&self.rentals, |r| {
            r.car_id == car_id && period.is_none_or(|p| r.interval.overlaps(p))
        })
    }

    /// All rentals for a user, newest first. Owner or operator.
    pub fn list_by_user(&self, actor: &Actor, user_id: &str) -> Result<Vec<Rental>, RentalError> {
        if !actor.is_operator() && actor.id != user_id {
            return Err(RentalError::Forbidden);
        }
        store::scan_rentals(&self.rentals, |r| r.user_id == user_id)
    }

    /// Derived overdue view: active rentals whose end date has passed.
    /// Operator only.
    pub fn list_overdue(&self, actor: &Actor) -> Result<Vec<Rental>, RentalError> {
        self.require_operator(actor)?;
        let now: TimeStamp<Utc> = (self.clock)().into();
        store::scan_rentals(&self.rentals, |r| r.is_overdue(now))
    }

    fn load(&self, rental_id: &str) -> Result<Rental, RentalError> {
        store::read_rental(&self.rentals, rental_id)?
            .ok_or_else(|| RentalError::NotFound(rental_id.to_owned()))
    }

    fn require_operator(&self, actor: &Actor) -> Result<(), RentalError> {
        if actor.is_operator() {
            Ok(())
        } else {
            Err(RentalError::Forbidden)
        }
    }

    fn require_owner_or_operator(&self, actor: &Actor, rental: &Rental) -> Result<(), RentalError> {
        if actor.is_operator() || actor.owns(rental) {
            Ok(())
        } else {
            Err(RentalError::Forbidden)
        }
    }

    fn commit<T>(result: Result<T, TransactionError<RentalError>>) -> Result<T, RentalError> {
        result.map_err(|e| match e {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => RentalError::Store(err),
        })
    }
}
