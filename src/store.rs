//! Reservation store plumbing over sled: CBOR codecs, the per-car
//! live-reservation index that conflict detection reads, and helpers
//! shared by the transactional and plain read paths.

use sled::Tree;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree, abort};

use crate::catalog::Car;
use crate::error::RentalError;
use crate::rental::{Interval, Rental};

pub(crate) const CARS_TREE: &str = "cars";
pub(crate) const RENTALS_TREE: &str = "rentals";
pub(crate) const LIVE_TREE: &str = "live_by_car";

pub(crate) type TxResult<T> = ConflictableTransactionResult<T, RentalError>;

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, RentalError> {
    minicbor::to_vec(value).map_err(|e| RentalError::Codec(e.to_string()))
}

pub(crate) fn decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T, RentalError> {
    minicbor::decode(bytes).map_err(|e| RentalError::Codec(e.to_string()))
}

/// One live reservation's claim on a car's calendar.
#[derive(minicbor::Encode, minicbor::Decode, Debug, PartialEq, Clone)]
pub(crate) struct LiveSlot {
    #[n(0)]
    pub rental_id: String,
    #[n(1)]
    pub interval: Interval,
}

/// All reservations currently in a live status for one car, keyed by
/// car id. Updated inside the same transaction as every status change
/// that enters or leaves the live set, so it can never drift from the
/// records it summarizes.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Default, Clone)]
pub(crate) struct LiveSet {
    #[n(0)]
    pub slots: Vec<LiveSlot>,
}

impl LiveSet {
    pub fn conflicts(&self, candidate: &Interval) -> bool {
        self.slots.iter().any(|s| s.interval.overlaps(candidate))
    }

    pub fn insert(&mut self, rental: &Rental) {
        self.slots.push(LiveSlot {
            rental_id: rental.id.clone(),
            interval: rental.interval,
        });
    }

    pub fn remove(&mut self, rental_id: &str) {
        self.slots.retain(|s| s.rental_id != rental_id);
    }
}

// --- transactional path -------------------------------------------------

pub(crate) fn tx_read_rental(tree: &TransactionalTree, rental_id: &str) -> TxResult<Rental> {
    match tree.get(rental_id.as_bytes())? {
        Some(bytes) => match decode(bytes.as_ref()) {
            Ok(rental) => Ok(rental),
            Err(e) => abort(e),
        },
        None => abort(RentalError::NotFound(rental_id.to_owned())),
    }
}

pub(crate) fn tx_write_rental(tree: &TransactionalTree, rental: &Rental) -> TxResult<()> {
    match encode(rental) {
        Ok(bytes) => {
            tree.insert(rental.id.as_bytes(), bytes)?;
            Ok(())
        }
        Err(e) => abort(e),
    }
}

pub(crate) fn tx_read_car(tree: &TransactionalTree, car_id: &str) -> TxResult<Car> {
    match tree.get(car_id.as_bytes())? {
        Some(bytes) => match decode(bytes.as_ref()) {
            Ok(car) => Ok(car),
            Err(e) => abort(e),
        },
        None => abort(RentalError::NotFound(car_id.to_owned())),
    }
}

pub(crate) fn tx_write_car(tree: &TransactionalTree, car: &Car) -> TxResult<()> {
    match encode(car) {
        Ok(bytes) => {
            tree.insert(car.id.as_bytes(), bytes)?;
            Ok(())
        }
        Err(e) => abort(e),
    }
}

pub(crate) fn tx_read_live(tree: &TransactionalTree, car_id: &str) -> TxResult<LiveSet> {
    match tree.get(car_id.as_bytes())? {
        Some(bytes) => match decode(bytes.as_ref()) {
            Ok(live) => Ok(live),
            Err(e) => abort(e),
        },
        None => Ok(LiveSet::default()),
    }
}

pub(crate) fn tx_write_live(tree: &TransactionalTree, car_id: &str, live: &LiveSet) -> TxResult<()> {
    match encode(live) {
        Ok(bytes) => {
            tree.insert(car_id.as_bytes(), bytes)?;
            Ok(())
        }
        Err(e) => abort(e),
    }
}

// --- plain read path ----------------------------------------------------

pub(crate) fn read_rental(tree: &Tree, rental_id: &str) -> Result<Option<Rental>, RentalError> {
    match tree.get(rental_id.as_bytes())? {
        Some(bytes) => Ok(Some(decode(bytes.as_ref())?)),
        None => Ok(None),
    }
}

pub(crate) fn read_live(tree: &Tree, car_id: &str) -> Result<LiveSet, RentalError> {
    match tree.get(car_id.as_bytes())? {
        Some(bytes) => Ok(decode(bytes.as_ref())?),
        None => Ok(LiveSet::default()),
    }
}

/// Decode every rental in the tree, newest first by creation time.
pub(crate) fn scan_rentals(
    tree: &Tree,
    mut keep: impl FnMut(&Rental) -> bool,
) -> Result<Vec<Rental>, RentalError> {
    let mut out = Vec::new();
    for entry in tree.iter() {
        let (_, bytes) = entry?;
        let rental: Rental = decode(bytes.as_ref())?;
        if keep(&rental) {
            out.push(rental);
        }
    }
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(out)
}
