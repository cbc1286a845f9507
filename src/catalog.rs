//! Resource catalog collaborator. The engine reads the day rate and
//! flips the coarse availability flag; the flag is a hint, never the
//! source of truth for conflict detection.

use sled::Tree;

use crate::error::RentalError;
use crate::store;

#[derive(minicbor::Encode, minicbor::Decode, Debug, PartialEq, Clone)]
pub struct Car {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub price_per_day: u64,
    #[n(3)]
    pub available: bool,
}

impl Car {
    pub fn new(id: &str, name: &str, price_per_day: u64) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            price_per_day,
            available: true,
        }
    }
}

/// Narrow interface over the fleet records the engine is allowed to
/// touch: get price, get flag, set flag.
pub struct CarCatalog {
    tree: Tree,
}

impl CarCatalog {
    pub(crate) fn new(tree: Tree) -> Self {
        Self { tree }
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn insert(&self, car: &Car) -> Result<(), RentalError> {
        self.tree.insert(car.id.as_bytes(), store::encode(car)?)?;
        Ok(())
    }

    pub fn get(&self, car_id: &str) -> Result<Option<Car>, RentalError> {
        match self.tree.get(car_id.as_bytes())? {
            Some(bytes) => Ok(Some(store::decode(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn price(&self, car_id: &str) -> Result<u64, RentalError> {
        self.get(car_id)?
            .map(|car| car.price_per_day)
            .ok_or_else(|| RentalError::NotFound(car_id.to_owned()))
    }

    pub fn is_available(&self, car_id: &str) -> Result<bool, RentalError> {
        self.get(car_id)?
            .map(|car| car.available)
            .ok_or_else(|| RentalError::NotFound(car_id.to_owned()))
    }

    pub fn set_available(&self, car_id: &str, available: bool) -> Result<(), RentalError> {
        let mut car = self
            .get(car_id)?
            .ok_or_else(|| RentalError::NotFound(car_id.to_owned()))?;
        car.available = available;
        self.insert(&car)
    }
}
