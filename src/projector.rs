//! History projector seam. After every committed transition the engine
//! hands a denormalized summary to an external system-of-record for
//! the requesting user; the engine does not own that record.

use std::sync::Mutex;

use crate::rental::{Interval, Rental, RentalStatus};

/// Denormalized transition summary.
#[derive(Debug, PartialEq, Clone)]
pub struct RentalEvent {
    pub rental_id: String,
    pub car_id: String,
    pub user_id: String,
    pub interval: Interval,
    pub status: RentalStatus,
    pub final_amount: u64,
}

impl From<&Rental> for RentalEvent {
    fn from(rental: &Rental) -> Self {
        Self {
            rental_id: rental.id.clone(),
            car_id: rental.car_id.clone(),
            user_id: rental.user_id.clone(),
            interval: rental.interval,
            status: rental.status,
            final_amount: rental.final_amount,
        }
    }
}

pub trait HistoryProjector: Send + Sync {
    fn record(&self, event: &RentalEvent);
}

/// Default projector when no collaborator is wired in.
pub struct NullProjector;

impl HistoryProjector for NullProjector {
    fn record(&self, _: &RentalEvent) {}
}

/// In-memory projector, mainly for tests and demos.
#[derive(Default)]
pub struct MemoryProjector {
    events: Mutex<Vec<RentalEvent>>,
}

impl MemoryProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RentalEvent> {
        self.events.lock().expect("projector lock poisoned").clone()
    }
}

impl HistoryProjector for MemoryProjector {
    fn record(&self, event: &RentalEvent) {
        self.events
            .lock()
            .expect("projector lock poisoned")
            .push(event.clone());
    }
}
