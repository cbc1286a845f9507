use crate::rental::RentalStatus;

/// Failure taxonomy for the reservation engine. Every operation returns
/// one of these instead of mutating state silently.
#[derive(thiserror::Error, Debug)]
pub enum RentalError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("car {0} is already booked for the requested dates")]
    IntervalConflict(String),
    #[error("car {0} is not available for rental")]
    ResourceUnavailable(String),
    #[error("cannot {op} a rental that is {from}")]
    InvalidTransition {
        from: RentalStatus,
        op: &'static str,
    },
    #[error("rental cannot be cancelled")]
    NotCancellable,
    #[error("cannot activate rental before its start date")]
    TooEarly,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("access denied")]
    Forbidden,
    #[error("storage failure: {0}")]
    Store(#[from] sled::Error),
    #[error("stored record could not be decoded: {0}")]
    Codec(String),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("end date must be after start date")]
    EmptyInterval,
    #[error("start date must be in the future")]
    StartNotInFuture,
    #[error("car id is required")]
    MissingCar,
    #[error("rental period is required")]
    MissingInterval,
    #[error("pickup location is required")]
    MissingPickupLocation,
    #[error("return location is required")]
    MissingReturnLocation,
    #[error("payment method is required")]
    MissingPaymentMethod,
    #[error("refund percentage cannot exceed 100, got {0}")]
    RefundPercentage(u8),
    #[error("fuel level cannot exceed 100, got {0}")]
    FuelLevel(u8),
}
