//! Draft reservation requests. A request is assembled field by field,
//! then checked as a whole before the engine will touch the store.

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::rental::{
    AdditionalFees, CancellationPolicy, Interval, PaymentMethod, PickupDetails, ReturnDetails,
    TimeStamp,
};

/// Builder for a reservation. Pricing is never part of the request;
/// the engine snapshots the day rate from the catalog on reserve.
#[derive(Debug, Default)]
pub struct RentalRequest {
    car_id: Option<String>,
    period: Option<Interval>,
    pickup: Option<PickupDetails>,
    ret: Option<ReturnDetails>,
    fees: AdditionalFees,
    payment_method: Option<PaymentMethod>,
    policy: CancellationPolicy,
}

/// A request that has passed [`RentalRequest::validate`]. All required
/// sub-fields are present and the interval is well formed.
#[derive(Debug)]
pub(crate) struct ValidRequest {
    pub car_id: String,
    pub interval: Interval,
    pub pickup: PickupDetails,
    pub ret: ReturnDetails,
    pub fees: AdditionalFees,
    pub payment_method: PaymentMethod,
    pub policy: CancellationPolicy,
}

impl RentalRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_car(mut self, car_id: &str) -> Self {
        self.car_id = Some(car_id.to_owned());
        self
    }

    pub fn set_period(mut self, start: TimeStamp<Utc>, end: TimeStamp<Utc>) -> Self {
        self.period = Some(Interval::new(start, end));
        self
    }

    pub fn set_pickup(mut self, pickup: PickupDetails) -> Self {
        self.pickup = Some(pickup);
        self
    }

    pub fn set_return(mut self, ret: ReturnDetails) -> Self {
        self.ret = Some(ret);
        self
    }

    pub fn set_fees(mut self, fees: AdditionalFees) -> Self {
        self.fees = fees;
        self
    }

    pub fn set_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }

    pub fn set_policy(mut self, policy: CancellationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Check the request shape against the rules the record must hold:
    /// a non-empty, non-retroactive interval, both trip sub-records,
    /// a payment method and a sane refund percentage.
    pub(crate) fn validate(self, now: DateTime<Utc>) -> Result<ValidRequest, ValidationError> {
        let car_id = self.car_id.ok_or(ValidationError::MissingCar)?;
        let interval = self.period.ok_or(ValidationError::MissingInterval)?;

        if interval.end <= interval.start {
            return Err(ValidationError::EmptyInterval);
        }
        if interval.start <= TimeStamp::from(now) {
            return Err(ValidationError::StartNotInFuture);
        }

        let pickup = self.pickup.ok_or(ValidationError::MissingPickupLocation)?;
        if pickup.location.is_empty() {
            return Err(ValidationError::MissingPickupLocation);
        }
        let ret = self.ret.ok_or(ValidationError::MissingReturnLocation)?;
        if ret.location.is_empty() {
            return Err(ValidationError::MissingReturnLocation);
        }

        let payment_method = self
            .payment_method
            .ok_or(ValidationError::MissingPaymentMethod)?;

        if self.policy.refund_percentage > 100 {
            return Err(ValidationError::RefundPercentage(
                self.policy.refund_percentage,
            ));
        }

        Ok(ValidRequest {
            car_id,
            interval,
            pickup,
            ret,
            fees: self.fees,
            payment_method,
            policy: self.policy,
        })
    }
}
