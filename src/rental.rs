//! Core rental record, interval arithmetic and the pricing calculus.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

/// Wall-clock instant stored as integer nanoseconds on the wire.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl Copy for TimeStamp<Utc> {}

// Ordering is written for Utc only, like the codec impls below: a
// derive would demand `T: Ord`, which chrono's zone markers don't have.
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn now() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn plus_days(&self, days: i64) -> Self {
        Self(self.0 + chrono::Duration::days(days))
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Half-open booking period `[start, end)`.
#[derive(minicbor::Encode, minicbor::Decode, Debug, PartialEq, Eq, Clone, Copy)]
pub struct Interval {
    #[n(0)]
    pub start: TimeStamp<Utc>,
    #[n(1)]
    pub end: TimeStamp<Utc>,
}

impl Interval {
    pub fn new(start: TimeStamp<Utc>, end: TimeStamp<Utc>) -> Self {
        Self { start, end }
    }

    /// Two periods conflict iff `s1 < e2 && s2 < e1`.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Billable duration: elapsed time rounded up to whole days.
    /// At least 1 for any non-empty interval.
    pub fn duration_days(&self) -> u64 {
        let secs = (self.end.to_datetime_utc() - self.start.to_datetime_utc()).num_seconds();
        if secs <= 0 {
            return 0;
        }
        ((secs + 86_399) / 86_400) as u64
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, PartialEq, Eq, Clone, Copy)]
pub enum RentalStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Confirmed,
    #[n(2)]
    Active,
    #[n(3)]
    Completed,
    #[n(4)]
    Cancelled,
}

impl RentalStatus {
    /// Live rentals hold their car's dates and count toward conflicts.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed | Self::Active)
    }
}

impl fmt::Display for RentalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Named surcharges on top of the day rate. Unsigned, so a negative
/// fee is unrepresentable.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct AdditionalFees {
    #[n(0)]
    pub insurance: u64,
    #[n(1)]
    pub fuel: u64,
    #[n(2)]
    pub cleaning: u64,
    #[n(3)]
    pub late_return: u64,
}

impl AdditionalFees {
    pub fn total(&self) -> u64 {
        self.insurance
            .saturating_add(self.fuel)
            .saturating_add(self.cleaning)
            .saturating_add(self.late_return)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, PartialEq, Eq, Clone, Copy)]
pub enum PaymentMethod {
    #[n(0)]
    CreditCard,
    #[n(1)]
    DebitCard,
    #[n(2)]
    Cash,
    #[n(3)]
    BankTransfer,
    #[n(4)]
    DigitalWallet,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, PartialEq, Eq, Clone, Copy)]
pub enum PaymentStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Paid,
    #[n(2)]
    Failed,
    #[n(3)]
    Refunded,
}

/// Recorded payment intent. The engine never talks to a gateway.
#[derive(minicbor::Encode, minicbor::Decode, Debug, PartialEq, Clone)]
pub struct Payment {
    #[n(0)]
    pub method: PaymentMethod,
    #[n(1)]
    pub status: PaymentStatus,
    #[n(2)]
    pub transaction_id: Option<String>,
    #[n(3)]
    pub paid_at: Option<TimeStamp<Utc>>,
}

impl Payment {
    pub fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            status: PaymentStatus::Pending,
            transaction_id: None,
            paid_at: None,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, PartialEq, Clone)]
pub struct PickupDetails {
    #[n(0)]
    pub location: String,
    #[n(1)]
    pub branch_id: String,
    #[n(2)]
    pub time: TimeStamp<Utc>,
    #[n(3)]
    pub notes: String,
}

impl PickupDetails {
    pub fn new(location: &str, branch_id: &str, time: TimeStamp<Utc>) -> Self {
        Self {
            location: location.to_owned(),
            branch_id: branch_id.to_owned(),
            time,
            notes: String::new(),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, PartialEq, Clone)]
pub struct ReturnDetails {
    #[n(0)]
    pub location: String,
    #[n(1)]
    pub branch_id: String,
    #[n(2)]
    pub time: TimeStamp<Utc>,
    #[n(3)]
    pub notes: String,
    // set exactly once, at completion
    #[n(4)]
    pub actual_return_time: Option<TimeStamp<Utc>>,
}

impl ReturnDetails {
    pub fn new(location: &str, branch_id: &str, time: TimeStamp<Utc>) -> Self {
        Self {
            location: location.to_owned(),
            branch_id: branch_id.to_owned(),
            time,
            notes: String::new(),
            actual_return_time: None,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Condition {
    #[n(0)]
    Excellent,
    #[n(1)]
    Good,
    #[n(2)]
    Fair,
    #[n(3)]
    Poor,
}

/// End-of-rental condition report, merged into the record on completion.
#[derive(minicbor::Encode, minicbor::Decode, Debug, PartialEq, Clone)]
pub struct ReturnCondition {
    #[n(0)]
    pub fuel_level: u8,
    #[n(1)]
    pub mileage: Option<u64>,
    #[n(2)]
    pub exterior: Condition,
    #[n(3)]
    pub interior: Condition,
    #[n(4)]
    pub damage_report: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, PartialEq, Clone, Copy)]
pub struct CancellationPolicy {
    #[n(0)]
    pub allowed: bool,
    #[n(1)]
    pub deadline: Option<TimeStamp<Utc>>,
    #[n(2)]
    pub refund_percentage: u8,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            allowed: true,
            deadline: None,
            refund_percentage: 100,
        }
    }
}

/// A priced booking: the derived fields of a reservation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Quote {
    pub duration: u64,
    pub subtotal: u64,
    pub final_amount: u64,
}

/// Pricing calculator. Pure function of the interval, the day rate and
/// the fee set; callers never supply the derived amounts themselves.
pub fn quote(interval: &Interval, price_per_day: u64, fees: &AdditionalFees) -> Quote {
    let duration = interval.duration_days();
    // amounts saturate rather than wrap on pathological inputs
    let subtotal = duration.saturating_mul(price_per_day);
    Quote {
        duration,
        subtotal,
        final_amount: subtotal.saturating_add(fees.total()),
    }
}

/// Refund owed for a cancellation: a whole-number percentage of the
/// snapshotted final amount, rounded down. The intermediate product is
/// widened so amounts near `u64::MAX` cannot wrap.
pub fn refund(final_amount: u64, refund_percentage: u8) -> u64 {
    (u128::from(final_amount) * u128::from(refund_percentage) / 100) as u64
}

/// The central reservation record. Only the service layer transitions
/// `status`; duration, subtotal and final_amount are derived and must
/// go through [`Rental::reprice`].
#[derive(minicbor::Encode, minicbor::Decode, Debug, PartialEq, Clone)]
pub struct Rental {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub car_id: String,
    #[n(2)]
    pub user_id: String,
    #[n(3)]
    pub interval: Interval,
    // pricing snapshot, captured from the catalog at creation
    #[n(4)]
    pub price_per_day: u64,
    #[n(5)]
    pub duration: u64,
    #[n(6)]
    pub subtotal: u64,
    #[n(7)]
    pub fees: AdditionalFees,
    #[n(8)]
    pub final_amount: u64,
    #[n(9)]
    pub status: RentalStatus,
    #[n(10)]
    pub payment: Payment,
    #[n(11)]
    pub pickup: PickupDetails,
    #[n(12)]
    pub ret: ReturnDetails,
    #[n(13)]
    pub return_condition: Option<ReturnCondition>,
    #[n(14)]
    pub policy: CancellationPolicy,
    #[n(15)]
    pub created_at: TimeStamp<Utc>,
    #[n(16)]
    pub confirmed_at: Option<TimeStamp<Utc>>,
    #[n(17)]
    pub activated_at: Option<TimeStamp<Utc>>,
    #[n(18)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(19)]
    pub cancelled_at: Option<TimeStamp<Utc>>,
}

impl Rental {
    /// Assemble a fresh pending record from a validated request and the
    /// day rate snapshotted from the catalog.
    pub(crate) fn create(
        id: &str,
        user_id: &str,
        req: &crate::builder::ValidRequest,
        price_per_day: u64,
        created_at: TimeStamp<Utc>,
    ) -> Self {
        let mut rental = Self {
            id: id.to_owned(),
            car_id: req.car_id.clone(),
            user_id: user_id.to_owned(),
            interval: req.interval,
            price_per_day,
            duration: 0,
            subtotal: 0,
            fees: req.fees,
            final_amount: 0,
            status: RentalStatus::Pending,
            payment: Payment::new(req.payment_method),
            pickup: req.pickup.clone(),
            ret: req.ret.clone(),
            return_condition: None,
            policy: req.policy,
            created_at,
            confirmed_at: None,
            activated_at: None,
            completed_at: None,
            cancelled_at: None,
        };
        rental.reprice();
        rental
    }

    /// Recompute the derived pricing fields from the interval, day rate
    /// and fees. Deterministic and side-effect free.
    pub fn reprice(&mut self) {
        let quote = quote(&self.interval, self.price_per_day, &self.fees);
        self.duration = quote.duration;
        self.subtotal = quote.subtotal;
        self.final_amount = quote.final_amount;
    }

    /// Derived view: an active rental whose end date has passed.
    /// Informational only, never a stored status.
    pub fn is_overdue(&self, now: TimeStamp<Utc>) -> bool {
        self.status == RentalStatus::Active && now > self.interval.end
    }

    pub fn can_cancel(&self, now: TimeStamp<Utc>) -> bool {
        if !self.policy.allowed {
            return false;
        }
        match self.policy.deadline {
            Some(deadline) => now <= deadline,
            None => true,
        }
    }

    /// Refund owed if cancelled now: a fraction of the snapshotted
    /// final amount. Informational; no money moves here.
    pub fn refund_amount(&self) -> u64 {
        refund(self.final_amount, self.policy.refund_percentage)
    }
}
