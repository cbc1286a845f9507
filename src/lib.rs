//! Car rental reservation engine: interval conflict detection, atomic
//! reserve/release against an embedded store, the booking state
//! machine and the pricing/refund calculus tied to it.

pub mod builder;
pub mod catalog;
pub mod error;
pub mod projector;
pub mod rental;
pub mod service;
mod store;
pub mod utils;
