//! Domain Layer
//!
//! Abstractions the RAID layer depends on. Infrastructure adapters in
//! [`crate::adapters`] implement them.
//!
//! # Usage
//!
//! ```ignore
//! use stripeio::domain::{OpenMode, OpenRequest, StripeTransport};
//!
//! fn probe<T: StripeTransport>(stripe: &T) -> stripeio::Result<u64> {
//!     stripe.open(&OpenRequest::new(OpenMode::Read))?;
//!     stripe.stat()
//! }
//! ```

pub mod ports;

pub use ports::{OpenMode, OpenRequest, SharedTransport, StripeTransport};
