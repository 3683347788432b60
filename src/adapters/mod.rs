//! Infrastructure Adapters
//!
//! Implementations of the [`StripeTransport`](crate::domain::StripeTransport)
//! port.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    StripeTransport                      │
//! └────────────────────────────────────────────────────────┘
//!        ▲                  ▲                    ▲
//!   MemStripe          LocalStripe      AsyncDispatch<T: StripeTransport>
//!  (tests, faults)   (file:// paths)     (tokio blocking pool)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use stripeio::adapters::{AsyncDispatch, LocalStripe};
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! let stripes = urls.iter().map(LocalStripe::new).collect();
//! let transports = AsyncDispatch::wrap_all(stripes, runtime.handle());
//! ```

mod dispatch;
mod local;
mod memory;

pub use dispatch::AsyncDispatch;
pub use local::LocalStripe;
pub use memory::MemStripe;
