//! A single-threaded, cooperative I/O reactor for datagram-oriented
//! networking.
//!
//! The crate is organized the way the source it's modeled on is organized:
//! a polymorphic [`endpoint::Endpoint`] address value, a polymorphic
//! [`event::Event`] with a closed set of kinds, a [`reactor::Reactor`] that
//! owns timers, flags, and the dispatch queue directly and delegates
//! fd-readiness to a pluggable [`backend::Backend`], and an abstract
//! [`queue::Queue`] interface with one concrete implementation
//! ([`queue::socket::SocketQueue`]) plus two composable decorators
//! ([`queue::rate::RateObserver`], [`queue::limit::RateLimiter`]).
//!
//! Everything here runs on whatever thread drives the reactor; there is no
//! internal locking, and no type in this crate is `Send` or `Sync`.

pub mod backend;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod queue;
pub mod reactor;

pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use event::{Event, EventKind, EventOptions};
pub use reactor::Reactor;
