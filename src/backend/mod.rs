//! Pluggable readiness multiplexer.
//!
//! The reactor itself handles timer and flag events; everything else (today
//! just read/write readiness) is delegated to a `Backend`. This mirrors the
//! source's `iobackend` vtable, minus the kinds the reactor now owns
//! directly.

pub mod select;

use crate::error::Result;
use crate::event::{EventKind, EventState};
use std::rc::Rc;
use std::time::Duration;

/// A readiness multiplexer pluggable into a [`crate::reactor::Reactor`].
pub trait Backend {
    /// The subset of [`EventKind`] this backend can attach.
    fn accepted_kinds(&self) -> EventKind;

    /// Attach a read or write event. Fails with `EBUSY` if the fd/direction
    /// slot is already occupied.
    fn attach(&mut self, event: &Rc<EventState>) -> Result<()>;

    /// Detach a previously attached event. Fails with `EINVAL` if it was
    /// not the event occupying that slot.
    fn detach(&mut self, event: &Rc<EventState>) -> Result<()>;

    /// Block for readiness up to `timeout` (`None` = wait indefinitely).
    /// Every ready event is passed to `on_ready` exactly once.
    fn go(&mut self, timeout: Option<Duration>, on_ready: &mut dyn FnMut(Rc<EventState>))
        -> Result<()>;
}
