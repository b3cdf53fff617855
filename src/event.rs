//! Polymorphic, attachable events.
//!
//! An event is a tagged variant parameterized by [`EventKind`]: readiness
//! (read/write), a timer, a signal, a child-reap, or an in-memory flag. It
//! is attachable to at most one [`crate::reactor::Reactor`] at a time, carries
//! a callback, and carries a small option set (`once`, `free`) describing
//! its lifecycle once it fires.
//!
//! The source this crate is modeled on allocates a kind-specific struct
//! whose first field is a common header and dispatches through a vtable.
//! Rust has no need for that indirection: [`EventKind`] is a closed enum of
//! payloads, and the reactor switches on it directly.

use bitflags::bitflags;
use nix::unistd::Pid;
use std::cell::{Cell, RefCell};
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::error::{self, Result};
use crate::reactor::ReactorInner;

bitflags! {
    /// The set of event kinds a reactor accepts, and the kind tag carried
    /// by a single event (exactly one bit set).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EventKind: u8 {
        const READ   = 0b0000_0001;
        const WRITE  = 0b0000_0010;
        const TIMER  = 0b0000_0100;
        const SIGNAL = 0b0000_1000;
        const CHILD  = 0b0001_0000;
        const FLAG   = 0b0010_0000;
    }
}

bitflags! {
    /// Lifecycle options set at event-creation time.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct EventOptions: u8 {
        /// Detach (and, combined with `FREE`, drop) after the first dispatch.
        const ONCE = 0b01;
        /// Drop the event's `Rc` handle held by the reactor after dispatch.
        const FREE = 0b10;
    }
}

/// The callback invoked on dispatch: `(numeric argument, )`. The numeric
/// argument is the fd for read/write events and `-1` for every other kind,
/// matching the source's single-argument callback convention. User state is
/// carried by the closure's captures rather than a separate `void *` arg.
pub type Callback = Box<dyn FnMut(i32)>;

pub(crate) enum Payload {
    Read { fd: RawFd },
    Write { fd: RawFd },
    Timer {
        interval: Cell<Duration>,
        /// Nanoseconds until expiry, measured from the last mass-subtract
        /// or re-arm. Signed rather than a `Duration`: during the
        /// timer-debt mass-subtract an overdue timer's `remain` goes
        /// negative by the overshoot amount, and `timer_reset` folds that
        /// negative remainder into the next interval so a slow-running
        /// timer never drifts forward of wall-clock (see reactor.rs).
        remain: Cell<i128>,
    },
    Signal {
        signum: i32,
    },
    Child {
        pid: Pid,
    },
    Flag {
        observed: Rc<Cell<bool>>,
    },
}

impl Payload {
    pub(crate) fn kind(&self) -> EventKind {
        match self {
            Payload::Read { .. } => EventKind::READ,
            Payload::Write { .. } => EventKind::WRITE,
            Payload::Timer { .. } => EventKind::TIMER,
            Payload::Signal { .. } => EventKind::SIGNAL,
            Payload::Child { .. } => EventKind::CHILD,
            Payload::Flag { .. } => EventKind::FLAG,
        }
    }

    pub(crate) fn fd(&self) -> Option<RawFd> {
        match self {
            Payload::Read { fd } | Payload::Write { fd } => Some(*fd),
            _ => None,
        }
    }
}

pub(crate) struct EventState {
    pub(crate) payload: Payload,
    pub(crate) options: EventOptions,
    pub(crate) callback: RefCell<Callback>,
    /// Nonnull iff attached. Weak so the reactor (the owner) never forms a
    /// cycle through the events it owns.
    pub(crate) reactor: RefCell<Weak<RefCell<ReactorInner>>>,
    pub(crate) queued: Cell<bool>,
}

/// A handle to an event.
///
/// Cloning shares the same underlying state (the reactor holds its own
/// clone while an event is attached); dropping the last handle while
/// detached frees the event. While attached, the reactor is an additional
/// owner, so dropping the caller's handle does not by itself free it -- use
/// [`Event::detach`] first, or rely on an event created with
/// [`EventOptions::FREE`] to free itself on dispatch.
#[derive(Clone)]
pub struct Event(pub(crate) Rc<EventState>);

impl Event {
    pub(crate) fn new(payload: Payload, options: EventOptions, callback: Callback) -> Event {
        Event(Rc::new(EventState {
            payload,
            options,
            callback: RefCell::new(callback),
            reactor: RefCell::new(Weak::new()),
            queued: Cell::new(false),
        }))
    }

    pub fn kind(&self) -> EventKind {
        self.0.payload.kind()
    }

    pub fn is_attached(&self) -> bool {
        self.0.reactor.borrow().upgrade().is_some()
    }

    pub fn is_queued(&self) -> bool {
        self.0.queued.get()
    }

    /// Detach this event from whatever reactor it is attached to.
    ///
    /// Fails with `EINVAL` if the event is not currently attached.
    pub fn detach(&self) -> Result<()> {
        let reactor = self
            .0
            .reactor
            .borrow()
            .upgrade()
            .ok_or_else(error::invalid_argument)?;
        ReactorInner::detach(&reactor, self)
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind())
            .field("attached", &self.is_attached())
            .field("queued", &self.is_queued())
            .finish()
    }
}

/// Factory for a read-readiness event on `fd`.
pub fn read(fd: RawFd, options: EventOptions, callback: Callback) -> Event {
    Event::new(Payload::Read { fd }, options, callback)
}

/// Factory for a write-readiness event on `fd`.
pub fn write(fd: RawFd, options: EventOptions, callback: Callback) -> Event {
    Event::new(Payload::Write { fd }, options, callback)
}

/// Factory for a timer event that first fires after `interval`.
pub fn timer(interval: Duration, options: EventOptions, callback: Callback) -> Event {
    Event::new(
        Payload::Timer {
            interval: Cell::new(interval),
            remain: Cell::new(interval.as_nanos() as i128),
        },
        options,
        callback,
    )
}

/// Factory for a signal-delivery event. Actual signal delivery is an
/// external collaborator (see the crate-level docs); this event kind only
/// describes the attach/dispatch contract a backend would fulfil for it.
pub fn signal(signum: i32, options: EventOptions, callback: Callback) -> Event {
    Event::new(Payload::Signal { signum }, options, callback)
}

/// Factory for a child-reap event. Like `signal`, the reap mechanism itself
/// is an external collaborator.
pub fn child(pid: Pid, options: EventOptions, callback: Callback) -> Event {
    Event::new(Payload::Child { pid }, options, callback)
}

/// Factory for a flag event: a boolean polled at wait-entry, with no
/// backing file descriptor. `observed` is the shared cell the owner
/// flips to request a dispatch on the next iteration.
pub fn flag(observed: Rc<Cell<bool>>, options: EventOptions, callback: Callback) -> Event {
    Event::new(Payload::Flag { observed }, options, callback)
}
