//! The single-threaded cooperative event loop.
//!
//! Owns the dispatch queue, the sorted timer array, the flag list, and a
//! pluggable [`Backend`]. There is no lock: every operation here runs on
//! whatever thread drives the reactor, and the only suspension point is the
//! backend's blocking wait inside [`Reactor::run_once`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::backend::Backend;
use crate::error::{self, Result};
use crate::event::{Event, EventKind, EventOptions, EventState, Payload};

pub(crate) struct ReactorInner {
    backend: Box<dyn Backend>,
    accepted_kinds: EventKind,
    attached_count: usize,
    timers: Vec<Rc<EventState>>,
    timerdebt: Duration,
    flags: Vec<Rc<EventState>>,
    dispatch_queue: VecDeque<Rc<EventState>>,
    broken: bool,
    /// The wall-clock instant as of the last measured backend wait; `None`
    /// until the first wait. See the module docs on why this is carried
    /// across iterations rather than re-read each time.
    clock: Option<Instant>,
}

/// The event loop itself.
///
/// Cheap to clone: a `Reactor` is a handle around shared interior state, the
/// same way an attached [`Event`] holds a weak reference back to it.
#[derive(Clone)]
pub struct Reactor(pub(crate) Rc<RefCell<ReactorInner>>);

impl Reactor {
    /// Build a reactor around `backend`. The accepted-kinds set is the
    /// backend's own capabilities plus the two kinds the reactor always
    /// handles itself: timers and flags.
    pub fn new(backend: Box<dyn Backend>) -> Reactor {
        let accepted_kinds = backend.accepted_kinds() | EventKind::TIMER | EventKind::FLAG;
        Reactor(Rc::new(RefCell::new(ReactorInner {
            backend,
            accepted_kinds,
            attached_count: 0,
            timers: Vec::new(),
            timerdebt: Duration::ZERO,
            flags: Vec::new(),
            dispatch_queue: VecDeque::new(),
            broken: false,
            clock: None,
        })))
    }

    pub fn attached_count(&self) -> usize {
        self.0.borrow().attached_count
    }

    pub fn is_broken(&self) -> bool {
        self.0.borrow().broken
    }

    /// Attach `event` to this reactor.
    ///
    /// Fails with `ENOTSUP` if the event's kind is not among this reactor's
    /// accepted kinds, or `EBUSY` if the event is already attached
    /// (possibly to a different reactor).
    pub fn attach(&self, event: &Event) -> Result<()> {
        if event.is_attached() {
            return Err(error::busy());
        }

        let kind = event.kind();
        let mut inner = self.0.borrow_mut();
        if !inner.accepted_kinds.contains(kind) {
            log::warn!("refusing to attach {kind:?} event: not in this reactor's accepted kinds");
            return Err(error::not_supported());
        }

        match kind {
            EventKind::TIMER => inner.attach_timer(Rc::clone(&event.0)),
            EventKind::FLAG => inner.flags.push(Rc::clone(&event.0)),
            _ => inner.backend.attach(&event.0)?,
        }

        *event.0.reactor.borrow_mut() = Rc::downgrade(&self.0);
        inner.attached_count += 1;
        log::trace!("attached {kind:?} event, {} now attached", inner.attached_count);
        Ok(())
    }

    /// Run exactly one wait/dispatch cycle.
    pub fn run_once(&self) -> Result<()> {
        ReactorInner::wait_once(&self.0)?;

        loop {
            let next = {
                let mut inner = self.0.borrow_mut();
                let ev = inner.dispatch_queue.pop_front();
                if let Some(ev) = &ev {
                    ev.queued.set(false);
                }
                ev
            };
            match next {
                Some(ev) => self.dispatch_one(ev),
                None => break,
            }
        }

        Ok(())
    }

    /// Run cycles until [`Reactor::break_loop`] is called or no events
    /// remain attached.
    pub fn run(&self) -> Result<()> {
        log::debug!("reactor run starting with {} events attached", self.attached_count());
        loop {
            {
                let inner = self.0.borrow();
                if inner.broken || inner.attached_count == 0 {
                    break;
                }
            }
            self.run_once()?;
        }
        log::debug!(
            "reactor run exiting (broken={}, attached={})",
            self.0.borrow().broken,
            self.attached_count()
        );
        self.0.borrow_mut().broken = false;
        Ok(())
    }

    /// Request that [`Reactor::run`] stop after the current iteration.
    pub fn break_loop(&self) {
        log::trace!("break_loop requested");
        self.0.borrow_mut().broken = true;
    }

    fn dispatch_one(&self, ev: Rc<EventState>) {
        let opt = ev.options;

        if opt.contains(EventOptions::ONCE) {
            let handle = Event(Rc::clone(&ev));
            let _ = ReactorInner::detach(&self.0, &handle);
        }

        let arg = ev.payload.fd().unwrap_or(-1);
        (ev.callback.borrow_mut())(arg);

        // Did the callback (or our own once-detach above, if never
        // re-attached) leave the event detached? Then there is nothing
        // further to do: no re-arm, no implicit free beyond dropping
        // whatever `Rc` handles already went away.
        if ev.reactor.borrow().upgrade().is_none() {
            return;
        }

        if opt.contains(EventOptions::FREE) {
            let handle = Event(Rc::clone(&ev));
            let _ = ReactorInner::detach(&self.0, &handle);
        } else if opt.contains(EventOptions::ONCE) {
            // Still attached after a once-dispatch means the callback
            // re-attached it itself (the detach above already ran, and
            // `attach` gave it a single fresh entry in `timers`). Re-arming
            // here too would insert it a second time for the same
            // `EventState`, so a once event never goes through the
            // relative-rearm path at all.
        } else if ev.payload.kind() == EventKind::TIMER {
            ReactorInner::rearm_timer(&self.0, &ev);
        }
    }
}

impl ReactorInner {
    pub(crate) fn detach(self_rc: &Rc<RefCell<ReactorInner>>, event: &Event) -> Result<()> {
        if !event.is_attached() {
            return Err(error::invalid_argument());
        }

        let mut inner = self_rc.borrow_mut();
        match event.kind() {
            // A timer being detached mid-dispatch (a firing once timer, or
            // a non-once timer whose callback detaches it) has already been
            // drained out of `timers` by the expiry step; removal is then
            // a deliberate no-op rather than an error.
            EventKind::TIMER => {
                let _ = remove_timer(&mut inner.timers, &event.0);
            }
            EventKind::FLAG => {
                let before = inner.flags.len();
                inner.flags.retain(|e| !Rc::ptr_eq(e, &event.0));
                if inner.flags.len() == before {
                    return Err(error::invalid_argument());
                }
            }
            _ => inner.backend.detach(&event.0)?,
        }

        if event.0.queued.get() {
            inner.dispatch_queue.retain(|e| !Rc::ptr_eq(e, &event.0));
            event.0.queued.set(false);
        }

        inner.attached_count -= 1;
        *event.0.reactor.borrow_mut() = Weak::new();
        Ok(())
    }

    fn attach_timer(&mut self, ev: Rc<EventState>) {
        if self.timerdebt > Duration::ZERO {
            let debt = self.timerdebt.as_nanos() as i128;
            for t in &self.timers {
                if let Payload::Timer { remain, .. } = &t.payload {
                    remain.set(remain.get() - debt);
                }
            }
            self.timerdebt = Duration::ZERO;
        }
        insert_timer(&mut self.timers, ev);
    }

    /// Relative re-arm: the next `remain` is `interval` plus whatever is
    /// left of the current one, which may be negative (the timer fired
    /// late, by however much wall-clock overshot its expiry). Folding that
    /// overshoot into the next interval rather than discarding it is what
    /// keeps a periodic timer from drifting forward of wall-clock over
    /// many firings; only clamp to zero if the overshoot outran the whole
    /// next interval.
    fn rearm_timer(self_rc: &Rc<RefCell<ReactorInner>>, ev: &Rc<EventState>) {
        let mut inner = self_rc.borrow_mut();
        if let Payload::Timer { interval, remain } = &ev.payload {
            let next = interval.get().as_nanos() as i128 + remain.get();
            remain.set(next.max(0));
        }
        insert_timer(&mut inner.timers, Rc::clone(ev));
    }

    /// The per-iteration timer/flag/backend step described at the module
    /// level: evaluate flags, skip the backend wait if anything is already
    /// queued, otherwise wait and then settle the timer debt.
    fn wait_once(self_rc: &Rc<RefCell<ReactorInner>>) -> Result<()> {
        {
            let mut inner = self_rc.borrow_mut();
            let ready: Vec<Rc<EventState>> = inner
                .flags
                .iter()
                .filter(|f| matches!(&f.payload, Payload::Flag { observed } if observed.get()))
                .cloned()
                .collect();
            for ev in ready {
                enqueue(&mut inner.dispatch_queue, ev);
            }

            if !inner.dispatch_queue.is_empty() {
                return Ok(());
            }
        }

        let timeout = {
            let inner = self_rc.borrow();
            inner.timers.first().map(|t| {
                let debt = inner.timerdebt.as_nanos() as i128;
                nanos_to_duration(timer_remain(t) - debt)
            })
        };

        let start = {
            let mut inner = self_rc.borrow_mut();
            *inner.clock.get_or_insert_with(Instant::now)
        };

        {
            let mut inner = self_rc.borrow_mut();
            let ReactorInner {
                backend,
                dispatch_queue,
                ..
            } = &mut *inner;
            backend.go(timeout, &mut |ev| enqueue(dispatch_queue, ev))?;
        }

        let end = Instant::now();
        let elapsed = end.saturating_duration_since(start);

        let mut inner = self_rc.borrow_mut();
        inner.clock = Some(end);
        inner.timerdebt += elapsed;

        let Some(first_remain) = inner.timers.first().map(timer_remain) else {
            return Ok(());
        };

        let debt = inner.timerdebt.as_nanos() as i128;
        if debt < first_remain {
            return Ok(());
        }

        // Mass-subtract: apply debt to every timer uniformly (order is
        // preserved because it is a constant shift). `remain` is signed, so
        // a timer more overdue than its share of the debt goes negative by
        // the overshoot rather than clamping at zero -- `rearm_timer` folds
        // that overshoot into the timer's next interval instead of
        // discarding it (see its doc comment).
        for t in &inner.timers {
            if let Payload::Timer { remain, .. } = &t.payload {
                remain.set(remain.get() - debt);
            }
        }
        let split = inner.timers.partition_point(|t| timer_remain(t) <= 0);
        let fired: Vec<_> = inner.timers.drain(..split).collect();
        log::trace!(
            "timer debt {:?} expired {} of {} timers",
            inner.timerdebt,
            fired.len(),
            fired.len() + inner.timers.len()
        );
        inner.timerdebt = Duration::ZERO;
        for ev in fired {
            enqueue(&mut inner.dispatch_queue, ev);
        }

        Ok(())
    }
}

fn enqueue(queue: &mut VecDeque<Rc<EventState>>, ev: Rc<EventState>) {
    if !ev.queued.get() {
        ev.queued.set(true);
        queue.push_back(ev);
    }
}

fn timer_remain(ev: &Rc<EventState>) -> i128 {
    match &ev.payload {
        Payload::Timer { remain, .. } => remain.get(),
        _ => unreachable!("non-timer event in timer array"),
    }
}

/// Clamp a (possibly negative, post-overshoot) nanosecond count to a
/// non-negative `Duration` suitable for a backend wait timeout.
fn nanos_to_duration(nanos: i128) -> Duration {
    Duration::from_nanos(nanos.max(0) as u64)
}

/// Binary-search insert keeping the array sorted ascending by `remain`;
/// duplicates are allowed, inserted after any existing equal entries.
fn insert_timer(timers: &mut Vec<Rc<EventState>>, ev: Rc<EventState>) {
    let remain = timer_remain(&ev);
    let pos = timers.partition_point(|t| timer_remain(t) <= remain);
    timers.insert(pos, ev);
}

/// Binary-search to the first entry with a matching `remain`, then scan
/// forward among equal-`remain` entries for the exact identity.
fn remove_timer(timers: &mut Vec<Rc<EventState>>, ev: &Rc<EventState>) -> Result<()> {
    let remain = timer_remain(ev);
    let mut pos = timers.partition_point(|t| timer_remain(t) < remain);
    while pos < timers.len() && timer_remain(&timers[pos]) == remain {
        if Rc::ptr_eq(&timers[pos], ev) {
            timers.remove(pos);
            return Ok(());
        }
        pos += 1;
    }
    Err(error::invalid_argument())
}
