//! Per-second rate limiter: gates a base queue's readiness behind a byte
//! budget, exposed to callers as a flag-event rather than a real fd.
//!
//! Grounded on the source's `queue_limit` decorator: a quota per direction,
//! refilled once a second, a "ready" boolean cleared on every successful
//! send/recv, and a trigger step that re-subscribes to the base queue's own
//! readiness only while the quota still allows it.

use std::cell::{Cell, RefCell};
use std::io::{IoSlice, IoSliceMut};
use std::rc::Rc;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::event::{self, Callback, Event, EventOptions};
use crate::queue::{ParamTag, ParamValue, Queue};
use crate::reactor::Reactor;

pub static LIMIT_SEND: ParamTag = ParamTag("limit_send");
pub static LIMIT_RECV: ParamTag = ParamTag("limit_recv");

const DEFAULT_WATERMARK: u64 = 1;

struct Direction {
    rate: Cell<u64>,
    quota: Cell<u64>,
    ready: Rc<Cell<bool>>,
    base_event: RefCell<Option<Event>>,
}

impl Direction {
    fn new() -> Direction {
        Direction {
            rate: Cell::new(0),
            quota: Cell::new(0),
            ready: Rc::new(Cell::new(false)),
            base_event: RefCell::new(None),
        }
    }
}

struct Inner<Q> {
    base: Q,
    send: Direction,
    recv: Direction,
    watermark: u64,
    timer: RefCell<Option<Event>>,
    reactor: RefCell<Option<Reactor>>,
}

/// A queue decorator that enforces a per-second byte budget in each
/// direction, wrapping any concrete or decorated base queue.
pub struct RateLimiter<Q>(Rc<Inner<Q>>);

impl<Q: Queue + 'static> RateLimiter<Q> {
    pub fn new(base: Q) -> RateLimiter<Q> {
        RateLimiter(Rc::new(Inner {
            base,
            send: Direction::new(),
            recv: Direction::new(),
            watermark: DEFAULT_WATERMARK,
            timer: RefCell::new(None),
            reactor: RefCell::new(None),
        }))
    }

    fn consume(dir: &Direction, n: usize) {
        let spent = (n as u64).min(dir.quota.get());
        dir.quota.set(dir.quota.get() - spent);
        dir.ready.set(false);
    }

    /// Attach (or detach) the base queue's own readiness event for one
    /// direction, depending on whether the quota currently allows progress.
    /// The base event is one-shot: once it fires it only sets `ready` and
    /// drops itself, so a stalled direction never spins on fd readiness.
    fn trigger(inner: &Rc<Inner<Q>>, is_send: bool) -> Result<()> {
        let dir = if is_send { &inner.send } else { &inner.recv };
        let allowed = dir.rate.get() == 0 || dir.quota.get() >= inner.watermark;

        let mut base_event = dir.base_event.borrow_mut();
        if !allowed {
            if let Some(ev) = base_event.take() {
                let _ = ev.detach();
            }
            return Ok(());
        }
        if base_event.is_some() {
            return Ok(());
        }

        let Some(reactor) = inner.reactor.borrow().clone() else {
            return Ok(());
        };

        let weak = Rc::downgrade(inner);
        let ev = if is_send {
            inner.base.send_event(
                EventOptions::ONCE,
                Box::new(move |_| {
                    if let Some(inner) = weak.upgrade() {
                        inner.send.ready.set(true);
                        *inner.send.base_event.borrow_mut() = None;
                    }
                }),
            )?
        } else {
            inner.base.recv_event(
                EventOptions::ONCE,
                Box::new(move |_| {
                    if let Some(inner) = weak.upgrade() {
                        inner.recv.ready.set(true);
                        *inner.recv.base_event.borrow_mut() = None;
                    }
                }),
            )?
        };

        reactor.attach(&ev)?;
        *base_event = Some(ev);
        Ok(())
    }

    fn sync_timer(inner: &Rc<Inner<Q>>) -> Result<()> {
        let need_timer = inner.send.rate.get() > 0 || inner.recv.rate.get() > 0;
        let mut timer = inner.timer.borrow_mut();

        if need_timer && timer.is_none() {
            let Some(reactor) = inner.reactor.borrow().clone() else {
                return Ok(());
            };
            let weak = Rc::downgrade(inner);
            let ev = event::timer(
                Duration::from_secs(1),
                EventOptions::empty(),
                Box::new(move |_| {
                    if let Some(inner) = weak.upgrade() {
                        Self::on_timer_tick(&inner);
                    }
                }),
            );
            reactor.attach(&ev)?;
            *timer = Some(ev);
        } else if !need_timer {
            if let Some(ev) = timer.take() {
                let _ = ev.detach();
            }
        }
        Ok(())
    }

    /// A fresh second: each rate-limited direction's quota resets to its
    /// configured rate (not an accumulating add -- a direction that spent
    /// its whole quota and one that spent none both start the new second
    /// even), then each direction is re-triggered.
    fn on_timer_tick(inner: &Rc<Inner<Q>>) {
        if inner.send.rate.get() > 0 {
            inner.send.quota.set(inner.send.rate.get());
        }
        if inner.recv.rate.get() > 0 {
            inner.recv.quota.set(inner.recv.rate.get());
        }
        let _ = Self::trigger(inner, true);
        let _ = Self::trigger(inner, false);
    }

    fn start(inner: &Rc<Inner<Q>>, is_send: bool, rate: u64) -> Result<()> {
        {
            let dir = if is_send { &inner.send } else { &inner.recv };
            if let Some(ev) = dir.base_event.borrow_mut().take() {
                let _ = ev.detach();
            }
            dir.rate.set(rate);
            dir.quota.set(rate);
            dir.ready.set(false);
        }
        Self::sync_timer(inner)?;
        Self::trigger(inner, is_send)
    }

    #[cfg(test)]
    fn send_ready(&self) -> bool {
        self.0.send.ready.get()
    }

    #[cfg(test)]
    fn simulate_tick(&self) {
        Self::on_timer_tick(&self.0)
    }
}

impl<Q: Queue + 'static> Queue for RateLimiter<Q> {
    fn maxsize(&self) -> Result<i64> {
        self.0.base.maxsize()
    }

    fn nextsize(&self) -> Result<usize> {
        self.0.base.nextsize()
    }

    fn send(&self, bufs: &[IoSlice<'_>], to: Option<&Endpoint>) -> Result<usize> {
        let n = self.0.base.send(bufs, to)?;
        Self::consume(&self.0.send, n);
        let _ = Self::trigger(&self.0, true);
        Ok(n)
    }

    fn recv(
        &self,
        bufs: &mut [IoSliceMut<'_>],
        from: Option<&mut Option<Endpoint>>,
    ) -> Result<usize> {
        let n = self.0.base.recv(bufs, from)?;
        Self::consume(&self.0.recv, n);
        let _ = Self::trigger(&self.0, false);
        Ok(n)
    }

    fn send_event(&self, options: EventOptions, callback: Callback) -> Result<Event> {
        Ok(event::flag(Rc::clone(&self.0.send.ready), options, callback))
    }

    fn recv_event(&self, options: EventOptions, callback: Callback) -> Result<Event> {
        Ok(event::flag(Rc::clone(&self.0.recv.ready), options, callback))
    }

    fn get(&self, param: &'static ParamTag) -> Result<ParamValue> {
        if param.is(&LIMIT_SEND) {
            Ok(ParamValue::Int(self.0.send.rate.get()))
        } else if param.is(&LIMIT_RECV) {
            Ok(ParamValue::Int(self.0.recv.rate.get()))
        } else {
            self.0.base.get(param)
        }
    }

    fn set(&self, param: &'static ParamTag, value: ParamValue) -> Result<()> {
        if param.is(&LIMIT_SEND) {
            Self::start(&self.0, true, value.as_int()?)
        } else if param.is(&LIMIT_RECV) {
            Self::start(&self.0, false, value.as_int()?)
        } else {
            self.0.base.set(param, value)
        }
    }

    fn attach(&self, reactor: &Reactor) -> Result<()> {
        self.0.base.attach(reactor)?;
        *self.0.reactor.borrow_mut() = Some(reactor.clone());
        Self::sync_timer(&self.0)?;
        Self::trigger(&self.0, true)?;
        Self::trigger(&self.0, false)?;
        Ok(())
    }

    fn detach(&self) -> Result<()> {
        if let Some(ev) = self.0.timer.borrow_mut().take() {
            let _ = ev.detach();
        }
        if let Some(ev) = self.0.send.base_event.borrow_mut().take() {
            let _ = ev.detach();
        }
        if let Some(ev) = self.0.recv.base_event.borrow_mut().take() {
            let _ = ev.detach();
        }
        *self.0.reactor.borrow_mut() = None;
        self.0.base.detach()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// An in-memory queue with no fd, reactor-free, for exercising quota
    /// arithmetic in isolation.
    struct MockQueue {
        sent: RefCell<Vec<Vec<u8>>>,
        inbox: RefCell<VecDeque<Vec<u8>>>,
    }

    impl Queue for MockQueue {
        fn nextsize(&self) -> Result<usize> {
            Ok(self.inbox.borrow().front().map_or(0, Vec::len))
        }

        fn send(&self, bufs: &[IoSlice<'_>], _to: Option<&Endpoint>) -> Result<usize> {
            let mut total = 0;
            let mut buf = Vec::new();
            for b in bufs {
                buf.extend_from_slice(b);
                total += b.len();
            }
            self.sent.borrow_mut().push(buf);
            Ok(total)
        }

        fn recv(
            &self,
            bufs: &mut [IoSliceMut<'_>],
            _from: Option<&mut Option<Endpoint>>,
        ) -> Result<usize> {
            let msg = self.inbox.borrow_mut().pop_front().unwrap_or_default();
            let mut written = 0;
            for b in bufs.iter_mut() {
                let n = b.len().min(msg.len() - written);
                b[..n].copy_from_slice(&msg[written..written + n]);
                written += n;
            }
            Ok(written)
        }

        fn send_event(&self, options: EventOptions, callback: Callback) -> Result<Event> {
            Ok(event::flag(Rc::new(Cell::new(false)), options, callback))
        }

        fn recv_event(&self, options: EventOptions, callback: Callback) -> Result<Event> {
            Ok(event::flag(Rc::new(Cell::new(false)), options, callback))
        }

        fn get(&self, _param: &'static ParamTag) -> Result<ParamValue> {
            Err(crate::error::not_supported())
        }

        fn set(&self, _param: &'static ParamTag, _value: ParamValue) -> Result<()> {
            Err(crate::error::not_supported())
        }

        fn attach(&self, _reactor: &Reactor) -> Result<()> {
            Ok(())
        }

        fn detach(&self) -> Result<()> {
            Ok(())
        }
    }

    fn mock() -> MockQueue {
        MockQueue {
            sent: RefCell::new(Vec::new()),
            inbox: RefCell::new(VecDeque::new()),
        }
    }

    #[test]
    fn quota_depletes_and_refills_on_tick() {
        let limiter = RateLimiter::new(mock());
        limiter.set(&LIMIT_SEND, ParamValue::Int(1000)).unwrap();

        let payload = vec![0u8; 400];
        limiter.send(&[IoSlice::new(&payload)], None).unwrap();
        assert_eq!(limiter.0.send.quota.get(), 600);

        limiter.send(&[IoSlice::new(&payload)], None).unwrap();
        assert_eq!(limiter.0.send.quota.get(), 200);

        // No reactor was ever attached, so nothing re-arms `ready` between
        // sends: the third datagram's caller would see it false right now.
        assert!(!limiter.send_ready());

        limiter.simulate_tick();
        assert_eq!(limiter.0.send.quota.get(), 1000);
    }

    #[test]
    fn get_returns_configured_rate() {
        let limiter = RateLimiter::new(mock());
        limiter.set(&LIMIT_RECV, ParamValue::Int(2000)).unwrap();
        assert_eq!(limiter.get(&LIMIT_RECV).unwrap().as_int().unwrap(), 2000);
    }

    #[test]
    fn unknown_param_passes_through_to_base() {
        let limiter = RateLimiter::new(mock());
        assert!(limiter.get(&super::super::socket::V6ONLY).is_err());
    }
}
