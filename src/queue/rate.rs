//! Per-second throughput observer: a read-only decorator that reports last
//! second's byte counts without affecting the base queue's behavior.

use std::cell::Cell;
use std::io::{IoSlice, IoSliceMut};
use std::rc::Rc;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::{self, Result};
use crate::event::{self, Callback, Event, EventOptions};
use crate::queue::{ParamTag, ParamValue, Queue};
use crate::reactor::Reactor;
use std::cell::RefCell;

pub static RATE_SEND: ParamTag = ParamTag("rate_send");
pub static RATE_RECV: ParamTag = ParamTag("rate_recv");

struct Inner<Q> {
    base: Q,
    send_bytes: Cell<u64>,
    recv_bytes: Cell<u64>,
    send_rate: Cell<u64>,
    recv_rate: Cell<u64>,
    timer: RefCell<Option<Event>>,
}

/// A queue decorator that counts bytes sent/received per second.
pub struct RateObserver<Q>(Rc<Inner<Q>>);

impl<Q: Queue + 'static> RateObserver<Q> {
    pub fn new(base: Q) -> RateObserver<Q> {
        RateObserver(Rc::new(Inner {
            base,
            send_bytes: Cell::new(0),
            recv_bytes: Cell::new(0),
            send_rate: Cell::new(0),
            recv_rate: Cell::new(0),
            timer: RefCell::new(None),
        }))
    }
}

impl<Q: Queue + 'static> Queue for RateObserver<Q> {
    fn maxsize(&self) -> Result<i64> {
        self.0.base.maxsize()
    }

    fn nextsize(&self) -> Result<usize> {
        self.0.base.nextsize()
    }

    fn send(&self, bufs: &[IoSlice<'_>], to: Option<&Endpoint>) -> Result<usize> {
        let n = self.0.base.send(bufs, to)?;
        self.0.send_bytes.set(self.0.send_bytes.get() + n as u64);
        Ok(n)
    }

    fn recv(
        &self,
        bufs: &mut [IoSliceMut<'_>],
        from: Option<&mut Option<Endpoint>>,
    ) -> Result<usize> {
        let n = self.0.base.recv(bufs, from)?;
        self.0.recv_bytes.set(self.0.recv_bytes.get() + n as u64);
        Ok(n)
    }

    fn send_event(&self, options: EventOptions, callback: Callback) -> Result<Event> {
        self.0.base.send_event(options, callback)
    }

    fn recv_event(&self, options: EventOptions, callback: Callback) -> Result<Event> {
        self.0.base.recv_event(options, callback)
    }

    fn get(&self, param: &'static ParamTag) -> Result<ParamValue> {
        if param.is(&RATE_SEND) {
            Ok(ParamValue::Int(self.0.send_rate.get()))
        } else if param.is(&RATE_RECV) {
            Ok(ParamValue::Int(self.0.recv_rate.get()))
        } else {
            self.0.base.get(param)
        }
    }

    fn set(&self, param: &'static ParamTag, value: ParamValue) -> Result<()> {
        if param.is(&RATE_SEND) || param.is(&RATE_RECV) {
            Err(error::not_permitted())
        } else {
            self.0.base.set(param, value)
        }
    }

    fn attach(&self, reactor: &Reactor) -> Result<()> {
        self.0.base.attach(reactor)?;

        let weak = Rc::downgrade(&self.0);
        let ev = event::timer(
            Duration::from_secs(1),
            EventOptions::empty(),
            Box::new(move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.send_rate.set(inner.send_bytes.replace(0));
                    inner.recv_rate.set(inner.recv_bytes.replace(0));
                }
            }),
        );
        reactor.attach(&ev)?;
        *self.0.timer.borrow_mut() = Some(ev);
        Ok(())
    }

    fn detach(&self) -> Result<()> {
        if let Some(ev) = self.0.timer.borrow_mut().take() {
            let _ = ev.detach();
        }
        self.0.base.detach()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::select::SelectBackend;
    use std::collections::VecDeque;

    struct MockQueue {
        inbox: RefCell<VecDeque<Vec<u8>>>,
    }

    impl Queue for MockQueue {
        fn nextsize(&self) -> Result<usize> {
            Ok(self.inbox.borrow().front().map_or(0, Vec::len))
        }

        fn send(&self, bufs: &[IoSlice<'_>], _to: Option<&Endpoint>) -> Result<usize> {
            Ok(bufs.iter().map(|b| b.len()).sum())
        }

        fn recv(
            &self,
            bufs: &mut [IoSliceMut<'_>],
            _from: Option<&mut Option<Endpoint>>,
        ) -> Result<usize> {
            let msg = self.inbox.borrow_mut().pop_front().unwrap_or_default();
            let n = bufs[0].len().min(msg.len());
            bufs[0][..n].copy_from_slice(&msg[..n]);
            Ok(n)
        }

        fn send_event(&self, options: EventOptions, callback: Callback) -> Result<Event> {
            Ok(event::flag(Rc::new(Cell::new(false)), options, callback))
        }

        fn recv_event(&self, options: EventOptions, callback: Callback) -> Result<Event> {
            Ok(event::flag(Rc::new(Cell::new(false)), options, callback))
        }

        fn get(&self, _param: &'static ParamTag) -> Result<ParamValue> {
            Err(error::not_supported())
        }

        fn set(&self, _param: &'static ParamTag, _value: ParamValue) -> Result<()> {
            Err(error::not_supported())
        }

        fn attach(&self, _reactor: &Reactor) -> Result<()> {
            Ok(())
        }

        fn detach(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn counts_accumulate_before_first_tick() {
        let observer = RateObserver::new(MockQueue {
            inbox: RefCell::new(VecDeque::new()),
        });
        let reactor = Reactor::new(Box::new(SelectBackend::new()));
        observer.attach(&reactor).unwrap();

        observer.send(&[IoSlice::new(b"hello")], None).unwrap();
        observer.send(&[IoSlice::new(b"world!")], None).unwrap();

        assert_eq!(observer.0.send_bytes.get(), 11);
        assert_eq!(observer.get(&RATE_SEND).unwrap().as_int().unwrap(), 0);
    }

    #[test]
    fn setting_a_rate_parameter_is_rejected() {
        let observer = RateObserver::new(MockQueue {
            inbox: RefCell::new(VecDeque::new()),
        });
        let err = observer.set(&RATE_SEND, ParamValue::Int(1)).unwrap_err();
        assert_eq!(err.errno(), nix::errno::Errno::EPERM);
    }
}
