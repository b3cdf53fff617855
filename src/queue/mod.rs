//! Abstract datagram queue interface and its composable decorators.

pub mod limit;
pub mod rate;
pub mod socket;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::event::{Callback, Event, EventOptions};
use crate::reactor::Reactor;
use std::io::{IoSlice, IoSliceMut};

/// A process-wide parameter identity. Two tags are the same parameter iff
/// they are the same `&'static` instance (pointer identity), not merely
/// equal names -- this mirrors the source's use of a parameter struct's own
/// address as its key.
#[derive(Debug)]
pub struct ParamTag(pub &'static str);

impl ParamTag {
    pub fn is(&'static self, other: &'static ParamTag) -> bool {
        std::ptr::eq(self, other)
    }
}

/// The value carried by a `get`/`set` call. Most parameters are plain
/// integers (booleans, rates, TTLs); `mcast_join`/`mcast_leave` instead
/// carry an endpoint naming the multicast group.
#[derive(Clone, Debug)]
pub enum ParamValue {
    Int(u64),
    Endpoint(Endpoint),
}

impl ParamValue {
    pub fn as_int(&self) -> Result<u64> {
        match self {
            ParamValue::Int(v) => Ok(*v),
            ParamValue::Endpoint(_) => Err(crate::error::invalid_argument()),
        }
    }

    pub fn as_endpoint(&self) -> Result<&Endpoint> {
        match self {
            ParamValue::Endpoint(e) => Ok(e),
            ParamValue::Int(_) => Err(crate::error::invalid_argument()),
        }
    }
}

/// A datagram queue: `send`/`recv` plus readiness-event factories and a
/// parameter get/set protocol. Concrete queues (and decorators wrapping
/// them) implement this directly rather than through a hand-built vtable.
pub trait Queue {
    /// Largest single datagram this queue can send. The default is
    /// "effectively infinite" for queues with no natural limit.
    fn maxsize(&self) -> Result<i64> {
        Ok(i64::MAX)
    }

    /// Bytes available in the next readable datagram. Must never
    /// over-report.
    fn nextsize(&self) -> Result<usize>;

    /// Gather-send to `to`, or this queue's default peer if `None`.
    /// Returns the number of bytes sent.
    fn send(&self, bufs: &[IoSlice<'_>], to: Option<&Endpoint>) -> Result<usize>;

    /// Scatter-receive. If `from` is `Some`, the sender's endpoint is
    /// written there.
    fn recv(&self, bufs: &mut [IoSliceMut<'_>], from: Option<&mut Option<Endpoint>>) -> Result<usize>;

    /// Peek `nextsize`, allocate exactly that many bytes, then receive into
    /// them. On failure the partial allocation is discarded.
    fn recv_allocating(&self, from: Option<&mut Option<Endpoint>>) -> Result<Vec<u8>> {
        let size = self.nextsize()?;
        let mut buf = vec![0u8; size];
        let n = {
            let mut slices = [IoSliceMut::new(&mut buf)];
            self.recv(&mut slices, from)?
        };
        buf.truncate(n);
        Ok(buf)
    }

    /// An event that fires when this queue becomes writable.
    fn send_event(&self, options: EventOptions, callback: Callback) -> Result<Event>;
    /// An event that fires when this queue becomes readable.
    fn recv_event(&self, options: EventOptions, callback: Callback) -> Result<Event>;

    fn get(&self, param: &'static ParamTag) -> Result<ParamValue>;
    fn set(&self, param: &'static ParamTag, value: ParamValue) -> Result<()>;

    /// Attach whatever events this queue (or, for a decorator, its base
    /// queue and its own housekeeping events) needs on `reactor`.
    fn attach(&self, reactor: &Reactor) -> Result<()>;
    /// The inverse of `attach`.
    fn detach(&self) -> Result<()>;
}
