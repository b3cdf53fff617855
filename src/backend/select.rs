//! The portable fd-set multiplexer.
//!
//! Grounded directly on the source's `select` backend: two arrays of
//! attached events keyed by fd, a pair of fd bitmaps built up incrementally
//! as events attach, and a scratch copy handed to `select(2)` each
//! iteration so the live bitmaps survive the call. `libc::select` mutates
//! its fd-set and timeout arguments, so both are always copied before the
//! call.
//!
//! Real `libc::fd_set` is a fixed-size bitmap (`FD_SETSIZE` bits, normally
//! 1024). To honor the geometric-growth contract for arbitrarily large fds
//! the way the source does, this backend manages its own word-sized bitmap
//! storage and hands `select(2)` a raw pointer to it rather than using a
//! fixed-size `libc::fd_set` value.

use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{self, Result};
use crate::event::{EventKind, EventState};

use super::Backend;

/// Bits per word of the fd bitmap; matches the platform's `NFDBITS`.
const WORD_BITS: usize = 64;

#[derive(Default)]
struct FdBitmap(Vec<u64>);

impl FdBitmap {
    fn capacity_bits(&self) -> usize {
        self.0.len() * WORD_BITS
    }

    fn ensure_capacity(&mut self, fd: RawFd) {
        let needed = fd as usize + 1;
        if needed <= self.capacity_bits() {
            return;
        }
        let mut words = self.0.len().max(1);
        while words * WORD_BITS < needed {
            words *= 2;
        }
        self.0.resize(words, 0);
    }

    fn set(&mut self, fd: RawFd) {
        let (word, bit) = (fd as usize / WORD_BITS, fd as usize % WORD_BITS);
        self.0[word] |= 1u64 << bit;
    }

    fn clear(&mut self, fd: RawFd) {
        let (word, bit) = (fd as usize / WORD_BITS, fd as usize % WORD_BITS);
        if word < self.0.len() {
            self.0[word] &= !(1u64 << bit);
        }
    }

    fn is_set(&self, fd: RawFd) -> bool {
        let (word, bit) = (fd as usize / WORD_BITS, fd as usize % WORD_BITS);
        word < self.0.len() && (self.0[word] & (1u64 << bit)) != 0
    }

    fn as_select_ptr(&mut self, words_needed: usize) -> *mut libc::fd_set {
        if self.0.len() < words_needed {
            self.0.resize(words_needed, 0);
        }
        self.0.as_mut_ptr() as *mut libc::fd_set
    }
}

/// The portable fd-set backend, accepting read and write readiness events.
#[derive(Default)]
pub struct SelectBackend {
    maxfd: Option<RawFd>,
    readev: Vec<Option<Rc<EventState>>>,
    writeev: Vec<Option<Rc<EventState>>>,
    readset: FdBitmap,
    writeset: FdBitmap,
    readset_out: FdBitmap,
    writeset_out: FdBitmap,
}

impl SelectBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_array(&mut self, kind: EventKind) -> &mut Vec<Option<Rc<EventState>>> {
        match kind {
            EventKind::READ => &mut self.readev,
            EventKind::WRITE => &mut self.writeev,
            _ => unreachable!("select backend only accepts read/write events"),
        }
    }

    fn fd_set(&mut self, kind: EventKind) -> &mut FdBitmap {
        match kind {
            EventKind::READ => &mut self.readset,
            EventKind::WRITE => &mut self.writeset,
            _ => unreachable!("select backend only accepts read/write events"),
        }
    }

    fn ensure_room(&mut self, fd: RawFd) {
        let needed = fd as usize + 1;
        if self.readev.len() < needed {
            self.readev.resize_with(needed, || None);
        }
        if self.writeev.len() < needed {
            self.writeev.resize_with(needed, || None);
        }
        self.readset.ensure_capacity(fd);
        self.writeset.ensure_capacity(fd);
    }

    fn recompute_maxfd(&mut self) {
        let mut fd = self.maxfd;
        while let Some(f) = fd {
            if f < 0 {
                fd = None;
                break;
            }
            let occupied = self.readev.get(f as usize).map_or(false, Option::is_some)
                || self.writeev.get(f as usize).map_or(false, Option::is_some);
            if occupied {
                break;
            }
            fd = if f == 0 { None } else { Some(f - 1) };
        }
        self.maxfd = fd;
    }
}

impl Backend for SelectBackend {
    fn accepted_kinds(&self) -> EventKind {
        EventKind::READ | EventKind::WRITE
    }

    fn attach(&mut self, event: &Rc<EventState>) -> Result<()> {
        let kind = event.payload.kind();
        let fd = event
            .payload
            .fd()
            .expect("select backend only attaches fd-bearing events");

        self.ensure_room(fd);

        if self.slot_array(kind)[fd as usize].is_some() {
            return Err(error::busy());
        }

        self.slot_array(kind)[fd as usize] = Some(Rc::clone(event));
        self.fd_set(kind).set(fd);

        if self.maxfd.map_or(true, |m| fd > m) {
            self.maxfd = Some(fd);
        }

        Ok(())
    }

    fn detach(&mut self, event: &Rc<EventState>) -> Result<()> {
        let kind = event.payload.kind();
        let fd = event
            .payload
            .fd()
            .expect("select backend only attaches fd-bearing events");

        let occupant = self
            .slot_array(kind)
            .get(fd as usize)
            .and_then(|o| o.as_ref());
        match occupant {
            Some(occupant) if Rc::ptr_eq(occupant, event) => {}
            _ => return Err(error::invalid_argument()),
        }

        self.slot_array(kind)[fd as usize] = None;
        self.fd_set(kind).clear(fd);

        if self.maxfd == Some(fd) {
            self.recompute_maxfd();
        }

        Ok(())
    }

    fn go(
        &mut self,
        timeout: Option<Duration>,
        on_ready: &mut dyn FnMut(Rc<EventState>),
    ) -> Result<()> {
        let Some(maxfd) = self.maxfd else {
            // Nothing attached: nothing to wait for via select(2). A real
            // timeout is still honored by just sleeping it out, matching
            // "wait for the given timeout with no fds" being a valid call.
            if let Some(timeout) = timeout {
                std::thread::sleep(timeout);
            }
            return Ok(());
        };

        let words = (maxfd as usize / WORD_BITS) + 1;
        self.readset_out.0.clone_from(&self.readset.0);
        self.writeset_out.0.clone_from(&self.writeset.0);

        let mut tv = timeout.map(|t| libc::timeval {
            tv_sec: t.as_secs() as libc::time_t,
            tv_usec: t.subsec_micros() as libc::suseconds_t,
        });

        let n = unsafe {
            libc::select(
                maxfd + 1,
                self.readset_out.as_select_ptr(words),
                self.writeset_out.as_select_ptr(words),
                std::ptr::null_mut(),
                tv.as_mut()
                    .map_or(std::ptr::null_mut(), |tv| tv as *mut libc::timeval),
            )
        };

        if n < 0 {
            let err = std::io::Error::last_os_error();
            log::warn!("select(2) failed: {err}");
            return Err(err.into());
        }
        if n == 0 {
            return Ok(());
        }

        for fd in 0..=maxfd {
            if self.readset_out.is_set(fd) {
                if let Some(event) = self.readev[fd as usize].clone() {
                    on_ready(event);
                }
            }
            if self.writeset_out.is_set(fd) {
                if let Some(event) = self.writeev[fd as usize].clone() {
                    on_ready(event);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{self, EventOptions};
    use nix::unistd::{close, pipe, write};
    use std::cell::RefCell;

    #[test]
    fn readable_pipe_is_reported() {
        let (r, w) = pipe().unwrap();
        let mut backend = SelectBackend::new();

        let fired = Rc::new(RefCell::new(false));
        let fired2 = Rc::clone(&fired);
        let ev = event::read(r, EventOptions::empty(), Box::new(move |_| *fired2.borrow_mut() = true));

        backend.attach(&ev.0).unwrap();
        write(w, b"x").unwrap();

        backend
            .go(Some(Duration::from_millis(200)), &mut |e| {
                assert!(Rc::ptr_eq(&e, &ev.0));
            })
            .unwrap();

        close(w).unwrap();
        close(r).unwrap();
    }

    #[test]
    fn duplicate_attach_is_busy() {
        let (r, _w) = pipe().unwrap();
        let mut backend = SelectBackend::new();
        let ev1 = event::read(r, EventOptions::empty(), Box::new(|_| {}));
        let ev2 = event::read(r, EventOptions::empty(), Box::new(|_| {}));

        backend.attach(&ev1.0).unwrap();
        assert_eq!(
            backend.attach(&ev2.0).unwrap_err().errno(),
            nix::errno::Errno::EBUSY
        );
        close(r).unwrap();
    }

    #[test]
    fn maxfd_walks_down_after_detach() {
        let (r1, _w1) = pipe().unwrap();
        let (r2, _w2) = pipe().unwrap();
        let mut backend = SelectBackend::new();
        let ev1 = event::read(r1, EventOptions::empty(), Box::new(|_| {}));
        let ev2 = event::read(r2, EventOptions::empty(), Box::new(|_| {}));

        backend.attach(&ev1.0).unwrap();
        backend.attach(&ev2.0).unwrap();
        let hi = r1.max(r2);
        assert_eq!(backend.maxfd, Some(hi));

        backend.detach(&ev2.0).unwrap();
        if hi == r2 {
            assert!(backend.maxfd.unwrap() <= r1);
        }
        close(r1).unwrap();
        close(r2).unwrap();
    }
}
