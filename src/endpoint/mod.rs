//! Reference-counted, polymorphic address values.
//!
//! The only concrete flavor this crate ships is the socket endpoint (IPv4,
//! IPv6, or a local/Unix path), represented by [`socket::SockaddrStorage`].
//! The public [`Endpoint`] type plays the role the source's vtable-per-kind
//! endpoint hierarchy played: `format`/`equals`/`compare`/`convert` are
//! expressed generically so that a second endpoint family could be added
//! later without touching callers, even though today every endpoint is
//! socket-flavored.
//!
//! Reference counting is `Rc`-based rather than a hand-rolled
//! retain/release pair: `Clone` is retain, `Drop` is release, and
//! `Rc::strong_count` is the refcount. This is the idiomatic substitute for
//! the manual scheme described for the reactor this crate is modeled on.

pub mod socket;

use crate::error::{self, Result};
use socket::SockaddrStorage;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::net::Ipv4Addr;
use std::rc::Rc;

/// A reference-counted address value.
///
/// Cloning an `Endpoint` is cheap (an `Rc` bump) and is the retain
/// operation; the last clone being dropped is the release that frees the
/// cached formatted string and the address payload.
#[derive(Clone)]
pub struct Endpoint(Rc<Inner>);

struct Inner {
    addr: SockaddrStorage,
    formatted: RefCell<Option<Rc<str>>>,
}

impl Endpoint {
    /// Wrap a socket address as an endpoint. This is the only allocation
    /// path: there is no generic "zero-initialised, vtable-assigned" block
    /// to build up field by field, since Rust can construct the payload in
    /// one shot.
    pub fn from_sockaddr(addr: SockaddrStorage) -> Endpoint {
        Endpoint(Rc::new(Inner {
            addr,
            formatted: RefCell::new(None),
        }))
    }

    pub fn sockaddr(&self) -> &SockaddrStorage {
        &self.0.addr
    }

    /// Lazily memoize the textual form. The first call computes and caches
    /// it; later calls clone the cached `Rc<str>` handle.
    pub fn format(&self) -> Result<Rc<str>> {
        if let Some(cached) = self.0.formatted.borrow().as_ref() {
            return Ok(Rc::clone(cached));
        }

        let text = format_sockaddr(&self.0.addr)?;
        let text: Rc<str> = Rc::from(text);
        *self.0.formatted.borrow_mut() = Some(Rc::clone(&text));
        Ok(text)
    }

    /// Every endpoint this crate produces is already socket-flavored, so
    /// converting one always succeeds and is equivalent to retaining it. A
    /// second endpoint family would instead attempt a real conversion here
    /// and fail with `EAFNOSUPPORT` when it cannot produce a socket
    /// address (for example, there is no address family to fall back on).
    pub fn convert_to_socket(&self) -> Result<Endpoint> {
        Ok(self.clone())
    }

    /// True if pointer-identical or, failing that, if the underlying
    /// addresses compare equal.
    pub fn equals(&self, other: &Endpoint) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.compare(other) == Ordering::Equal
    }

    /// Order by address family, then by raw address bytes, then by port
    /// (host order) for IP variants; local endpoints order by path bytes.
    pub fn compare(&self, other: &Endpoint) -> Ordering {
        compare_sockaddr(&self.0.addr, &other.0.addr)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Endpoint").field(&self.0.addr).finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.format() {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "<unformattable endpoint>"),
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}
impl Eq for Endpoint {}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}
impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

/// Textual form: `d.d.d.d:p` for IPv4, `[x:x:...:x]:p` for IPv6, and
/// `unix:<path>` for local addresses.
fn format_sockaddr(addr: &SockaddrStorage) -> Result<String> {
    if let Some(inet) = addr.as_inet() {
        let ip = Ipv4Addr::from(inet.ip());
        return Ok(format!("{}:{}", ip, inet.port()));
    }
    if let Some(inet6) = addr.as_inet6() {
        return Ok(format!("[{}]:{}", inet6.ip(), inet6.port()));
    }
    if let Some(unix) = addr.as_unix() {
        let path = unix
            .as_path()
            .map(|p| p.to_string_lossy().into_owned())
            .or_else(|| {
                unix.as_abstract()
                    .map(|n| format!("@{}", String::from_utf8_lossy(n)))
            })
            .unwrap_or_default();
        return Ok(format!("unix:{path}"));
    }
    Err(error::invalid_argument())
}

/// Order first by address family (a fixed, stable discriminant order
/// standing in for the source's vtable-identity comparison), then delegate
/// within a family.
fn compare_sockaddr(a: &SockaddrStorage, b: &SockaddrStorage) -> Ordering {
    let rank = |s: &SockaddrStorage| -> u8 {
        if s.as_inet().is_some() {
            0
        } else if s.as_inet6().is_some() {
            1
        } else {
            2
        }
    };

    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => {}
        other => return other,
    }

    // Address bytes rank ahead of port: endpoints on the same host sort
    // together regardless of port, matching the documented ordering
    // example (10.0.0.1:80, 10.0.0.1:443, 10.0.0.2:1).
    if let (Some(a), Some(b)) = (a.as_inet(), b.as_inet()) {
        return a.ip().cmp(&b.ip()).then_with(|| a.port().cmp(&b.port()));
    }
    if let (Some(a), Some(b)) = (a.as_inet6(), b.as_inet6()) {
        return a
            .ip()
            .octets()
            .cmp(&b.ip().octets())
            .then_with(|| a.port().cmp(&b.port()));
    }
    if let (Some(a), Some(b)) = (a.as_unix(), b.as_unix()) {
        let a_bytes = a.as_path().map(|c| c.to_bytes()).or_else(|| a.as_abstract());
        let b_bytes = b.as_path().map(|c| c.to_bytes()).or_else(|| b.as_abstract());
        return a_bytes.cmp(&b_bytes);
    }

    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::socket::SockaddrIn;

    fn ep(ip: [u8; 4], port: u16) -> Endpoint {
        let addr = SockaddrIn::new(ip[0], ip[1], ip[2], ip[3], port);
        Endpoint::from_sockaddr(SockaddrStorage::from_inet(&addr))
    }

    #[test]
    fn format_ipv4() {
        let e = ep([127, 0, 0, 1], 9000);
        assert_eq!(e.format().unwrap().as_ref(), "127.0.0.1:9000");
    }

    #[test]
    fn format_is_memoized() {
        let e = ep([127, 0, 0, 1], 9000);
        let a = e.format().unwrap();
        let b = e.format().unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn retain_release_via_clone_drop() {
        let e = ep([10, 0, 0, 1], 80);
        let inner = Rc::clone(&e.0);
        assert_eq!(Rc::strong_count(&inner), 2);
        let e2 = e.clone();
        assert_eq!(Rc::strong_count(&inner), 3);
        drop(e2);
        assert_eq!(Rc::strong_count(&inner), 2);
        drop(inner);
        assert_eq!(Rc::strong_count(&e.0), 1);
    }

    #[test]
    fn endpoint_ordering() {
        let mut v = vec![ep([10, 0, 0, 1], 80), ep([10, 0, 0, 2], 1), ep([10, 0, 0, 1], 443)];
        v.sort();
        let formatted: Vec<String> = v.iter().map(|e| e.format().unwrap().to_string()).collect();
        assert_eq!(
            formatted,
            vec!["10.0.0.1:80", "10.0.0.1:443", "10.0.0.2:1"]
        );
    }

    #[test]
    fn equals_matches_compare_equal() {
        let a = ep([127, 0, 0, 1], 1234);
        let b = ep([127, 0, 0, 1], 1234);
        assert!(a.equals(&b));
        assert_eq!(a.compare(&b), Ordering::Equal);
    }
}
