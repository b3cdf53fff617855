//! A concrete datagram queue over a connectionless socket: IPv4, IPv6, or a
//! local (Unix) datagram socket.

use std::io::{IoSlice, IoSliceMut};
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::socket::{sockopt, socket, AddressFamily, SockFlag, SockType};

use crate::endpoint::socket::SockaddrStorage;
use crate::endpoint::Endpoint;
use crate::error::{self, Result};
use crate::event::{self, Callback, Event, EventOptions};
use crate::queue::{ParamTag, ParamValue, Queue};
use crate::reactor::Reactor;

pub static V6ONLY: ParamTag = ParamTag("socket_v6only");
pub static MCAST_HOPS: ParamTag = ParamTag("socket_mcast_hops");
pub static REUSELOCAL: ParamTag = ParamTag("socket_reuselocal");
pub static MCAST_JOIN: ParamTag = ParamTag("mcast_join");
pub static MCAST_LEAVE: ParamTag = ParamTag("mcast_leave");
pub static MCAST_LOOP: ParamTag = ParamTag("mcast_loop");

/// A datagram socket queue.
pub struct SocketQueue {
    fd: OwnedFd,
    family: AddressFamily,
    connected: bool,
}

impl SocketQueue {
    /// Build a queue over a fresh datagram socket.
    ///
    /// `to`/`from` are converted to socket-flavored endpoints first (this
    /// is where a non-socket endpoint would fail with `EAFNOSUPPORT`); the
    /// address family is derived from whichever of them is present when
    /// `af` is `None`. Each `init_params` entry is applied, in order,
    /// before binding or connecting, so options like `v6only` take effect
    /// before the socket has an address.
    pub fn allocate(
        af: Option<AddressFamily>,
        to: Option<&Endpoint>,
        from: Option<&Endpoint>,
        init_params: &[(&'static ParamTag, ParamValue)],
    ) -> Result<SocketQueue> {
        let to = to.map(Endpoint::convert_to_socket).transpose()?;
        let from = from.map(Endpoint::convert_to_socket).transpose()?;

        let af = af
            .or_else(|| to.as_ref().and_then(|e| e.sockaddr().family()))
            .or_else(|| from.as_ref().and_then(|e| e.sockaddr().family()))
            .ok_or_else(error::invalid_argument)?;

        let fd = socket(af, SockType::Datagram, SockFlag::SOCK_CLOEXEC, None)?;
        let mut queue = SocketQueue {
            fd,
            family: af,
            connected: false,
        };

        for (tag, value) in init_params {
            queue.set(*tag, value.clone())?;
        }

        if let Some(from) = &from {
            bind_raw(queue.fd.as_raw_fd(), from.sockaddr())?;
        }

        if let Some(to) = &to {
            connect_raw(queue.fd.as_raw_fd(), to.sockaddr())?;
            queue.connected = true;
        }

        log::debug!(
            "allocated {af:?} datagram socket queue on fd {} (bound={}, connected={})",
            queue.fd(),
            from.is_some(),
            queue.connected
        );

        Ok(queue)
    }

    fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

fn bind_raw(fd: RawFd, addr: &SockaddrStorage) -> Result<()> {
    let (ptr, len) = addr.as_ptr();
    let rc = unsafe { libc::bind(fd, ptr as *const libc::sockaddr, len) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

fn connect_raw(fd: RawFd, addr: &SockaddrStorage) -> Result<()> {
    let (ptr, len) = addr.as_ptr();
    let rc = unsafe { libc::connect(fd, ptr as *const libc::sockaddr, len) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

impl Queue for SocketQueue {
    fn maxsize(&self) -> Result<i64> {
        let size = nix::sys::socket::getsockopt(&self.fd, sockopt::SndBuf)?;
        Ok(size as i64)
    }

    fn nextsize(&self) -> Result<usize> {
        let mut available: libc::c_int = 0;
        let rc = unsafe { libc::ioctl(self.fd(), libc::FIONREAD, &mut available) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(available.max(0) as usize)
    }

    fn send(&self, bufs: &[IoSlice<'_>], to: Option<&Endpoint>) -> Result<usize> {
        let to = to.map(Endpoint::convert_to_socket).transpose()?;

        let iov: Vec<libc::iovec> = bufs
            .iter()
            .map(|b| libc::iovec {
                iov_base: b.as_ptr() as *mut libc::c_void,
                iov_len: b.len(),
            })
            .collect();

        let (name_ptr, name_len) = match &to {
            Some(to) => {
                let (ptr, len) = to.sockaddr().as_ptr();
                (ptr as *mut libc::c_void, len)
            }
            None => (std::ptr::null_mut(), 0),
        };

        let hdr = libc::msghdr {
            msg_name: name_ptr,
            msg_namelen: name_len,
            msg_iov: iov.as_ptr() as *mut libc::iovec,
            msg_iovlen: iov.len() as _,
            msg_control: std::ptr::null_mut(),
            msg_controllen: 0,
            msg_flags: 0,
        };

        let n = unsafe { libc::sendmsg(self.fd(), &hdr, 0) };
        if n < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(n as usize)
    }

    fn recv(
        &self,
        bufs: &mut [IoSliceMut<'_>],
        from: Option<&mut Option<Endpoint>>,
    ) -> Result<usize> {
        let mut storage: MaybeUninit<libc::sockaddr_storage> = MaybeUninit::zeroed();

        let mut iov: Vec<libc::iovec> = bufs
            .iter_mut()
            .map(|b| libc::iovec {
                iov_base: b.as_mut_ptr() as *mut libc::c_void,
                iov_len: b.len(),
            })
            .collect();

        let mut hdr = libc::msghdr {
            msg_name: storage.as_mut_ptr() as *mut libc::c_void,
            msg_namelen: std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
            msg_iov: iov.as_mut_ptr(),
            msg_iovlen: iov.len() as _,
            msg_control: std::ptr::null_mut(),
            msg_controllen: 0,
            msg_flags: 0,
        };

        let n = unsafe { libc::recvmsg(self.fd(), &mut hdr, 0) };
        if n < 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        if let Some(from) = from {
            let addr = unsafe {
                SockaddrStorage::from_ptr(
                    storage.as_ptr() as *const MaybeUninit<u8>,
                    hdr.msg_namelen,
                )
            };
            *from = addr.map(Endpoint::from_sockaddr);
        }

        Ok(n as usize)
    }

    fn send_event(&self, options: EventOptions, callback: Callback) -> Result<Event> {
        Ok(event::write(self.fd(), options, callback))
    }

    fn recv_event(&self, options: EventOptions, callback: Callback) -> Result<Event> {
        Ok(event::read(self.fd(), options, callback))
    }

    fn get(&self, param: &'static ParamTag) -> Result<ParamValue> {
        if param.is(&V6ONLY) {
            let v = nix::sys::socket::getsockopt(&self.fd, sockopt::Ipv6V6Only)?;
            Ok(ParamValue::Int(v as u64))
        } else if param.is(&MCAST_HOPS) {
            let v = match self.family {
                AddressFamily::Inet6 => {
                    nix::sys::socket::getsockopt(&self.fd, sockopt::Ipv6MulticastHops)? as u64
                }
                _ => nix::sys::socket::getsockopt(&self.fd, sockopt::IpMulticastTtl)? as u64,
            };
            Ok(ParamValue::Int(v))
        } else if param.is(&REUSELOCAL) {
            let v = nix::sys::socket::getsockopt(&self.fd, sockopt::ReuseAddr)?;
            Ok(ParamValue::Int(v as u64))
        } else if param.is(&MCAST_LOOP) {
            let v = match self.family {
                AddressFamily::Inet6 => {
                    nix::sys::socket::getsockopt(&self.fd, sockopt::Ipv6MulticastLoop)?
                }
                _ => nix::sys::socket::getsockopt(&self.fd, sockopt::IpMulticastLoop)?,
            };
            Ok(ParamValue::Int(v as u64))
        } else {
            Err(error::not_supported())
        }
    }

    fn set(&self, param: &'static ParamTag, value: ParamValue) -> Result<()> {
        if param.is(&V6ONLY) {
            nix::sys::socket::setsockopt(&self.fd, sockopt::Ipv6V6Only, &(value.as_int()? != 0))?;
        } else if param.is(&MCAST_HOPS) {
            let hops = value.as_int()? as i32;
            match self.family {
                AddressFamily::Inet6 => {
                    nix::sys::socket::setsockopt(&self.fd, sockopt::Ipv6MulticastHops, &hops)?
                }
                _ => nix::sys::socket::setsockopt(&self.fd, sockopt::IpMulticastTtl, &(hops as u8))?,
            }
        } else if param.is(&REUSELOCAL) {
            nix::sys::socket::setsockopt(&self.fd, sockopt::ReuseAddr, &(value.as_int()? != 0))?;
        } else if param.is(&MCAST_LOOP) {
            let on = value.as_int()? != 0;
            match self.family {
                AddressFamily::Inet6 => {
                    nix::sys::socket::setsockopt(&self.fd, sockopt::Ipv6MulticastLoop, &on)?
                }
                _ => nix::sys::socket::setsockopt(&self.fd, sockopt::IpMulticastLoop, &on)?,
            }
        } else if param.is(&MCAST_JOIN) || param.is(&MCAST_LEAVE) {
            let group = value.as_endpoint()?.convert_to_socket()?;
            self.apply_membership(&group, param.is(&MCAST_JOIN))?;
        } else {
            return Err(error::not_supported());
        }
        Ok(())
    }

    fn attach(&self, _reactor: &Reactor) -> Result<()> {
        // A base socket queue owns no internal housekeeping events; its
        // send/recv events are handed to the caller to attach directly.
        Ok(())
    }

    fn detach(&self) -> Result<()> {
        Ok(())
    }
}

impl SocketQueue {
    fn apply_membership(&self, group: &Endpoint, join: bool) -> Result<()> {
        match self.family {
            AddressFamily::Inet6 => {
                let addr = group
                    .sockaddr()
                    .as_inet6()
                    .ok_or_else(error::address_family_not_supported)?;
                let req = nix::sys::socket::Ipv6MembershipRequest::new(addr.ip());
                if join {
                    nix::sys::socket::setsockopt(&self.fd, sockopt::Ipv6AddMembership, &req)?;
                } else {
                    nix::sys::socket::setsockopt(&self.fd, sockopt::Ipv6DropMembership, &req)?;
                }
            }
            _ => {
                let addr = group
                    .sockaddr()
                    .as_inet()
                    .ok_or_else(error::address_family_not_supported)?;
                let req = nix::sys::socket::IpMembershipRequest::new(
                    std::net::Ipv4Addr::from(addr.ip()),
                    None,
                );
                if join {
                    nix::sys::socket::setsockopt(&self.fd, sockopt::IpAddMembership, &req)?;
                } else {
                    nix::sys::socket::setsockopt(&self.fd, sockopt::IpDropMembership, &req)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::socket::SockaddrIn;
    use std::io::{IoSlice, IoSliceMut};

    fn loopback(port: u16) -> Endpoint {
        let addr = SockaddrIn::new(127, 0, 0, 1, port);
        Endpoint::from_sockaddr(SockaddrStorage::from_inet(&addr))
    }

    #[test]
    fn datagram_loopback_roundtrip() {
        let a = SocketQueue::allocate(
            None,
            None,
            Some(&loopback(0)),
            &[(&REUSELOCAL, ParamValue::Int(1))],
        )
        .unwrap();
        let a_port = local_port(&a);

        let b = SocketQueue::allocate(
            None,
            None,
            Some(&loopback(0)),
            &[(&REUSELOCAL, ParamValue::Int(1))],
        )
        .unwrap();
        let b_addr = loopback(local_port(&b));

        let msg = b"hello";
        let sent = a.send(&[IoSlice::new(msg)], Some(&b_addr)).unwrap();
        assert_eq!(sent, msg.len());

        assert!(b.nextsize().unwrap() >= msg.len());

        let mut buf = [0u8; 16];
        let mut from = None;
        let n = b
            .recv(&mut [IoSliceMut::new(&mut buf)], Some(&mut from))
            .unwrap();
        assert_eq!(n, msg.len());
        assert_eq!(&buf[..n], msg);

        let from = from.unwrap();
        assert_eq!(from.format().unwrap().as_ref(), format!("127.0.0.1:{a_port}"));
    }

    fn local_port(q: &SocketQueue) -> u16 {
        let mut addr: MaybeUninit<libc::sockaddr_in> = MaybeUninit::zeroed();
        let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        unsafe {
            libc::getsockname(q.fd(), addr.as_mut_ptr() as *mut libc::sockaddr, &mut len);
            u16::from_be(addr.assume_init().sin_port)
        }
    }
}
