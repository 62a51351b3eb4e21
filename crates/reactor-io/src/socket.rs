//! Socket setup — bind/listen for the acceptor path, connect for the
//! outbound path.
//!
//! Grounded on `ksvc-gvthread::net::GvtListener::bind_socket` and
//! `cmd/httpd/rust/ksvc::main`'s `setup_listener`: a raw, non-blocking TCP
//! socket with `SO_REUSEADDR`/`SO_REUSEPORT` so multiple reactors can each
//! bind the same port and let the kernel load-balance accepts across them,
//! plus `TCP_NODELAY` on accepted/connected streams.

use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::RawFd;

use reactor_core::ReactorError;

/// Socket-level tuning applied to every channel this reactor owns.
#[derive(Debug, Clone, Copy)]
pub struct SocketConfig {
    pub nodelay: bool,
    pub reuseport: bool,
    pub recv_buf: Option<i32>,
    pub send_buf: Option<i32>,
    pub listen_backlog: i32,
    /// Ask the kernel to send ACKs immediately (`TCP_QUICKACK`) instead of
    /// delaying them to piggyback on outgoing data.
    pub tcp_quick_ack: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            reuseport: true,
            recv_buf: None,
            send_buf: None,
            listen_backlog: 10,
            tcp_quick_ack: false,
        }
    }
}

fn last_errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

fn sockaddr_from(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
            }
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
            }
            mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        }
    };
    (storage, len)
}

/// Parse the `sockaddr_storage` an ACCEPT SQE fills in back into a
/// `SocketAddr`. Returns `None` for an address family other than
/// `AF_INET`/`AF_INET6` or a length too short for the family it claims.
pub fn sockaddr_to(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> Option<SocketAddr> {
    match storage.ss_family as i32 {
        libc::AF_INET if len as usize >= mem::size_of::<libc::sockaddr_in>() => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_ne_bytes(sin.sin_addr.s_addr.to_ne_bytes()));
            let port = u16::from_be(sin.sin_port);
            Some(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        libc::AF_INET6 if len as usize >= mem::size_of::<libc::sockaddr_in6>() => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            let port = u16::from_be(sin6.sin6_port);
            Some(SocketAddr::V6(SocketAddrV6::new(ip, port, sin6.sin6_flowinfo, sin6.sin6_scope_id)))
        }
        _ => None,
    }
}

fn set_opt(fd: RawFd, level: i32, name: i32, value: i32) -> Result<(), ReactorError> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const i32 as *const libc::c_void,
            mem::size_of::<i32>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(ReactorError::Os(last_errno()));
    }
    Ok(())
}

/// Apply `TCP_NODELAY` and the configured buffer sizes to an already-open
/// stream socket (accepted or connected).
pub fn tune_stream(fd: RawFd, config: &SocketConfig) -> Result<(), ReactorError> {
    if config.nodelay {
        set_opt(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1)?;
    }
    if let Some(n) = config.recv_buf {
        set_opt(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, n)?;
    }
    if let Some(n) = config.send_buf {
        set_opt(fd, libc::SOL_SOCKET, libc::SO_SNDBUF, n)?;
    }
    if config.tcp_quick_ack {
        set_opt(fd, libc::IPPROTO_TCP, libc::TCP_QUICKACK, 1)?;
    }
    Ok(())
}

/// Create a non-blocking TCP socket bound and listening on `addr`, ready to
/// have ACCEPT SQEs armed against it.
pub fn bind_listener(addr: SocketAddr, config: &SocketConfig) -> Result<RawFd, ReactorError> {
    let domain = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(ReactorError::Os(last_errno()));
    }

    if let Err(e) = set_opt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1) {
        unsafe { libc::close(fd) };
        return Err(e);
    }
    if config.reuseport {
        if let Err(e) = set_opt(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, 1) {
            unsafe { libc::close(fd) };
            return Err(e);
        }
    }

    let (storage, len) = sockaddr_from(addr);
    let ret = unsafe {
        libc::bind(
            fd,
            &storage as *const _ as *const libc::sockaddr,
            len,
        )
    };
    if ret < 0 {
        let errno = last_errno();
        unsafe { libc::close(fd) };
        return Err(ReactorError::Bind(errno));
    }

    let ret = unsafe { libc::listen(fd, config.listen_backlog) };
    if ret < 0 {
        let errno = last_errno();
        unsafe { libc::close(fd) };
        return Err(ReactorError::Listen(errno));
    }

    Ok(fd)
}

/// Create a non-blocking TCP socket and begin connecting to `addr`.
/// `EINPROGRESS` is the expected outcome and is not treated as an error;
/// the caller arms a WRITEV (or a dedicated connect-completion opcode, out
/// of this closed opcode set) to learn when it resolves.
pub fn start_connect(addr: SocketAddr, config: &SocketConfig) -> Result<RawFd, ReactorError> {
    let domain = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(ReactorError::Os(last_errno()));
    }
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };

    tune_stream(fd, config)?;

    let (storage, len) = sockaddr_from(addr);
    let ret = unsafe {
        libc::connect(fd, &storage as *const _ as *const libc::sockaddr, len)
    };
    if ret < 0 {
        let errno = last_errno();
        if errno != libc::EINPROGRESS {
            unsafe { libc::close(fd) };
            return Err(ReactorError::Connect(errno));
        }
    }
    Ok(fd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_listener_picks_an_ephemeral_port() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let fd = bind_listener(addr, &SocketConfig::default()).unwrap();
        assert!(fd >= 0);
        unsafe { libc::close(fd) };
    }

    #[test]
    fn start_connect_to_a_listening_socket_does_not_error() {
        let listen_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener_fd = bind_listener(listen_addr, &SocketConfig::default()).unwrap();

        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        unsafe {
            libc::getsockname(
                listener_fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            );
        }
        let bound_port = unsafe {
            let sin = &*(&storage as *const _ as *const libc::sockaddr_in);
            u16::from_be(sin.sin_port)
        };
        let target: SocketAddr = format!("127.0.0.1:{}", bound_port).parse().unwrap();

        let fd = start_connect(target, &SocketConfig::default()).unwrap();
        assert!(fd >= 0);
        unsafe {
            libc::close(fd);
            libc::close(listener_fd);
        }
    }

    #[test]
    fn sockaddr_to_round_trips_an_ipv4_accept_address() {
        let addr: SocketAddr = "127.0.0.1:4321".parse().unwrap();
        let (storage, len) = sockaddr_from(addr);
        let parsed = sockaddr_to(&storage, len).expect("valid AF_INET address parses");
        assert_eq!(parsed, addr);
    }

    #[test]
    fn sockaddr_to_round_trips_an_ipv6_accept_address() {
        let addr: SocketAddr = "[::1]:4321".parse().unwrap();
        let (storage, len) = sockaddr_from(addr);
        let parsed = sockaddr_to(&storage, len).expect("valid AF_INET6 address parses");
        assert_eq!(parsed, addr);
    }

    #[test]
    fn sockaddr_to_rejects_a_length_too_short_for_the_claimed_family() {
        let addr: SocketAddr = "127.0.0.1:4321".parse().unwrap();
        let (storage, _) = sockaddr_from(addr);
        assert!(sockaddr_to(&storage, 2).is_none());
    }
}
