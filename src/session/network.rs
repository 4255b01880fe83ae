//! TCP plumbing with the socket options tokio does not surface: MD5
//! signatures, GTSM minimum-TTL, outgoing TTL and source binding. All of
//! them are opaque to the protocol engine.

use std::io;
use std::net::{IpAddr, SocketAddr};

use log::warn;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

const TCP_INIT_TIMEOUT_MS: u64 = 1000;

/// Per-peer transport knobs lifted from the neighbor configuration
#[derive(Clone, Debug, Default)]
pub struct TransportOptions {
    pub md5_password: Option<String>,
    /// Outgoing TTL (ttl-out)
    pub ttl: Option<u8>,
    /// GTSM: require incoming TTL >= 255 - ttl_in
    pub min_ttl: Option<u8>,
    pub source_address: Option<IpAddr>,
    pub source_interface: Option<String>,
}

pub async fn connect(
    peer_addr: SocketAddr,
    options: &TransportOptions,
) -> io::Result<TcpStream> {
    let domain = match peer_addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    apply_options(&socket, peer_addr.ip(), options)?;
    if let Some(source) = options.source_address {
        socket.bind(&SocketAddr::new(source, 0).into())?;
    }

    match socket.connect(&peer_addr.into()) {
        Ok(()) => (),
        Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => (),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => (),
        Err(err) => return Err(err),
    }

    let stream = TcpStream::from_std(socket.into())?;
    let connected = timeout(Duration::from_millis(TCP_INIT_TIMEOUT_MS), async {
        stream.writable().await?;
        if let Some(err) = stream.take_error()? {
            return Err(err);
        }
        Ok(())
    })
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?;
    connected?;
    Ok(stream)
}

pub fn listen(bind: SocketAddr, options: &TransportOptions) -> io::Result<TcpListener> {
    let domain = match bind {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    apply_options(&socket, bind.ip(), options)?;
    socket.bind(&bind.into())?;
    socket.listen(64)?;
    TcpListener::from_std(socket.into())
}

fn apply_options(socket: &Socket, addr: IpAddr, options: &TransportOptions) -> io::Result<()> {
    if let Some(ttl) = options.ttl {
        socket.set_ttl(u32::from(ttl))?;
    }
    if let Some(min_ttl) = options.min_ttl {
        set_min_ttl(socket, addr, 255u8.saturating_sub(min_ttl))?;
    }
    if let Some(password) = &options.md5_password {
        if let Err(err) = set_md5_signature(socket, addr, password) {
            // the kernel may lack TCP_MD5SIG support; the session still runs
            warn!("could not set TCP MD5 signature: {}", err);
        }
    }
    #[cfg(target_os = "linux")]
    if let Some(interface) = &options.source_interface {
        socket.bind_device(Some(interface.as_bytes()))?;
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn set_min_ttl(socket: &Socket, addr: IpAddr, min: u8) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let (level, option) = match addr {
        IpAddr::V4(_) => (libc::IPPROTO_IP, libc::IP_MINTTL),
        IpAddr::V6(_) => (libc::IPPROTO_IPV6, 73 /* IPV6_MINHOPCOUNT */),
    };
    let value = i32::from(min);
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            option,
            &value as *const i32 as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_min_ttl(_socket: &Socket, _addr: IpAddr, _min: u8) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "GTSM not supported on this platform",
    ))
}

// Not exposed by the `libc` crate; mirrors the kernel's `struct tcp_md5sig`
// (linux/tcp.h) so the setsockopt() call below has a matching ABI layout.
#[cfg(target_os = "linux")]
#[repr(C)]
#[allow(non_camel_case_types)]
struct tcp_md5sig {
    tcpm_addr: libc::sockaddr_storage,
    tcpm_flags: u8,
    tcpm_prefixlen: u8,
    tcpm_keylen: u16,
    tcpm_ifindex: libc::c_int,
    tcpm_key: [u8; 80],
}

#[cfg(target_os = "linux")]
fn set_md5_signature(socket: &Socket, addr: IpAddr, password: &str) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    if password.len() > 80 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "MD5 password longer than TCP_MD5SIG_MAXKEYLEN",
        ));
    }

    let mut sig: tcp_md5sig = unsafe { std::mem::zeroed() };
    match addr {
        IpAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: 0,
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    &sin as *const libc::sockaddr_in as *const u8,
                    &mut sig.tcpm_addr as *mut libc::sockaddr_storage as *mut u8,
                    std::mem::size_of::<libc::sockaddr_in>(),
                );
            }
        }
        IpAddr::V6(v6) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: v6.octets(),
            };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    &sin6 as *const libc::sockaddr_in6 as *const u8,
                    &mut sig.tcpm_addr as *mut libc::sockaddr_storage as *mut u8,
                    std::mem::size_of::<libc::sockaddr_in6>(),
                );
            }
        }
    }
    sig.tcpm_keylen = password.len() as u16;
    for (i, byte) in password.bytes().enumerate() {
        sig.tcpm_key[i] = byte as _;
    }

    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_MD5SIG,
            &sig as *const tcp_md5sig as *const libc::c_void,
            std::mem::size_of::<tcp_md5sig>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_md5_signature(_socket: &Socket, _addr: IpAddr, _password: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "TCP MD5 signatures not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listen_and_connect_loopback() {
        let listener = listen(
            "127.0.0.1:0".parse().unwrap(),
            &TransportOptions::default(),
        )
        .unwrap();
        let bound = listener.local_addr().unwrap();

        let options = TransportOptions {
            source_address: Some("127.0.0.1".parse().unwrap()),
            ..Default::default()
        };
        let (outbound, inbound) = tokio::join!(connect(bound, &options), listener.accept());
        let outbound = outbound.unwrap();
        let (_, remote) = inbound.unwrap();
        assert_eq!(outbound.local_addr().unwrap(), remote);
    }
}
