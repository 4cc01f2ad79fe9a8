//! TCP variant of [`super::Transport`], with address-family fallback and an
//! optional `SO_KEEPALIVE` (`spec.md` §4.1, §6 `TcpKeepAlive`).

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::options::Family;

use super::Transport;

type FamilyCache = Mutex<HashMap<(String, u16), Family>>;

fn family_cache() -> &'static FamilyCache {
    static CACHE: OnceLock<FamilyCache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn resolve(host: &str, port: u16, family: Family) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| {
            Error::from(ErrorKind::ConnectionRanOut {
                message: format!("could not resolve {host}:{port}: {e}"),
            })
        })?
        .filter(|addr| match family {
            Family::Unspecified => true,
            Family::V4 => matches!(addr.ip(), IpAddr::V4(_)),
            Family::V6 => matches!(addr.ip(), IpAddr::V6(_)),
        })
        .collect();

    if addrs.is_empty() {
        return Err(ErrorKind::ConnectionRanOut {
            message: format!("no {family:?} addresses found for {host}:{port}"),
        }
        .into());
    }

    Ok(addrs)
}

fn try_connect(
    host: &str,
    port: u16,
    family: Family,
    connect_timeout: Option<Duration>,
) -> Result<TcpStream> {
    let mut last_err = None;

    for addr in resolve(host, port, family)? {
        let attempt = match connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };

        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err
        .map(Error::from)
        .unwrap_or_else(|| ErrorKind::ConnectionRanOut {
            message: format!("unable to connect to {host}:{port}"),
        }
        .into()))
}

/// Connects to `(host, port)`, retrying exactly once with the default
/// (unspecified) address family if a cached-family attempt fails, and
/// caching whichever family ultimately succeeded.
fn connect_with_fallback(
    host: &str,
    port: u16,
    requested: Family,
    connect_timeout: Option<Duration>,
) -> Result<TcpStream> {
    let key = (host.to_string(), port);
    let cached = family_cache().lock().unwrap().get(&key).copied();
    let first_family = cached.unwrap_or(requested);

    match try_connect(host, port, first_family, connect_timeout) {
        Ok(stream) => {
            family_cache().lock().unwrap().insert(key, first_family);
            Ok(stream)
        }
        Err(first_err) => {
            if first_family == Family::Unspecified {
                return Err(first_err);
            }

            match try_connect(host, port, Family::Unspecified, connect_timeout) {
                Ok(stream) => {
                    family_cache()
                        .lock()
                        .unwrap()
                        .insert(key, Family::Unspecified);
                    Ok(stream)
                }
                Err(_) => Err(first_err),
            }
        }
    }
}

pub(crate) struct RemoteTransport {
    stream: TcpStream,
}

impl RemoteTransport {
    pub(crate) fn connect(
        host: &str,
        port: u16,
        family: Family,
        keep_alive: bool,
        connect_timeout: Option<Duration>,
    ) -> Result<Self> {
        let stream = connect_with_fallback(host, port, family, connect_timeout)?;
        stream.set_nodelay(true)?;

        if keep_alive {
            let socket = socket2::Socket::from(stream.try_clone()?);
            socket.set_keepalive(true)?;
            socket.set_reuse_address(true)?;
        }

        Ok(Self { stream })
    }
}

impl Read for RemoteTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for RemoteTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for RemoteTransport {
    fn wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let previous = self.stream.read_timeout()?;
        // `set_read_timeout` rejects a zero duration, so a poll (timeout =
        // Some(Duration::ZERO)) is approximated with the smallest nonzero one.
        let effective = match timeout {
            None => None,
            Some(d) if d.is_zero() => Some(Duration::from_nanos(1)),
            Some(d) => Some(d),
        };
        self.stream.set_read_timeout(effective)?;

        let mut probe = [0u8; 1];
        let result = match self.stream.peek(&mut probe) {
            Ok(n) => Ok(n > 0),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(e) => Err(Error::from(e)),
        };

        self.stream.set_read_timeout(previous)?;
        result
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
