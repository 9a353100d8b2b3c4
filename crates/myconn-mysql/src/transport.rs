//! Byte streams to the server: TCP, Unix socket, and TLS over either.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use crate::tls::TlsStream;

/// An unencrypted connection.
#[derive(Debug)]
pub enum PlainStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl PlainStream {
    /// Connect over TCP, trying every resolved address within `timeout`.
    pub fn connect_tcp(host: &str, port: u16, timeout: Duration) -> io::Result<Self> {
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(PlainStream::Tcp(stream));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {host}:{port}"),
            )
        }))
    }

    #[cfg(unix)]
    pub fn connect_socket(path: &Path) -> io::Result<Self> {
        UnixStream::connect(path).map(PlainStream::Unix)
    }

    #[cfg(not(unix))]
    pub fn connect_socket(path: &Path) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("Unix sockets are not available: {}", path.display()),
        ))
    }

    /// Applies to both reads and writes; `None` clears the timeout.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            PlainStream::Tcp(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)
            }
            #[cfg(unix)]
            PlainStream::Unix(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)
            }
        }
    }

    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            PlainStream::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            PlainStream::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }

    pub fn is_socket(&self) -> bool {
        !matches!(self, PlainStream::Tcp(_))
    }
}

impl Read for PlainStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            PlainStream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            PlainStream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for PlainStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            PlainStream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            PlainStream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            PlainStream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            PlainStream::Unix(s) => s.flush(),
        }
    }
}

/// The session's stream, possibly upgraded to TLS.
#[derive(Debug)]
pub enum Transport {
    Plain(PlainStream),
    Tls(Box<TlsStream<PlainStream>>),
}

impl Transport {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    fn plain(&self) -> &PlainStream {
        match self {
            Transport::Plain(s) => s,
            Transport::Tls(s) => s.get_ref(),
        }
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.plain().set_timeout(timeout)
    }

    pub fn shutdown(&self) -> io::Result<()> {
        self.plain().shutdown()
    }

    pub fn is_socket(&self) -> bool {
        self.plain().is_socket()
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            Transport::Tls(s) => s.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_roundtrip_and_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).unwrap();
            conn.write_all(&buf).unwrap();
        });

        let mut transport = Transport::Plain(
            PlainStream::connect_tcp("127.0.0.1", port, Duration::from_secs(5)).unwrap(),
        );
        transport.set_timeout(Some(Duration::from_secs(5))).unwrap();
        transport.write_all(b"ping").unwrap();
        transport.flush().unwrap();

        let mut echoed = [0u8; 4];
        transport.read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed, b"ping");
        assert!(!transport.is_encrypted());
        assert!(!transport.is_socket());
        transport.set_timeout(None).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_refused_connection_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(PlainStream::connect_tcp("127.0.0.1", port, Duration::from_secs(1)).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_socket_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PlainStream::connect_socket(&dir.path().join("mysqld.sock")).is_err());
    }
}
