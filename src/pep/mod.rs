//! PEP Tunnel: a local TCP listener that speaks HTTP `CONNECT`, dials the
//! real upstream, and then relays bytes opaquely in both directions. It
//! never inspects the tunnelled traffic — the HTTP client driving it
//! through `reqwest::Proxy::http` is the only thing that understands it.

use std::net::SocketAddr;

use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::config::{
    PEP_KEEPALIVE_IDLE, PEP_KEEPALIVE_INTERVAL, PEP_KEEPALIVE_RETRIES, PEP_POLL_TIMEOUT,
    PEP_RELAY_CHUNK_BYTES, PEP_SOCKET_BUFFER_BYTES,
};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed CONNECT request")]
    MalformedRequest,
    #[error("unsupported method, expected CONNECT")]
    UnsupportedMethod,
    #[error("failed to reach upstream {0}: {1}")]
    UpstreamUnreachable(String, std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of parsing the client's request line: either a CONNECT target,
/// a recognised-but-wrong method (405), or something unparsable (400).
enum ParsedRequest {
    Connect(String),
    WrongMethod,
    Malformed,
}

pub struct PepTunnel {
    listen_addr: SocketAddr,
}

impl PepTunnel {
    pub fn new(host: &str, port: u16) -> Result<Self, ProxyError> {
        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| ProxyError::MalformedRequest)?;
        Ok(Self { listen_addr })
    }

    /// Binds the listener and serves connections until the process exits
    /// or a fatal `ProxyError` surfaces from a connection (a per-connection
    /// failure just drops that one; only bind failures are propagated).
    pub async fn run(self) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        tracing::info!(addr = %self.listen_addr, "PEP tunnel listening");
        loop {
            let (client, peer) = listener.accept().await?;
            tokio::spawn(async move {
                if let Err(err) = handle_connection(client).await {
                    tracing::warn!(%peer, error = %err, "PEP tunnel connection failed");
                }
            });
        }
    }
}

async fn handle_connection(mut client: TcpStream) -> Result<(), ProxyError> {
    let request = read_connect_request(&mut client).await?;
    let target = match parse_connect_target(&request) {
        ParsedRequest::Connect(target) => target,
        ParsedRequest::WrongMethod => {
            client.write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n").await.ok();
            return Err(ProxyError::UnsupportedMethod);
        }
        ParsedRequest::Malformed => {
            client.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await.ok();
            return Err(ProxyError::MalformedRequest);
        }
    };

    let upstream = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(e) => {
            client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await.ok();
            return Err(ProxyError::UpstreamUnreachable(target, e));
        }
    };

    tune_socket(&client)?;
    tune_socket(&upstream)?;

    client.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n").await?;

    relay_bidirectional(client, upstream).await
}

async fn read_connect_request(client: &mut TcpStream) -> Result<String, ProxyError> {
    let mut buf = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    loop {
        let n = client.read(&mut byte).await?;
        if n == 0 {
            return Err(ProxyError::MalformedRequest);
        }
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            break;
        }
        if buf.len() > 8192 {
            return Err(ProxyError::MalformedRequest);
        }
    }
    String::from_utf8(buf).map_err(|_| ProxyError::MalformedRequest)
}

/// Parses the request's first line: `CONNECT host:port HTTP/1.x` succeeds,
/// any other recognisable HTTP method is `WrongMethod` (405), and anything
/// that doesn't even parse as a request line is `Malformed` (400).
fn parse_connect_target(request: &str) -> ParsedRequest {
    let Some(first_line) = request.lines().next() else {
        return ParsedRequest::Malformed;
    };
    let mut parts = first_line.split_whitespace();
    let Some(method) = parts.next() else {
        return ParsedRequest::Malformed;
    };
    if !method.eq_ignore_ascii_case("CONNECT") {
        return ParsedRequest::WrongMethod;
    }
    let Some(target) = parts.next() else {
        return ParsedRequest::Malformed;
    };
    if !target.contains(':') {
        return ParsedRequest::Malformed;
    }
    ParsedRequest::Connect(target.to_string())
}

async fn relay_bidirectional(client: TcpStream, upstream: TcpStream) -> Result<(), ProxyError> {
    let (mut client_rd, mut client_wr) = client.into_split();
    let (mut upstream_rd, mut upstream_wr) = upstream.into_split();

    let client_to_upstream = relay_direction(&mut client_rd, &mut upstream_wr);
    let upstream_to_client = relay_direction(&mut upstream_rd, &mut client_wr);

    let (a, b) = tokio::join!(client_to_upstream, upstream_to_client);
    a?;
    b?;
    Ok(())
}

/// Copies bytes from `reader` to `writer` in chunks of at most
/// `PEP_RELAY_CHUNK_BYTES`, polling each read with a bounded timeout so the
/// loop can be cancelled promptly once the peer half closes.
async fn relay_direction<R, W>(reader: &mut R, writer: &mut W) -> Result<(), ProxyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; PEP_RELAY_CHUNK_BYTES];
    loop {
        match tokio::time::timeout(PEP_POLL_TIMEOUT, reader.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => writer.write_all(&buf[..n]).await?,
            Ok(Err(e)) => return Err(ProxyError::Io(e)),
            Err(_elapsed) => continue,
        }
    }
    writer.shutdown().await.ok();
    Ok(())
}

fn tune_socket(stream: &TcpStream) -> Result<(), ProxyError> {
    let sock_ref = SockRef::from(stream);
    sock_ref.set_recv_buffer_size(PEP_SOCKET_BUFFER_BYTES)?;
    sock_ref.set_send_buffer_size(PEP_SOCKET_BUFFER_BYTES)?;
    sock_ref.set_nodelay(true)?;

    let keepalive = TcpKeepalive::new()
        .with_time(PEP_KEEPALIVE_IDLE)
        .with_interval(PEP_KEEPALIVE_INTERVAL)
        .with_retries(PEP_KEEPALIVE_RETRIES);
    sock_ref.set_tcp_keepalive(&keepalive)?;

    #[cfg(target_os = "linux")]
    set_quickack(&sock_ref)?;

    Ok(())
}

/// `TCP_QUICKACK` has no portable equivalent; Linux-only, best-effort.
#[cfg(target_os = "linux")]
fn set_quickack(sock_ref: &SockRef) -> Result<(), ProxyError> {
    use std::os::unix::io::AsRawFd;

    let fd = sock_ref.as_raw_fd();
    let enable: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_QUICKACK,
            &enable as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(ProxyError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_target() {
        let request = "CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";
        assert!(matches!(
            parse_connect_target(request),
            ParsedRequest::Connect(target) if target == "example.com:443"
        ));
    }

    #[test]
    fn rejects_non_connect_method_as_wrong_method() {
        let request = "GET / HTTP/1.1\r\n\r\n";
        assert!(matches!(parse_connect_target(request), ParsedRequest::WrongMethod));
    }

    #[test]
    fn rejects_target_without_port_as_malformed() {
        let request = "CONNECT example.com HTTP/1.1\r\n\r\n";
        assert!(matches!(parse_connect_target(request), ParsedRequest::Malformed));
    }

    #[test]
    fn rejects_empty_request_as_malformed() {
        assert!(matches!(parse_connect_target(""), ParsedRequest::Malformed));
    }
}
