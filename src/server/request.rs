//! Minimal HTTP request parsing and response heads
//!
//! Only the request line is interpreted. Header fields are read (so the
//! whole head is consumed) but ignored.

use std::fmt;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Supported request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

impl Method {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            _ => None,
        }
    }
}

/// Supported protocol versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub version: Version,
}

impl Request {
    /// Parse a request head (request line plus optional header lines)
    pub fn parse(head: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(head)
            .map_err(|_| Error::BadRequest("request head is not valid UTF-8".into()))?;
        let line = text.split('\n').next().unwrap_or_default().trim_end_matches('\r');

        let fields: Vec<&str> = line.split_whitespace().collect();
        let [method, path, version] = fields[..] else {
            return Err(Error::BadRequest(format!("malformed request line: {:?}", line)));
        };

        let method = Method::parse(method)
            .ok_or_else(|| Error::BadRequest(format!("unsupported method: {}", method)))?;
        if !path.starts_with('/') {
            return Err(Error::BadRequest(format!("invalid path: {}", path)));
        }
        let version = Version::parse(version)
            .ok_or_else(|| Error::BadRequest(format!("unsupported version: {}", version)))?;

        Ok(Self {
            method,
            path: path.to_string(),
            version,
        })
    }
}

/// Length of the head in `buf`, including the blank line that ends it
fn head_len(buf: &[u8]) -> Option<usize> {
    for (i, &b) in buf.iter().enumerate() {
        if b != b'\n' {
            continue;
        }
        let rest = &buf[i + 1..];
        if rest.starts_with(b"\r\n") {
            return Some(i + 3);
        }
        if rest.starts_with(b"\n") {
            return Some(i + 2);
        }
    }
    None
}

/// Read one request head from `reader`.
///
/// Reads until an empty line. Bytes after the head are discarded. Fails if
/// the head grows beyond `max_size` or the peer closes first.
pub async fn read_request<R>(reader: &mut R, max_size: usize) -> Result<Request>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024.min(max_size.max(1)));

    loop {
        if let Some(len) = head_len(&buf) {
            return Request::parse(&buf[..len]);
        }
        if buf.len() >= max_size {
            return Err(Error::BadRequest(format!(
                "request head exceeds {} bytes",
                max_size
            )));
        }

        buf.reserve(1024);
        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::BadRequest(
                "connection closed before end of request".into(),
            ));
        }
    }
}

/// `200 OK` head for a stream of `content_type`
pub fn ok_response(version: Version, content_type: &str) -> Bytes {
    Bytes::from(format!(
        "{} 200 OK\r\n\
         Content-Type: {}\r\n\
         Cache-Control: no-cache\r\n\
         Pragma: no-cache\r\n\
         Connection: close\r\n\
         \r\n",
        version, content_type
    ))
}

/// `404 Not Found` head. No header fields.
pub fn not_found_response(version: Version) -> Bytes {
    Bytes::from(format!("{} 404 Not Found\r\n\r\n", version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_parse_get() {
        let req = Request::parse(b"GET /live/a HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/live/a");
        assert_eq!(req.version, Version::Http11);
    }

    #[test]
    fn test_parse_head_http10() {
        let req = Request::parse(b"HEAD / HTTP/1.0\n\n").unwrap();
        assert_eq!(req.method, Method::Head);
        assert_eq!(req.path, "/");
        assert_eq!(req.version, Version::Http10);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Request::parse(b"POST /a HTTP/1.1\r\n\r\n").is_err());
        assert!(Request::parse(b"GET a HTTP/1.1\r\n\r\n").is_err());
        assert!(Request::parse(b"GET /a HTTP/2.0\r\n\r\n").is_err());
        assert!(Request::parse(b"GET /a\r\n\r\n").is_err());
        assert!(Request::parse(b"GET /a b HTTP/1.1\r\n\r\n").is_err());
        assert!(Request::parse(b"\xff\xfe\r\n\r\n").is_err());
    }

    #[test]
    fn test_head_len() {
        assert_eq!(head_len(b"GET / HTTP/1.1\r\n\r\nextra"), Some(18));
        assert_eq!(head_len(b"GET / HTTP/1.0\n\n"), Some(16));
        assert_eq!(head_len(b"GET / HTTP/1.1\r\nHost: a\r\n"), None);
    }

    #[tokio::test]
    async fn test_read_request_split_reads() {
        let mut mock = Builder::new()
            .read(b"GET /str")
            .read(b"eam HTTP/1.1\r\nUser-Agent: t")
            .read(b"est\r\n\r\n")
            .build();

        let req = read_request(&mut mock, 16384).await.unwrap();
        assert_eq!(req.path, "/stream");
        assert_eq!(req.method, Method::Get);
    }

    #[tokio::test]
    async fn test_read_request_too_large() {
        let long = vec![b'a'; 64];
        let mut mock = Builder::new().read(b"GET /").read(&long).build();

        let err = read_request(&mut mock, 32).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_read_request_peer_closed() {
        let mut mock = Builder::new().read(b"GET / HTTP/1.1\r\n").build();

        let err = read_request(&mut mock, 16384).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn test_responses() {
        let ok = ok_response(Version::Http10, "video/x-flv");
        assert_eq!(
            &ok[..],
            &b"HTTP/1.0 200 OK\r\nContent-Type: video/x-flv\r\nCache-Control: no-cache\r\nPragma: no-cache\r\nConnection: close\r\n\r\n"[..]
        );
        assert_eq!(
            &not_found_response(Version::Http11)[..],
            &b"HTTP/1.1 404 Not Found\r\n\r\n"[..]
        );
    }
}
