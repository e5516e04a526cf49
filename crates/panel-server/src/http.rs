//! Minimal HTTP/1.x request parsing and response writing.
//!
//! One request per connection: no keep-alive, no pipelining, no chunked
//! bodies. The parser is an explicit state machine fed from repeated reads
//! over a bounded buffer, so a request split across TCP segments is
//! assembled instead of truncated.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Errors raised while reading a request.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("malformed request: {0}")]
    Malformed(String),

    /// Headers or the declared body exceed the request bound.
    #[error("request exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("timed out waiting for the request")]
    Timeout,

    /// The peer closed the connection before sending anything.
    #[error("connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other(String),
}

impl Method {
    fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => Method::Other(other.to_string()),
        }
    }
}

/// A fully received request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Decode an `application/x-www-form-urlencoded` body.
    ///
    /// `+` becomes a space and `%HH` is decoded; a malformed escape is kept
    /// verbatim. Later duplicates of a key win.
    pub fn form(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(&self.body).into_owned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    RequestLine,
    Headers,
    Body { length: usize },
}

/// Incremental request parser.
#[derive(Debug)]
pub struct RequestParser {
    limit: usize,
    buf: Vec<u8>,
    /// Start of the first unconsumed byte in `buf`.
    pos: usize,
    state: ParseState,
    method: Option<Method>,
    target: String,
    headers: Vec<(String, String)>,
}

impl RequestParser {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            buf: Vec::new(),
            pos: 0,
            state: ParseState::RequestLine,
            method: None,
            target: String::new(),
            headers: Vec::new(),
        }
    }

    /// Nothing has been received yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Feed received bytes. Returns the request once it is complete.
    ///
    /// The whole request, line by line or in one piece, must fit in the
    /// limit; the buffer never grows past it.
    pub fn push(&mut self, data: &[u8]) -> Result<Option<Request>, HttpError> {
        if self.buf.len() + data.len() > self.limit {
            return Err(HttpError::TooLarge { limit: self.limit });
        }
        self.buf.extend_from_slice(data);
        loop {
            match self.state {
                ParseState::RequestLine => {
                    let Some(line) = self.next_line()? else {
                        return Ok(None);
                    };
                    self.parse_request_line(&line)?;
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let Some(line) = self.next_line()? else {
                        return Ok(None);
                    };
                    if self.pos > self.limit {
                        return Err(HttpError::TooLarge { limit: self.limit });
                    }
                    if line.is_empty() {
                        let length = self.content_length()?;
                        if length > self.limit.saturating_sub(self.pos) {
                            return Err(HttpError::TooLarge { limit: self.limit });
                        }
                        self.state = ParseState::Body { length };
                    } else {
                        self.parse_header(&line)?;
                    }
                }
                ParseState::Body { length } => {
                    if self.buf.len() - self.pos < length {
                        return Ok(None);
                    }
                    let body = self.buf[self.pos..self.pos + length].to_vec();
                    return Ok(Some(self.finish(body)));
                }
            }
        }
    }

    /// Take the next CRLF (or bare LF) terminated line, if complete.
    fn next_line(&mut self) -> Result<Option<String>, HttpError> {
        let rest = &self.buf[self.pos..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(end) => {
                let raw = &rest[..end];
                let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                let line = std::str::from_utf8(raw)
                    .map_err(|_| HttpError::Malformed("header is not valid UTF-8".to_string()))?
                    .to_string();
                self.pos += end + 1;
                Ok(Some(line))
            }
            None if self.buf.len() > self.limit => Err(HttpError::TooLarge { limit: self.limit }),
            None => Ok(None),
        }
    }

    fn parse_request_line(&mut self, line: &str) -> Result<(), HttpError> {
        let mut parts = line.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(HttpError::Malformed(format!("bad request line {:?}", line)));
        };
        if method.is_empty() || !target.starts_with('/') || !version.starts_with("HTTP/1.") {
            return Err(HttpError::Malformed(format!("bad request line {:?}", line)));
        }
        self.method = Some(Method::parse(method));
        self.target = target.to_string();
        Ok(())
    }

    fn parse_header(&mut self, line: &str) -> Result<(), HttpError> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::Malformed(format!("bad header {:?}", line)))?;
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(HttpError::Malformed(format!("bad header name {:?}", name)));
        }
        self.headers.push((name.to_string(), value.trim().to_string()));
        Ok(())
    }

    fn content_length(&self) -> Result<usize, HttpError> {
        let mut length = None;
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("transfer-encoding") {
                return Err(HttpError::Malformed("chunked bodies are not supported".to_string()));
            }
            if name.eq_ignore_ascii_case("content-length") {
                let parsed = value
                    .parse::<usize>()
                    .map_err(|_| HttpError::Malformed(format!("bad Content-Length {:?}", value)))?;
                if length.is_some_and(|l| l != parsed) {
                    return Err(HttpError::Malformed("conflicting Content-Length".to_string()));
                }
                length = Some(parsed);
            }
        }
        Ok(length.unwrap_or(0))
    }

    fn finish(&mut self, body: Vec<u8>) -> Request {
        let target = std::mem::take(&mut self.target);
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (target, None),
        };
        Request {
            method: self.method.take().unwrap_or(Method::Get),
            path,
            query,
            headers: std::mem::take(&mut self.headers),
            body,
        }
    }
}

/// A reader whose next read can be bounded by the time left.
pub trait DeadlineRead: Read {
    fn limit_next_read(&mut self, remaining: Duration) -> io::Result<()>;
}

impl DeadlineRead for TcpStream {
    fn limit_next_read(&mut self, remaining: Duration) -> io::Result<()> {
        // a zero timeout is rejected by set_read_timeout
        self.set_read_timeout(Some(remaining.max(Duration::from_millis(1))))
    }
}

impl DeadlineRead for &[u8] {
    fn limit_next_read(&mut self, _: Duration) -> io::Result<()> {
        Ok(())
    }
}

/// Read one request from `stream`, bounded by `limit` bytes and by
/// `timeout` for the whole request.
///
/// A peer still sending when the time is up gets [`HttpError::Timeout`],
/// however steadily the bytes trickle in.
pub fn read_request(
    stream: &mut impl DeadlineRead,
    limit: usize,
    timeout: Duration,
) -> Result<Request, HttpError> {
    let deadline = Instant::now() + timeout;
    let mut parser = RequestParser::new(limit);
    let mut chunk = [0u8; 512];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(HttpError::Timeout);
        }
        stream.limit_next_read(remaining)?;
        let n = match stream.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Err(HttpError::Timeout)
            }
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            return Err(if parser.is_empty() {
                HttpError::Closed
            } else {
                HttpError::Malformed("connection closed mid-request".to_string())
            });
        }
        if let Some(request) = parser.push(&chunk[..n])? {
            return Ok(request);
        }
    }
}

/// A response, always sent with `Connection: close`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: body.into(),
        }
    }

    pub fn html(body: String) -> Self {
        Self::new(200, "text/html; charset=utf-8", body)
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, "text/plain; charset=utf-8", body.into())
    }

    /// `303 See Other` back to `location`.
    pub fn redirect(location: &str) -> Self {
        Self {
            status: 303,
            headers: vec![("Location".to_string(), location.to_string())],
            body: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Connection: close\r\n\r\n");
        out.write_all(head.as_bytes())?;
        out.write_all(&self.body)?;
        out.flush()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        303 => "See Other",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LIMIT: usize = 1024;

    fn parse_all(raw: &[u8]) -> Result<Option<Request>, HttpError> {
        RequestParser::new(LIMIT).push(raw)
    }

    #[test]
    fn test_parse_get() {
        let request = parse_all(b"GET /show/temp?x=1 HTTP/1.1\r\nHost: esp\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.path, "/show/temp");
        assert_eq!(request.query.as_deref(), Some("x=1"));
        assert_eq!(request.header("host"), Some("esp"));
        assert!(request.body.is_empty());
    }

    #[test]
    fn test_request_split_across_reads() {
        let raw = b"POST /led HTTP/1.1\r\nContent-Length: 7\r\n\r\narg0=on";
        let mut parser = RequestParser::new(LIMIT);
        for (i, byte) in raw.iter().enumerate() {
            let result = parser.push(std::slice::from_ref(byte)).unwrap();
            if i + 1 < raw.len() {
                assert!(result.is_none(), "completed early at byte {}", i);
            } else {
                let request = result.unwrap();
                assert_eq!(request.body, b"arg0=on");
            }
        }
    }

    #[test]
    fn test_form_decoding() {
        let request = parse_all(
            b"POST /x HTTP/1.1\r\nContent-Length: 35\r\n\r\narg0=My+Net&arg1=a%26b&arg2=100%zz%",
        )
        .unwrap()
        .unwrap();
        let form = request.form();
        assert_eq!(form["arg0"], "My Net");
        assert_eq!(form["arg1"], "a&b");
        assert_eq!(form["arg2"], "100%zz%");
    }

    #[test]
    fn test_declared_body_too_large() {
        let err = parse_all(b"POST /x HTTP/1.1\r\nContent-Length: 5000\r\n\r\n").unwrap_err();
        assert!(matches!(err, HttpError::TooLarge { limit: LIMIT }));
    }

    #[test]
    fn test_headers_too_large() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Fill: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(2 * LIMIT));
        let err = parse_all(&raw).unwrap_err();
        assert!(matches!(err, HttpError::TooLarge { .. }));
    }

    #[test]
    fn test_many_short_headers_too_large() {
        let mut parser = RequestParser::new(LIMIT);
        assert!(parser.push(b"GET / HTTP/1.1\r\n").unwrap().is_none());
        let mut sent = 0;
        let mut outcome = Ok(None);
        for i in 0..2000 {
            let line = format!("X-{}: aaaaaaaaaaaaaaaa\r\n", i);
            sent += line.len();
            outcome = parser.push(line.as_bytes());
            if outcome.is_err() {
                break;
            }
        }
        assert!(matches!(outcome, Err(HttpError::TooLarge { limit: LIMIT })));
        assert!(sent <= LIMIT + 64, "accepted {} bytes before rejecting", sent);
    }

    #[test]
    fn test_request_at_the_limit_is_accepted() {
        let head = b"POST /x HTTP/1.1\r\nContent-Length: ";
        let mut raw = head.to_vec();
        let body_len = LIMIT - head.len() - "000\r\n\r\n".len();
        raw.extend(format!("{}\r\n\r\n", body_len).as_bytes());
        raw.extend(std::iter::repeat(b'a').take(body_len));
        assert_eq!(raw.len(), LIMIT);
        let request = parse_all(&raw).unwrap().unwrap();
        assert_eq!(request.body.len(), body_len);

        raw.push(b'a');
        assert!(matches!(parse_all(&raw), Err(HttpError::TooLarge { .. })));
    }

    /// Hands out one byte per read after a pause.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        pause: Duration,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(self.pause);
            if self.pos == self.data.len() {
                return Ok(0);
            }
            buf[0] = self.data[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    impl DeadlineRead for Trickle {
        fn limit_next_read(&mut self, _: Duration) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_trickled_request_times_out() {
        let mut slow = Trickle {
            data: b"GET / HTTP/1.1\r\nX-Slow: aaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n".to_vec(),
            pos: 0,
            pause: Duration::from_millis(10),
        };
        let started = Instant::now();
        let err = read_request(&mut slow, LIMIT, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, HttpError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(1));

        let mut quick = Trickle {
            data: b"GET / HTTP/1.1\r\n\r\n".to_vec(),
            pos: 0,
            pause: Duration::ZERO,
        };
        assert!(read_request(&mut quick, LIMIT, Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(parse_all(b"GARBAGE\r\n\r\n"), Err(HttpError::Malformed(_))));
        assert!(matches!(
            parse_all(b"GET / HTTP/1.1\r\nNoColon\r\n\r\n"),
            Err(HttpError::Malformed(_))
        ));
        assert!(matches!(
            parse_all(b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n"),
            Err(HttpError::Malformed(_))
        ));
    }

    #[test]
    fn test_read_request_reports_early_close() {
        let mut empty: &[u8] = b"";
        assert!(matches!(read_request(&mut empty, LIMIT, Duration::from_secs(1)), Err(HttpError::Closed)));

        let mut partial: &[u8] = b"GET / HTTP/1.1\r\n";
        assert!(matches!(read_request(&mut partial, LIMIT, Duration::from_secs(1)), Err(HttpError::Malformed(_))));
    }

    #[test]
    fn test_write_response() {
        let mut out = Vec::new();
        Response::text(404, "function not found: x").write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 21\r\n"));
        assert!(text.contains("Connection: close\r\n\r\n"));
        assert!(text.ends_with("function not found: x"));

        let redirect = Response::redirect("/");
        assert_eq!(redirect.status, 303);
        assert_eq!(redirect.header("location"), Some("/"));
    }
}
