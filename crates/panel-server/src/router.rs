//! Accept loop and route table.
//!
//! Connections are served one at a time on the accepting thread. Long
//! running operations (connect, scan) are handed to worker threads by
//! their targets, so a request never waits on the radio.
//!
//! Routes:
//!
//! | Method | Path         | Result                                        |
//! |--------|--------------|-----------------------------------------------|
//! | GET    | `/`          | the generated panel page                      |
//! | GET    | `/show/<id>` | plain-text output of a `show` function        |
//! | POST   | `/<id>`      | `rut`: result text; others: redirect to `/`   |

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use panel_core::{page, DispatchError, Invocation, PanelError, PresentationType};

use crate::context::PanelContext;
use crate::error::ServerError;
use crate::http::{self, HttpError, Method, Request, Response};

/// Highest positional argument index accepted from a form.
const MAX_ARGS: usize = 32;

/// How long to keep reading unconsumed input before closing.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(50);

/// Configuration for the panel server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Upper bound on the request line, headers and body together.
    pub max_request_bytes: usize,
    /// Budget for receiving one whole request, and the write timeout.
    pub read_timeout: Duration,
    /// Consecutive accept failures tolerated before `serve` gives up.
    pub accept_error_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 80)),
            max_request_bytes: 4096,
            read_timeout: Duration::from_secs(5),
            accept_error_limit: 16,
        }
    }
}

/// A response plus a function to run once it has been delivered.
struct Routed {
    response: Response,
    deferred: Option<Invocation>,
}

impl From<Response> for Routed {
    fn from(response: Response) -> Self {
        Self {
            response,
            deferred: None,
        }
    }
}

pub struct PanelServer {
    config: ServerConfig,
    context: Arc<PanelContext>,
}

impl PanelServer {
    pub fn new(config: ServerConfig, context: Arc<PanelContext>) -> Self {
        Self { config, context }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.bind_addr;
        TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })
    }

    /// Bind the configured address and serve until the accept loop fails.
    pub fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        info!("Control panel listening on {}", self.config.bind_addr);
        self.serve(listener)
    }

    /// Serve connections from `listener` one at a time.
    ///
    /// A failed or panicking connection is logged and dropped. Only
    /// `accept_error_limit` consecutive accept failures end the loop.
    pub fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.accept_loop(|| listener.accept())
    }

    fn accept_loop(
        &self,
        mut accept: impl FnMut() -> io::Result<(TcpStream, SocketAddr)>,
    ) -> Result<(), ServerError> {
        let mut failures = 0u32;
        loop {
            match accept() {
                Ok((stream, peer)) => {
                    failures = 0;
                    self.handle(stream, peer);
                }
                Err(e) => {
                    failures += 1;
                    warn!("Failed to accept connection ({} in a row): {}", failures, e);
                    if failures >= self.config.accept_error_limit {
                        error!("Giving up on the listener");
                        return Err(ServerError::Accept {
                            count: failures,
                            source: e,
                        });
                    }
                }
            }
        }
    }

    fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handle_connection(stream, peer)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Connection from {} failed: {}", peer, e),
            Err(_) => error!("Handler panicked serving {}", peer),
        }
    }

    fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<(), ServerError> {
        stream.set_read_timeout(Some(self.config.read_timeout))?;
        stream.set_write_timeout(Some(self.config.read_timeout))?;

        let limit = self.config.max_request_bytes;
        let request = match http::read_request(&mut stream, limit, self.config.read_timeout) {
            Ok(request) => request,
            Err(HttpError::Closed) => return Ok(()),
            Err(HttpError::Io(e)) => return Err(e.into()),
            Err(e) => {
                debug!("Rejecting request from {}: {}", peer, e);
                Response::text(rejection_status(&e), e.to_string()).write_to(&mut stream)?;
                close(&mut stream);
                return Ok(());
            }
        };

        debug!("{} {:?} {}", peer, request.method, request.path);
        let routed = self.route(&request);
        routed.response.write_to(&mut stream)?;
        close(&mut stream);
        drop(stream);

        if let Some(invocation) = routed.deferred {
            info!("Running '{}' after response", invocation.spec.id);
            if let Err(e) = invocation.run() {
                warn!("'{}' failed: {}", invocation.spec.id, e);
            }
        }
        Ok(())
    }

    fn route(&self, request: &Request) -> Routed {
        let path = request.path.as_str();
        match &request.method {
            Method::Get if path == "/" => self.page().into(),
            Method::Get => match path.strip_prefix("/show/").filter(|id| is_segment(id)) {
                Some(id) => self.show(id).into(),
                None => not_found(path).into(),
            },
            Method::Post => match path.strip_prefix('/').filter(|id| is_segment(id)) {
                Some(id) => self.call(id, request),
                None => not_found(path).into(),
            },
            Method::Other(method) => {
                let mut response = Response::text(405, format!("method {} not allowed", method));
                response
                    .headers
                    .push(("Allow".to_string(), "GET, POST".to_string()));
                response.into()
            }
        }
    }

    fn page(&self) -> Response {
        match self.context.dispatcher().registry() {
            Ok(registry) => Response::html(page::render(&registry, &self.context.status())),
            Err(e) => {
                warn!("Cannot render the panel: {}", e);
                error_response(&e)
            }
        }
    }

    fn show(&self, id: &str) -> Response {
        let dispatcher = self.context.dispatcher();
        let spec = match dispatcher.resolve(id) {
            Ok(spec) => spec,
            Err(e) => return error_response(&e),
        };
        if spec.kind != PresentationType::Show {
            return Response::text(400, format!("'{}' is not a show function", id));
        }
        match Invocation::named(spec, &HashMap::new()).and_then(|invocation| invocation.run()) {
            Ok(text) => Response::text(200, text),
            Err(e) => error_response(&e.into()),
        }
    }

    fn call(&self, id: &str, request: &Request) -> Routed {
        let spec = match self.context.dispatcher().resolve(id) {
            Ok(spec) => spec,
            Err(e) => return error_response(&e).into(),
        };
        let kind = spec.kind;
        let after_response = spec.after_response;
        let args = positional_args(&request.form());

        let invocation = match Invocation::positional(spec, &args) {
            Ok(invocation) => invocation,
            Err(e) => return failed(id, kind, e.into()).into(),
        };
        if after_response {
            return Routed {
                response: Response::redirect("/"),
                deferred: Some(invocation),
            };
        }
        match invocation.run() {
            Ok(text) if kind == PresentationType::Rut => Response::text(200, text).into(),
            Ok(text) => {
                debug!("'{}': {}", id, text);
                Response::redirect("/").into()
            }
            Err(e) => failed(id, kind, e.into()).into(),
        }
    }
}

/// Failure of a POSTed function: `rut` forms show the message, plain
/// forms are sent back to the panel.
fn failed(id: &str, kind: PresentationType, e: PanelError) -> Response {
    warn!("'{}' failed: {}", id, e);
    match kind {
        PresentationType::Rut => Response::text(500, e.to_string()),
        _ => Response::redirect("/"),
    }
}

fn error_response(e: &PanelError) -> Response {
    let status = match e {
        PanelError::Dispatch(DispatchError::NotFound(_)) => 404,
        _ => 500,
    };
    Response::text(status, e.to_string())
}

fn not_found(path: &str) -> Response {
    Response::text(404, format!("no route for {}", path))
}

fn rejection_status(e: &HttpError) -> u16 {
    match e {
        HttpError::TooLarge { .. } => 413,
        HttpError::Timeout => 408,
        _ => 400,
    }
}

fn is_segment(s: &&str) -> bool {
    !s.is_empty() && !s.contains('/')
}

/// Collect `arg0..argN` into a dense list, filling gaps with "".
fn positional_args(form: &HashMap<String, String>) -> Vec<String> {
    let count = form
        .keys()
        .filter_map(|key| key.strip_prefix("arg")?.parse::<usize>().ok())
        .filter(|&i| i < MAX_ARGS)
        .map(|i| i + 1)
        .max()
        .unwrap_or(0);
    (0..count)
        .map(|i| form.get(&format!("arg{}", i)).cloned().unwrap_or_default())
        .collect()
}

/// Finish the response and read off anything the client is still sending,
/// so closing does not reset the connection under an unread response.
fn close(stream: &mut TcpStream) {
    let _ = stream.flush();
    let _ = stream.shutdown(Shutdown::Write);
    if stream.set_read_timeout(Some(DRAIN_TIMEOUT)).is_err() {
        return;
    }
    let mut sink = [0u8; 512];
    let mut drained = 0usize;
    while drained < 64 * 1024 {
        match stream.read(&mut sink) {
            Ok(0) | Err(_) => break,
            Ok(n) => drained += n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions;
    use crate::http::RequestParser;
    use crate::sim::{SimulatedBoard, SimulatedWifi};
    use crate::wifi::WifiTiming;
    use panel_core::MemoryConfigStorage;
    use pretty_assertions::assert_eq;

    fn server(board: Arc<SimulatedBoard>) -> PanelServer {
        let context = PanelContext::new(
            MemoryConfigStorage::new(),
            Box::new(SimulatedWifi::new()),
            board,
            WifiTiming::default(),
        );
        PanelServer::new(ServerConfig::default(), context)
    }

    fn request(raw: &str) -> Request {
        RequestParser::new(4096)
            .push(raw.as_bytes())
            .unwrap()
            .expect("complete request")
    }

    fn post(path: &str, body: &str) -> Request {
        request(&format!(
            "POST {} HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
            path,
            body.len(),
            body
        ))
    }

    fn body(response: &Response) -> String {
        String::from_utf8_lossy(&response.body).into_owned()
    }

    #[test]
    fn test_index_renders_every_block() {
        let server = server(Arc::new(SimulatedBoard::new(21.5)));
        let routed = server.route(&request("GET / HTTP/1.1\r\n\r\n"));
        assert_eq!(routed.response.status, 200);
        let html = body(&routed.response);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("id=\"led_block\""));
        assert!(html.contains("id=\"reset_block\""));
    }

    #[test]
    fn test_index_unavailable_config() {
        let context = PanelContext::new(
            MemoryConfigStorage::with_document("not json"),
            Box::new(SimulatedWifi::new()),
            Arc::new(SimulatedBoard::new(21.5)),
            WifiTiming::default(),
        );
        let server = PanelServer::new(ServerConfig::default(), context);
        let routed = server.route(&request("GET / HTTP/1.1\r\n\r\n"));
        assert_eq!(routed.response.status, 500);
    }

    #[test]
    fn test_show_routes() {
        let server = server(Arc::new(SimulatedBoard::new(21.5)));

        let ok = server.route(&request("GET /show/get_temperature HTTP/1.1\r\n\r\n"));
        assert_eq!(ok.response.status, 200);
        assert_eq!(body(&ok.response), "21.5°C");

        let missing = server.route(&request("GET /show/nope HTTP/1.1\r\n\r\n"));
        assert_eq!(missing.response.status, 404);

        let wrong_kind = server.route(&request("GET /show/led HTTP/1.1\r\n\r\n"));
        assert_eq!(wrong_kind.response.status, 400);

        let nested = server.route(&request("GET /show/a/b HTTP/1.1\r\n\r\n"));
        assert_eq!(nested.response.status, 404);
    }

    #[test]
    fn test_show_failure_is_500() {
        let board = Arc::new(SimulatedBoard::new(21.5));
        board.set_temperature(None);
        let server = server(board);
        let routed = server.route(&request("GET /show/get_temperature HTTP/1.1\r\n\r\n"));
        assert_eq!(routed.response.status, 500);
        assert!(body(&routed.response).contains("sensor not responding"));
    }

    #[test]
    fn test_function_post_redirects() {
        let board = Arc::new(SimulatedBoard::new(21.5));
        let server = server(board.clone());

        let routed = server.route(&post("/led", "arg0=on"));
        assert_eq!(routed.response.status, 303);
        assert_eq!(routed.response.header("Location"), Some("/"));
        assert!(board.led_on());

        // failures still go back to the panel
        let routed = server.route(&post("/led", "arg0=blink"));
        assert_eq!(routed.response.status, 303);
        assert!(board.led_on());
    }

    #[test]
    fn test_rut_post_returns_text() {
        let server = server(Arc::new(SimulatedBoard::new(21.5)));

        let routed = server.route(&post("/list_credentials", ""));
        assert_eq!(routed.response.status, 200);

        let routed = server.route(&post("/add_credential", "arg0=home&arg1=short"));
        assert_eq!(routed.response.status, 500);
        assert!(body(&routed.response).contains("password must be"));

        let routed = server.route(&post("/add_credential", "arg0=home&arg1=hunter2hunter2"));
        assert_eq!(routed.response.status, 200);
        assert!(server
            .context
            .store()
            .load()
            .unwrap()
            .wifi
            .sta
            .iter()
            .any(|e| e.ssid == "home"));
    }

    #[test]
    fn test_unknown_post_and_method() {
        let server = server(Arc::new(SimulatedBoard::new(21.5)));

        let routed = server.route(&post("/nope", ""));
        assert_eq!(routed.response.status, 404);

        let routed = server.route(&request("PUT / HTTP/1.1\r\n\r\n"));
        assert_eq!(routed.response.status, 405);
        assert_eq!(routed.response.header("Allow"), Some("GET, POST"));
    }

    #[test]
    fn test_reset_is_deferred() {
        let board = Arc::new(SimulatedBoard::new(21.5));
        let server = server(board.clone());

        let routed = server.route(&post(&format!("/{}", functions::RESET), ""));
        assert_eq!(routed.response.status, 303);
        assert_eq!(board.restart_count(), 0);

        let invocation = routed.deferred.expect("deferred invocation");
        assert_eq!(invocation.run().unwrap(), "restarting");
        assert_eq!(board.restart_count(), 1);
    }

    #[test]
    fn test_positional_args_fill_gaps() {
        let form: HashMap<String, String> = [("arg2", "c"), ("arg0", "a"), ("other", "x")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(positional_args(&form), vec!["a", "", "c"]);

        let huge: HashMap<String, String> =
            [("arg99999".to_string(), "x".to_string())].into_iter().collect();
        assert!(positional_args(&huge).is_empty());
    }

    #[test]
    fn test_rejection_status() {
        assert_eq!(rejection_status(&HttpError::TooLarge { limit: 10 }), 413);
        assert_eq!(rejection_status(&HttpError::Timeout), 408);
        assert_eq!(rejection_status(&HttpError::Malformed("x".into())), 400);
    }

    fn accept_error() -> io::Result<(TcpStream, SocketAddr)> {
        Err(io::Error::new(io::ErrorKind::Other, "too many open files"))
    }

    fn closed_connection() -> io::Result<(TcpStream, SocketAddr)> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        drop(client);
        listener.accept()
    }

    fn limited_server(limit: u32) -> PanelServer {
        let context = PanelContext::new(
            MemoryConfigStorage::new(),
            Box::new(SimulatedWifi::new()),
            Arc::new(SimulatedBoard::new(21.5)),
            WifiTiming::default(),
        );
        let config = ServerConfig {
            accept_error_limit: limit,
            read_timeout: Duration::from_millis(500),
            ..ServerConfig::default()
        };
        PanelServer::new(config, context)
    }

    #[test]
    fn test_accept_loop_gives_up_after_limit() {
        let server = limited_server(3);
        let mut calls = 0;
        let result = server.accept_loop(|| {
            calls += 1;
            accept_error()
        });
        assert!(matches!(result, Err(ServerError::Accept { count: 3, .. })));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_accept_success_resets_failure_count() {
        let server = limited_server(3);
        let mut script: Vec<io::Result<(TcpStream, SocketAddr)>> = vec![
            accept_error(),
            accept_error(),
            closed_connection(),
            accept_error(),
            accept_error(),
            accept_error(),
        ];
        script.reverse();
        let result = server.accept_loop(|| script.pop().unwrap_or_else(accept_error));
        assert!(matches!(result, Err(ServerError::Accept { count: 3, .. })));
        assert!(script.is_empty());
    }
}
