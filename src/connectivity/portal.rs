//! The settings portal: a tiny HTTP/1.1 server for reading and replacing the
//! device settings.
//!
//! | Request            | Reply                                        |
//! |--------------------|----------------------------------------------|
//! | `OPTIONS *`        | 200, empty                                   |
//! | `GET /`            | 200, settings page                           |
//! | `GET /settings`    | 200, settings JSON                           |
//! | `POST /update`     | 201 `{"status":"ok"}`, then persist + restart |
//! | anything else      | 404                                          |
//!
//! Every reply carries permissive CORS headers so the page can also be
//! served from a development machine.
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::fmt::Write as _;

use heapless::String;

use crate::config::{DeviceConfig, SETTINGS_JSON_CAPACITY};
use crate::{Error, Result};

/// TCP port the portal listens on.
pub const HTTP_PORT: u16 = 80;
/// Largest request, head plus body, the portal accepts.
pub const MAX_REQUEST_LEN: usize = 1536;
/// Room for a status line and headers.
pub const HEAD_CAPACITY: usize = 384;
/// Delay between acknowledging an update and restarting.
pub const RESTART_DELAY_MILLIS: u64 = 1000;

/// Settings page served at `/`.
pub const INDEX_HTML: &str = include_str!("../../static/index.html");
const UPDATE_ACK: &str = r#"{"status":"ok"}"#;

/// HTTP methods the router distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `OPTIONS`
    Options,
    /// Anything else.
    Other,
}

/// A parsed request. Borrows the receive buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request<'a> {
    /// Request method.
    pub method: Method,
    /// Path without the query string.
    pub path: &'a str,
    /// Body bytes, bounded by `Content-Length`.
    pub body: &'a [u8],
}

/// Length of the head including the blank line, once it has fully arrived.
#[must_use]
pub fn head_length(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .and_then(|position| position.checked_add(4))
}

/// Total request length once head and body have both arrived.
#[must_use]
pub fn complete_length(buffer: &[u8]) -> Option<usize> {
    let head_len = head_length(buffer)?;
    let head = core::str::from_utf8(buffer.get(..head_len)?).ok()?;
    let total = head_len.checked_add(content_length(head))?;
    (buffer.len() >= total).then_some(total)
}

fn content_length(head: &str) -> usize {
    head.split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Parse a request out of `buffer`.
///
/// # Errors
///
/// Returns [`Error::MalformedRequest`] if the head is incomplete, not UTF-8,
/// or has no request line.
pub fn parse_request(buffer: &[u8]) -> Result<Request<'_>> {
    let head_len = head_length(buffer).ok_or(Error::MalformedRequest)?;
    let head = buffer
        .get(..head_len)
        .and_then(|head| core::str::from_utf8(head).ok())
        .ok_or(Error::MalformedRequest)?;
    let mut request_line = head
        .lines()
        .next()
        .ok_or(Error::MalformedRequest)?
        .split_whitespace();
    let method = match request_line.next().ok_or(Error::MalformedRequest)? {
        "GET" => Method::Get,
        "POST" => Method::Post,
        "OPTIONS" => Method::Options,
        _ => Method::Other,
    };
    let target = request_line.next().ok_or(Error::MalformedRequest)?;
    let path = target.split_once('?').map_or(target, |(path, _)| path);

    let body_end = head_len
        .saturating_add(content_length(head))
        .min(buffer.len());
    let body = buffer.get(head_len..body_end).unwrap_or_default();
    Ok(Request { method, path, body })
}

/// Reply status codes the portal uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// 200
    Ok,
    /// 201
    Created,
    /// 400
    BadRequest,
    /// 404
    NotFound,
    /// 500
    InternalError,
}

impl Status {
    /// Numeric status code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Created => 201,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::InternalError => 500,
        }
    }

    /// Reason phrase.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Created => "Created",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::InternalError => "Internal Server Error",
        }
    }
}

/// Reply body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    /// No body.
    Empty,
    /// A constant body.
    Static(&'static str),
    /// Settings JSON.
    Json(String<SETTINGS_JSON_CAPACITY>),
}

impl Body {
    /// Body bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Empty => &[],
            Self::Static(text) => text.as_bytes(),
            Self::Json(json) => json.as_bytes(),
        }
    }
}

/// What the server must do after sending a reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Nothing.
    None,
    /// Persist these settings, then restart.
    PersistAndRestart(DeviceConfig),
}

/// A routed reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// Status line.
    pub status: Status,
    /// `Content-Type`, if there is a body.
    pub content_type: Option<&'static str>,
    /// Body.
    pub body: Body,
    /// Follow-up for the server.
    pub action: Action,
}

impl Reply {
    const fn new(status: Status, content_type: Option<&'static str>, body: Body) -> Self {
        Self {
            status,
            content_type,
            body,
            action: Action::None,
        }
    }

    /// The reply sent when saving settings failed.
    #[must_use]
    pub const fn storage_failure() -> Self {
        Self::new(
            Status::InternalError,
            Some("application/json"),
            Body::Static(r#"{"status":"error"}"#),
        )
    }

    /// Write the status line and headers into `head`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormatError`] if the head does not fit.
    pub fn write_head(&self, head: &mut String<HEAD_CAPACITY>) -> Result<()> {
        head.clear();
        write!(
            head,
            "HTTP/1.1 {} {}\r\n\
             Access-Control-Allow-Origin: *\r\n\
             Access-Control-Allow-Methods: GET, POST, PATCH, PUT, DELETE, OPTIONS\r\n\
             Access-Control-Allow-Headers: Origin, Content-Type, X-Auth-Token\r\n",
            self.status.code(),
            self.status.reason()
        )
        .map_err(|_| Error::FormatError)?;
        if let Some(content_type) = self.content_type {
            write!(head, "Content-Type: {content_type}\r\n").map_err(|_| Error::FormatError)?;
        }
        write!(
            head,
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.as_bytes().len()
        )
        .map_err(|_| Error::FormatError)
    }
}

/// Route `request` against the current settings.
#[must_use]
pub fn route(request: &Request<'_>, config: &DeviceConfig) -> Reply {
    match (request.method, request.path) {
        (Method::Options, _) => Reply::new(Status::Ok, None, Body::Empty),
        (Method::Get, "/" | "/index.html") => Reply::new(
            Status::Ok,
            Some("text/html; charset=utf-8"),
            Body::Static(INDEX_HTML),
        ),
        (Method::Get, "/settings") => match config.to_json() {
            Ok(json) => Reply::new(Status::Ok, Some("application/json"), Body::Json(json)),
            Err(err) => {
                warn!("Portal: {}", err);
                Reply::new(Status::InternalError, None, Body::Empty)
            }
        },
        (Method::Post, "/update") => match DeviceConfig::from_json(request.body) {
            Ok(update) => Reply {
                action: Action::PersistAndRestart(update),
                ..Reply::new(
                    Status::Created,
                    Some("application/json"),
                    Body::Static(UPDATE_ACK),
                )
            },
            Err(err) => {
                warn!("Portal: {}", err);
                Reply::new(Status::BadRequest, None, Body::Empty)
            }
        },
        _ => Reply::new(Status::NotFound, None, Body::Empty),
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
mod server {
    use cortex_m::peripheral::SCB;
    use embassy_net::Stack;
    use embassy_net::tcp::TcpSocket;
    use embassy_time::{Duration, Timer};
    use embedded_io_async::Write;
    use heapless::String;

    use super::{
        Action, HEAD_CAPACITY, HTTP_PORT, MAX_REQUEST_LEN, RESTART_DELAY_MILLIS, Reply,
        complete_length, parse_request, route,
    };
    use crate::config::DeviceConfig;
    use crate::storage::{SettingsFlash, SettingsStore};
    use crate::{Error, Result};

    /// Serve the settings portal until a settings update restarts the device.
    #[embassy_executor::task]
    pub async fn portal_task(
        stack: Stack<'static>,
        config: &'static DeviceConfig,
        mut store: SettingsFlash,
    ) -> ! {
        info!("Portal: listening on port {}", HTTP_PORT);
        let mut rx_buffer = [0u8; 2048];
        let mut tx_buffer = [0u8; 4096];
        let mut request = [0u8; MAX_REQUEST_LEN];

        loop {
            let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
            socket.set_timeout(Some(Duration::from_secs(10)));
            if socket.accept(HTTP_PORT).await.is_err() {
                warn!("Portal: accept failed");
                continue;
            }

            let restart = match serve_connection(&mut socket, &mut request, config, &mut store).await {
                Ok(restart) => restart,
                Err(err) => {
                    debug!("Portal: {}", err);
                    false
                }
            };
            socket.close();
            // Let the FIN go out before the socket is dropped.
            if socket.flush().await.is_err() {
                debug!("Portal: flush after close failed");
            }

            if restart {
                info!("Portal: settings saved, restarting in {} ms", RESTART_DELAY_MILLIS);
                Timer::after_millis(RESTART_DELAY_MILLIS).await;
                SCB::sys_reset();
            }
            Timer::after_millis(50).await;
        }
    }

    async fn serve_connection(
        socket: &mut TcpSocket<'_>,
        buffer: &mut [u8; MAX_REQUEST_LEN],
        config: &DeviceConfig,
        store: &mut SettingsFlash,
    ) -> Result<bool> {
        let mut filled = 0;
        let len = loop {
            let free = buffer.get_mut(filled..).ok_or(Error::MalformedRequest)?;
            if free.is_empty() {
                return Err(Error::MalformedRequest);
            }
            let read = socket.read(free).await.map_err(|_| Error::Network)?;
            if read == 0 {
                return Err(Error::MalformedRequest);
            }
            filled = filled.saturating_add(read);
            if let Some(len) = buffer.get(..filled).and_then(complete_length) {
                break len;
            }
        };

        let request = parse_request(buffer.get(..len).ok_or(Error::MalformedRequest)?)?;
        debug!("Portal: {} bytes for {}", len, request.path);
        let mut reply = route(&request, config);
        let mut restart = false;
        if let Action::PersistAndRestart(update) = &reply.action {
            match store.save(update) {
                Ok(()) => restart = true,
                Err(err) => {
                    error!("Portal: {}", err);
                    reply = Reply::storage_failure();
                }
            }
        }

        let mut head: String<HEAD_CAPACITY> = String::new();
        reply.write_head(&mut head)?;
        socket
            .write_all(head.as_bytes())
            .await
            .map_err(|_| Error::Network)?;
        socket
            .write_all(reply.body.as_bytes())
            .await
            .map_err(|_| Error::Network)?;
        socket.flush().await.map_err(|_| Error::Network)?;
        Ok(restart)
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
pub use server::portal_task;
