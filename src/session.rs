//! Request/response correlation and session lifecycle (spec §4.1, §4.5).

use std::net::Ipv4Addr;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{map_device_error_code, SessionError, SessionResult};
use crate::location::Location;
use crate::reactor::{MessageSink, Reactor};
use crate::reassembler::ScanPacketSource;
use crate::scan_queue::ScanQueue;

/// Matches the reference SDK's default command/connect timeout
/// (`Session::DEFAULT_TIMEOUT`).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Per-session configuration, grounded on the one-`Default`-impl-struct
/// pattern used for connection configs throughout the teacher workspace.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Default command/connect timeout.
    pub timeout: Duration,
    /// When `true`, the control channel rejects the legacy bare-`{...}`
    /// frame form and requires a verified checksum header on every
    /// message (spec §9 open question).
    pub strict: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            strict: false,
        }
    }
}

struct Inner {
    /// The id of the request currently awaiting a response, or `None`
    /// between commands. Mirrors the original's monotonic `id_` counter,
    /// which starts at -1 so the first request sent gets id 0.
    next_id: i64,
    /// Set while `execute` is waiting; the matching response (or a later
    /// message that makes the wait moot) is delivered here.
    pending_response: Option<Value>,
    /// Sticky transport error (spec §7): once set by `on_receive_error`,
    /// every subsequent `execute`/`receive_scan_packet` call returns it
    /// until `close` resets the session.
    last_error: Option<SessionError>,
}

struct Shared {
    inner: Mutex<Inner>,
    response_ready: Condvar,
}

impl MessageSink for Shared {
    /// Mirrors `Session::onMessageReceived`: only messages matching the
    /// id of the request currently in flight are kept, and any stale
    /// queued response is discarded in favor of the newest one.
    fn on_message(&self, message: Value) {
        if message.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return;
        }
        if !(message.get("result").is_some() || message.get("error").is_some()) {
            return;
        }
        let Some(id) = message.get("id").and_then(Value::as_i64) else {
            return;
        };

        let mut inner = self.inner.lock().unwrap();
        if id == inner.next_id {
            inner.pending_response = Some(message);
            self.response_ready.notify_one();
        }
    }

    /// Mirrors the transport's `on_receive_error`: latches the error and
    /// wakes anyone blocked in `execute` so they observe it immediately
    /// rather than waiting out the full timeout.
    fn on_receive_error(&self, error: SessionError) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_error.get_or_insert(error);
        self.response_ready.notify_all();
    }
}

/// Host-side session with a networked rangefinder device: owns the control
/// channel's request/response correlation, the bounded scan-packet queue,
/// and the reactor thread driving both.
pub struct Session {
    shared: Arc<Shared>,
    reactor: Option<Reactor>,
    scan_queue: Arc<ScanQueue>,
    timeout: Duration,
    strict: bool,
    command_lock: Mutex<()>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    /// Builds a session from an explicit [`SessionConfig`] instead of the
    /// defaults `new` uses.
    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    next_id: -1,
                    pending_response: None,
                    last_error: None,
                }),
                response_ready: Condvar::new(),
            }),
            reactor: None,
            scan_queue: Arc::new(ScanQueue::new()),
            timeout: config.timeout,
            strict: config.strict,
            command_lock: Mutex::new(()),
        }
    }

    /// Overrides the default command/connect timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Opens the control channel to `location`. Leaves the session closed
    /// on failure, matching the original's "transport_ = nullptr" reset.
    pub fn open(&mut self, location: Location) -> SessionResult<()> {
        let reactor = Reactor::connect(location, self.timeout, self.strict, self.shared.clone())?;
        self.reactor = Some(reactor);
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(mut reactor) = self.reactor.take() {
            reactor.disconnect();
        }
        self.scan_queue.clear();
        let mut inner = self.shared.inner.lock().unwrap();
        inner.pending_response = None;
        inner.last_error = None;
    }

    pub fn is_opened(&self) -> bool {
        self.reactor.is_some()
    }

    /// A bare JSON-RPC 2.0 envelope with `method` left for the caller to
    /// fill in, matching `Session::createEmptyRequestObject`.
    pub fn create_empty_request() -> Value {
        json!({ "jsonrpc": "2.0", "method": Value::Null })
    }

    /// Sends `request` without waiting for a response.
    pub fn execute_no_reply(&self, mut request: Value) -> SessionResult<()> {
        let reactor = self.reactor.as_ref().ok_or(SessionError::ConnectionLost)?;
        let _command_guard = self.command_lock.lock().unwrap();

        if let Some(sticky) = self.shared.inner.lock().unwrap().last_error.clone() {
            return Err(sticky);
        }

        let id = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.next_id += 1;
            inner.next_id
        };
        request["id"] = json!(id);
        reactor.dispatch(&request)
    }

    /// Sends `request` and waits up to the session's configured timeout
    /// for the matching response, returning the `result` value or mapping
    /// a JSON-RPC error to a [`SessionError`] (spec §4.5).
    pub fn execute(&self, mut request: Value) -> SessionResult<Value> {
        let reactor = self.reactor.as_ref().ok_or(SessionError::ConnectionLost)?;
        let _command_guard = self.command_lock.lock().unwrap();

        if let Some(sticky) = self.shared.inner.lock().unwrap().last_error.clone() {
            return Err(sticky);
        }

        let id = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.next_id += 1;
            inner.next_id
        };
        request["id"] = json!(id);
        reactor.dispatch(&request)?;

        let inner = self.shared.inner.lock().unwrap();
        let (mut inner, timeout_result) = self
            .shared
            .response_ready
            .wait_timeout_while(inner, self.timeout, |inner| {
                inner.pending_response.is_none() && inner.last_error.is_none()
            })
            .unwrap();

        if let Some(sticky) = inner.last_error.clone() {
            return Err(sticky);
        }
        if timeout_result.timed_out() && inner.pending_response.is_none() {
            return Err(SessionError::TimedOut);
        }

        let message = inner.pending_response.take().expect("response present");
        drop(inner);

        if let Some(result) = message.get("result") {
            return Ok(result.clone());
        }
        match message.get("error").and_then(|e| e.get("code")).and_then(Value::as_i64) {
            Some(code) => Err(map_device_error_code(code)),
            None => Err(SessionError::Unknown),
        }
    }

    /// Opens the UDP data channel bound to `bind_port`, connected to the
    /// device at `device_address:device_port`.
    pub fn open_data_channel(
        &self,
        device_address: Ipv4Addr,
        bind_port: u16,
        device_port: u16,
    ) -> SessionResult<()> {
        let reactor = self.reactor.as_ref().ok_or(SessionError::ConnectionLost)?;
        reactor.open_data_channel(device_address, bind_port, device_port, self.scan_queue.clone())
    }

    /// Blocks up to the session's timeout for the next scan packet.
    pub fn receive_scan_packet(&self) -> SessionResult<Vec<u8>> {
        if let Some(sticky) = self.shared.inner.lock().unwrap().last_error.clone() {
            return Err(sticky);
        }
        self.scan_queue
            .pop(self.timeout)
            .ok_or(SessionError::TimedOut)
    }
}

impl ScanPacketSource for Session {
    fn receive_scan_packet(&self) -> SessionResult<Vec<u8>> {
        Session::receive_scan_packet(self)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
