//! Single-worker-thread I/O reactor (spec §4.4).
//!
//! The reference SDK runs an Asio `io_service` on one dedicated thread and
//! posts all socket work through it. Here the dedicated thread drives a
//! current-thread Tokio runtime instead: everything spawned onto it — the
//! control-channel read/write loop and the UDP receive loop — provably
//! runs on that single thread, so the "one worker thread" invariant holds
//! without hand-rolling an event loop. `open_data_channel` uses a cloned
//! `runtime::Handle` to post the data-channel task from the caller's
//! thread onto the reactor thread, the same role `io_service::post` plays
//! in the original.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace, warn};
use serde_json::Value;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::runtime::{Builder, Handle};
use tokio::sync::{mpsc, oneshot};

use crate::error::{classify_receive_error, SessionError, SessionResult};
use crate::frame::{self, EncodedFrame};
use crate::location::Location;
use crate::scan_packet;
use crate::scan_queue::ScanQueue;

/// Receives decoded control-channel messages directly on the reactor
/// thread, mirroring the reference SDK's `onMessageReceived` callback
/// invoked straight from the Asio thread.
pub trait MessageSink: Send + Sync {
    fn on_message(&self, message: Value);

    /// A transport-level error on either socket (spec §7): becomes sticky
    /// at the session until `close`.
    fn on_receive_error(&self, error: SessionError);
}

/// Keepalive tuning applied to the control-channel socket, matching the
/// reference SDK's transport (spec §4.4: ~1.5s idle/interval, 2 probes).
const KEEPALIVE_IDLE: Duration = Duration::from_millis(1500);
const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1500);
const KEEPALIVE_RETRIES: u32 = 2;

enum Outgoing {
    Frame(EncodedFrame),
    Shutdown,
}

/// Handle to the running reactor. Dropping it stops the worker thread.
pub struct Reactor {
    runtime_handle: Handle,
    outgoing_tx: mpsc::UnboundedSender<Outgoing>,
    udp_shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    thread: Option<JoinHandle<()>>,
    sink: Arc<dyn MessageSink>,
}

impl Reactor {
    /// Opens the control channel, starts the worker thread, and begins
    /// reading frames, forwarding each decoded JSON-RPC document on
    /// `message_tx`.
    pub fn connect(
        location: Location,
        connect_timeout: Duration,
        strict: bool,
        sink: Arc<dyn MessageSink>,
    ) -> SessionResult<Reactor> {
        let Location::Network { address, port } = location;
        let addr = SocketAddr::from((address, port));

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<SessionResult<Handle>>();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<Outgoing>();
        let control_sink = sink.clone();

        let thread = thread::Builder::new()
            .name("ldcp-reactor".into())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(SessionError::from(e)));
                        return;
                    }
                };
                let handle = runtime.handle().clone();
                runtime.block_on(async move {
                    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
                        Ok(Ok(stream)) => stream,
                        Ok(Err(e)) => {
                            let _ = ready_tx.send(Err(SessionError::from(e)));
                            return;
                        }
                        Err(_) => {
                            let _ = ready_tx.send(Err(SessionError::TimedOut));
                            return;
                        }
                    };
                    apply_keepalive(&stream);
                    let _ = ready_tx.send(Ok(handle));
                    run_control_channel(stream, outgoing_rx, strict, control_sink).await;
                });
            })
            .expect("spawning the reactor thread");

        let runtime_handle = match ready_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(SessionError::Unknown),
        };

        Ok(Reactor {
            runtime_handle,
            outgoing_tx,
            udp_shutdown_tx: Mutex::new(None),
            thread: Some(thread),
            sink,
        })
    }

    /// Queues a frame for the worker thread to write; this is the only
    /// place outgoing bytes are produced, so writes always happen on the
    /// reactor thread regardless of which thread calls `dispatch`.
    pub fn dispatch(&self, document: &Value) -> SessionResult<()> {
        let frame = frame::encode(document);
        self.outgoing_tx
            .send(Outgoing::Frame(frame))
            .map_err(|_| SessionError::ConnectionLost)
    }

    /// Opens the UDP data channel, binding locally to `bind_port` and
    /// connecting to the device's data-channel port, then starts a receive
    /// loop — spawned onto the reactor thread via the cloned runtime
    /// handle — that verifies and enqueues packets onto `queue`.
    pub fn open_data_channel(
        &self,
        device_address: Ipv4Addr,
        bind_port: u16,
        device_port: u16,
        queue: std::sync::Arc<ScanQueue>,
    ) -> SessionResult<()> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.udp_shutdown_tx.lock().unwrap() = Some(shutdown_tx);

        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, bind_port));
        let device_addr = SocketAddr::from((device_address, device_port));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<SessionResult<()>>();
        let sink = self.sink.clone();

        self.runtime_handle.spawn(async move {
            let bound = async {
                let socket = UdpSocket::bind(bind_addr).await?;
                socket.connect(device_addr).await?;
                Ok::<_, std::io::Error>(socket)
            }
            .await;

            match bound {
                Ok(socket) => {
                    let _ = ready_tx.send(Ok(()));
                    run_data_channel(socket, queue, sink, shutdown_rx).await;
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(SessionError::from(e)));
                }
            }
        });

        ready_rx.recv().map_err(|_| SessionError::Unknown)?
    }

    pub fn disconnect(&mut self) {
        let _ = self.outgoing_tx.send(Outgoing::Shutdown);
        if let Some(tx) = self.udp_shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn apply_keepalive(stream: &TcpStream) {
    let sock_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL);
    #[cfg(any(target_os = "linux", target_os = "windows", target_os = "macos"))]
    let keepalive = keepalive.with_retries(KEEPALIVE_RETRIES);
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        warn!("failed to configure TCP keepalive: {e}");
    }
}

async fn run_control_channel(
    stream: TcpStream,
    mut outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
    strict: bool,
    sink: Arc<dyn MessageSink>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();

    loop {
        line.clear();
        tokio::select! {
            read_result = reader.read_until(b'\n', &mut line) => {
                match read_result {
                    Ok(0) => {
                        debug!("control channel closed by peer");
                        sink.on_receive_error(SessionError::ConnectionLost);
                        break;
                    }
                    Ok(_) => {
                        let body = trim_trailing_crlf(&line);
                        let decoded = if strict {
                            frame::decode_strict(body)
                        } else {
                            frame::decode(body)
                        };
                        match decoded {
                            Some(doc) => sink.on_message(doc),
                            None => trace!("discarding unparseable control-channel frame"),
                        }
                    }
                    Err(e) => {
                        let mapped = classify_receive_error(&e);
                        warn!("control channel read error: {e} ({mapped:?})");
                        sink.on_receive_error(mapped);
                        break;
                    }
                }
            }
            outgoing = outgoing_rx.recv() => {
                match outgoing {
                    Some(Outgoing::Frame(frame)) => {
                        for buf in frame.buffers() {
                            if let Err(e) = write_half.write_all(buf).await {
                                warn!("control channel write error: {e}");
                                sink.on_receive_error(classify_receive_error(&e));
                                return;
                            }
                        }
                    }
                    Some(Outgoing::Shutdown) | None => {
                        let _ = write_half.shutdown().await;
                        break;
                    }
                }
            }
        }
    }
}

fn trim_trailing_crlf(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    if end > 0 && line[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && line[end - 1] == b'\r' {
        end -= 1;
    }
    &line[..end]
}

/// Runs the UDP scan-packet receive loop: reads datagrams, verifies each
/// with [`scan_packet::verify`], and pushes the survivors onto `queue`
/// (spec §4.6). Malformed packets are dropped silently, matching the
/// reference SDK's tolerance for transient corruption on a UDP channel.
async fn run_data_channel(
    socket: UdpSocket,
    queue: std::sync::Arc<ScanQueue>,
    sink: Arc<dyn MessageSink>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut buf = vec![0u8; scan_packet::SCAN_PACKET_LENGTH_MAX];
    loop {
        tokio::select! {
            result = socket.recv(&mut buf) => {
                match result {
                    Ok(n) => {
                        let mut packet = buf[..n].to_vec();
                        if scan_packet::verify(&mut packet) {
                            queue.push(packet);
                        } else {
                            trace!("dropping malformed scan packet ({n} bytes)");
                        }
                    }
                    Err(e) => {
                        warn!("data channel receive error: {e}");
                        sink.on_receive_error(classify_receive_error(&e));
                        break;
                    }
                }
            }
            _ = &mut shutdown_rx => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_crlf_and_bare_lf() {
        assert_eq!(trim_trailing_crlf(b"abc\r\n"), b"abc");
        assert_eq!(trim_trailing_crlf(b"abc\n"), b"abc");
        assert_eq!(trim_trailing_crlf(b"abc"), b"abc");
    }
}
