//! Control-channel wire framing (spec §4.2, §6).
//!
//! ```text
//! "15:checksum=0x" HHHH ","       leading header tuple, H = uppercase hex
//! "0:,"                           end-of-headers sentinel
//! <decimal-len> ":" <JSON bytes> ","
//! ```
//! followed by a `"\r\n"` delimiter the reactor strips before handing the
//! frame body to [`decode`].

use crate::crc16::crc16;
use serde_json::Value;

/// Upper bound on an accepted JSON payload, in bytes (spec §4.2).
pub const MESSAGE_LENGTH_MAX: usize = 1 << 20;

/// The three scatter-gather buffers of an encoded request, so the caller can
/// hand them to a single vectored write call instead of concatenating them.
pub struct EncodedFrame {
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
    pub trailer: Vec<u8>,
}

impl EncodedFrame {
    /// Borrowed scatter-gather view, in wire order.
    pub fn buffers(&self) -> [&[u8]; 3] {
        [&self.header, &self.payload, &self.trailer]
    }

    /// Total encoded length, for tests and telemetry.
    pub fn len(&self) -> usize {
        self.header.len() + self.payload.len() + self.trailer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encodes a JSON-RPC document into the three wire buffers described above.
pub fn encode(document: &Value) -> EncodedFrame {
    let payload = serde_json::to_vec(document).expect("JSON-RPC document must serialize");
    let checksum = crc16(&payload);

    let mut header = Vec::with_capacity(32);
    header.extend_from_slice(format!("15:checksum=0x{checksum:04X},").as_bytes());
    header.extend_from_slice(b"0:,");
    header.extend_from_slice(format!("{}:", payload.len()).as_bytes());

    let trailer = b",\r\n".to_vec();

    EncodedFrame {
        header,
        payload,
        trailer,
    }
}

/// One parsed header tuple (`checksum=0xHHHH` being the only one currently
/// recognized; unknown headers are skipped so the framing stays forward
/// compatible).
struct ParsedHeaders {
    checksum: Option<u16>,
}

/// Parses `decimal_count ":" <count bytes> ","` at the front of `buf`,
/// returning the tuple payload and the number of bytes consumed.
fn read_tuple<'a>(buf: &'a [u8], cursor: &mut usize) -> Option<&'a [u8]> {
    let start = *cursor;
    let colon = buf[start..].iter().position(|&b| b == b':')? + start;
    let count_str = std::str::from_utf8(&buf[start..colon]).ok()?;
    let count: usize = count_str.parse().ok()?;
    if count > MESSAGE_LENGTH_MAX {
        return None;
    }
    let data_start = colon + 1;
    let data_end = data_start.checked_add(count)?;
    if data_end >= buf.len() {
        return None;
    }
    if buf[data_end] != b',' {
        return None;
    }
    *cursor = data_end + 1;
    Some(&buf[data_start..data_end])
}

fn parse_headers(buf: &[u8], cursor: &mut usize) -> Option<ParsedHeaders> {
    let mut checksum = None;
    loop {
        let start = *cursor;
        let tuple = read_tuple(buf, cursor)?;
        if tuple.is_empty() && *cursor > start {
            // A zero-length tuple (`0:,`) terminates the header list.
            // `read_tuple` already advanced the cursor past it.
            return Some(ParsedHeaders { checksum });
        }
        let text = std::str::from_utf8(tuple).ok()?;
        if let Some(value) = text.strip_prefix("checksum=0x") {
            checksum = u16::from_str_radix(value, 16).ok();
        }
    }
}

/// Decodes one delimited control-channel frame (the reactor has already
/// split the incoming byte stream on `"\r\n"` and stripped the delimiter).
///
/// Returns `None` on any framing failure — callers (the reactor) must
/// treat that as "ignore this frame" rather than tearing down the session
/// (spec §7). Accepts the legacy bare-`{...}` form with no checksum; use
/// [`decode_strict`] to reject it.
pub fn decode(buf: &[u8]) -> Option<Value> {
    decode_with_mode(buf, false)
}

/// As [`decode`], but also rejects the legacy bare-`{...}` form
/// (`SessionConfig::strict`, spec §9 open question) — every frame must be
/// tuple-framed with a verified checksum header.
pub fn decode_strict(buf: &[u8]) -> Option<Value> {
    decode_with_mode(buf, true)
}

fn decode_with_mode(buf: &[u8], strict: bool) -> Option<Value> {
    let first_non_ws = buf.iter().position(|b| !b.is_ascii_whitespace())?;
    if buf[first_non_ws] == b'{' {
        if strict {
            return None;
        }
        // Legacy backward-compatibility path: bare JSON, no checksum.
        return serde_json::from_slice(&buf[first_non_ws..]).ok();
    }

    let mut cursor = first_non_ws;
    let headers = parse_headers(buf, &mut cursor)?;
    let payload = read_tuple(buf, &mut cursor)?;

    // A tuple-framed message always carries a checksum header; unlike the
    // legacy bare-`{...}` path, `strict` has no bearing here — a missing
    // header fails verification exactly like a mismatched one (matches the
    // reference's `expected_checksum = -1` never comparing equal).
    let expected = headers.checksum?;
    if crc16(payload) != expected {
        return None;
    }

    serde_json::from_slice(payload).ok()
}
