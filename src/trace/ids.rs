//! The ID codec: lossless conversion between the three representations of
//! trace and span identifiers used across the system.
//!
//! Identifiers live as lowercase hex strings (16 characters for 64-bit IDs,
//! 32 for 128-bit trace IDs), cross typed in-process boundaries as signed
//! 64-bit integers, and cross binary transports as big-endian byte buffers.
//! The signed/unsigned boundary uses two's-complement interpretation, so
//! `-1` maps to `ffffffffffffffff` and `i64::MIN` maps to
//! `8000000000000000`. These exact mappings are load-bearing for interop
//! with tracer implementations in other runtimes and must match
//! bit-for-bit.

use rand::{rngs, Rng, SeedableRng};
use std::cell::RefCell;
use std::fmt::Write as _;

use crate::error::Error;

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_entropy());
}

/// Generates a cryptographically random lowercase hex string of exactly
/// `length` characters.
pub fn generate_random_id(length: usize) -> String {
    match length {
        16 => CURRENT_RNG.with(|rng| format!("{:016x}", rng.borrow_mut().gen::<u64>())),
        32 => CURRENT_RNG.with(|rng| format!("{:032x}", rng.borrow_mut().gen::<u128>())),
        _ => CURRENT_RNG.with(|rng| {
            let mut rng = rng.borrow_mut();
            let mut id = String::with_capacity(length + 1);
            while id.len() < length {
                let _ = write!(id, "{:02x}", rng.gen::<u8>());
            }
            id.truncate(length);
            id
        }),
    }
}

/// Generates a random 64-bit trace ID (16 hex characters).
///
/// 128-bit trace IDs are accepted on the wire but not generated.
pub fn generate_random_trace_id() -> String {
    generate_random_id(16)
}

/// Generates a random span ID (16 hex characters).
pub fn generate_random_span_id() -> String {
    generate_random_id(16)
}

/// Converts a signed 64-bit integer to its 16-character unsigned hex
/// representation.
pub fn signed_i64_to_unsigned_hex(value: i64) -> String {
    format!("{:016x}", value as u64)
}

/// Converts a 128-bit ID, split into two signed 64-bit halves, to its
/// 32-character unsigned hex representation (`hi` followed by `lo`).
pub fn signed_i64_pair_to_unsigned_hex(hi: i64, lo: i64) -> String {
    format!("{:016x}{:016x}", hi as u64, lo as u64)
}

/// Converts a 16-character unsigned hex string to a signed 64-bit integer.
pub fn unsigned_hex_to_signed_i64(hex: &str) -> Result<i64, Error> {
    if hex.len() != 16 {
        return Err(Error::InvalidId(hex.to_owned()));
    }
    u64::from_str_radix(hex, 16)
        .map(|unsigned| unsigned as i64)
        .map_err(|_| Error::InvalidId(hex.to_owned()))
}

/// Extracts the low 64 bits of a 32-character trace ID as a signed 64-bit
/// integer.
pub fn unsigned_hex_to_lo_signed_i64(hex: &str) -> Result<i64, Error> {
    if hex.len() != 32 {
        return Err(Error::InvalidId(hex.to_owned()));
    }
    unsigned_hex_to_signed_i64(&hex[16..])
}

/// Converts a 16- or 32-character unsigned hex string to its big-endian
/// binary representation (8 or 16 bytes).
pub fn unsigned_hex_to_bytes(hex: &str) -> Result<Vec<u8>, Error> {
    if hex.len() != 16 && hex.len() != 32 {
        return Err(Error::InvalidId(hex.to_owned()));
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for i in (0..hex.len()).step_by(2) {
        let byte = u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|_| Error::InvalidId(hex.to_owned()))?;
        bytes.push(byte);
    }
    Ok(bytes)
}

/// Writes the binary form of a 16- or 32-character hex string into `buffer`,
/// right-aligned at `offset_from_right` bytes before the buffer's end.
pub fn write_unsigned_hex_to_buffer(
    hex: &str,
    buffer: &mut [u8],
    offset_from_right: usize,
) -> Result<(), Error> {
    let bytes = unsigned_hex_to_bytes(hex)?;
    let end = buffer
        .len()
        .checked_sub(offset_from_right)
        .ok_or(Error::BufferTooSmall {
            len: buffer.len(),
            needed: bytes.len(),
            offset: offset_from_right,
        })?;
    let start = end.checked_sub(bytes.len()).ok_or(Error::BufferTooSmall {
        len: buffer.len(),
        needed: bytes.len(),
        offset: offset_from_right,
    })?;
    buffer[start..end].copy_from_slice(&bytes);
    Ok(())
}

/// A trace ID/span ID pair read from or destined for a binary transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BinaryTraceContext {
    /// The trace ID, 16 or 32 hex characters; empty when nothing was read.
    pub t: String,
    /// The span ID, 16 hex characters; empty when nothing was read.
    pub s: String,
}

impl BinaryTraceContext {
    /// Whether both IDs are present.
    pub fn is_complete(&self) -> bool {
        !self.t.is_empty() && !self.s.is_empty()
    }
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Reads a trace ID/span ID pair from a fixed 24-byte buffer laid out as
/// `[8 bytes trace-id-high][8 bytes trace-id-low][8 bytes span-id]`, all
/// big-endian.
///
/// When the high 8 bytes are all zero the trace ID collapses to its 16
/// character (64-bit) form; otherwise it is rendered as 32 characters.
/// Returns the empty value and logs when the input is not exactly 24 bytes;
/// a malformed buffer must never take down the monitored application.
pub fn read_trace_context_from_buffer(buffer: &[u8]) -> BinaryTraceContext {
    if buffer.len() != 24 {
        tracekit_error!(
            name: "IdCodec.InvalidTraceContextBuffer",
            buffer_length = buffer.len()
        );
        return BinaryTraceContext::default();
    }
    let t = if buffer[..8].iter().all(|byte| *byte == 0) {
        bytes_to_hex(&buffer[8..16])
    } else {
        bytes_to_hex(&buffer[..16])
    };
    BinaryTraceContext {
        t,
        s: bytes_to_hex(&buffer[16..24]),
    }
}

/// Encodes a trace ID (16 or 32 hex characters) and span ID (16 hex
/// characters) into the fixed 24-byte binary layout. The inverse of
/// [`read_trace_context_from_buffer`].
pub fn trace_context_to_buffer(trace_id: &str, span_id: &str) -> Result<[u8; 24], Error> {
    if span_id.len() != 16 {
        return Err(Error::InvalidId(span_id.to_owned()));
    }
    let mut buffer = [0u8; 24];
    // The trace ID is right-aligned in front of the span ID, leaving the
    // high 8 bytes zero for 64-bit trace IDs.
    write_unsigned_hex_to_buffer(trace_id, &mut buffer, 8)?;
    write_unsigned_hex_to_buffer(span_id, &mut buffer, 0)?;
    Ok(buffer)
}

/// Whether `id` is a well-formed ID: 16 or 32 lowercase hex characters.
pub fn is_valid_id(id: &str) -> bool {
    (id.len() == 16 || id.len() == 32)
        && id
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
}
