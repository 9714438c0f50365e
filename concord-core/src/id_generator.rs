//! Cluster-unique, strictly increasing identifier generation.
//!
//! An identifier is composed from three decimal fields:
//!
//! ```text
//! ((millis_since_epoch * 1000 + micro) * 10000) + server_number
//! ```
//!
//! `micro` is an intra-millisecond sequence in `0..=999` and the trailing four
//! digits belong to the server number, so two members with distinct server
//! numbers can never emit the same value regardless of their clocks.
//!
//! The composed value is a `u128`. A `u64` would overflow roughly 58 years
//! after the epoch; `u128` leaves headroom far beyond any realistic horizon.

use crate::clock::{Clock, SystemClock};
use crate::error::IdError;
use crate::identity::{ServerNumber, SERVER_NUMBER_SLOTS};
use crate::{ConcordConfig, ConcordResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use std::sync::{Mutex, PoisonError};

/// Default ID epoch: 2010-01-01T00:00:00Z in Unix milliseconds.
pub const DEFAULT_EPOCH_MILLIS: i64 = 1_262_304_000_000;

/// Number of sequence values available inside one millisecond.
pub const MICROS_PER_MILLI: u128 = 1_000;

const MAX_MICRO: u32 = 999;

/// Mutable generator state. All fields change together under one lock.
#[derive(Debug, Default)]
struct GeneratorState {
    /// Last emitted millisecond offset, once anything was emitted
    last: Option<i64>,
    /// Sequence within `last`
    micro: u32,
    /// Times the sequence ran out inside one millisecond
    rollover_count: u64,
}

/// Generates cluster-unique identifiers for one process.
///
/// Create one per process at startup and share it; the state behind it must
/// not be duplicated or identifiers from the same server number can collide.
#[derive(Debug)]
pub struct IdGenerator<C: Clock = SystemClock> {
    epoch_millis: i64,
    server_number: ServerNumber,
    clock: C,
    state: Mutex<GeneratorState>,
}

impl IdGenerator<SystemClock> {
    /// Create a generator on the system clock with the default epoch.
    pub fn new(server_number: ServerNumber) -> Self {
        Self::with_clock(server_number, DEFAULT_EPOCH_MILLIS, SystemClock)
    }

    /// Create a generator from node configuration.
    pub fn from_config(config: &ConcordConfig) -> ConcordResult<Self> {
        Ok(Self::with_clock(
            config.server_number()?,
            config.id_epoch_millis,
            SystemClock,
        ))
    }
}

impl<C: Clock> IdGenerator<C> {
    /// Create a generator reading time from `clock`.
    pub fn with_clock(server_number: ServerNumber, epoch_millis: i64, clock: C) -> Self {
        Self {
            epoch_millis,
            server_number,
            clock,
            state: Mutex::new(GeneratorState::default()),
        }
    }

    /// The server number baked into every identifier.
    pub fn server_number(&self) -> ServerNumber {
        self.server_number
    }

    /// The reference instant, in Unix milliseconds.
    pub fn epoch_millis(&self) -> i64 {
        self.epoch_millis
    }

    /// Next identifier in its URL-safe text form.
    pub fn next_id(&self) -> String {
        encode_id(self.next_id_num())
    }

    /// Next identifier as a number. Strictly greater than every earlier value
    /// from this generator.
    pub fn next_id_num(&self) -> u128 {
        let (next, micro, rolled_over) = {
            // The state is plain integers, so a poisoned lock still holds a usable value.
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let mut next = (self.clock.now_millis() - self.epoch_millis).max(0);

            match state.last {
                Some(last) if next == last => state.micro += 1,
                Some(last) if next < last => {
                    // Clock went backwards: never regress the time component.
                    next = last;
                    state.micro += 1;
                }
                _ => {
                    state.micro = 0;
                    state.last = Some(next);
                }
            }

            let rolled_over = state.micro > MAX_MICRO;
            if rolled_over {
                state.rollover_count += 1;
                next += 1;
                state.micro = 0;
                state.last = Some(next);
            }

            (next, state.micro, rolled_over)
        };

        if rolled_over {
            tracing::debug!(
                server_number = %self.server_number,
                millis = next,
                "id sequence exhausted within one millisecond, borrowing the next"
            );
        }

        compose(next, micro, self.server_number)
    }

    /// Number of times the intra-millisecond sequence was exhausted.
    pub fn rollover_count(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rollover_count
    }
}

fn compose(millis: i64, micro: u32, server_number: ServerNumber) -> u128 {
    // Offsets are clamped at the epoch.
    let millis = millis.max(0) as u128;
    (millis * MICROS_PER_MILLI + micro as u128) * SERVER_NUMBER_SLOTS
        + server_number.get() as u128
}

/// The decimal fields of a composed identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    pub millis_offset: u128,
    pub micro: u16,
    pub server_number: u16,
}

impl IdParts {
    /// Split a composed identifier into its fields.
    pub fn split(value: u128) -> Self {
        let server_number = (value % SERVER_NUMBER_SLOTS) as u16;
        let rest = value / SERVER_NUMBER_SLOTS;
        Self {
            millis_offset: rest / MICROS_PER_MILLI,
            micro: (rest % MICROS_PER_MILLI) as u16,
            server_number,
        }
    }
}

/// Render an identifier as URL-safe base64 of its minimal big-endian
/// two's-complement bytes (a leading zero byte is kept when the high bit is set).
pub fn encode_id(value: u128) -> String {
    let bytes = value.to_be_bytes();
    let first = bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(bytes.len() - 1);

    let mut out = Vec::with_capacity(bytes.len() + 1 - first);
    if bytes[first] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[first..]);
    URL_SAFE_NO_PAD.encode(out)
}

/// Parse the text form produced by [`encode_id`].
///
/// # Errors
///
/// Returns `IdError::Malformed` for invalid base64, an empty payload, a
/// negative two's-complement value, or a value wider than 128 bits.
pub fn decode_id(id: &str) -> Result<u128, IdError> {
    let malformed = |reason: String| IdError::Malformed {
        id: id.to_string(),
        reason,
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(id)
        .map_err(|e| malformed(e.to_string()))?;
    let Some(first) = bytes.first() else {
        return Err(malformed("empty identifier".to_string()));
    };
    if first & 0x80 != 0 {
        return Err(malformed("negative value".to_string()));
    }

    let significant = match bytes.iter().position(|b| *b != 0) {
        Some(start) => &bytes[start..],
        None => return Ok(0),
    };
    if significant.len() > 16 {
        return Err(malformed("value exceeds 128 bits".to_string()));
    }

    let mut buf = [0u8; 16];
    buf[16 - significant.len()..].copy_from_slice(significant);
    Ok(u128::from_be_bytes(buf))
}


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
