//! Connection identifier generation.
//!
//! Each identifier is 16 bytes rendered as 32 lowercase hex characters:
//!
//! ```text
//! [0..4]   unix seconds of the latest generation (truncated to 32 bits)
//! [4..7]   low 3 bytes of the CRC32C of the hostname
//! [7..9]   low 2 bytes of the process id
//! [9..12]  per-second counter, randomly seeded each new second
//! [12..16] random salt
//! ```
//!
//! Identifiers are unique within a process and very likely unique across
//! hosts, but they are derived from guessable inputs and must not be used
//! as secrets.

use chrono::Utc;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Upper bound (exclusive) for the random per-second counter seed.
const COUNTER_SEED_LIMIT: u32 = 100_000_000;

/// Opaque per-connection correlation token.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    /// Build an identifier from its 16 raw bytes.
    pub fn from_raw(raw: [u8; 16]) -> Self {
        Self(hex::encode(raw).into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Mutable part of the generator, only touched under the lock.
#[derive(Debug, Default)]
struct GeneratorState {
    latest_second: i64,
    counter: u32,
}

impl GeneratorState {
    /// Advance to `now`, returning the (second, counter) pair to encode.
    fn advance(&mut self, now: i64) -> (i64, u32) {
        if self.latest_second != now {
            self.latest_second = now;
            self.counter = rand::random::<u32>() % COUNTER_SEED_LIMIT;
        } else {
            self.counter = self.counter.wrapping_add(1);
        }
        (self.latest_second, self.counter)
    }
}

/// Produces [`ConnectionId`]s.
///
/// Generation is serialized by an internal lock, so concurrent callers
/// never observe the same (second, counter) pair.
#[derive(Debug)]
pub struct IdGenerator {
    machine_code: [u8; 3],
    pid_code: [u8; 2],
    state: Mutex<GeneratorState>,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            machine_code: machine_code(),
            pid_code: pid_code(),
            state: Mutex::new(GeneratorState::default()),
        }
    }

    /// Generate the next identifier.
    pub fn next_id(&self) -> ConnectionId {
        let (second, counter) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.advance(Utc::now().timestamp())
        };
        ConnectionId::from_raw(self.encode(second, counter, rand::random()))
    }

    fn encode(&self, second: i64, counter: u32, salt: u32) -> [u8; 16] {
        let mut raw = [0u8; 16];
        raw[0..4].copy_from_slice(&(second as u32).to_be_bytes());
        raw[4..7].copy_from_slice(&self.machine_code);
        raw[7..9].copy_from_slice(&self.pid_code);
        raw[9..12].copy_from_slice(&counter.to_be_bytes()[1..]);
        raw[12..16].copy_from_slice(&salt.to_be_bytes());
        raw
    }
}

/// Low 3 bytes of the CRC32C of the hostname.
fn machine_code() -> [u8; 3] {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default();
    let sum = crc32c::crc32c(hostname.as_bytes()).to_be_bytes();
    [sum[1], sum[2], sum[3]]
}

/// Low 2 bytes of the process id.
fn pid_code() -> [u8; 2] {
    let pid = (std::process::id() & 0xffff) as u16;
    pid.to_be_bytes()
}
