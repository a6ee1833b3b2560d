//! Message types carried between the wire and handlers.
//!
//! Anything that can produce its byte representation is a [`Message`].
//! Splitters usually produce [`Packet`]s; middleware may replace them with
//! richer application types, which handlers recover with
//! [`downcast_ref`](trait.Message.html#method.downcast_ref).

use crate::id::ConnectionId;
use bytes::Bytes;
use std::any::Any;
use std::fmt;

/// Owned, type-erased message.
pub type BoxMessage = Box<dyn Message>;

/// Helper that lets `dyn Message` be viewed as `dyn Any`.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A value with a wire representation.
pub trait Message: AsAny + Send + Sync + fmt::Debug {
    /// Bytes written to the peer when this message is sent.
    fn as_bytes(&self) -> &[u8];
}

impl dyn Message {
    /// Returns the concrete message if it is a `T`.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Returns true if the concrete message is a `T`.
    pub fn is<T: Message>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// A fixed run of bytes split off the stream.
///
/// Always owns its data: the bytes are copied at construction so that the
/// receive buffer can be reused afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    data: Bytes,
}

impl Packet {
    /// Copy `buf` into a new packet.
    pub fn new(buf: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(buf),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Shared handle to the packet bytes.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }
}

impl From<&str> for Packet {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.data.len())
            .field("data", &String::from_utf8_lossy(&self.data))
            .finish()
    }
}

impl Message for Packet {
    fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// A message tagged with the connection it was received on or is bound for.
///
/// Used when a single bus carries traffic for many connections.
#[derive(Debug)]
pub struct Envelope {
    conn_id: ConnectionId,
    data: BoxMessage,
}

impl Envelope {
    pub fn new(conn_id: ConnectionId, data: BoxMessage) -> Self {
        Self { conn_id, data }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.conn_id
    }

    pub fn data(&self) -> &dyn Message {
        &*self.data
    }

    pub fn into_parts(self) -> (ConnectionId, BoxMessage) {
        (self.conn_id, self.data)
    }
}

impl Message for Envelope {
    fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Word(String);

    impl Message for Word {
        fn as_bytes(&self) -> &[u8] {
            self.0.as_bytes()
        }
    }

    #[test]
    fn test_packet_copies_input() {
        let mut buf = b"hello".to_vec();
        let packet = Packet::new(&buf);
        buf[0] = b'j';

        assert_eq!(packet.as_bytes(), b"hello");
        assert_eq!(packet.len(), 5);
    }

    #[test]
    fn test_downcast() {
        let m: BoxMessage = Box::new(Word("abc".into()));
        assert!(m.is::<Word>());
        assert!(m.downcast_ref::<Packet>().is_none());
        assert_eq!(m.downcast_ref::<Word>().map(|w| w.0.as_str()), Some("abc"));
    }

    #[test]
    fn test_envelope_delegates_bytes() {
        let id = ConnectionId::from_raw([7; 16]);
        let envelope = Envelope::new(id.clone(), Box::new(Packet::from("ping")));

        assert_eq!(envelope.as_bytes(), b"ping");
        assert_eq!(envelope.connection_id(), &id);

        let (conn_id, data) = envelope.into_parts();
        assert_eq!(conn_id, id);
        assert_eq!(data.as_bytes(), b"ping");
    }
}
