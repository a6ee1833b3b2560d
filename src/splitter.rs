//! Framing: turning an accumulated byte buffer into discrete messages.
//!
//! A splitter inspects the front of the receive buffer and either returns a
//! complete message together with the number of bytes it occupied, or
//! [`SplitError::NotEnoughData`] to ask for another read. Returned messages
//! must own their bytes; the buffer is advanced right after the call.

use crate::error::SplitError;
use crate::message::{BoxMessage, Packet};
use std::sync::Arc;

/// Successful split: the message and the bytes it consumed.
pub type SplitResult = Result<(BoxMessage, usize), SplitError>;

/// Shared framing function.
pub type Splitter = Arc<dyn Fn(&[u8]) -> SplitResult + Send + Sync>;

/// Treat everything buffered so far as one message.
pub fn whole_buffer() -> Splitter {
    Arc::new(|buf: &[u8]| {
        if buf.is_empty() {
            return Err(SplitError::NotEnoughData);
        }
        Ok((Box::new(Packet::new(buf)) as BoxMessage, buf.len()))
    })
}

/// Messages of exactly `length` bytes.
pub fn fixed_length(length: usize) -> Splitter {
    Arc::new(move |buf: &[u8]| {
        if length == 0 {
            return Err(SplitError::Malformed("fixed length must be non-zero".into()));
        }
        if buf.len() < length {
            return Err(SplitError::NotEnoughData);
        }
        Ok((Box::new(Packet::new(&buf[..length])) as BoxMessage, length))
    })
}

/// Messages terminated by `delimiter`, which is kept in the message.
pub fn delimited(delimiter: u8) -> Splitter {
    Arc::new(move |buf: &[u8]| match buf.iter().position(|&b| b == delimiter) {
        Some(pos) => Ok((Box::new(Packet::new(&buf[..=pos])) as BoxMessage, pos + 1)),
        None => Err(SplitError::NotEnoughData),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn split(splitter: &Splitter, buf: &[u8]) -> Result<(Vec<u8>, usize), SplitError> {
        splitter(buf).map(|(m, n)| (m.as_bytes().to_vec(), n))
    }

    #[test]
    fn test_whole_buffer() {
        let s = whole_buffer();
        assert_eq!(split(&s, b""), Err(SplitError::NotEnoughData));
        assert_eq!(split(&s, b"abc"), Ok((b"abc".to_vec(), 3)));
    }

    #[test]
    fn test_fixed_length() {
        let s = fixed_length(5);
        assert_eq!(split(&s, b"hell"), Err(SplitError::NotEnoughData));
        assert_eq!(split(&s, b"helloworld"), Ok((b"hello".to_vec(), 5)));
    }

    #[test]
    fn test_fixed_length_zero_is_malformed() {
        let s = fixed_length(0);
        assert!(matches!(split(&s, b"abc"), Err(SplitError::Malformed(_))));
    }

    #[test]
    fn test_delimited() {
        let s = delimited(b'\n');
        assert_eq!(split(&s, b"partial"), Err(SplitError::NotEnoughData));
        assert_eq!(split(&s, b"one\ntwo\n"), Ok((b"one\n".to_vec(), 4)));
    }
}
