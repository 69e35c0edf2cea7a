//! Length-prefixed message framing over a byte pipe.
//!
//! Each frame is an `i32` big-endian message type, an `i32` big-endian byte
//! length, and that many bytes of UTF-8 JSON. The reader owns its end of the
//! pipe exclusively; the writer is a clone-able handle that serializes whole
//! frames under one lock so emissions from concurrent scheduled callbacks
//! never corrupt frame boundaries.

use crate::errors::{ProtocolError, TransportError};
use serde::Serialize;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};

/// Frames advertising a body longer than this are rejected before any
/// allocation happens. The length field is signed 32-bit on the wire, but a
/// peer claiming anywhere near `i32::MAX` bytes is malformed, not large.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// The closed set of message types exchanged with the host.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(i32)]
pub enum MessageType {
    Configure = 1,
    ConfigureResult = 2,
    Shutdown = 3,
    Log = 4,
    ValueList = 100,
    DatapointList = 200,
}

impl MessageType {
    /// Attempts to convert a raw wire value into a message type.
    pub fn try_from(raw: i32) -> Option<MessageType> {
        match raw {
            1 => Some(MessageType::Configure),
            2 => Some(MessageType::ConfigureResult),
            3 => Some(MessageType::Shutdown),
            4 => Some(MessageType::Log),
            100 => Some(MessageType::ValueList),
            200 => Some(MessageType::DatapointList),
            _ => None,
        }
    }
}

/// A decoded frame. Immutable once constructed; a zero-length body decodes
/// to a `Null` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub mtype: MessageType,
    pub payload: serde_json::Value,
}

/// Blocking frame reader over the host-to-child pipe.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> FrameReader<R> {
        FrameReader { inner }
    }

    /// Blocks until a full frame is available and returns it.
    ///
    /// EOF on a frame boundary is `TransportError::Closed`; EOF anywhere
    /// inside a frame is `TransportError::Truncated`.
    pub fn read(&mut self) -> Result<Message, TransportError> {
        let mut header = [0u8; 8];

        // The first byte tells a clean close apart from a truncated frame.
        loop {
            match self.inner.read(&mut header[..1]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(_) => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        read_exact_frame(&mut self.inner, &mut header[1..])?;

        let raw_type = i32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let len = i32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        if len < 0 || len as usize > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameLength(i64::from(len)).into());
        }

        let mtype = MessageType::try_from(raw_type)
            .ok_or(ProtocolError::UnknownMessageType(raw_type))?;

        let mut body = vec![0u8; len as usize];
        read_exact_frame(&mut self.inner, &mut body)?;

        let payload = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body)?
        };

        Ok(Message { mtype, payload })
    }
}

fn read_exact_frame<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            TransportError::Truncated
        } else {
            TransportError::Io(e)
        }
    })
}

/// Thread-safe frame writer over the child-to-host pipe.
///
/// Cloning yields another handle to the same underlying pipe; every part of
/// the runtime that emits frames (output sink, value dispatch, the log
/// forwarder) holds one of these.
#[derive(Clone)]
pub struct MessageWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl MessageWriter {
    pub fn new<W: Write + Send + 'static>(inner: W) -> MessageWriter {
        MessageWriter {
            inner: Arc::new(Mutex::new(Box::new(inner))),
        }
    }

    /// Serializes `payload` to JSON and writes it as one frame.
    pub fn write<T: Serialize + ?Sized>(
        &self,
        mtype: MessageType,
        payload: &T,
    ) -> Result<(), TransportError> {
        let body = serde_json::to_vec(payload)?;
        self.write_frame(mtype, &body)
    }

    /// Writes a frame with a zero-length body (e.g. Shutdown).
    pub fn write_empty(&self, mtype: MessageType) -> Result<(), TransportError> {
        self.write_frame(mtype, &[])
    }

    fn write_frame(&self, mtype: MessageType, body: &[u8]) -> Result<(), TransportError> {
        if body.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameLength(body.len() as i64).into());
        }

        // Serialization already happened; only the raw byte writes hold the
        // lock, keeping the critical section as short as possible.
        let mut pipe = self.inner.lock().expect("transport writer lock poisoned");
        pipe.write_all(&(mtype as i32).to_be_bytes())?;
        pipe.write_all(&(body.len() as i32).to_be_bytes())?;
        pipe.write_all(body)?;
        pipe.flush()?;
        Ok(())
    }
}
