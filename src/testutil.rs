//! Helpers shared by the unit tests: an in-memory pipe end whose frames
//! can be read back after the code under test wrote them.

use crate::errors::TransportError;
use crate::transport::{FrameReader, Message};
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    /// Decodes every complete frame written so far.
    pub fn read_frames(&self) -> Vec<Message> {
        let mut reader = FrameReader::new(Cursor::new(self.contents()));
        let mut frames = Vec::new();
        loop {
            match reader.read() {
                Ok(message) => frames.push(message),
                Err(TransportError::Closed) => return frames,
                Err(e) => panic!("bad frame in test buffer: {:?}", e),
            }
        }
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
