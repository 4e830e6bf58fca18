//! Length-framed TCP exchange of per-job files. One request per connection:
//! a single text control frame (`SEND`/`RECEIVE`), then the raw payload
//! stream. Either side closes on any deviation.

pub mod client;
pub mod server;

use std::io::{self, Read, Write};

pub const DEFAULT_PORT: u16 = 9005;

/// Control frames and streaming chunks share one buffer size so a control
/// frame always fits in a single recv.
pub const FRAME_SIZE: usize = 1024;

pub(crate) const READY: &str = "READY";
pub(crate) const SUCCESS: &str = "SUCCESS";
pub(crate) const ABORT: &str = "ABORT";
pub(crate) const GO: &str = "GO";

pub type WireResult<T> = Result<T, WireError>;

#[derive(Debug, Eq, PartialEq)]
pub enum WireError {
    /// The peer answered `ABORT`, closed early or otherwise deviated from
    /// the protocol.
    Refused,
    /// A control frame could not be parsed.
    BadFrame,
    Io(io::ErrorKind),
}

impl From<io::Error> for WireError {
    #[inline]
    fn from(err: io::Error) -> Self {
        WireError::Io(err.kind())
    }
}

/// Reads a single control frame off the stream.
pub(crate) fn read_frame<R: Read>(stream: &mut R) -> WireResult<String> {
    let mut buf = [0u8; FRAME_SIZE];
    let count = stream.read(&mut buf)?;

    if count == 0 {
        return Err(WireError::Refused);
    }

    match std::str::from_utf8(&buf[..count]) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => Err(WireError::BadFrame),
    }
}

/// Writes a single control frame to the stream.
pub(crate) fn write_frame<W: Write>(stream: &mut W, frame: &str) -> WireResult<()> {
    stream.write_all(frame.as_bytes()).map_err(Into::into)
}
