//! Length-prefixed packages: `[len:4][flag:1][payload]`.
//!
//! `len` counts payload bytes only. Flag 0 carries data, flag 1 an error
//! message encoded as UTF-8.

use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::{KeelError, Result};

const FLAG_DATA: u8 = 0;
const FLAG_ERROR: u8 = 1;
const HEADER_LEN: usize = 5;
/// Largest payload a peer may announce.
pub const MAX_PAYLOAD: usize = 16 << 20;

/// One request or response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Package {
    /// Statement text or statement result.
    Data(Vec<u8>),
    /// Error message from the server.
    Error(String),
}

impl Package {
    /// Encodes the package into a frame.
    pub fn encode(&self) -> Bytes {
        let (flag, payload) = match self {
            Package::Data(data) => (FLAG_DATA, data.as_slice()),
            Package::Error(msg) => (FLAG_ERROR, msg.as_bytes()),
        };
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_u8(flag);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Decodes a complete frame.
    pub fn decode(mut frame: Bytes) -> Result<Self> {
        if frame.len() < HEADER_LEN {
            return Err(KeelError::Invalid("package header truncated"));
        }
        let len = frame.get_u32() as usize;
        let flag = frame.get_u8();
        if frame.len() != len {
            return Err(KeelError::Invalid("package length mismatch"));
        }
        let payload = frame.to_vec();
        match flag {
            FLAG_DATA => Ok(Package::Data(payload)),
            FLAG_ERROR => String::from_utf8(payload)
                .map(Package::Error)
                .map_err(|_| KeelError::Invalid("error package is not utf-8")),
            _ => Err(KeelError::Invalid("unknown package flag")),
        }
    }
}

/// Sends and receives packages over a blocking byte stream.
pub struct Transport<S> {
    stream: S,
}

impl<S: Read + Write> Transport<S> {
    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Writes one package and flushes.
    pub fn send(&mut self, package: &Package) -> Result<()> {
        self.stream.write_all(&package.encode())?;
        self.stream.flush()?;
        Ok(())
    }

    /// Reads one package; `None` when the peer closed between packages.
    pub fn receive(&mut self) -> Result<Option<Package>> {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            match self.stream.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into()),
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len > MAX_PAYLOAD {
            return Err(KeelError::Invalid("package too large"));
        }
        let mut frame = BytesMut::with_capacity(HEADER_LEN + len);
        frame.put_slice(&header);
        frame.resize(HEADER_LEN + len, 0);
        self.stream.read_exact(&mut frame[HEADER_LEN..])?;
        Package::decode(frame.freeze()).map(Some)
    }

    /// The underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}
