//! Frame encoding and decoding for the tunnel wire protocol
//!
//! Every message on the secure transport is a frame:
//!
//! ```text
//! +--------+----------------+-------------------+
//! | type   | length (u32 BE)| payload (length)  |
//! | 1 byte | 4 bytes        |                   |
//! +--------+----------------+-------------------+
//! ```

use crate::error::{Result, VpnError};
use crate::protocol::constants::TRANSPORT_READ_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::trace;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the fixed frame header
pub const HEADER_LEN: usize = 5;

/// Largest payload the decoder accepts before declaring the stream corrupt
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Frame types carried by the tunnel protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Raw IP packet
    Data = 0,
    /// JSON status message
    Control = 1,
    /// JSON credentials
    Auth = 2,
    /// JSON network parameters
    Config = 3,
}

impl TryFrom<u8> for FrameType {
    type Error = VpnError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FrameType::Data),
            1 => Ok(FrameType::Control),
            2 => Ok(FrameType::Auth),
            3 => Ok(FrameType::Config),
            _ => Err(VpnError::MalformedFrame(format!(
                "Unknown frame type: {value:#04x}"
            ))),
        }
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub length: u32,
}

/// A single protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(frame_type: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    /// Data frame carrying a copy of `packet`
    pub fn data(packet: &[u8]) -> Self {
        Self::new(FrameType::Data, Bytes::copy_from_slice(packet))
    }

    /// Frame whose payload is `value` serialized as JSON
    pub fn json<T: Serialize>(frame_type: FrameType, value: &T) -> Result<Self> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| VpnError::Encoding(format!("JSON serialization failed: {e}")))?;
        Ok(Self::new(frame_type, payload))
    }

    /// Parse the payload as a JSON document
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(|e| {
            VpnError::MalformedFrame(format!("Invalid {:?} payload: {e}", self.frame_type))
        })
    }

    /// Serialize the frame to wire bytes
    pub fn encode(&self) -> Result<Bytes> {
        encode(self.frame_type, &self.payload)
    }
}

/// Serialize a frame of the given type
pub fn encode(frame_type: FrameType, payload: &[u8]) -> Result<Bytes> {
    let length = u32::try_from(payload.len()).map_err(|_| {
        VpnError::Encoding(format!(
            "Payload of {} bytes exceeds the 32-bit length field",
            payload.len()
        ))
    })?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(frame_type as u8);
    buf.put_u32(length);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Decode only the 5-byte header
pub fn decode_header(data: &[u8]) -> Result<FrameHeader> {
    if data.len() < HEADER_LEN {
        return Err(VpnError::MalformedFrame(format!(
            "Header needs {HEADER_LEN} bytes, got {}",
            data.len()
        )));
    }

    let mut header = &data[..HEADER_LEN];
    let frame_type = FrameType::try_from(header.get_u8())?;
    let length = header.get_u32();
    Ok(FrameHeader { frame_type, length })
}

/// Decode one frame from the front of `data`.
///
/// Returns the frame and the number of bytes consumed. Trailing bytes past
/// the frame are left alone.
pub fn decode(data: &[u8]) -> Result<(Frame, usize)> {
    if data.len() < HEADER_LEN {
        return Err(VpnError::IncompleteFrame {
            needed: HEADER_LEN,
            available: data.len(),
        });
    }

    let header = decode_header(data)?;
    let length = header.length as usize;
    if length > MAX_PAYLOAD {
        return Err(VpnError::MalformedFrame(format!(
            "Declared length {length} exceeds maximum payload of {MAX_PAYLOAD}"
        )));
    }

    let total = HEADER_LEN + length;
    if data.len() < total {
        return Err(VpnError::IncompleteFrame {
            needed: total,
            available: data.len(),
        });
    }

    let frame = Frame::new(
        header.frame_type,
        Bytes::copy_from_slice(&data[HEADER_LEN..total]),
    );
    Ok((frame, total))
}

/// Frame reader/writer over an async byte stream.
///
/// Partial reads accumulate in an internal buffer, so `read_frame` can be
/// dropped inside `select!` without losing bytes.
pub struct FrameStream<S> {
    stream: S,
    buffer: BytesMut,
}

impl<S> FrameStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(TRANSPORT_READ_SIZE),
        }
    }

    /// Read the next complete frame
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.try_take_frame()? {
                return Ok(frame);
            }

            let read = self.stream.read_buf(&mut self.buffer).await?;
            if read == 0 {
                if self.buffer.is_empty() {
                    return Err(VpnError::TransportClosed);
                }
                let needed = match decode_header(&self.buffer) {
                    Ok(header) => HEADER_LEN + header.length as usize,
                    Err(_) => HEADER_LEN,
                };
                return Err(VpnError::IncompleteFrame {
                    needed,
                    available: self.buffer.len(),
                });
            }
        }
    }

    fn try_take_frame(&mut self) -> Result<Option<Frame>> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = decode_header(&self.buffer)?;
        let length = header.length as usize;
        if length > MAX_PAYLOAD {
            return Err(VpnError::MalformedFrame(format!(
                "Declared length {length} exceeds maximum payload of {MAX_PAYLOAD}"
            )));
        }
        if self.buffer.len() < HEADER_LEN + length {
            self.buffer.reserve(HEADER_LEN + length - self.buffer.len());
            return Ok(None);
        }

        trace!("rx header {}", hex::encode(&self.buffer[..HEADER_LEN]));
        let mut raw = self.buffer.split_to(HEADER_LEN + length);
        raw.advance(HEADER_LEN);
        Ok(Some(Frame::new(header.frame_type, raw.freeze())))
    }

    /// Write one frame and flush it
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode()?;
        trace!("tx header {}", hex::encode(&bytes[..HEADER_LEN]));
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shut down the write half of the stream
    pub async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
