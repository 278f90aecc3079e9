//! Envelope container and its wire format

use crate::error::{IpcBusError, Result};

use super::{codec::MessageCodec, signature::TypeSignature};

/// Size of the wire header: `[length:u32][typeSignature:u32]`
pub const ENVELOPE_HEADER_SIZE: usize = 8;

/// Where an envelope was constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Built in this process from a message value
    Local,
    /// Reconstructed from a raw transport buffer
    Transported,
}

/// Opaque, type-tagged container for one message instance
///
/// Immutable once built. On the wire it is laid out as
/// `[length:u32 LE][typeSignature:u32 LE][payload]`, where `length` counts the
/// payload bytes only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    payload: Vec<u8>,
    signature: TypeSignature,
    origin: Origin,
}

impl Envelope {
    /// Encode a message into a new local envelope
    pub fn from_message<T: MessageCodec>(message: &T) -> Result<Self> {
        Ok(Self {
            payload: message.encode()?,
            signature: T::type_signature(),
            origin: Origin::Local,
        })
    }

    /// Build a local envelope from an already encoded payload
    pub fn from_parts(signature: TypeSignature, payload: Vec<u8>) -> Self {
        Self {
            payload,
            signature,
            origin: Origin::Local,
        }
    }

    /// Reconstruct an envelope from a raw transport buffer
    pub fn from_wire(frame: &[u8]) -> Result<Self> {
        if frame.len() < ENVELOPE_HEADER_SIZE {
            return Err(IpcBusError::malformed_frame(format!(
                "frame of {} bytes is shorter than the {} byte header",
                frame.len(),
                ENVELOPE_HEADER_SIZE
            )));
        }

        let length = read_u32(&frame[0..4]) as usize;
        let signature = TypeSignature::from_raw(read_u32(&frame[4..8]));
        let body = &frame[ENVELOPE_HEADER_SIZE..];

        if body.len() != length {
            return Err(IpcBusError::malformed_frame(format!(
                "bad length in frame: header says {}, body has {}",
                length,
                body.len()
            )));
        }

        Ok(Self {
            payload: body.to_vec(),
            signature,
            origin: Origin::Transported,
        })
    }

    /// Serialize into a raw transport buffer
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        let length = u32::try_from(self.payload.len()).map_err(|_| {
            IpcBusError::invalid_parameter(
                "payload",
                format!("payload of {} bytes does not fit the wire format", self.payload.len()),
            )
        })?;

        let mut frame = Vec::with_capacity(ENVELOPE_HEADER_SIZE + self.payload.len());
        frame.extend_from_slice(&length.to_le_bytes());
        frame.extend_from_slice(&self.signature.as_u32().to_le_bytes());
        frame.extend_from_slice(&self.payload);
        Ok(frame)
    }

    /// Copy of this envelope as if it had been received from another process
    pub fn to_transported(&self) -> Result<Self> {
        Self::from_wire(&self.to_wire()?)
    }

    /// Decode the payload, refusing envelopes of another type
    pub fn decode<T: MessageCodec>(&self) -> Result<T> {
        let expected = T::type_signature();
        if self.signature != expected {
            return Err(IpcBusError::signature_mismatch(
                expected.as_u32(),
                self.signature.as_u32(),
            ));
        }
        T::decode(&self.payload)
    }

    /// Check whether this envelope carries a `T`
    pub fn is<T: MessageCodec>(&self) -> bool {
        self.signature == T::type_signature()
    }

    pub fn signature(&self) -> TypeSignature {
        self.signature
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total size on the wire
    pub fn wire_size(&self) -> usize {
        ENVELOPE_HEADER_SIZE + self.payload.len()
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}
