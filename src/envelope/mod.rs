//! Type-tagged message envelopes
//!
//! Every message crossing a channel travels inside an [`Envelope`]: the encoded
//! payload plus a [`TypeSignature`] used to reject deliveries to subscribers
//! expecting a different type. Message types describe themselves through the
//! [`MessageCodec`] capability set instead of any runtime type lookup.

pub mod codec;
pub mod envelope;
pub mod signature;


pub use codec::MessageCodec;
pub use envelope::{Envelope, Origin, ENVELOPE_HEADER_SIZE};
pub use signature::TypeSignature;
