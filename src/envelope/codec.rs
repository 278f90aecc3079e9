//! Per-type encode/decode capability set

use crate::error::Result;

use super::signature::TypeSignature;

/// Encoding, decoding and identity of a message type
///
/// Implemented once per message type. Serde types can use
/// [`impl_bincode_codec!`](crate::impl_bincode_codec) instead of writing it by hand.
pub trait MessageCodec: Sized + Send + 'static {
    /// Logical type name, shared by every process exchanging this type
    const TYPE_NAME: &'static str;

    /// Encode the message into payload bytes
    fn encode(&self) -> Result<Vec<u8>>;

    /// Decode a message from payload bytes
    fn decode(bytes: &[u8]) -> Result<Self>;

    /// Signature carried by envelopes of this type
    fn type_signature() -> TypeSignature {
        TypeSignature::of(Self::TYPE_NAME)
    }
}

/// Implement [`MessageCodec`] for a serde type using bincode
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Odometry { x: f32, y: f32 }
/// ipcbus::impl_bincode_codec!(Odometry, "robot.navigation.Odometry");
/// ```
#[macro_export]
macro_rules! impl_bincode_codec {
    ($ty:ty, $name:expr) => {
        impl $crate::envelope::MessageCodec for $ty {
            const TYPE_NAME: &'static str = $name;

            fn encode(&self) -> $crate::Result<Vec<u8>> {
                Ok($crate::__private::bincode::serialize(self)?)
            }

            fn decode(bytes: &[u8]) -> $crate::Result<Self> {
                Ok($crate::__private::bincode::deserialize(bytes)?)
            }
        }
    };
}
