//! Publisher side: typed channels and their endpoint registries

pub mod channel;
pub mod registry;
pub mod shared;

pub use channel::{Channel, ChannelStats, PublishReport};
pub use registry::{EndpointRegistry, Registration};
pub use shared::{BufferDescriptor, SharedBufferChannel};
