//! Subscriber side: typed endpoints and the registry of running subscribers

pub mod config;
pub mod registry;
pub mod shared;
pub mod subscriber;


pub use config::SubscriberConfig;
pub use registry::{ActiveSubscriber, SubscriberInfo, SubscriberRegistry};
pub use shared::{SharedBufferSubscriber, SharedFrame};
pub use subscriber::Subscriber;
