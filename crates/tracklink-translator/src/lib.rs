//! Converts session events into JSON documents for a publish/subscribe
//! transport.

pub mod payload;
pub mod publisher;
pub mod translator;

pub use publisher::{ChannelPublisher, Document, LogPublisher, PublishError, Publisher};
pub use translator::{DEFAULT_TOPIC_PREFIX, Translator, companions, topic, translate};
