//! Server-sent-event streaming: line-level protocol parsing, event decoding and the resilient
//! streaming client.
mod client;
mod events;
mod parser;

pub use client::SseClient;
pub use events::FeatureEvent;
pub use parser::{SseParser, SseRecord};
