//! Where snapshots and alerts end up.
//!
//! A sink renders either a [`StructuredMessage`] or plain text. Sinks that
//! cannot render the structured form answer [`SinkError::Unsupported`] and
//! [`deliver`] falls back to the text.

use chrono::{
    DateTime,
    Utc,
};
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;

mod log;
mod webhook;

pub use log::LogSink;
pub use webhook::WebhookSink;

pub const COLOR_INFO: u32 = 0x3498db;
pub const COLOR_WARNING: u32 = 0xe67e22;
pub const COLOR_OK: u32 = 0x2ecc71;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Sink cannot render structured messages")]
    Unsupported,
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl MessageField {
    pub fn new(name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline,
        }
    }
}

/// Rich message, close to what chat webhooks call an embed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredMessage {
    pub title: String,
    pub description: Option<String>,
    pub color: u32,
    pub fields: Vec<MessageField>,
    pub footer: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

pub trait NotificationSink: fmt::Debug + Send + Sync + 'static {
    fn send_structured<'a>(&'a self, message: &'a StructuredMessage) -> BoxFuture<'a, Result<(), SinkError>>;

    fn send_text<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), SinkError>>;
}

/// Sends the structured form, or the text form if the sink cannot render it.
pub async fn deliver(sink: &dyn NotificationSink, message: &StructuredMessage, text: &str) -> Result<(), SinkError> {
    match sink.send_structured(message).await {
        Err(SinkError::Unsupported) => {
            trace!(title = %message.title, "Falling back to plain text");
            sink.send_text(text).await
        }
        result => result,
    }
}
