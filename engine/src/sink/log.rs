use super::{
    NotificationSink,
    SinkError,
    StructuredMessage,
};
use futures::future::BoxFuture;

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Clone)]
pub struct LogSink {
    server_id: String,
}

impl LogSink {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
        }
    }
}

impl NotificationSink for LogSink {
    fn send_structured<'a>(&'a self, _message: &'a StructuredMessage) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async { Err(SinkError::Unsupported) })
    }

    fn send_text<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            info!(server = %self.server_id, "\n{text}");
            Ok(())
        })
    }
}
