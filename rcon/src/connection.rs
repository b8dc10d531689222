use crate::RconError;
use futures::future::BoxFuture;

/// A remote-console session to one server.
///
/// `execute` takes `&mut self`: whoever owns the connection can only have a
/// single request in flight. A failed `execute` leaves `is_connected` false.
/// Reconnecting is never done implicitly, callers decide when to call
/// `connect` again.
pub trait Connection: Send + 'static {
    /// Opens and authenticates the session.
    fn connect(&mut self) -> BoxFuture<'_, Result<(), RconError>>;

    /// Sends one command and waits for its response.
    fn execute<'a>(&'a mut self, command: &'a str) -> BoxFuture<'a, Result<String, RconError>>;

    fn is_connected(&self) -> bool;

    /// Drops the session. Calling it twice is harmless.
    fn close(&mut self) -> BoxFuture<'_, ()>;

    /// `host:port`, for logs and status output.
    fn endpoint(&self) -> String;
}
