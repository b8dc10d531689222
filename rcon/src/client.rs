use crate::{
    packet::{
        Packet,
        AUTH_FAILED_ID,
        SERVERDATA_AUTH_RESPONSE,
    },
    Connection,
    RconError,
};
use futures::future::BoxFuture;
use std::{
    fmt,
    io::{
        self,
        ErrorKind,
    },
    time::Duration,
};
use tokio::{
    io::AsyncWriteExt as _,
    net::TcpStream,
    time::timeout,
};

#[derive(Clone, PartialEq, Eq)]
pub struct RconEndpoint {
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl RconEndpoint {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Keeps the password out of logs.
impl fmt::Debug for RconEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RconEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// RCON session over TCP.
#[derive(Debug)]
pub struct RconClient {
    endpoint: RconEndpoint,
    connect_timeout: Duration,
    command_timeout: Duration,
    stream: Option<TcpStream>,
    next_id: i32,
}

impl RconClient {
    pub fn new(endpoint: RconEndpoint, connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
            command_timeout,
            stream: None,
            next_id: 0,
        }
    }

    fn next_request_id(&mut self) -> i32 {
        // 0 and the auth failure id are never handed out.
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.next_id
    }

    fn transport_error(&self, err: io::Error) -> RconError {
        match err.kind() {
            ErrorKind::InvalidData => RconError::Protocol(err.to_string()),
            ErrorKind::UnexpectedEof => RconError::Connection {
                endpoint: self.endpoint.address(),
                reason: "connection closed by the server".to_string(),
            },
            _ => RconError::Connection {
                endpoint: self.endpoint.address(),
                reason: err.to_string(),
            },
        }
    }

    #[instrument(level = "debug", skip_all, fields(endpoint = %self.endpoint.address()))]
    async fn open(&mut self) -> Result<(), RconError> {
        if let Some(mut stale) = self.stream.take() {
            let _ = stale.shutdown().await;
        }

        let address = self.endpoint.address();
        let mut stream = match timeout(self.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(self.transport_error(err)),
            Err(_) => return Err(RconError::Timeout(self.connect_timeout)),
        };

        let id = self.next_request_id();
        match timeout(
            self.connect_timeout,
            authenticate(&mut stream, id, &self.endpoint.password),
        )
        .await
        {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                return Err(RconError::Authentication { endpoint: address });
            }
            Ok(Err(err)) => return Err(self.transport_error(err)),
            Err(_) => return Err(RconError::Timeout(self.connect_timeout)),
        }

        debug!("RCON session authenticated");
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, command: &str) -> Result<String, RconError> {
        let id = self.next_request_id();
        let command_timeout = self.command_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(RconError::NotConnected);
        };

        let result = timeout(command_timeout, roundtrip(stream, id, command)).await;
        match result {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(err)) => {
                self.stream = None;
                let err = self.transport_error(err);
                warn!(endpoint = %self.endpoint.address(), "RCON command failed, dropping session: {err}");
                Err(err)
            }
            Err(_) => {
                self.stream = None;
                warn!(
                    endpoint = %self.endpoint.address(),
                    ?command_timeout,
                    "RCON command timed out, dropping session"
                );
                Err(RconError::Timeout(command_timeout))
            }
        }
    }
}

/// Returns `Ok(false)` when the server refused the password.
async fn authenticate(stream: &mut TcpStream, id: i32, password: &str) -> io::Result<bool> {
    Packet::auth(id, password).write_to(stream).await?;
    loop {
        let packet = Packet::read_from(stream).await?;
        // Some servers send an empty RESPONSE_VALUE ahead of the auth response.
        if packet.packet_type != SERVERDATA_AUTH_RESPONSE {
            trace!(id = packet.id, "skipping packet while authenticating");
            continue;
        }
        if packet.id == AUTH_FAILED_ID {
            return Ok(false);
        }
        if packet.id == id {
            return Ok(true);
        }
    }
}

async fn roundtrip(stream: &mut TcpStream, id: i32, command: &str) -> io::Result<String> {
    Packet::command(id, command).write_to(stream).await?;
    loop {
        let packet = Packet::read_from(stream).await?;
        if packet.id == id {
            return Ok(packet.body);
        }
        // Late answer to a request that already timed out.
        trace!(expected = id, received = packet.id, "discarding stale RCON response");
    }
}

impl Connection for RconClient {
    fn connect(&mut self) -> BoxFuture<'_, Result<(), RconError>> {
        Box::pin(self.open())
    }

    fn execute<'a>(&'a mut self, command: &'a str) -> BoxFuture<'a, Result<String, RconError>> {
        Box::pin(self.send(command))
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(mut stream) = self.stream.take() {
                if let Err(err) = stream.shutdown().await {
                    debug!(endpoint = %self.endpoint.address(), "error while closing RCON session: {err}");
                }
            }
        })
    }

    fn endpoint(&self) -> String {
        self.endpoint.address()
    }
}
