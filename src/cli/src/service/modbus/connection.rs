use std::net::SocketAddr;

use futures_time::future::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_modbus::{client::Context, prelude::Reader, Address, Slave};

use super::address::AddressError;
use super::frame::FrameClient;
use super::register::{Table, Word};

#[derive(
  Debug, Default, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Backend {
  /// Hand written MBAP frames over the socket
  #[default]
  Frame,

  /// tokio-modbus client context
  Library,
}

#[derive(Clone, Debug)]
pub(crate) struct Params {
  pub(crate) host: String,
  pub(crate) port: u16,
  pub(crate) unit: u8,
  pub(crate) timeout: chrono::Duration,
  pub(crate) delay: chrono::Duration,
  pub(crate) backend: Backend,
}

impl Params {
  pub(crate) fn timeout(&self) -> std::time::Duration {
    duration_from_chrono(self.timeout)
  }

  pub(crate) fn delay(&self) -> std::time::Duration {
    duration_from_chrono(self.delay)
  }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ReadError {
  #[error(transparent)]
  Address(#[from] AddressError),

  #[error("{0}")]
  Protocol(String),

  #[error("Empty response")]
  EmptyResponse,

  #[error("Malformed response: {0}")]
  MalformedResponse(String),

  #[error("Transport failure: {0}")]
  Transport(std::io::Error),

  #[error("Request timed out after {0} ms")]
  Timeout(u64),
}

impl ReadError {
  /// Whether the socket can still be trusted for the next request.
  pub(crate) fn breaks_connection(&self) -> bool {
    matches!(self, ReadError::Transport(_))
  }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConnectError {
  #[error("Failed resolving {0}")]
  Resolve(String, #[source] std::io::Error),

  #[error("No address found for {0}")]
  NoAddress(String),

  #[error("Failed to connect to {0}")]
  Connect(SocketAddr, #[source] std::io::Error),

  #[error("Connecting to {0} timed out")]
  Timeout(SocketAddr),
}

/// One exchange of a single register or bit.
#[async_trait::async_trait]
pub(crate) trait Transport: Send {
  async fn read(
    &mut self,
    table: Table,
    offset: Address,
  ) -> Result<Word, ReadError>;
}

#[derive(Debug)]
enum Client {
  Frame(FrameClient<TcpStream>),
  Library(Context),
}

#[derive(Debug)]
pub(crate) struct Connection {
  address: SocketAddr,
  unit: u8,
  client: Client,
  timeout: std::time::Duration,
  broken: bool,
  desynced: bool,
}

impl Connection {
  #[tracing::instrument(skip_all, fields(host = %params.host))]
  pub(crate) async fn connect(params: &Params) -> Result<Self, ConnectError> {
    let destination = format!("{}:{}", params.host, params.port);
    let address = tokio::net::lookup_host(destination.as_str())
      .await
      .map_err(|error| ConnectError::Resolve(destination.clone(), error))?
      .next()
      .ok_or_else(|| ConnectError::NoAddress(destination.clone()))?;

    let timeout = params.timeout();
    let stream = open_stream(address, timeout).await?;

    let client = match params.backend {
      Backend::Frame => {
        Client::Frame(FrameClient::new(stream, params.unit, timeout))
      }
      Backend::Library => Client::Library(
        tokio_modbus::prelude::tcp::attach_slave(stream, Slave(params.unit)),
      ),
    };

    tracing::info!(
      "Connected to {} (unit {}) using {:?} backend",
      address,
      params.unit,
      params.backend
    );

    Ok(Self {
      address,
      unit: params.unit,
      client,
      timeout,
      broken: false,
      desynced: false,
    })
  }

  pub(crate) fn address(&self) -> SocketAddr {
    self.address
  }

  pub(crate) fn is_broken(&self) -> bool {
    self.broken
  }

  pub(crate) async fn close(self) -> std::io::Result<()> {
    let Self {
      address,
      mut client,
      ..
    } = self;
    let result = match &mut client {
      Client::Frame(client) => client.shutdown().await,
      Client::Library(ctx) => ctx.disconnect().await,
    };
    tracing::info!("Closed connection to {}", address);

    result
  }

  // NOTE: the library cannot skip a late reply left in the socket so the
  // socket is replaced before the next request
  async fn reattach(&mut self) -> Result<(), ReadError> {
    let stream = open_stream(self.address, self.timeout).await.map_err(
      |error| {
        ReadError::Transport(std::io::Error::new(
          std::io::ErrorKind::NotConnected,
          error,
        ))
      },
    )?;
    let fresh = Client::Library(tokio_modbus::prelude::tcp::attach_slave(
      stream,
      Slave(self.unit),
    ));

    let stale = std::mem::replace(&mut self.client, fresh);
    if let Client::Library(mut stale) = stale {
      if let Err(error) = stale.disconnect().await {
        tracing::debug!(%error, "Failed closing desynced socket");
      }
    }
    self.desynced = false;
    tracing::debug!("Reattached to {} after a late reply", self.address);

    Ok(())
  }

  async fn library_read(
    &mut self,
    table: Table,
    offset: Address,
  ) -> Result<Word, ReadError> {
    if self.desynced {
      self.reattach().await?;
    }

    let ctx = match &mut self.client {
      Client::Library(ctx) => ctx,
      Client::Frame(_) => {
        return Err(ReadError::Transport(std::io::Error::new(
          std::io::ErrorKind::Unsupported,
          "frame backend has no library context",
        )))
      }
    };

    let timeout_ms = self.timeout.as_millis() as u64;
    let timeout = futures_time::time::Duration::from_millis(timeout_ms);
    let response = match table {
      Table::Holding => ctx
        .read_holding_registers(offset, 1)
        .timeout(timeout)
        .await
        .map(first_register),
      Table::Input => ctx
        .read_input_registers(offset, 1)
        .timeout(timeout)
        .await
        .map(first_register),
      Table::Discrete => ctx
        .read_discrete_inputs(offset, 1)
        .timeout(timeout)
        .await
        .map(first_bit),
      Table::Coil => ctx
        .read_coils(offset, 1)
        .timeout(timeout)
        .await
        .map(first_bit),
    };

    let result = match response {
      Err(_) => Err(ReadError::Timeout(timeout_ms)),
      Ok(Err(error)) => Err(classify_library_error(error, timeout_ms)),
      Ok(Ok(None)) => Err(ReadError::EmptyResponse),
      Ok(Ok(Some(word))) => Ok(word),
    };

    if let Err(ReadError::Timeout(_) | ReadError::MalformedResponse(_)) =
      &result
    {
      self.desynced = true;
    }

    result
  }
}

type LibraryResponse = std::io::Result<Option<Word>>;

fn first_register(response: std::io::Result<Vec<u16>>) -> LibraryResponse {
  response.map(|words| words.first().copied().map(Word::Register))
}

fn first_bit(response: std::io::Result<Vec<bool>>) -> LibraryResponse {
  response.map(|bits| bits.first().copied().map(Word::Bit))
}

#[async_trait::async_trait]
impl Transport for Connection {
  async fn read(
    &mut self,
    table: Table,
    offset: Address,
  ) -> Result<Word, ReadError> {
    let result = match self.client {
      Client::Frame(ref mut client) => client.read(table, offset).await,
      Client::Library(_) => self.library_read(table, offset).await,
    };

    if let Err(error) = &result {
      if error.breaks_connection() && !self.broken {
        tracing::warn!(%error, "Connection to {} is broken", self.address);
        self.broken = true;
      }
    }

    result
  }
}

/// Stands in for a connection that could not be reestablished.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Disconnected;

#[async_trait::async_trait]
impl Transport for Disconnected {
  async fn read(
    &mut self,
    _table: Table,
    _offset: Address,
  ) -> Result<Word, ReadError> {
    Err(ReadError::Transport(std::io::Error::new(
      std::io::ErrorKind::NotConnected,
      "not connected",
    )))
  }
}

// NOTE: the library reports exception responses as `ErrorKind::Other`
fn classify_library_error(
  error: std::io::Error,
  timeout_ms: u64,
) -> ReadError {
  match error.kind() {
    std::io::ErrorKind::Other => ReadError::Protocol(error.to_string()),
    std::io::ErrorKind::InvalidData => {
      ReadError::MalformedResponse(error.to_string())
    }
    std::io::ErrorKind::TimedOut => ReadError::Timeout(timeout_ms),
    _ => ReadError::Transport(error),
  }
}

async fn open_stream(
  address: SocketAddr,
  timeout: std::time::Duration,
) -> Result<TcpStream, ConnectError> {
  let stream =
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
      Ok(Ok(stream)) => stream,
      Ok(Err(error)) => return Err(ConnectError::Connect(address, error)),
      Err(_) => return Err(ConnectError::Timeout(address)),
    };
  if let Err(error) = stream.set_nodelay(true) {
    tracing::debug!(%error, "Failed disabling nagle");
  }

  Ok(stream)
}

fn duration_from_chrono(duration: chrono::Duration) -> std::time::Duration {
  std::time::Duration::from_millis(duration.num_milliseconds().max(0) as u64)
}
