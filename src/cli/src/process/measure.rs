use tokio::sync::Mutex;

use crate::{
  config,
  service::{self, cop, modbus, sink::Sink},
};

use super::poll::Poller;

struct Session<TSink> {
  connection: Option<modbus::Connection>,
  poller: Poller,
  sink: TSink,
}

/// Polling session owning the single connection and the output sink.
pub(crate) struct Process<TSink> {
  services: service::Container,
  session: Mutex<Session<TSink>>,
}

impl<TSink: Sink + Send> Process<TSink> {
  pub(crate) fn new(
    config: &config::Values,
    services: service::Container,
    connection: Option<modbus::Connection>,
    sink: TSink,
  ) -> Self {
    let modbus = services.modbus();
    let poller = Poller::new(
      modbus.registers().to_vec(),
      modbus.convention(),
      modbus.params().delay(),
      config.cop,
    );

    Self {
      services,
      session: Mutex::new(Session {
        connection,
        poller,
        sink,
      }),
    }
  }

  // NOTE: one attempt per cycle boundary so the backoff is the cycle interval
  async fn reconnect(&self, connection: &mut Option<modbus::Connection>) {
    if connection
      .as_ref()
      .is_some_and(|connection| !connection.is_broken())
    {
      return;
    }

    if let Some(broken) = connection.take() {
      tracing::warn!("Connection to {} broke, reconnecting", broken.address());
      if let Err(error) = broken.close().await {
        tracing::debug!(%error, "Failed closing broken connection");
      }
    }

    match self.services.modbus().connect().await {
      Ok(fresh) => *connection = Some(fresh),
      Err(error) => {
        tracing::warn!(
          "Reconnecting failed, reading disconnected this cycle: {}",
          error
        );
      }
    }
  }
}

impl<TSink> super::Process for Process<TSink> {}

#[async_trait::async_trait]
impl<TSink: Sink + Send> super::Recurring for Process<TSink> {
  async fn execute(&self) -> anyhow::Result<()> {
    let mut session = self.session.lock().await;
    let Session {
      connection,
      poller,
      sink,
    } = &mut *session;

    self.reconnect(connection).await;
    let summary = match connection {
      Some(connection) => poller.cycle(connection, sink).await?,
      None => poller.cycle(&mut modbus::Disconnected, sink).await?,
    };

    match summary.cop.as_ref().and_then(cop::Cop::value) {
      Some(cop) => tracing::info!(
        "Cycle read {} registers, {} failed, COP {:.2}",
        summary.read,
        summary.failed,
        cop
      ),
      None => tracing::info!(
        "Cycle read {} registers, {} failed",
        summary.read,
        summary.failed
      ),
    }

    Ok(())
  }

  async fn finish(&self) -> anyhow::Result<()> {
    let mut session = self.session.lock().await;
    session.sink.flush()?;
    if let Some(connection) = session.connection.take() {
      connection.close().await?;
    }

    Ok(())
  }
}
