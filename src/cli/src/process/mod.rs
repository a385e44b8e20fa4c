pub(crate) mod measure;
pub(crate) mod poll;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config;

pub(crate) trait Process {
  fn process_name(&self) -> &'static str {
    std::any::type_name::<Self>()
  }
}

#[async_trait::async_trait]
pub(crate) trait Recurring: Process {
  async fn execute(&self) -> anyhow::Result<()>;

  /// Releases whatever the process holds once it will not execute again.
  async fn finish(&self) -> anyhow::Result<()> {
    Ok(())
  }
}

pub(crate) struct Container {
  mode: config::Mode,
  process: Arc<dyn Recurring + Sync + Send>,
  handle: Arc<Mutex<Option<Handle>>>,
}

impl Container {
  pub(crate) fn new(
    mode: config::Mode,
    process: Arc<dyn Recurring + Sync + Send>,
  ) -> Self {
    Self {
      mode,
      process,
      handle: Arc::new(Mutex::new(None)),
    }
  }

  pub(crate) async fn spawn(&self) {
    let mut handle = self.handle.clone().lock_owned().await;
    *handle = Some(Handle::spawn(self.mode, self.process.clone()));
  }

  /// Waits for the process to stop on its own. Dropping the returned future
  /// leaves the process running so it can still be cancelled.
  pub(crate) async fn join(&self) -> anyhow::Result<()> {
    let mut handle = self.handle.clone().lock_owned().await;
    let result = match &mut *handle {
      Some(running) => (&mut running.join).await,
      None => return Ok(()),
    };
    *handle = None;

    result?
  }

  /// Stops the process at its next cycle boundary and waits for it.
  pub(crate) async fn cancel(&self) -> anyhow::Result<()> {
    let running = self.handle.clone().lock_owned().await.take();
    match running {
      Some(running) => {
        running.token.cancel();
        running.join.await?
      }
      None => Ok(()),
    }
  }

  pub(crate) async fn finish(&self) -> anyhow::Result<()> {
    self.process.finish().await
  }
}

struct Handle {
  token: tokio_util::sync::CancellationToken,
  join: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Handle {
  fn spawn(
    mode: config::Mode,
    process: Arc<dyn Recurring + Sync + Send>,
  ) -> Self {
    let token = tokio_util::sync::CancellationToken::new();
    let child_token = token.child_token();
    let join = tokio::spawn(async move {
      tracing::debug!("Starting {}", process.process_name());

      let interval = match mode {
        config::Mode::Once => return process.execute().await,
        config::Mode::Continuous(interval) => interval,
      };

      let mut interval = tokio::time::interval(std::time::Duration::from_millis(
        interval.num_milliseconds() as u64,
      ));
      interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        // NOTE: cancellation is only observed between cycles
        tokio::select! {
          _ = child_token.cancelled() => { return Ok(()); },
          _ = interval.tick() => { },
        }

        process.execute().await?;
      }
    });

    Self { token, join }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  #[derive(Default)]
  struct Counting {
    executions: AtomicUsize,
    finished: AtomicUsize,
  }

  impl Process for Counting {}

  #[async_trait::async_trait]
  impl Recurring for Counting {
    async fn execute(&self) -> anyhow::Result<()> {
      self.executions.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(std::time::Duration::from_millis(50)).await;
      Ok(())
    }

    async fn finish(&self) -> anyhow::Result<()> {
      self.finished.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  struct Failing;

  impl Process for Failing {}

  #[async_trait::async_trait]
  impl Recurring for Failing {
    async fn execute(&self) -> anyhow::Result<()> {
      Err(anyhow::anyhow!("output is gone"))
    }
  }

  #[tokio::test]
  async fn once_executes_a_single_cycle() {
    let process = Arc::new(Counting::default());
    let container = Container::new(config::Mode::Once, process.clone());

    container.spawn().await;
    container.join().await.unwrap();
    container.finish().await.unwrap();

    assert_eq!(process.executions.load(Ordering::SeqCst), 1);
    assert_eq!(process.finished.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn cancel_waits_for_cycle_boundary() {
    let process = Arc::new(Counting::default());
    let container = Container::new(
      config::Mode::Continuous(chrono::Duration::seconds(1)),
      process.clone(),
    );

    container.spawn().await;
    tokio::time::sleep(std::time::Duration::from_millis(2010)).await;
    container.cancel().await.unwrap();

    assert_eq!(process.executions.load(Ordering::SeqCst), 3);

    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    assert_eq!(process.executions.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn failure_ends_continuous_run() {
    let container = Container::new(
      config::Mode::Continuous(chrono::Duration::milliseconds(100)),
      Arc::new(Failing),
    );

    container.spawn().await;
    let error = container.join().await.unwrap_err();

    assert_eq!(error.to_string(), "output is gone");
  }

  #[tokio::test]
  async fn join_survives_being_dropped() {
    let process = Arc::new(Counting::default());
    let container = Container::new(
      config::Mode::Continuous(chrono::Duration::milliseconds(100)),
      process.clone(),
    );

    container.spawn().await;
    let timed_out = tokio::time::timeout(
      std::time::Duration::from_millis(120),
      container.join(),
    )
    .await;
    assert!(timed_out.is_err());

    container.cancel().await.unwrap();
    assert!(process.executions.load(Ordering::SeqCst) >= 1);
  }
}
