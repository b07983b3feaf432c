//! Periodic background loops (heartbeat, maintenance).

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::blocking::on_blocking_pool;
use crate::error::ConductorError;

/// Handle to a loop started by [`spawn_periodic()`].
///
/// Dropping the handle stops the loop at its next wakeup.
#[derive(Debug)]
pub struct PeriodicHandle {
    name: String,
    stop: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl PeriodicHandle {
    /// Name given at spawn time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the loop and wait for the current run, if any, to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(err) = (&mut self.join).await {
            warn!(task = %self.name, error = %err, "periodic task ended abnormally");
        }
    }
}

/// Run `f` every `interval`, starting immediately. The loop lives on the
/// current tokio runtime; each run of `f` happens on the blocking pool.
/// Errors are logged and the loop keeps going. A panic in `f` ends it.
pub fn spawn_periodic<F>(name: impl Into<String>, interval: Duration, f: F) -> PeriodicHandle
where
    F: FnMut() -> Result<(), ConductorError> + Send + 'static,
{
    let name = name.into();
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let task_name = name.clone();
    let join = tokio::spawn(async move {
        let mut f = f;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {}
            }
            let run = on_blocking_pool(move || {
                let result = f();
                (f, result)
            })
            .await;
            match run {
                Ok((returned, result)) => {
                    f = returned;
                    if let Err(err) = result {
                        warn!(task = %task_name, error = %err, "periodic task failed");
                    }
                }
                Err(err) => {
                    error!(task = %task_name, error = %err, "periodic task died");
                    break;
                }
            }
        }
        debug!(task = %task_name, "periodic task stopped");
    });
    PeriodicHandle {
        name,
        stop: Some(stop_tx),
        join,
    }
}
