use crate::session::SessionCommand;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Reconnection watchdog parameters.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// How often connectivity is checked.
    pub interval: Duration,
    /// Consecutive failed rejoin attempts tolerated before the watchdog
    /// stops retrying.
    pub max_consecutive_failures: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_consecutive_failures: 12,
        }
    }
}

/// Periodic health-check ticker. Holds only a weak sender so it can never
/// keep a dropped session loop alive; cancelled on leave or teardown.
pub(crate) struct Watchdog {
    task: JoinHandle<()>,
}

impl Watchdog {
    pub(crate) fn start(interval: Duration, commands: mpsc::WeakSender<SessionCommand>) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(commands) = commands.upgrade() else {
                    break;
                };
                if commands.send(SessionCommand::HealthCheck).await.is_err() {
                    break;
                }
            }
        });
        Self { task }
    }

    pub(crate) fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.task.abort();
    }
}
