//! Periodic liveness watchdog.
//!
//! Wakes up every `sleep_interval` and pings if the connection has been idle outbound longer than
//! `keep_alive_interval`, or stops the session if the server has been silent inbound longer than
//! `server_timeout`. Mirrors `signalrclient.ConnectionChecker.run` from the source almost
//! statement-for-statement, translated from a `threading.Thread` + `time.sleep` loop into a tokio
//! task.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

const DEFAULT_SLEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Shared clock the checker reads and `Session` writes on every send/receive.
#[derive(Debug)]
pub struct Clock {
    pub last_try_send: Mutex<Instant>,
    pub last_received: Mutex<Instant>,
}

impl Clock {
    pub fn new() -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Clock {
            last_try_send: Mutex::new(now),
            last_received: Mutex::new(now),
        })
    }

    pub fn touch_send(&self) {
        *self.last_try_send.lock() = Instant::now();
    }

    pub fn touch_received(&self) {
        *self.last_received.lock() = Instant::now();
    }
}

pub struct ConnectionChecker {
    keep_alive_interval: Duration,
    server_timeout: Option<Duration>,
    sleep_interval: Duration,
    clock: Arc<Clock>,
}

impl ConnectionChecker {
    pub fn new(keep_alive_interval: Duration, server_timeout: Option<Duration>, clock: Arc<Clock>) -> Self {
        ConnectionChecker {
            keep_alive_interval,
            server_timeout,
            sleep_interval: DEFAULT_SLEEP_INTERVAL,
            clock,
        }
    }

    #[cfg(test)]
    pub fn with_sleep_interval(mut self, sleep_interval: Duration) -> Self {
        self.sleep_interval = sleep_interval;
        self
    }

    /// Loop until `shutdown` is notified, calling `ping` when idle outbound and `stop` (then
    /// returning) when the server has gone silent past `server_timeout`. `ping`'s own errors are
    /// the caller's problem to swallow (this loop never lets anything escape it). `stop` mirrors
    /// the source binding its `stop` parameter directly to `HubConnection.stop`: the checker runs
    /// on its own task, so calling the full stop routine (not just a local flag flip) is safe and
    /// matches what the source does when a server timeout fires.
    pub async fn run<Ping, PingFut, Stop, StopFut>(&self, shutdown: Arc<Notify>, ping: Ping, stop: Stop)
    where
        Ping: Fn() -> PingFut,
        PingFut: std::future::Future<Output = ()>,
        Stop: Fn() -> StopFut,
        StopFut: std::future::Future<Output = ()>,
    {
        loop {
            let slept = tokio::select! {
                _ = tokio::time::sleep(self.sleep_interval) => true,
                _ = shutdown.notified() => false,
            };
            if !slept {
                tracing::trace!("connection checker stopping");
                return;
            }

            let since_send = self.clock.last_try_send.lock().elapsed();
            if since_send > self.keep_alive_interval {
                ping().await;
            }

            if let Some(server_timeout) = self.server_timeout {
                let since_received = self.clock.last_received.lock().elapsed();
                if since_received > server_timeout {
                    tracing::error!(
                        elapsed_secs = since_received.as_secs_f64(),
                        "server timeout exceeded, stopping"
                    );
                    stop().await;
                    return;
                }
            }
        }
    }
}
