use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::transport::Transport;

#[derive(Debug, Clone, Copy)]
pub struct PingSample {
    pub run: u64,
    /// Half of the measured round trip.
    pub half_trip: Duration,
}

/// Back-to-back probe loop over the persistent echo connection.
pub struct PingProbe {
    token: CancellationToken,
}

impl PingProbe {
    pub fn open(transport: Arc<dyn Transport>, run: u64, tx: mpsc::UnboundedSender<PingSample>) -> Self {
        let token = CancellationToken::new();
        tokio::spawn(probe_loop(transport, run, tx, token.clone()));
        Self { token }
    }

    /// Stops probing; the loop closes the connection on its way out.
    pub fn close(self) {
        self.token.cancel();
    }
}

impl Drop for PingProbe {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn probe_loop(
    transport: Arc<dyn Transport>,
    run: u64,
    tx: mpsc::UnboundedSender<PingSample>,
    token: CancellationToken,
) {
    let mut channel = tokio::select! {
        _ = token.cancelled() => return,
        channel = transport.open_echo() => match channel {
            Ok(channel) => channel,
            Err(e) => {
                warn!("latency probe unavailable: {:#}", e);
                return;
            }
        },
    };

    loop {
        let sent = Instant::now();
        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = channel.echo() => result,
        };
        match result {
            Ok(()) => {
                let sample = PingSample {
                    run,
                    half_trip: sent.elapsed() / 2,
                };
                if tx.send(sample).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("echo failed: {}", e);
                break;
            }
        }
    }

    channel.close().await;
    debug!("echo socket closed");
}

pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}
