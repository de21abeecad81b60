use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::transport::{EchoChannel, Transport};
use super::SessionKey;

/// In-memory server: fixed latencies, call accounting, optional gating of downloads.
pub struct FakeTransport {
    latency: Duration,
    gate: Option<Semaphore>,
    fail_call: Option<usize>,
    status_latency: Duration,
    downloads: Mutex<Vec<u64>>,
    uploads: Mutex<Vec<Bytes>>,
    clears: AtomicUsize,
    status_polls: AtomicUsize,
    status_in_flight: AtomicUsize,
    status_peak: AtomicUsize,
    echo_closed: Arc<AtomicUsize>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(100),
            gate: None,
            fail_call: None,
            status_latency: Duration::ZERO,
            downloads: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            clears: AtomicUsize::new(0),
            status_polls: AtomicUsize::new(0),
            status_in_flight: AtomicUsize::new(0),
            status_peak: AtomicUsize::new(0),
            echo_closed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FakeTransport {
    /// Downloads hang until `release` hands out permits.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// The n-th download call (1-based) fails.
    pub fn failing_call(n: usize) -> Self {
        Self {
            fail_call: Some(n),
            ..Self::default()
        }
    }

    /// Every status response takes `latency`.
    pub fn slow_status(latency: Duration) -> Self {
        Self {
            status_latency: latency,
            ..Self::default()
        }
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn download_sizes(&self) -> Vec<u64> {
        self.downloads.lock().clone()
    }

    pub fn upload_payloads(&self) -> Vec<Bytes> {
        self.uploads.lock().clone()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn status_polls(&self) -> usize {
        self.status_polls.load(Ordering::SeqCst)
    }

    /// Most status requests ever outstanding at once.
    pub fn status_peak(&self) -> usize {
        self.status_peak.load(Ordering::SeqCst)
    }

    pub fn echo_closed(&self) -> usize {
        self.echo_closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn download(&self, _session: &SessionKey, bytes: u64) -> Result<()> {
        let call = {
            let mut downloads = self.downloads.lock();
            downloads.push(bytes);
            downloads.len()
        };
        match &self.gate {
            Some(gate) => gate.acquire().await?.forget(),
            None => tokio::time::sleep(self.latency).await,
        }
        if self.fail_call == Some(call) {
            bail!("connection reset");
        }
        Ok(())
    }

    async fn upload(&self, _session: &SessionKey, payload: Bytes) -> Result<()> {
        self.uploads.lock().push(payload);
        tokio::time::sleep(self.latency).await;
        Ok(())
    }

    async fn status(&self, _session: &SessionKey) -> Result<String> {
        let poll = self.status_polls.fetch_add(1, Ordering::SeqCst) as u64;
        let in_flight = self.status_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.status_peak.fetch_max(in_flight, Ordering::SeqCst);
        if !self.status_latency.is_zero() {
            tokio::time::sleep(self.status_latency).await;
        }
        self.status_in_flight.fetch_sub(1, Ordering::SeqCst);
        if poll == 0 {
            return Ok("null".to_string());
        }
        // 5 MB/s in both directions.
        let end = poll * 250 + 1;
        let count = (end - 1) * 5_000;
        Ok(format!(
            r#"{{"downloadStart":1,"downloadEnd":{end},"downloadCount":{count},"uploadStart":1,"uploadEnd":{end},"uploadCount":{count}}}"#
        ))
    }

    async fn clear(&self, _session: &SessionKey) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open_echo(&self) -> Result<Box<dyn EchoChannel>> {
        Ok(Box::new(FakeEcho {
            closed: Arc::clone(&self.echo_closed),
        }))
    }
}

struct FakeEcho {
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl EchoChannel for FakeEcho {
    async fn echo(&mut self) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
