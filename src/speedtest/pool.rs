use bytes::Bytes;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::transport::Transport;
use super::{Direction, SessionKey};
use crate::settings::{DOWNLOAD_GROW_FACTOR, MAX_DOWNLOAD_BYTES, MIN_DOWNLOAD_BYTES, START_DOWNLOAD_BYTES};

/// Brings a requested download size into `[MIN_DOWNLOAD_BYTES, MAX_DOWNLOAD_BYTES]`.
/// Undersized requests restart from `START_DOWNLOAD_BYTES`.
pub fn clamp_download_bytes(bytes: u64) -> u64 {
    if bytes > MAX_DOWNLOAD_BYTES {
        MAX_DOWNLOAD_BYTES
    } else if bytes < MIN_DOWNLOAD_BYTES {
        START_DOWNLOAD_BYTES
    } else {
        bytes
    }
}

pub fn next_download_bytes(bytes: u64) -> u64 {
    clamp_download_bytes(bytes.saturating_mul(DOWNLOAD_GROW_FACTOR))
}

#[derive(Debug, Clone)]
pub enum Transfer {
    Download { bytes: u64 },
    Upload { payload: Bytes },
}

impl Transfer {
    pub fn direction(&self) -> Direction {
        match self {
            Transfer::Download { .. } => Direction::Download,
            Transfer::Upload { .. } => Direction::Upload,
        }
    }
}

#[derive(Debug)]
pub enum PoolCommand {
    Spawn {
        session: SessionKey,
        transfer: Transfer,
        workers: usize,
        requests: usize,
    },
    /// Poison pill: abort everything and start discarding until `Resume`.
    Terminate { seq: u64 },
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    Terminated { seq: u64 },
}

#[derive(Debug, Default)]
pub struct PoolStats {
    active: AtomicUsize,
    download_batches: AtomicUsize,
    upload_batches: AtomicUsize,
    terminations: AtomicUsize,
    requests: AtomicU64,
}

impl PoolStats {
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn batches(&self, direction: Direction) -> usize {
        match direction {
            Direction::Download => self.download_batches.load(Ordering::SeqCst),
            Direction::Upload => self.upload_batches.load(Ordering::SeqCst),
        }
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

/// Decrements the active count however the worker ends, including abort.
struct ActiveGuard(Arc<PoolStats>);

impl ActiveGuard {
    fn new(stats: &Arc<PoolStats>) -> Self {
        stats.active.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(stats))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

enum PoolState {
    Active(CancellationToken),
    Draining,
}

pub struct PoolHandle {
    tx: mpsc::UnboundedSender<PoolCommand>,
    stats: Arc<PoolStats>,
    next_seq: u64,
}

impl PoolHandle {
    pub fn spawn(&self, session: SessionKey, transfer: Transfer, workers: usize, requests: usize) {
        let _ = self.tx.send(PoolCommand::Spawn {
            session,
            transfer,
            workers,
            requests,
        });
    }

    /// Requests termination; the matching `PoolEvent::Terminated` carries the returned sequence.
    pub fn terminate(&mut self) -> u64 {
        self.next_seq += 1;
        let _ = self.tx.send(PoolCommand::Terminate { seq: self.next_seq });
        self.next_seq
    }

    pub fn resume(&self) {
        let _ = self.tx.send(PoolCommand::Resume);
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }
}

pub struct WorkerPool {
    transport: Arc<dyn Transport>,
    workers: JoinSet<()>,
    state: PoolState,
    stats: Arc<PoolStats>,
    events: mpsc::UnboundedSender<PoolEvent>,
}

impl WorkerPool {
    pub fn launch(
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedSender<PoolEvent>,
    ) -> PoolHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(PoolStats::default());
        let pool = WorkerPool {
            transport,
            workers: JoinSet::new(),
            state: PoolState::Active(CancellationToken::new()),
            stats: Arc::clone(&stats),
            events,
        };
        tokio::spawn(pool.run(rx));
        PoolHandle {
            tx,
            stats,
            next_seq: 0,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PoolCommand>) {
        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(_) = self.workers.join_next(), if !self.workers.is_empty() => {}
            }
        }
        if let PoolState::Active(token) = &self.state {
            token.cancel();
        }
        self.workers.shutdown().await;
    }

    async fn handle(&mut self, command: PoolCommand) {
        match command {
            PoolCommand::Spawn {
                session,
                transfer,
                workers,
                requests,
            } => self.spawn(session, transfer, workers, requests),
            PoolCommand::Terminate { seq } => self.terminate(seq).await,
            PoolCommand::Resume => {
                if let PoolState::Draining = self.state {
                    self.state = PoolState::Active(CancellationToken::new());
                    debug!("worker pool resumed");
                }
            }
        }
    }

    fn spawn(&mut self, session: SessionKey, transfer: Transfer, count: usize, requests: usize) {
        let token = match &self.state {
            PoolState::Active(token) => token.clone(),
            PoolState::Draining => {
                debug!("discarding {:?} spawn while draining", transfer.direction());
                return;
            }
        };

        let direction = transfer.direction();
        match direction {
            Direction::Download => self.stats.download_batches.fetch_add(1, Ordering::SeqCst),
            Direction::Upload => self.stats.upload_batches.fetch_add(1, Ordering::SeqCst),
        };
        let requests = requests.max(1);
        info!("spawning {} {:?} workers x {} requests", count, direction, requests);

        for worker in 0..count {
            let guard = ActiveGuard::new(&self.stats);
            let transport = Arc::clone(&self.transport);
            let session = session.clone();
            let token = token.clone();
            let stats = Arc::clone(&self.stats);
            let transfer = transfer.clone();
            // A worker stays active until every one of its request loops has ended.
            self.workers.spawn(async move {
                let _guard = guard;
                let loops = (0..requests).map(|_| {
                    worker_loop(
                        worker,
                        Arc::clone(&transport),
                        session.clone(),
                        transfer.clone(),
                        token.clone(),
                        Arc::clone(&stats),
                    )
                });
                join_all(loops).await;
            });
        }
    }

    async fn terminate(&mut self, seq: u64) {
        if let PoolState::Active(token) = std::mem::replace(&mut self.state, PoolState::Draining) {
            token.cancel();
        }
        let aborted = self.workers.len();
        self.workers.shutdown().await;
        self.stats.terminations.fetch_add(1, Ordering::SeqCst);
        info!("worker pool terminated ({} workers aborted)", aborted);
        let _ = self.events.send(PoolEvent::Terminated { seq });
    }
}

async fn worker_loop(
    worker: usize,
    transport: Arc<dyn Transport>,
    session: SessionKey,
    transfer: Transfer,
    token: CancellationToken,
    stats: Arc<PoolStats>,
) {
    match transfer {
        Transfer::Download { bytes } => download_loop(worker, transport, session, bytes, token, stats).await,
        Transfer::Upload { payload } => upload_loop(worker, transport, session, payload, token, stats).await,
    }
}

async fn download_loop(
    worker: usize,
    transport: Arc<dyn Transport>,
    session: SessionKey,
    bytes: u64,
    token: CancellationToken,
    stats: Arc<PoolStats>,
) {
    let mut bytes = clamp_download_bytes(bytes);
    while !token.is_cancelled() {
        stats.requests.fetch_add(1, Ordering::SeqCst);
        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = transport.download(&session, bytes) => result,
        };
        // A completion racing the poison pill must not re-issue.
        if token.is_cancelled() {
            return;
        }
        match result {
            Ok(()) => bytes = next_download_bytes(bytes),
            Err(e) => {
                debug!("download worker {} stopped: {}", worker, e);
                return;
            }
        }
    }
}

async fn upload_loop(
    worker: usize,
    transport: Arc<dyn Transport>,
    session: SessionKey,
    payload: Bytes,
    token: CancellationToken,
    stats: Arc<PoolStats>,
) {
    while !token.is_cancelled() {
        stats.requests.fetch_add(1, Ordering::SeqCst);
        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = transport.upload(&session, payload.clone()) => result,
        };
        if token.is_cancelled() {
            return;
        }
        if let Err(e) = result {
            debug!("upload worker {} stopped: {}", worker, e);
            return;
        }
    }
}
