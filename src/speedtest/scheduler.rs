use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::payload::random_payload;
use super::ping::{mean, PingProbe, PingSample};
use super::pool::{PoolEvent, PoolHandle, PoolStats, Transfer, WorkerPool};
use super::sampler::ThroughputSampler;
use super::status::{StatusFeed, StatusReport};
use super::timers::{Timer, TimerFired, TimerScope};
use super::transport::Transport;
use super::{Direction, SessionKey, TestPhase, TestUpdate};
use crate::settings::{
    Settings, PING_REFRESH_INTERVAL, START_DOWNLOAD_BYTES, STATUS_DELAY_INTERVAL, STATUS_TAIL_DIVISOR,
};

/// Commands from the UI.
#[derive(Debug, Clone)]
pub enum Control {
    Start,
    Cancel,
    /// Replaces the settings used by subsequent runs. Ignored while a run is active.
    Configure(Settings),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingAdvance {
    seq: u64,
    next: TestPhase,
}

/// Everything that changes over a run. Only the scheduler holds it.
struct OrchestratorState {
    phase: TestPhase,
    session: Option<SessionKey>,
    /// Bumped on every reset or natural finish; stale ping samples carry an old value.
    run: u64,
    payload: Option<Bytes>,
    pending_advance: Option<PendingAdvance>,
    ping_samples: Vec<f64>,
    sampler: ThroughputSampler,
}

struct Inbox {
    timers: mpsc::UnboundedReceiver<TimerFired>,
    pool: mpsc::UnboundedReceiver<PoolEvent>,
    status: mpsc::UnboundedReceiver<StatusReport>,
    ping: mpsc::UnboundedReceiver<PingSample>,
    ping_tx: mpsc::UnboundedSender<PingSample>,
}

/// Idle -> Ping -> Download -> Upload -> Idle, driven by timers and the pool's
/// termination handshake.
pub struct PhaseScheduler {
    settings: Settings,
    transport: Arc<dyn Transport>,
    ui: mpsc::UnboundedSender<TestUpdate>,
    state: OrchestratorState,
    timers: TimerScope,
    pool: PoolHandle,
    status: StatusFeed,
    probe: Option<PingProbe>,
    inbox: Inbox,
}

impl PhaseScheduler {
    /// Must be called inside a tokio runtime; the worker pool actor is launched here.
    pub fn new(
        settings: Settings,
        transport: Arc<dyn Transport>,
        ui: mpsc::UnboundedSender<TestUpdate>,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (pool_tx, pool_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (ping_tx, ping_rx) = mpsc::unbounded_channel();

        Self {
            state: OrchestratorState {
                phase: TestPhase::Idle,
                session: None,
                run: 0,
                payload: None,
                pending_advance: None,
                ping_samples: Vec::new(),
                sampler: ThroughputSampler::new(settings.display),
            },
            timers: TimerScope::new(timer_tx),
            pool: WorkerPool::launch(Arc::clone(&transport), pool_tx),
            status: StatusFeed::new(Arc::clone(&transport), status_tx),
            probe: None,
            inbox: Inbox {
                timers: timer_rx,
                pool: pool_rx,
                status: status_rx,
                ping: ping_rx,
                ping_tx,
            },
            settings,
            transport,
            ui,
        }
    }

    pub async fn run(mut self, mut control: mpsc::Receiver<Control>) {
        loop {
            tokio::select! {
                command = control.recv() => match command {
                    Some(Control::Start) => self.start(),
                    Some(Control::Cancel) => self.cancel(),
                    Some(Control::Configure(settings)) => self.configure(settings),
                    Some(Control::Shutdown) | None => {
                        self.reset();
                        break;
                    }
                },
                alive = self.step() => if !alive {
                    break;
                },
            }
        }
        debug!("scheduler stopped");
    }

    /// Waits for one internal event and handles it. Returns `false` once every source is gone.
    pub async fn step(&mut self) -> bool {
        tokio::select! {
            Some(fired) = self.inbox.timers.recv() => self.on_timer(fired),
            Some(event) = self.inbox.pool.recv() => self.on_pool_event(event),
            Some(report) = self.inbox.status.recv() => self.on_status(report),
            Some(sample) = self.inbox.ping.recv() => self.on_ping(sample),
            else => return false,
        }
        true
    }

    pub fn start(&mut self) {
        if self.state.phase != TestPhase::Idle {
            debug!("start ignored: run already active");
            return;
        }
        self.reset();

        let payload = match random_payload(self.settings.upload_bytes) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("could not build upload payload: {:#}", e);
                return;
            }
        };
        self.state.payload = Some(payload);

        let session = SessionKey::generate();
        info!("starting run {}", session);
        self.state.session = Some(session);
        self.send(TestUpdate::Controls {
            start_enabled: false,
            cancel_enabled: true,
        });
        self.enter_ping();
    }

    pub fn cancel(&mut self) {
        if self.state.phase != TestPhase::Idle {
            info!("run cancelled during {:?}", self.state.phase);
        }
        self.reset();
    }

    /// Returns to Idle from anywhere. Safe to repeat.
    pub fn reset(&mut self) {
        if let Some(session) = self.state.session.take() {
            self.discard_session(session);
        }
        if matches!(self.state.phase, TestPhase::Download | TestPhase::Upload)
            || self.state.pending_advance.is_some()
        {
            // The acknowledgement is not awaited; the actor handles Resume only after draining.
            self.pool.terminate();
            self.pool.resume();
        }
        if let Some(probe) = self.probe.take() {
            probe.close();
        }
        self.status.detach();
        self.timers.cancel_all();

        self.state.pending_advance = None;
        self.state.ping_samples.clear();
        self.state.sampler.reset();
        self.state.payload = None;
        self.state.run += 1;

        self.set_phase(TestPhase::Idle);
        self.send(TestUpdate::Cleared);
        self.send(TestUpdate::Controls {
            start_enabled: true,
            cancel_enabled: false,
        });
    }

    pub fn configure(&mut self, settings: Settings) {
        if self.state.phase != TestPhase::Idle {
            debug!("settings change ignored during {:?}", self.state.phase);
            return;
        }
        self.state.sampler.set_display(settings.display);
        self.settings = settings;
    }

    pub fn phase(&self) -> TestPhase {
        self.state.phase
    }

    pub fn session_key(&self) -> Option<&SessionKey> {
        self.state.session.as_ref()
    }

    pub fn pending_timers(&mut self) -> usize {
        self.timers.pending()
    }

    pub fn pool_stats(&self) -> Arc<PoolStats> {
        self.pool.stats()
    }

    pub fn status_attached(&self) -> bool {
        self.status.is_attached()
    }

    pub fn series(&self, direction: Direction) -> &[u64] {
        self.state.sampler.series(direction)
    }

    fn send(&self, update: TestUpdate) {
        let _ = self.ui.send(update);
    }

    fn set_phase(&mut self, phase: TestPhase) {
        if self.state.phase != phase {
            debug!("phase {:?} -> {:?}", self.state.phase, phase);
        }
        self.state.phase = phase;
        self.send(TestUpdate::Phase(phase));
    }

    fn discard_session(&self, session: SessionKey) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(e) = transport.clear(&session).await {
                debug!("session clear failed: {}", e);
            }
        });
    }

    fn enter_ping(&mut self) {
        self.set_phase(TestPhase::Ping);
        self.probe = Some(PingProbe::open(
            Arc::clone(&self.transport),
            self.state.run,
            self.inbox.ping_tx.clone(),
        ));
        self.timers.every(PING_REFRESH_INTERVAL, Timer::PingRefresh);
        self.timers
            .after(self.settings.ping_interval(), Timer::PhaseEnd(TestPhase::Ping));
    }

    fn enter_transfer(&mut self, direction: Direction) {
        let Some(session) = self.state.session.clone() else {
            return;
        };
        let (phase, transfer, workers, requests, duration) = match direction {
            Direction::Download => (
                TestPhase::Download,
                Transfer::Download {
                    bytes: START_DOWNLOAD_BYTES,
                },
                self.settings.download_workers,
                self.settings.download_requests,
                self.settings.download_interval(),
            ),
            Direction::Upload => (
                TestPhase::Upload,
                Transfer::Upload {
                    payload: self.state.payload.clone().unwrap_or_default(),
                },
                self.settings.upload_workers,
                self.settings.upload_requests,
                self.settings.upload_interval(),
            ),
        };

        self.set_phase(phase);
        self.pool.spawn(session, transfer, workers, requests);
        self.timers.after(STATUS_DELAY_INTERVAL, Timer::AttachStatus);
        self.timers.after(duration, Timer::PhaseEnd(phase));
    }

    fn on_timer(&mut self, fired: TimerFired) {
        if !self.timers.is_current(&fired) {
            return;
        }
        match fired.timer {
            Timer::PingRefresh => self.publish_ping(),
            Timer::AttachStatus => {
                if let Some(session) = self.state.session.clone() {
                    self.status.attach(session);
                }
            }
            Timer::PhaseEnd(TestPhase::Ping) => {
                self.timers.cancel_all();
                if let Some(probe) = self.probe.take() {
                    probe.close();
                }
                self.publish_ping();
                self.state.ping_samples.clear();
                self.enter_transfer(Direction::Download);
            }
            Timer::PhaseEnd(TestPhase::Download) => self.begin_termination(TestPhase::Upload),
            Timer::PhaseEnd(TestPhase::Upload) => self.begin_termination(TestPhase::Idle),
            Timer::PhaseEnd(TestPhase::Idle) => {}
            Timer::StatusTail => {
                self.status.detach();
                if let Some(session) = self.state.session.take() {
                    self.discard_session(session);
                }
            }
            Timer::AckTimeout(seq) => {
                if self.awaits(seq) {
                    warn!("worker pool did not acknowledge termination in time; advancing");
                    self.advance();
                }
            }
        }
    }

    fn begin_termination(&mut self, next: TestPhase) {
        self.timers.cancel_all();
        let seq = self.pool.terminate();
        debug!("awaiting termination {} before {:?}", seq, next);
        self.state.pending_advance = Some(PendingAdvance { seq, next });
        self.timers
            .after(self.settings.ack_timeout, Timer::AckTimeout(seq));
    }

    fn awaits(&self, seq: u64) -> bool {
        matches!(self.state.pending_advance, Some(pending) if pending.seq == seq)
    }

    fn on_pool_event(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::Terminated { seq } => {
                if self.awaits(seq) {
                    self.timers.cancel_all();
                    self.advance();
                } else {
                    debug!("ignoring termination acknowledgement {}", seq);
                }
            }
        }
    }

    /// Fires the single next-phase action owed to the pending termination.
    fn advance(&mut self) {
        let Some(pending) = self.state.pending_advance.take() else {
            return;
        };
        self.pool.resume();
        match pending.next {
            TestPhase::Upload => self.enter_transfer(Direction::Upload),
            _ => self.finish(),
        }
    }

    /// The status feed and session outlive the run briefly so the server's final
    /// counters are sampled; `StatusTail` releases both.
    fn finish(&mut self) {
        info!("run complete");
        self.timers.cancel_all();
        self.state.payload = None;
        self.state.run += 1;
        self.set_phase(TestPhase::Idle);
        self.send(TestUpdate::Controls {
            start_enabled: true,
            cancel_enabled: false,
        });
        self.timers.after(
            self.settings.upload_interval() / STATUS_TAIL_DIVISOR,
            Timer::StatusTail,
        );
    }

    fn on_status(&mut self, report: StatusReport) {
        if !self.status.is_current(&report) {
            return;
        }
        for update in self.state.sampler.ingest_snapshot(&report.snapshot) {
            self.send(TestUpdate::Rate(update));
        }
    }

    fn on_ping(&mut self, sample: PingSample) {
        if sample.run != self.state.run || self.state.phase != TestPhase::Ping {
            return;
        }
        self.state
            .ping_samples
            .push(sample.half_trip.as_secs_f64() * 1000.0);
    }

    fn publish_ping(&self) {
        if let Some(mean_ms) = mean(&self.state.ping_samples) {
            self.send(TestUpdate::Ping {
                mean_ms,
                samples: self.state.ping_samples.clone(),
            });
        }
    }
}
