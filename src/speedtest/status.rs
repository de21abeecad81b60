use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::transport::Transport;
use super::{Direction, SessionKey};
use crate::settings::STATUS_CHECK_INTERVAL;

/// Server-side byte counters for a session. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub download_start: Option<u64>,
    pub download_end: Option<u64>,
    pub download_count: Option<u64>,
    pub upload_start: Option<u64>,
    pub upload_end: Option<u64>,
    pub upload_count: Option<u64>,
}

impl StatusSnapshot {
    /// Parses a status body. `null`-ish or malformed bodies mean "no data yet".
    pub fn parse(body: &str) -> Option<Self> {
        let body = body.trim();
        if body.is_empty() || body.starts_with("null") {
            return None;
        }
        match serde_json::from_str(body) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!("ignoring malformed status payload: {}", e);
                None
            }
        }
    }

    /// `(count, start, end)` for a direction, only when all three are present and non-zero.
    pub fn counters(&self, direction: Direction) -> Option<(u64, u64, u64)> {
        let (count, start, end) = match direction {
            Direction::Download => (self.download_count, self.download_start, self.download_end),
            Direction::Upload => (self.upload_count, self.upload_start, self.upload_end),
        };
        match (count?, start?, end?) {
            (0, _, _) | (_, 0, _) | (_, _, 0) => None,
            counters => Some(counters),
        }
    }
}

/// A snapshot tagged with the attachment it came from.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub feed: u64,
    pub snapshot: StatusSnapshot,
}

/// Self-paced status poller. At most one attachment is live at a time.
pub struct StatusFeed {
    transport: Arc<dyn Transport>,
    tx: mpsc::UnboundedSender<StatusReport>,
    attached: Option<(CancellationToken, JoinHandle<()>)>,
    generation: u64,
}

impl StatusFeed {
    pub fn new(transport: Arc<dyn Transport>, tx: mpsc::UnboundedSender<StatusReport>) -> Self {
        Self {
            transport,
            tx,
            attached: None,
            generation: 0,
        }
    }

    /// Starts polling for `session`, replacing any previous attachment.
    pub fn attach(&mut self, session: SessionKey) {
        self.detach();
        self.generation += 1;

        let token = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.transport),
            session,
            self.generation,
            self.tx.clone(),
            token.clone(),
        ));
        self.attached = Some((token, handle));
        debug!("status feed {} attached", self.generation);
    }

    pub fn detach(&mut self) {
        if let Some((token, handle)) = self.attached.take() {
            token.cancel();
            handle.abort();
            debug!("status feed {} detached", self.generation);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    /// Whether a report belongs to the current attachment.
    pub fn is_current(&self, report: &StatusReport) -> bool {
        self.is_attached() && report.feed == self.generation
    }
}

impl Drop for StatusFeed {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn poll_loop(
    transport: Arc<dyn Transport>,
    session: SessionKey,
    feed: u64,
    tx: mpsc::UnboundedSender<StatusReport>,
    token: CancellationToken,
) {
    loop {
        let body = tokio::select! {
            _ = token.cancelled() => return,
            body = transport.status(&session) => body,
        };

        match body {
            Ok(body) => {
                if let Some(snapshot) = StatusSnapshot::parse(&body) {
                    if tx.send(StatusReport { feed, snapshot }).is_err() {
                        return;
                    }
                }
            }
            Err(e) => debug!("status poll failed: {}", e),
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(STATUS_CHECK_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::testing::FakeTransport;
    use std::time::Duration;

    fn feed(transport: Arc<FakeTransport>) -> (StatusFeed, mpsc::UnboundedReceiver<StatusReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StatusFeed::new(transport, tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<StatusReport>) -> Vec<u64> {
        let mut feeds = Vec::new();
        while let Ok(report) = rx.try_recv() {
            feeds.push(report.feed);
        }
        feeds
    }

    #[test]
    fn null_payloads_are_ignored() {
        assert_eq!(StatusSnapshot::parse("null"), None);
        assert_eq!(StatusSnapshot::parse("null\n"), None);
        assert_eq!(StatusSnapshot::parse("nullish garbage"), None);
        assert_eq!(StatusSnapshot::parse(""), None);
        assert_eq!(StatusSnapshot::parse("{not json"), None);
    }

    #[test]
    fn partial_payload_parses() {
        let snapshot =
            StatusSnapshot::parse(r#"{"downloadStart":10,"downloadEnd":1010,"downloadCount":5000,"uploadCount":7}"#)
                .unwrap();
        assert_eq!(snapshot.counters(Direction::Download), Some((5000, 10, 1010)));
        assert_eq!(snapshot.counters(Direction::Upload), None);
    }

    #[test]
    fn zero_fields_mean_absent() {
        let snapshot = StatusSnapshot {
            upload_start: Some(0),
            upload_end: Some(100),
            upload_count: Some(10),
            ..StatusSnapshot::default()
        };
        assert_eq!(snapshot.counters(Direction::Upload), None);
    }

    #[tokio::test(start_paused = true)]
    async fn next_poll_waits_for_the_response() {
        let transport = Arc::new(FakeTransport::slow_status(Duration::from_millis(100)));
        let (mut feed, mut rx) = feed(Arc::clone(&transport));

        feed.attach(SessionKey::generate());
        tokio::time::sleep(Duration::from_millis(1000)).await;

        // Polls start at 0, 350 and 700 ms; the first answers null.
        assert_eq!(transport.status_polls(), 3);
        assert_eq!(transport.status_peak(), 1);
        assert_eq!(drain(&mut rx), vec![1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn reattach_replaces_the_feed() {
        let transport = Arc::new(FakeTransport::default());
        let (mut feed, mut rx) = feed(Arc::clone(&transport));

        feed.attach(SessionKey::generate());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(transport.status_polls(), 3);

        feed.attach(SessionKey::generate());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(transport.status_polls(), 6);
        assert_eq!(drain(&mut rx), vec![1, 1, 2, 2, 2]);

        let stale = StatusReport {
            feed: 1,
            snapshot: StatusSnapshot::default(),
        };
        let live = StatusReport {
            feed: 2,
            snapshot: StatusSnapshot::default(),
        };
        assert!(!feed.is_current(&stale));
        assert!(feed.is_current(&live));
    }

    #[tokio::test(start_paused = true)]
    async fn detach_stops_polling() {
        let transport = Arc::new(FakeTransport::default());
        let (mut feed, mut rx) = feed(Arc::clone(&transport));

        feed.attach(SessionKey::generate());
        tokio::time::sleep(Duration::from_millis(600)).await;
        feed.detach();
        feed.detach();
        let polls = transport.status_polls();
        drain(&mut rx);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.status_polls(), polls);
        assert!(drain(&mut rx).is_empty());
        assert!(!feed.is_attached());
        let report = StatusReport {
            feed: 1,
            snapshot: StatusSnapshot::default(),
        };
        assert!(!feed.is_current(&report));
    }
}
