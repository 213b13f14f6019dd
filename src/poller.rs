//! Remote announcement polling
//!
//! `start()` fetches once immediately and then on every tick of the
//! configured [`PollSchedule`] until `stop()`. Each fetch runs as its own
//! task, so stopping the schedule leaves a request that is already in flight
//! to finish and apply its result. Failures are logged and reported to
//! subscribers; the next tick is the only retry.
//!
//! At most one request is outstanding at a time: a tick that finds the
//! previous request still running is reported as [`PollOutcome::Skipped`].
//! Setting `allow_overlap` restores unguarded overlapping requests, where the
//! last response to arrive wins.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::constants::feed;
use crate::persistence::{Announcement, StateStore};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("feed body is not a JSON object")]
    NotAnObject,
}

/// Terminal result of one poll attempt, as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Updated(Vec<Announcement>),
    ParseError(String),
    NetworkError(String),
    Timeout,
    /// Tick dropped because the previous request had not finished
    Skipped,
}

/// Where announcement bodies come from
#[async_trait]
pub trait AnnouncementSource: Send + Sync {
    async fn fetch(&self) -> Result<String, FetchError>;

    fn describe(&self) -> String;
}

/// GET against the configured feed URL
pub struct HttpFeed {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("media-audit/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(settings.feed_url.clone(), settings.request_timeout())
    }

    fn classify(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl AnnouncementSource for HttpFeed {
    async fn fetch(&self) -> Result<String, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        // Any HTTP response counts as delivered; a non-JSON error page fails parsing
        debug!(url = %self.url, status = %response.status(), "Feed responded");
        response.text().await.map_err(|e| self.classify(e))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Delay before each tick after the first (which is immediate)
pub trait PollSchedule: Send + Sync {
    fn delay_after(&self, tick: u64) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct FixedInterval(pub Duration);

impl Default for FixedInterval {
    fn default() -> Self {
        Self(Duration::from_secs(feed::DEFAULT_POLL_INTERVAL_SECS))
    }
}

impl PollSchedule for FixedInterval {
    fn delay_after(&self, _tick: u64) -> Duration {
        self.0
    }
}

#[derive(Deserialize)]
struct FeedBody {
    #[serde(default)]
    announcements: Option<Vec<Announcement>>,
}

/// Parse a feed body. A missing or null `announcements` key is an empty list.
///
/// A body that is valid JSON but not an object (`[]`, `"x"`) is rejected and
/// leaves stored announcements alone, where a plain `body.announcements || []`
/// read would have stored an empty list.
pub fn parse_feed(body: &str) -> Result<Vec<Announcement>, ParseError> {
    let value: Value = serde_json::from_str(body)?;
    if !value.is_object() {
        return Err(ParseError::NotAnObject);
    }
    let parsed: FeedBody = serde_json::from_value(value)?;
    Ok(parsed.announcements.unwrap_or_default())
}

/// Clears the in-flight flag when the request finishes, however it finishes
struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Everything one fetch needs, cheap to clone into a task
#[derive(Clone)]
struct FetchJob {
    source: Arc<dyn AnnouncementSource>,
    store: Arc<Mutex<StateStore>>,
    outcomes: broadcast::Sender<PollOutcome>,
    in_flight: Arc<AtomicBool>,
    allow_overlap: bool,
}

impl FetchJob {
    async fn run(&self) -> PollOutcome {
        let _guard = if self.allow_overlap {
            None
        } else {
            match InFlightGuard::acquire(&self.in_flight) {
                Some(guard) => Some(guard),
                None => {
                    warn!(feed = %self.source.describe(), "Previous announcement fetch still in flight, skipping tick");
                    return self.publish(PollOutcome::Skipped);
                }
            }
        };

        let outcome = match self.source.fetch().await {
            Ok(body) => match parse_feed(&body) {
                Ok(announcements) => {
                    self.store
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .update_announcements(announcements.clone());
                    PollOutcome::Updated(announcements)
                }
                Err(e) => {
                    error!(error = %e, "Failed to parse announcements");
                    PollOutcome::ParseError(e.to_string())
                }
            },
            Err(FetchError::Timeout(after)) => {
                warn!(timeout = ?after, "Announcement fetch timeout");
                PollOutcome::Timeout
            }
            Err(FetchError::Network(message)) => {
                error!(error = %message, "Failed to fetch announcements");
                PollOutcome::NetworkError(message)
            }
        };
        self.publish(outcome)
    }

    fn publish(&self, outcome: PollOutcome) -> PollOutcome {
        // No subscribers is fine
        let _ = self.outcomes.send(outcome.clone());
        outcome
    }
}

pub struct AnnouncementPoller {
    job: FetchJob,
    schedule: Arc<dyn PollSchedule>,
    task: Option<JoinHandle<()>>,
}

impl AnnouncementPoller {
    pub fn new(
        source: Arc<dyn AnnouncementSource>,
        store: Arc<Mutex<StateStore>>,
        schedule: Arc<dyn PollSchedule>,
        allow_overlap: bool,
    ) -> Self {
        let (outcomes, _) = broadcast::channel(feed::OUTCOME_CHANNEL_CAPACITY);
        Self {
            job: FetchJob {
                source,
                store,
                outcomes,
                in_flight: Arc::new(AtomicBool::new(false)),
                allow_overlap,
            },
            schedule,
            task: None,
        }
    }

    pub fn from_settings(settings: &Settings, store: Arc<Mutex<StateStore>>) -> Result<Self> {
        let source = HttpFeed::from_settings(settings)?;
        Ok(Self::new(
            Arc::new(source),
            store,
            Arc::new(FixedInterval(settings.poll_interval())),
            settings.allow_overlapping_fetches,
        ))
    }

    /// Receive every outcome from now on. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<PollOutcome> {
        self.job.outcomes.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Fetch now, outside the schedule, and wait for the outcome
    pub async fn fetch(&self) -> PollOutcome {
        self.job.run().await
    }

    /// Fetch immediately, then on every scheduled tick. Must be called within
    /// a tokio runtime.
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Announcement poller already running");
            return;
        }

        let job = self.job.clone();
        let schedule = Arc::clone(&self.schedule);
        info!(feed = %job.source.describe(), "Starting announcement poller");

        self.task = Some(tokio::spawn(async move {
            let mut tick: u64 = 0;
            let mut deadline = Instant::now();
            loop {
                tokio::time::sleep_until(deadline).await;
                debug!(tick = tick, "Announcement poll tick");

                let job = job.clone();
                tokio::spawn(async move {
                    job.run().await;
                });

                let delay = schedule.delay_after(tick);
                tick += 1;
                // Late ticks are not replayed in a burst
                deadline = (deadline + delay).max(Instant::now());
            }
        }));
    }

    /// Cancel the schedule. A request already in flight still completes.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Stopped announcement poller");
        }
    }
}

impl Drop for AnnouncementPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryBackend;
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;

    const FEED: &str = r#"{"announcements": [
        {"title": "Maintenance", "message": "Down at noon", "timestamp": "2024-05-01"},
        {"title": "Partial"}
    ]}"#;

    /// Replays canned responses, then serves an empty feed
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<String, FetchError>>>,
        calls: AtomicUsize,
        latency: Duration,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<String, FetchError>>) -> Arc<Self> {
            Self::slow(responses, Duration::ZERO)
        }

        fn slow(responses: Vec<Result<String, FetchError>>, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                latency,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnnouncementSource for ScriptedSource {
        async fn fetch(&self) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(r#"{"announcements": []}"#.to_string()))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn store() -> Arc<Mutex<StateStore>> {
        Arc::new(Mutex::new(StateStore::open(Box::new(MemoryBackend::new()))))
    }

    fn poller(source: Arc<ScriptedSource>, store: Arc<Mutex<StateStore>>, every: Duration) -> AnnouncementPoller {
        AnnouncementPoller::new(source, store, Arc::new(FixedInterval(every)), false)
    }

    fn stored(store: &Arc<Mutex<StateStore>>) -> Vec<Announcement> {
        store.lock().unwrap().state().announcements.clone()
    }

    fn drain(rx: &mut broadcast::Receiver<PollOutcome>) -> Vec<PollOutcome> {
        let mut out = Vec::new();
        while let Ok(outcome) = rx.try_recv() {
            out.push(outcome);
        }
        out
    }

    #[test]
    fn test_parse_feed_defaults() {
        let list = parse_feed(FEED).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].title, "Partial");
        assert_eq!(list[1].message, "");
        assert_eq!(list[1].timestamp, "");

        assert!(parse_feed("{}").unwrap().is_empty());
        assert!(parse_feed(r#"{"announcements": null}"#).unwrap().is_empty());
    }

    #[test]
    fn test_parse_feed_rejects_bad_bodies() {
        assert!(matches!(parse_feed("<html>502</html>"), Err(ParseError::Json(_))));
        assert!(matches!(parse_feed("[]"), Err(ParseError::NotAnObject)));
        assert!(matches!(parse_feed("null"), Err(ParseError::NotAnObject)));
        assert!(matches!(parse_feed(r#"{"announcements": "soon"}"#), Err(ParseError::Json(_))));
    }

    #[tokio::test]
    async fn test_fetch_success_updates_store_and_notifies() {
        let store = store();
        let source = ScriptedSource::new(vec![Ok(FEED.to_string())]);
        let poller = poller(source, store.clone(), Duration::from_secs(300));
        let mut rx = poller.subscribe();

        let outcome = poller.fetch().await;
        let PollOutcome::Updated(list) = &outcome else {
            panic!("expected update, got {outcome:?}");
        };
        assert_eq!(list.len(), 2);
        assert_eq!(&stored(&store), list);
        assert!(store.lock().unwrap().state().last_update.is_some());
        assert_eq!(drain(&mut rx), vec![outcome]);
    }

    #[tokio::test]
    async fn test_invalid_json_keeps_previous_announcements() {
        let store = store();
        let source = ScriptedSource::new(vec![Ok(FEED.to_string()), Ok("not json {".to_string())]);
        let poller = poller(source, store.clone(), Duration::from_secs(300));

        poller.fetch().await;
        let before = stored(&store);
        let stamp = store.lock().unwrap().state().last_update;

        assert!(matches!(poller.fetch().await, PollOutcome::ParseError(_)));
        assert_eq!(stored(&store), before);
        assert_eq!(store.lock().unwrap().state().last_update, stamp);
    }

    #[tokio::test]
    async fn test_transport_failures_leave_state_untouched() {
        let store = store();
        let source = ScriptedSource::new(vec![
            Err(FetchError::Network("connection refused".to_string())),
            Err(FetchError::Timeout(Duration::from_secs(10))),
        ]);
        let poller = poller(source, store.clone(), Duration::from_secs(300));
        let mut rx = poller.subscribe();

        assert_eq!(
            poller.fetch().await,
            PollOutcome::NetworkError("connection refused".to_string())
        );
        assert_eq!(poller.fetch().await, PollOutcome::Timeout);
        assert!(stored(&store).is_empty());
        assert!(store.lock().unwrap().state().last_update.is_none());
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fetches_immediately_then_on_interval() {
        let source = ScriptedSource::new(Vec::new());
        let mut poller = poller(source.clone(), store(), Duration::from_secs(300));

        poller.start();
        assert!(poller.is_running());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(source.calls(), 2);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(source.calls(), 4);

        poller.stop();
        assert!(!poller.is_running());
        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_does_not_cancel_in_flight_fetch() {
        let store = store();
        let source = ScriptedSource::slow(vec![Ok(FEED.to_string())], Duration::from_secs(5));
        let mut poller = poller(source.clone(), store.clone(), Duration::from_secs(300));

        poller.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        poller.stop();
        assert!(stored(&store).is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(stored(&store).len(), 2);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_request_causes_skipped_tick() {
        let source = ScriptedSource::slow(Vec::new(), Duration::from_secs(400));
        let mut poller = poller(source.clone(), store(), Duration::from_secs(300));
        let mut rx = poller.subscribe();

        poller.start();
        // t=0 fetch starts, t=300 finds it in flight, t=400 it completes
        tokio::time::sleep(Duration::from_secs(450)).await;
        poller.stop();

        assert_eq!(source.calls(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![PollOutcome::Skipped, PollOutcome::Updated(Vec::new())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlap_allowed_when_configured() {
        let source = ScriptedSource::slow(Vec::new(), Duration::from_secs(400));
        let mut poller = AnnouncementPoller::new(
            source.clone(),
            store(),
            Arc::new(FixedInterval(Duration::from_secs(300))),
            true,
        );

        poller.start();
        tokio::time::sleep(Duration::from_secs(350)).await;
        poller.stop();
        assert_eq!(source.calls(), 2);
    }

    /// Serve one canned HTTP response on a local port
    fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}/announcements.json")
    }

    #[tokio::test]
    async fn test_http_feed_reads_body() {
        let url = serve_once(FEED);
        let feed = HttpFeed::new(url.clone(), Duration::from_secs(5)).unwrap();
        assert_eq!(feed.describe(), url);
        assert_eq!(feed.fetch().await.unwrap(), FEED);
    }

    #[tokio::test]
    async fn test_http_feed_timeout() {
        // Accepts connections at the socket level but never answers
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let feed = HttpFeed::new(url, Duration::from_millis(200)).unwrap();

        assert_eq!(
            feed.fetch().await,
            Err(FetchError::Timeout(Duration::from_millis(200)))
        );
        drop(listener);
    }

    #[tokio::test]
    async fn test_http_feed_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let feed = HttpFeed::new(url, Duration::from_secs(2)).unwrap();
        assert!(matches!(feed.fetch().await, Err(FetchError::Network(_))));
    }
}
