//! In-memory fakes for the notifier's collaborator traits (testing only)
//!
//! Provides `StubFetcher`, `RecordingTransport`, `ScriptedDownloader` and
//! `RecordingQueue`, each honouring its trait contract without network
//! access.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::QueueConfig;
use crate::domain::{Completion, DeployableEntity, DownloadFailure, EntityDownloadError};
use crate::downloader::{DownloadedEntity, EntityDownloader};
use crate::fetcher::{ContentFetcher, FetchError};
use crate::publisher::transport::{PublishReceipt, PublishRequest, PublishTransport, TransportError};
use crate::queue::{Job, JobQueue, QueueError, TokioJobQueue};

// ---------------------------------------------------------------------------
// StubFetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum StubResponse {
    Body(Vec<u8>),
    Status(u16),
    Transport(String),
}

/// URL-keyed canned responses. Unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct StubFetcher {
    responses: Mutex<HashMap<String, StubResponse>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, url: &str, body: Vec<u8>) -> Self {
        self.set(url, StubResponse::Body(body))
    }

    pub fn fail(self, url: &str, status: u16) -> Self {
        self.set(url, StubResponse::Status(status))
    }

    pub fn fail_transport(self, url: &str, message: &str) -> Self {
        self.set(url, StubResponse::Transport(message.to_string()))
    }

    fn set(self, url: &str, response: StubResponse) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
        self
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ContentFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_insert(0) += 1;
        let response = self
            .responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(StubResponse::Status(404));
        match response {
            StubResponse::Body(body) => Ok(body),
            StubResponse::Status(status) => Err(FetchError::Status {
                url: url.to_string(),
                status,
            }),
            StubResponse::Transport(message) => Err(FetchError::Transport {
                url: url.to_string(),
                message,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingTransport
// ---------------------------------------------------------------------------

/// Records every publish request; can be told to fail or stall a topic.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<PublishRequest>>,
    failing_topics: Mutex<HashMap<String, String>>,
    stalled_topics: Mutex<HashSet<String>>,
    next_id: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish to `topic` fails with `TransportError::Request(reason)`.
    pub fn fail_topic(&self, topic: &str, reason: &str) {
        self.failing_topics
            .lock()
            .unwrap()
            .insert(topic.to_string(), reason.to_string());
    }

    /// Every publish to `topic` is recorded and then never answers.
    pub fn stall_topic(&self, topic: &str) {
        self.stalled_topics.lock().unwrap().insert(topic.to_string());
    }

    /// Later publishes to `topic` answer again.
    pub fn release_topic(&self, topic: &str) {
        self.stalled_topics.lock().unwrap().remove(topic);
    }

    /// Requests received, including failed ones.
    pub fn requests(&self) -> Vec<PublishRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, topic: &str) -> Vec<PublishRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.topic_arn == topic)
            .collect()
    }
}

#[async_trait]
impl PublishTransport for RecordingTransport {
    async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, TransportError> {
        let failure = self
            .failing_topics
            .lock()
            .unwrap()
            .get(&request.topic_arn)
            .cloned();
        let stalled = self
            .stalled_topics
            .lock()
            .unwrap()
            .contains(&request.topic_arn);
        self.requests.lock().unwrap().push(request);
        if stalled {
            futures::future::pending::<()>().await;
        }
        if let Some(reason) = failure {
            return Err(TransportError::Request(reason));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PublishReceipt {
            message_id: Some(format!("message-{n}")),
            sequence_number: Some(n.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedDownloader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Script {
    Succeed(DownloadedEntity),
    Fail(Option<u16>, String),
}

/// Downloader returning a fixed outcome and recording each call.
///
/// Honours the downloader contract: permanent failures complete the
/// completion, retryable ones do not.
#[derive(Debug)]
pub struct ScriptedDownloader {
    script: Script,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedDownloader {
    pub fn succeeding() -> Self {
        Self::succeeding_with(DownloadedEntity {
            entity_type: "scene".to_string(),
            pointers: Vec::new(),
            metadata: None,
            content: Vec::new(),
            entity_file: b"{}".to_vec(),
        })
    }

    pub fn succeeding_with(downloaded: DownloadedEntity) -> Self {
        Self {
            script: Script::Succeed(downloaded),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail with a message only, e.g. `"status: 404 not found"` or
    /// `"socket hang up"`.
    pub fn failing(message: &str) -> Self {
        Self {
            script: Script::Fail(None, message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail with a structured transport status.
    pub fn failing_with_status(status: u16) -> Self {
        Self {
            script: Script::Fail(Some(status), format!("status: {status}")),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `(entity_id, servers)` for every call.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntityDownloader for ScriptedDownloader {
    async fn download_entity(
        &self,
        entity: &DeployableEntity,
        servers: &[String],
        completion: &Completion,
    ) -> Result<DownloadedEntity, EntityDownloadError> {
        self.calls
            .lock()
            .unwrap()
            .push((entity.entity_id.clone(), servers.to_vec()));
        match &self.script {
            Script::Succeed(downloaded) => Ok(downloaded.clone()),
            Script::Fail(status, message) => {
                let cause = match status {
                    Some(status) => DownloadFailure::Fetch(FetchError::Status {
                        url: servers.first().cloned().unwrap_or_default(),
                        status: *status,
                    }),
                    None => DownloadFailure::Other(message.clone()),
                };
                let err = EntityDownloadError::new(entity, cause);
                if !err.is_retryable() {
                    completion.complete().await;
                }
                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingQueue
// ---------------------------------------------------------------------------

/// [`TokioJobQueue`] wrapper counting admissions and schedules, with an
/// optional admission failure.
#[derive(Debug)]
pub struct RecordingQueue {
    inner: TokioJobQueue,
    admissions: Mutex<Vec<usize>>,
    scheduled: AtomicUsize,
    reject_admission: AtomicBool,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self {
            inner: TokioJobQueue::new(QueueConfig {
                concurrency: 4,
                ..QueueConfig::default()
            }),
            admissions: Mutex::new(Vec::new()),
            scheduled: AtomicUsize::new(0),
            reject_admission: AtomicBool::new(false),
        }
    }

    /// Every admission fails with `QueueError::Closed`.
    pub fn reject_admission(&self) {
        self.reject_admission.store(true, Ordering::SeqCst);
    }

    /// Thresholds passed to `on_size_less_than`, in call order.
    pub fn admissions(&self) -> Vec<usize> {
        self.admissions.lock().unwrap().clone()
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }
}

impl Default for RecordingQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn on_size_less_than(&self, size: usize) -> Result<(), QueueError> {
        self.admissions.lock().unwrap().push(size);
        if self.reject_admission.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        self.inner.on_size_less_than(size).await
    }

    fn schedule_job(&self, job: Job) -> Result<(), QueueError> {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        self.inner.schedule_job(job)
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    async fn on_idle(&self) {
        self.inner.on_idle().await
    }
}
