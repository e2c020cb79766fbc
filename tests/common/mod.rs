//! Fakes and builders shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use eikon::gateway::Result as GatewayResult;
use eikon::prelude::*;
use eikon::storage::Result as StorageResult;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Millisecond backoff and a short attempt timeout.
pub const FAST: RetryPolicy = RetryPolicy {
    max_attempts: 3,
    initial_delay: Duration::from_millis(1),
    max_delay: Duration::from_millis(5),
    backoff_multiplier: 2.0,
    attempt_timeout: Duration::from_millis(100),
};

/// What a scripted provider call does.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(String),
    Err(GatewayError),
    /// Never returns; only the attempt timeout ends it.
    Hang,
    /// Fails with a retryable error `n` times, then returns the value.
    FailThenOk(u32, String),
}

#[derive(Default)]
struct Method {
    calls: AtomicU32,
    reply: Mutex<Option<Reply>>,
    delay: Mutex<Duration>,
}

impl Method {
    fn with(reply: Reply) -> Self {
        Self {
            reply: Mutex::new(Some(reply)),
            ..Self::default()
        }
    }

    async fn call(&self) -> GatewayResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = self.reply.lock().unwrap().clone();
        match reply {
            Some(Reply::Ok(value)) => Ok(value),
            Some(Reply::Err(e)) => Err(e),
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::FailThenOk(failures, value)) => {
                if n < failures {
                    Err(GatewayError::Transport("connection reset".to_string()))
                } else {
                    Ok(value)
                }
            }
            None => Err(GatewayError::Provider("unscripted call".to_string())),
        }
    }

    fn count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A [`SynthesisGateway`] whose replies are set per method by the test.
pub struct ScriptedGateway {
    speech: Method,
    video: Method,
    portrait: Method,
    last_submission: Mutex<Option<PortraitSubmission>>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self {
            speech: Method::with(Reply::Ok("tts/derived.wav".to_string())),
            video: Method::with(Reply::Ok("ptv/output.mp4".to_string())),
            portrait: Method::with(Reply::Ok("h1".to_string())),
            last_submission: Mutex::new(None),
        }
    }
}

impl ScriptedGateway {
    pub fn speech_reply(self, reply: Reply) -> Self {
        *self.speech.reply.lock().unwrap() = Some(reply);
        self
    }

    pub fn video_reply(self, reply: Reply) -> Self {
        *self.video.reply.lock().unwrap() = Some(reply);
        self
    }

    pub fn portrait_reply(self, reply: Reply) -> Self {
        *self.portrait.reply.lock().unwrap() = Some(reply);
        self
    }

    pub fn video_delay(self, delay: Duration) -> Self {
        *self.video.delay.lock().unwrap() = delay;
        self
    }

    pub fn portrait_delay(self, delay: Duration) -> Self {
        *self.portrait.delay.lock().unwrap() = delay;
        self
    }

    pub fn speech_calls(&self) -> u32 {
        self.speech.count()
    }

    pub fn video_calls(&self) -> u32 {
        self.video.count()
    }

    pub fn portrait_calls(&self) -> u32 {
        self.portrait.count()
    }

    pub fn total_calls(&self) -> u32 {
        self.speech_calls() + self.video_calls() + self.portrait_calls()
    }

    pub fn last_submission(&self) -> Option<PortraitSubmission> {
        self.last_submission.lock().unwrap().clone()
    }
}

#[async_trait]
impl SynthesisGateway for ScriptedGateway {
    async fn synthesize_speech(&self, _script: &str, _voice: Option<&str>) -> GatewayResult<String> {
        self.speech.call().await
    }

    async fn synthesize_video(
        &self,
        _transcript: &str,
        _photo_key: &str,
        _audio_key: &str,
    ) -> GatewayResult<String> {
        self.video.call().await
    }

    async fn submit_portrait_job(&self, submission: &PortraitSubmission) -> GatewayResult<String> {
        *self.last_submission.lock().unwrap() = Some(submission.clone());
        self.portrait.call().await
    }
}

/// An [`AssetStore`] that presigns deterministically and counts imports.
#[derive(Default)]
pub struct FakeAssets {
    imports: AtomicU32,
    fail_imports: bool,
    import_delay: Duration,
}

impl FakeAssets {
    pub fn failing_imports() -> Self {
        Self {
            fail_imports: true,
            ..Self::default()
        }
    }

    pub fn import_delay(self, import_delay: Duration) -> Self {
        Self {
            import_delay,
            ..self
        }
    }

    pub fn imports(&self) -> u32 {
        self.imports.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetStore for FakeAssets {
    async fn upload_url(&self, key: &str, _content_type: &str, ttl: Duration) -> GatewayResult<String> {
        Ok(format!("https://bucket.example/{key}?method=PUT&expires={}", ttl.as_secs()))
    }

    async fn read_url(&self, key: &str, ttl: Duration) -> GatewayResult<String> {
        Ok(format!("https://bucket.example/{key}?expires={}", ttl.as_secs()))
    }

    async fn import_remote_asset(&self, _url: &str) -> GatewayResult<String> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        if !self.import_delay.is_zero() {
            tokio::time::sleep(self.import_delay).await;
        }
        if self.fail_imports {
            Err(GatewayError::status(404, "source not found"))
        } else {
            Ok("sieve/imported.mp4".to_string())
        }
    }
}

/// An in-memory store that can fail credit debits or stall balance reads.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryJobStore,
    failing_debits: AtomicU32,
    slow_balance_reads: AtomicU32,
    balance_delay: Mutex<Duration>,
}

impl FlakyStore {
    /// The next `n` debits fail with a retryable connection error.
    pub fn failing_debits(self, n: u32) -> Self {
        self.failing_debits.store(n, Ordering::SeqCst);
        self
    }

    /// The next `n` balance reads take `delay`.
    pub fn slow_balance_reads(self, n: u32, delay: Duration) -> Self {
        self.slow_balance_reads.store(n, Ordering::SeqCst);
        *self.balance_delay.lock().unwrap() = delay;
        self
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn insert_job(&self, job: &GenerationJob) -> StorageResult<()> {
        self.inner.insert_job(job).await
    }

    async fn get_job(&self, id: JobId) -> StorageResult<Option<GenerationJob>> {
        self.inner.get_job(id).await
    }

    async fn find_by_external_handle(&self, handle: &str) -> StorageResult<Option<GenerationJob>> {
        self.inner.find_by_external_handle(handle).await
    }

    async fn list_jobs_for_owner(&self, owner: &OwnerId) -> StorageResult<Vec<GenerationJob>> {
        self.inner.list_jobs_for_owner(owner).await
    }

    async fn get_incomplete_jobs(&self) -> StorageResult<Vec<GenerationJob>> {
        self.inner.get_incomplete_jobs().await
    }

    async fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        failure: Option<FailureCategory>,
    ) -> StorageResult<bool> {
        self.inner.transition(id, from, to, failure).await
    }

    async fn record_derived_audio(&self, id: JobId, audio_key: &str) -> StorageResult<bool> {
        self.inner.record_derived_audio(id, audio_key).await
    }

    async fn record_external_handle(&self, id: JobId, handle: &str) -> StorageResult<bool> {
        self.inner.record_external_handle(id, handle).await
    }

    async fn complete_job(&self, id: JobId, output_key: &str) -> StorageResult<bool> {
        self.inner.complete_job(id, output_key).await
    }
}

#[async_trait]
impl CreditLedger for FlakyStore {
    async fn check_balance(&self, owner: &OwnerId) -> StorageResult<i64> {
        if Self::take(&self.slow_balance_reads) {
            let delay = *self.balance_delay.lock().unwrap();
            tokio::time::sleep(delay).await;
        }
        self.inner.check_balance(owner).await
    }

    async fn debit_one(&self, owner: &OwnerId, job: JobId) -> StorageResult<Debit> {
        if Self::take(&self.failing_debits) {
            return Err(StorageError::Connection("database is locked".to_string()));
        }
        self.inner.debit_one(owner, job).await
    }

    async fn refund(&self, owner: &OwnerId, job: JobId) -> StorageResult<bool> {
        self.inner.refund(owner, job).await
    }

    async fn is_charged(&self, job: JobId) -> StorageResult<bool> {
        self.inner.is_charged(job).await
    }

    async fn grant(&self, owner: &OwnerId, amount: i64) -> StorageResult<i64> {
        self.inner.grant(owner, amount).await
    }
}

/// Everything a test needs to drive jobs end to end.
pub struct Harness<S: Store> {
    pub store: Arc<S>,
    pub gateway: Arc<ScriptedGateway>,
    pub assets: Arc<FakeAssets>,
    pub admission: Arc<AdmissionController>,
    pub engine: Arc<Engine<S>>,
    pub correlator: Arc<CallbackCorrelator<S>>,
}

impl<S: Store> Harness<S> {
    pub fn new(store: S, gateway: ScriptedGateway, assets: FakeAssets) -> Self {
        Self::with_admission(store, gateway, assets, AdmissionController::default())
    }

    pub fn with_admission(
        store: S,
        gateway: ScriptedGateway,
        assets: FakeAssets,
        admission: AdmissionController,
    ) -> Self {
        let store = Arc::new(store);
        let gateway = Arc::new(gateway);
        let assets = Arc::new(assets);
        let admission = Arc::new(admission);

        let config = EngineConfig {
            retry_policy: FAST,
            callback_url: "https://app.example/webhooks/portrait-avatar".to_string(),
            read_url_ttl: Duration::from_secs(3600),
        };
        let engine = Arc::new(Engine::new(
            store.clone(),
            gateway.clone(),
            assets.clone(),
            admission.clone(),
            config,
        ));
        let correlator = Arc::new(
            CallbackCorrelator::new(store.clone(), assets.clone(), admission.clone(), FAST)
                .with_unknown_handle_grace(Duration::from_millis(50)),
        );

        Self {
            store,
            gateway,
            assets,
            admission,
            engine,
            correlator,
        }
    }

    /// Validates and inserts a queued job.
    pub async fn insert(&self, request: JobRequest) -> GenerationJob {
        let job = request.into_job().unwrap();
        self.store.insert_job(&job).await.unwrap();
        job
    }

    pub async fn job(&self, id: JobId) -> GenerationJob {
        self.store.get_job(id).await.unwrap().unwrap()
    }

    pub async fn balance(&self, owner: &str) -> i64 {
        self.store.check_balance(&owner.into()).await.unwrap()
    }
}

pub fn in_memory(gateway: ScriptedGateway) -> Harness<InMemoryJobStore> {
    Harness::new(InMemoryJobStore::new(), gateway, FakeAssets::default())
}

pub fn script_request(owner: &str) -> JobRequest {
    JobRequest {
        owner_id: owner.into(),
        photo_key: "ptv/face.png".to_string(),
        script: Some("Hello from my portrait".to_string()),
        audio_key: None,
        voice_key: Some("samples/voices/jeff.mp3".to_string()),
        mode: Mode::Standard,
        enhancement: true,
    }
}

pub fn audio_request(owner: &str, mode: Mode) -> JobRequest {
    JobRequest {
        owner_id: owner.into(),
        photo_key: "ptv/face.png".to_string(),
        script: None,
        audio_key: Some("ptv/voice.wav".to_string()),
        voice_key: None,
        mode,
        enhancement: true,
    }
}

/// A provider webhook body as the portrait-avatar provider sends it.
pub fn finished_payload(handle: &str, url: Option<&str>) -> Vec<u8> {
    let data = match url {
        Some(url) => serde_json::json!([{"Key": "url", "Value": url}]),
        None => serde_json::json!([{"Key": "duration", "Value": 4.2}]),
    };
    serde_json::json!({
        "body": {
            "job_id": handle,
            "status": "finished",
            "outputs": [{"data": data}]
        }
    })
    .to_string()
    .into_bytes()
}

pub fn status_payload(handle: &str, status: &str) -> Vec<u8> {
    serde_json::json!({"body": {"job_id": handle, "status": status}})
        .to_string()
        .into_bytes()
}
