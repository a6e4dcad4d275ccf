//! Long-running video jobs: submit once, then poll on a fixed interval until
//! the job finishes or the attempt budget runs out.
//!
//! `Submitted -> Polling -> {Succeeded | Failed | TimedOut}`. Only `Polling`
//! loops; the three right-hand states are terminal. A timeout is the client
//! giving up; the job is not cancelled and may still finish server-side.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PollConfig;
use crate::credentials::ApiCredential;
use crate::error::{StudioError, StudioResult};
use crate::models::ResultReference;
use crate::prompt::VideoRequest;

/// Opaque operation name returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Service-side view of a job as of the last submit or poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationJob {
    pub handle: JobHandle,
    pub done: bool,
    pub result: Option<ResultReference>,
    pub error: Option<String>,
}

#[async_trait]
pub trait VideoService: Send + Sync {
    async fn submit_video(&self, credential: &ApiCredential, request: &VideoRequest) -> StudioResult<GenerationJob>;
    async fn poll_video(&self, credential: &ApiCredential, handle: &JobHandle) -> StudioResult<GenerationJob>;
}

/// Delay between polls, injectable so tests don't wait.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Polling { attempt: u32 },
    Succeeded { result: ResultReference },
    Failed { message: String },
    TimedOut { waited_secs: u64 },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. } | Self::TimedOut { .. })
    }
}

/// The job state machine. Transitions out of a terminal state are ignored.
#[derive(Debug, Clone)]
pub struct JobMachine {
    handle: JobHandle,
    state: JobState,
    attempts: u32,
    config: PollConfig,
}

impl JobMachine {
    /// Starts from the submit response, which may already be finished.
    pub fn submitted(job: GenerationJob, config: PollConfig) -> Self {
        let mut machine = Self {
            handle: job.handle.clone(),
            state: JobState::Submitted,
            attempts: 0,
            config,
        };
        machine.apply(job);
        machine
    }

    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn waited(&self) -> Duration {
        self.config.interval * self.attempts
    }

    /// Claims the next poll. Returns false when the job is terminal, moving to
    /// `TimedOut` if the budget is what ran out.
    pub fn next_attempt(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if self.attempts >= self.config.max_attempts {
            self.state = JobState::TimedOut { waited_secs: self.waited().as_secs() };
            return false;
        }
        self.attempts += 1;
        self.state = JobState::Polling { attempt: self.attempts };
        true
    }

    /// Folds a poll result into the state.
    pub fn apply(&mut self, job: GenerationJob) {
        if self.state.is_terminal() {
            return;
        }
        if let Some(message) = job.error {
            self.state = JobState::Failed { message };
        } else if job.done {
            self.state = match job.result {
                Some(result) => JobState::Succeeded { result },
                None => JobState::Failed { message: "job finished without a video".to_string() },
            };
        }
    }

    /// Records a transport failure that ended the watch.
    pub fn abort(&mut self, error: &StudioError) {
        if !self.state.is_terminal() {
            self.state = JobState::Failed { message: error.to_string() };
        }
    }

    pub fn outcome(&self) -> StudioResult<ResultReference> {
        match &self.state {
            JobState::Succeeded { result } => Ok(result.clone()),
            JobState::Failed { message } => Err(StudioError::VideoGenerationFailed(message.clone()).classify()),
            JobState::TimedOut { .. } => Err(StudioError::VideoGenerationTimeout {
                job: self.handle.0.clone(),
                waited: self.waited(),
            }),
            JobState::Submitted | JobState::Polling { .. } => {
                Err(StudioError::Other(format!("job {} is still running", self.handle)))
            }
        }
    }
}

/// Called on every state change.
pub type JobObserver<'a> = dyn FnMut(&JobMachine) + Send + 'a;

/// Drives `JobMachine` against a service. Strictly sequential: sleep, poll,
/// repeat.
pub struct VideoPoller<'a> {
    service: &'a dyn VideoService,
    sleeper: &'a dyn Sleeper,
    config: PollConfig,
}

impl<'a> VideoPoller<'a> {
    pub fn new(service: &'a dyn VideoService, sleeper: &'a dyn Sleeper, config: PollConfig) -> Self {
        Self { service, sleeper, config }
    }

    pub async fn generate(
        &self,
        credential: &ApiCredential,
        request: &VideoRequest,
        observer: &mut JobObserver<'_>,
    ) -> StudioResult<ResultReference> {
        let job = self
            .service
            .submit_video(credential, request)
            .await
            .map_err(StudioError::classify)?;
        info!(job = %job.handle, "Video job submitted");
        self.watch(credential, job, observer).await
    }

    /// Watches an already-submitted job with a fresh attempt budget. Also the
    /// way to pick a job back up after `VideoGenerationTimeout`.
    pub async fn resume(
        &self,
        credential: &ApiCredential,
        handle: JobHandle,
        observer: &mut JobObserver<'_>,
    ) -> StudioResult<ResultReference> {
        let job = GenerationJob { handle, done: false, result: None, error: None };
        self.watch(credential, job, observer).await
    }

    async fn watch(
        &self,
        credential: &ApiCredential,
        job: GenerationJob,
        observer: &mut JobObserver<'_>,
    ) -> StudioResult<ResultReference> {
        let mut machine = JobMachine::submitted(job, self.config);
        observer(&machine);

        while machine.next_attempt() {
            observer(&machine);
            self.sleeper.sleep(self.config.interval).await;
            match self.service.poll_video(credential, machine.handle()).await {
                Ok(job) => machine.apply(job),
                Err(e) => {
                    let e = e.classify();
                    warn!(job = %machine.handle(), attempt = machine.attempts(), "Poll failed: {}", e);
                    machine.abort(&e);
                    observer(&machine);
                    return Err(e);
                }
            }
        }
        observer(&machine);

        match machine.state() {
            JobState::Succeeded { .. } => info!(job = %machine.handle(), polls = machine.attempts(), "Video job succeeded"),
            JobState::TimedOut { waited_secs } => warn!(
                job = %machine.handle(),
                waited_secs,
                "Stopped watching video job; it was not cancelled and may still complete"
            ),
            state => warn!(job = %machine.handle(), ?state, "Video job failed"),
        }
        machine.outcome()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::media::MediaAttachment;
    use crate::models::{VideoAspectRatio, VideoResolution};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    /// Scripted service: each poll pops the next response, repeating the last.
    pub(crate) struct ScriptedVideo {
        pub submit: GenerationJob,
        pub polls: Mutex<VecDeque<StudioResult<GenerationJob>>>,
        pub poll_count: Mutex<u32>,
    }

    impl ScriptedVideo {
        pub(crate) fn new(polls: Vec<StudioResult<GenerationJob>>) -> Self {
            Self {
                submit: pending(),
                polls: Mutex::new(polls.into()),
                poll_count: Mutex::new(0),
            }
        }

        pub(crate) fn polls(&self) -> u32 {
            *self.poll_count.lock()
        }
    }

    #[async_trait]
    impl VideoService for ScriptedVideo {
        async fn submit_video(&self, _: &ApiCredential, _: &VideoRequest) -> StudioResult<GenerationJob> {
            Ok(self.submit.clone())
        }

        async fn poll_video(&self, _: &ApiCredential, _: &JobHandle) -> StudioResult<GenerationJob> {
            *self.poll_count.lock() += 1;
            let mut polls = self.polls.lock();
            if polls.len() == 1 {
                if let Some(Ok(job)) = polls.front() {
                    return Ok(job.clone());
                }
            }
            polls.pop_front().unwrap_or_else(|| Ok(pending()))
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingSleeper {
        pub slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().push(duration);
        }
    }

    pub(crate) fn pending() -> GenerationJob {
        GenerationJob { handle: JobHandle("operations/job-1".into()), done: false, result: None, error: None }
    }

    pub(crate) fn finished(uri: &str) -> GenerationJob {
        GenerationJob {
            done: true,
            result: Some(ResultReference { uri: uri.into() }),
            ..pending()
        }
    }

    pub(crate) fn failed(message: &str) -> GenerationJob {
        GenerationJob { done: true, error: Some(message.into()), ..pending() }
    }

    pub(crate) fn video_request() -> VideoRequest {
        VideoRequest {
            start_frame: MediaAttachment::from_base64("AAAA", "image/png"),
            end_frame: None,
            instruction: "bottle spinning on a pedestal".into(),
            aspect: VideoAspectRatio::Landscape,
            resolution: VideoResolution::Hd,
        }
    }

    fn config(max_attempts: u32) -> PollConfig {
        PollConfig { interval: Duration::from_secs(10), max_attempts }
    }

    fn cred() -> ApiCredential {
        ApiCredential::new("k")
    }

    #[tokio::test]
    async fn never_done_times_out_after_exactly_max_attempts() {
        let service = ScriptedVideo::new(vec![]);
        let sleeper = RecordingSleeper::default();
        let poller = VideoPoller::new(&service, &sleeper, config(5));

        let err = poller.generate(&cred(), &video_request(), &mut |_| {}).await.unwrap_err();
        match err {
            StudioError::VideoGenerationTimeout { job, waited } => {
                assert_eq!(job, "operations/job-1");
                assert_eq!(waited, Duration::from_secs(50));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(service.polls(), 5);
        assert_eq!(sleeper.slept.lock().len(), 5);
    }

    #[tokio::test]
    async fn error_on_second_poll_stops_immediately() {
        let service = ScriptedVideo::new(vec![Ok(pending()), Ok(failed("quota exhausted")), Ok(finished("never"))]);
        let sleeper = RecordingSleeper::default();
        let poller = VideoPoller::new(&service, &sleeper, config(60));

        let err = poller.generate(&cred(), &video_request(), &mut |_| {}).await.unwrap_err();
        assert!(matches!(err, StudioError::VideoGenerationFailed(ref m) if m == "quota exhausted"));
        assert_eq!(service.polls(), 2);
    }

    #[tokio::test]
    async fn succeeds_after_three_polls_with_state_trail() {
        let service = ScriptedVideo::new(vec![Ok(pending()), Ok(pending()), Ok(finished("https://files/v1:download"))]);
        let sleeper = RecordingSleeper::default();
        let poller = VideoPoller::new(&service, &sleeper, config(60));

        let mut trail = Vec::new();
        let result = poller
            .generate(&cred(), &video_request(), &mut |m: &JobMachine| trail.push(m.state().clone()))
            .await
            .unwrap();

        assert_eq!(result.uri, "https://files/v1:download");
        assert_eq!(result.with_credential("k").unwrap(), "https://files/v1:download?key=k");
        assert_eq!(service.polls(), 3);
        assert_eq!(trail.first(), Some(&JobState::Submitted));
        assert_eq!(trail[1], JobState::Polling { attempt: 1 });
        assert!(matches!(trail.last(), Some(JobState::Succeeded { .. })));
        assert!(sleeper.slept.lock().iter().all(|d| *d == Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn rejected_key_error_is_classified() {
        let service = ScriptedVideo::new(vec![Ok(failed("Requested entity was not found."))]);
        let sleeper = RecordingSleeper::default();
        let poller = VideoPoller::new(&service, &sleeper, config(3));

        let err = poller.generate(&cred(), &video_request(), &mut |_| {}).await.unwrap_err();
        assert!(matches!(err, StudioError::CredentialRejected(_)));
        assert_eq!(service.polls(), 1);
    }

    #[tokio::test]
    async fn transport_error_is_not_retried() {
        let service = ScriptedVideo::new(vec![Err(StudioError::Http("connection reset".into())), Ok(finished("x"))]);
        let sleeper = RecordingSleeper::default();
        let poller = VideoPoller::new(&service, &sleeper, config(10));

        let err = poller.generate(&cred(), &video_request(), &mut |_| {}).await.unwrap_err();
        assert!(matches!(err, StudioError::Http(_)));
        assert_eq!(service.polls(), 1);
    }

    #[tokio::test]
    async fn resume_gets_a_fresh_budget() {
        let service = ScriptedVideo::new(vec![Ok(pending()), Ok(finished("late"))]);
        let sleeper = RecordingSleeper::default();
        let poller = VideoPoller::new(&service, &sleeper, config(1));

        let err = poller.generate(&cred(), &video_request(), &mut |_| {}).await.unwrap_err();
        let StudioError::VideoGenerationTimeout { job, .. } = err else { panic!("expected timeout") };

        let result = poller.resume(&cred(), JobHandle(job), &mut |_| {}).await.unwrap();
        assert_eq!(result.uri, "late");
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut machine = JobMachine::submitted(finished("done"), config(3));
        assert!(matches!(machine.state(), JobState::Succeeded { .. }));
        assert!(!machine.next_attempt());
        machine.apply(failed("late failure"));
        machine.abort(&StudioError::Http("x".into()));
        assert!(matches!(machine.state(), JobState::Succeeded { .. }));
        assert_eq!(machine.attempts(), 0);
    }

    #[test]
    fn done_without_result_is_a_failure() {
        let job = GenerationJob { done: true, ..pending() };
        let machine = JobMachine::submitted(job, config(3));
        assert!(matches!(machine.outcome(), Err(StudioError::VideoGenerationFailed(_))));
    }
}
