//! Lifecycle of a single user request: `Idle -> Loading -> Success | Error`, with
//! `Error -> Loading` through [RequestTracker::retry].

use tracing::info;

use crate::storage::entities::UserProfile;

use super::{
    error::ProcessingError, AuditSink, ProcessedEntries, ProcessingRequest, TimeEntryProcessor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Loading,
    Success,
    Error,
}

#[derive(Debug)]
pub struct RequestTracker {
    state: RequestState,
    original_input: Option<String>,
    attempts: u32,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            state: RequestState::Idle,
            original_input: None,
            attempts: 0,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Number of pipeline runs made for the current input.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn original_input(&self) -> Option<&str> {
        self.original_input.as_deref()
    }

    /// Starts a new request. Allowed from every state except [RequestState::Loading].
    pub async fn submit<A: AuditSink>(
        &mut self,
        processor: &TimeEntryProcessor<A>,
        profile: &UserProfile,
        input: &str,
    ) -> Result<ProcessedEntries, ProcessingError> {
        if self.state == RequestState::Loading {
            return Err(ProcessingError::Validation(
                "A request is already in progress".into(),
            ));
        }
        self.original_input = Some(input.to_string());
        self.attempts = 0;
        self.run(processor, profile).await
    }

    /// Submits the stored input again against a fresh settings snapshot. Only allowed
    /// after a failure.
    pub async fn retry<A: AuditSink>(
        &mut self,
        processor: &TimeEntryProcessor<A>,
        profile: &UserProfile,
    ) -> Result<ProcessedEntries, ProcessingError> {
        if self.state != RequestState::Error {
            return Err(ProcessingError::Validation(
                "There is no failed request to retry".into(),
            ));
        }
        info!("Retrying request, attempt {}", self.attempts + 1);
        self.run(processor, profile).await
    }

    async fn run<A: AuditSink>(
        &mut self,
        processor: &TimeEntryProcessor<A>,
        profile: &UserProfile,
    ) -> Result<ProcessedEntries, ProcessingError> {
        let input = self.original_input.clone().unwrap_or_default();
        self.state = RequestState::Loading;
        self.attempts += 1;

        let result = processor
            .process(&ProcessingRequest::new(input, profile))
            .await;
        self.state = match &result {
            Ok(_) => RequestState::Success,
            Err(_) => RequestState::Error,
        };
        result
    }
}
