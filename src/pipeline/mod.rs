//! The processing pipeline. A request carries a full settings snapshot and passes through
//! [expander], [prompt], the model and [formatter] exactly once.

pub mod error;
pub mod expander;
pub mod formatter;
pub mod prompt;
pub mod tracker;

use std::{future::Future, time::Duration};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    model::{config::DEFAULT_TIMEOUT, LlmClient},
    storage::{
        entities::{
            AuditEntry, ColumnDefinition, ColumnValue, SlashCommand, UserProfile, UserSettings,
        },
        history::{HistoryStorage, HistoryStorageImpl},
    },
    utils::clock::Clock,
};

use self::{
    error::ProcessingError,
    expander::expand_at,
    formatter::format_output,
    prompt::{build_prompt, time_entry_tool},
};

/// Everything a single run needs. Built from a snapshot so a run never sees settings
/// changing under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingRequest {
    pub input: String,
    pub settings: UserSettings,
    pub columns: Vec<ColumnDefinition>,
    pub column_values: Vec<ColumnValue>,
    pub slash_commands: Vec<SlashCommand>,
}

impl ProcessingRequest {
    pub fn new(input: impl Into<String>, profile: &UserProfile) -> Self {
        Self {
            input: input.into(),
            settings: profile.settings.clone(),
            columns: profile.ordered_columns(),
            column_values: profile.column_values.clone(),
            slash_commands: profile.slash_commands.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEntries {
    pub expanded_input: String,
    pub formatted_output: String,
    pub explanation: String,
    pub format_warnings: Vec<String>,
    pub entry_count: usize,
}

/// Outcome in the `{success, ...}` shape. Failures carry no output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub formatted_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl From<&Result<ProcessedEntries, ProcessingError>> for ProcessingResult {
    fn from(value: &Result<ProcessedEntries, ProcessingError>) -> Self {
        match value {
            Ok(v) => ProcessingResult {
                success: true,
                formatted_output: Some(v.formatted_output.clone()),
                explanation: Some(v.explanation.clone()),
                error: None,
            },
            Err(e) => ProcessingResult {
                success: false,
                formatted_output: None,
                explanation: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Destination for records of successful runs.
pub trait AuditSink {
    fn record(&self, entry: &AuditEntry) -> impl Future<Output = Result<()>>;
}

impl AuditSink for HistoryStorageImpl {
    fn record(&self, entry: &AuditEntry) -> impl Future<Output = Result<()>> {
        self.append(entry)
    }
}

/// Sink for runs that shouldn't leave a trace.
pub struct NoAudit;

impl AuditSink for NoAudit {
    async fn record(&self, _: &AuditEntry) -> Result<()> {
        Ok(())
    }
}

pub struct TimeEntryProcessor<A> {
    client: Box<dyn LlmClient>,
    audit: A,
    clock: Box<dyn Clock>,
    timeout: Duration,
    cancellation: CancellationToken,
}

impl<A: AuditSink> TimeEntryProcessor<A> {
    pub fn new(client: Box<dyn LlmClient>, audit: A, clock: Box<dyn Clock>) -> Self {
        Self {
            client,
            audit,
            clock,
            timeout: DEFAULT_TIMEOUT,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Once `cancellation` fires, a pending model call is abandoned and nothing is recorded.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    #[instrument(skip_all)]
    pub async fn process(
        &self,
        request: &ProcessingRequest,
    ) -> Result<ProcessedEntries, ProcessingError> {
        let input = request.input.trim();
        if input.is_empty() {
            return Err(ProcessingError::Validation("Input is required".into()));
        }
        if request.columns.is_empty() {
            return Err(ProcessingError::Validation(
                "No column definitions found. Please configure your settings first.".into(),
            ));
        }

        let expanded_input = expand_at(input, &request.slash_commands, self.clock.today());
        debug!("Expanded input {expanded_input:?}");

        let prompt = build_prompt(
            &expanded_input,
            &request.settings,
            &request.columns,
            &request.column_values,
        );
        let tool = time_entry_tool();

        info!("Sending request to the model");
        let response = select! {
            _ = self.cancellation.cancelled() => {
                info!("Request cancelled");
                return Err(ProcessingError::Cancelled);
            }
            result = tokio::time::timeout(self.timeout, self.client.generate(&prompt, &tool)) => {
                match result {
                    Ok(v) => v.inspect_err(|e| error!("Model call failed {e:?}"))?,
                    Err(_) => {
                        warn!("Model call exceeded {:?}", self.timeout);
                        return Err(ProcessingError::Timeout);
                    }
                }
            }
        };

        let formatted = format_output(&response, &request.settings, &request.columns);
        if formatted.formatted_output.is_empty() {
            return Err(ProcessingError::NoStructuredOutput(
                "response contained no entries".into(),
            ));
        }
        for warning in &formatted.format_warnings {
            warn!("{warning}");
        }

        let entry = AuditEntry {
            original_input: input.to_string(),
            formatted_output: formatted.formatted_output.clone(),
            explanation: formatted.explanation.clone(),
            timestamp: self.clock.time(),
        };
        if let Err(e) = self.audit.record(&entry).await {
            error!("Failed to save history entry {e:?}");
        }

        info!("Generated {} entries", response.entries.len());
        Ok(ProcessedEntries {
            expanded_input,
            formatted_output: formatted.formatted_output,
            explanation: formatted.explanation,
            format_warnings: formatted.format_warnings,
            entry_count: response.entries.len(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use crate::{
        model::{
            LlmClient, MockLlmClient, ModelError, StructuredResponse, TimeEntry, ToolDefinition,
        },
        storage::{
            entities::{AuditEntry, UserProfile},
            history::{HistoryStorage, HistoryStorageImpl},
            profile::NewCommand,
        },
        utils::{clock::Clock, logging::TEST_LOGGING},
    };

    use super::{
        error::ProcessingError, AuditSink, NoAudit, ProcessedEntries, ProcessingRequest,
        ProcessingResult, TimeEntryProcessor,
    };

    /// Pinned to Wednesday 2025-06-11.
    pub struct TestClock;

    #[async_trait]
    impl Clock for TestClock {
        fn time(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2025, 6, 11, 12, 0, 0).unwrap()
        }

        fn today(&self) -> NaiveDate {
            NaiveDate::from_ymd_opt(2025, 6, 11).unwrap()
        }

        async fn sleep(&self, _: Duration) {}
    }

    #[derive(Default)]
    struct RecordingAudit(Mutex<Vec<AuditEntry>>);

    impl AuditSink for RecordingAudit {
        async fn record(&self, entry: &AuditEntry) -> Result<()> {
            self.0.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    struct FailingAudit;

    impl AuditSink for FailingAudit {
        async fn record(&self, _: &AuditEntry) -> Result<()> {
            Err(anyhow!("disk is full"))
        }
    }

    /// Answers with prepared results in order and remembers every prompt it got.
    #[derive(Default)]
    pub struct ScriptedClient {
        answers: Mutex<VecDeque<Result<StructuredResponse, ModelError>>>,
        pub prompts: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedClient {
        pub fn new(answers: Vec<Result<StructuredResponse, ModelError>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                prompts: Default::default(),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn generate(
            &self,
            prompt: &str,
            _: &ToolDefinition,
        ) -> Result<StructuredResponse, ModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ModelError::Request("script exhausted".into())))
        }
    }

    struct StalledClient;

    #[async_trait]
    impl LlmClient for StalledClient {
        async fn generate(
            &self,
            _: &str,
            _: &ToolDefinition,
        ) -> Result<StructuredResponse, ModelError> {
            std::future::pending().await
        }
    }

    pub fn test_profile() -> UserProfile {
        let mut profile = UserProfile::with_defaults(TestClock.time());
        profile.slash_commands.clear();
        profile
            .add_command(
                NewCommand {
                    command: "/standup".into(),
                    expansion: "daily standup meeting".into(),
                    description: "Morning sync".into(),
                },
                TestClock.time(),
            )
            .unwrap();
        profile
    }

    pub fn dev_response() -> StructuredResponse {
        StructuredResponse {
            entries: vec![TimeEntry::from([
                ("Start Time", "20250610T0900"),
                ("End Time", "20250610T1100"),
                ("Project Code", "DEV"),
                ("Description", "Coding"),
            ])],
            assumptions: vec![],
            conflicts: vec![],
            uncertain_mappings: vec![],
            summary: "One development block".into(),
        }
    }

    #[tokio::test]
    async fn end_to_end_with_history() -> Result<()> {
        let _ = *TEST_LOGGING;
        let dir = tempdir()?;
        let history = HistoryStorageImpl::new(dir.path().to_owned())?;

        let mut client = MockLlmClient::new();
        client
            .expect_generate()
            .withf(|prompt, tool| {
                prompt.contains("\"Worked on DEV 2025-06-10 9-11\"")
                    && prompt.contains("\"DEV\" (Development work)")
                    && tool.name == super::prompt::TOOL_NAME
            })
            .times(1)
            .returning(|_, _| Ok(dev_response()));

        let processor = TimeEntryProcessor::new(Box::new(client), history, Box::new(TestClock));
        let request = ProcessingRequest::new("  Worked on DEV /yesterday 9-11 ", &test_profile());
        let result = processor.process(&request).await?;

        assert_eq!(result.formatted_output, "20250610T0900,20250610T1100,DEV,Coding;");
        assert_eq!(result.entry_count, 1);
        assert!(result
            .explanation
            .contains("- Entry 1: 20250610T0900 | 20250610T1100 | DEV | Coding"));

        let history = HistoryStorageImpl::new(dir.path().to_owned())?;
        let day = TestClock.time().with_timezone(&Local).date_naive();
        let saved = history.get_entries_for(day).await?;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].original_input, "Worked on DEV /yesterday 9-11");
        assert_eq!(saved[0].formatted_output, result.formatted_output);
        Ok(())
    }

    #[tokio::test]
    async fn default_profile_day_with_a_break() -> Result<()> {
        let mut client = MockLlmClient::new();
        client
            .expect_generate()
            .withf(|prompt, _| {
                prompt.contains(
                    "\"Worked on Smith project 9-11, Break from 12:00 to 12:30, client call until noon\"",
                )
            })
            .times(1)
            .returning(|_, _| {
                Ok(StructuredResponse {
                    entries: vec![
                        TimeEntry::from([
                            ("Start Time", "20250611T0900"),
                            ("End Time", "20250611T1100"),
                            ("Project Code", "DEV"),
                            ("Description", "Smith project"),
                        ]),
                        TimeEntry::from([
                            ("Start Time", "20250611T1100"),
                            ("End Time", "20250611T1200"),
                            ("Project Code", "MEET"),
                            ("Description", "Client call"),
                        ]),
                    ],
                    assumptions: vec!["Client call started right after the Smith project".into()],
                    conflicts: vec![],
                    uncertain_mappings: vec!["Smith project mapped to DEV".into()],
                    summary: "Two entries, break left out".into(),
                })
            });

        let processor = TimeEntryProcessor::new(Box::new(client), NoAudit, Box::new(TestClock));
        let profile = UserProfile::with_defaults(TestClock.time());
        let request = ProcessingRequest::new(
            "Worked on Smith project 9-11, /break, client call until noon",
            &profile,
        );
        let result = processor.process(&request).await?;

        assert_eq!(
            result.expanded_input,
            "Worked on Smith project 9-11, Break from 12:00 to 12:30, client call until noon"
        );
        assert_eq!(
            result.formatted_output,
            "20250611T0900,20250611T1100,DEV,Smith project;\n\
             20250611T1100,20250611T1200,MEET,Client call;"
        );
        assert!(result.formatted_output.lines().count() >= 2);
        assert!(result.formatted_output.ends_with(';'));
        assert!(result.explanation.contains(
            "**⚠️ Assumptions Made:**\n- Client call started right after the Smith project"
        ));
        assert!(result.format_warnings.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn user_commands_reach_the_prompt() -> Result<()> {
        let mut client = MockLlmClient::new();
        client
            .expect_generate()
            .withf(|prompt, _| prompt.contains("\"daily standup meeting at 10\""))
            .times(1)
            .returning(|_, _| Ok(dev_response()));

        let processor = TimeEntryProcessor::new(Box::new(client), NoAudit, Box::new(TestClock));
        processor
            .process(&ProcessingRequest::new("/STANDUP at 10", &test_profile()))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn empty_input_never_calls_the_model() -> Result<()> {
        let mut client = MockLlmClient::new();
        client.expect_generate().times(0);
        let processor = TimeEntryProcessor::new(Box::new(client), NoAudit, Box::new(TestClock));

        let result = processor
            .process(&ProcessingRequest::new("   ", &test_profile()))
            .await;
        assert!(matches!(result, Err(ProcessingError::Validation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn missing_columns_are_rejected() -> Result<()> {
        let mut client = MockLlmClient::new();
        client.expect_generate().times(0);
        let processor = TimeEntryProcessor::new(Box::new(client), NoAudit, Box::new(TestClock));

        let mut profile = test_profile();
        profile.columns.clear();
        let result = processor
            .process(&ProcessingRequest::new("worked", &profile))
            .await;
        assert!(matches!(result, Err(ProcessingError::Validation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn no_entries_is_a_failure_and_not_recorded() -> Result<()> {
        let mut client = MockLlmClient::new();
        client
            .expect_generate()
            .returning(|_, _| Ok(StructuredResponse::default()));
        let audit = RecordingAudit::default();
        let processor = TimeEntryProcessor::new(Box::new(client), audit, Box::new(TestClock));

        let result = processor
            .process(&ProcessingRequest::new("nothing much", &test_profile()))
            .await;
        let error = result.unwrap_err();
        assert!(matches!(error, ProcessingError::NoStructuredOutput(_)));
        assert_eq!(error.to_string(), "AI did not generate formatted output");
        assert!(processor.audit.0.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn model_errors_are_mapped() -> Result<()> {
        let mut client = MockLlmClient::new();
        client.expect_generate().returning(|_, _| {
            Err(ModelError::RateLimited {
                retry_after: Some(Duration::from_secs(2)),
            })
        });
        let processor = TimeEntryProcessor::new(Box::new(client), NoAudit, Box::new(TestClock));

        let error = processor
            .process(&ProcessingRequest::new("worked", &test_profile()))
            .await
            .unwrap_err();
        assert!(error.is_retryable());
        assert_eq!(error.retry_after(), Some(Duration::from_secs(2)));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() -> Result<()> {
        let processor =
            TimeEntryProcessor::new(Box::new(StalledClient), NoAudit, Box::new(TestClock))
                .with_timeout(Duration::from_secs(5));

        let result = processor
            .process(&ProcessingRequest::new("worked", &test_profile()))
            .await;
        assert!(matches!(result, Err(ProcessingError::Timeout)));
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_abandons_the_call() -> Result<()> {
        let cancellation = CancellationToken::new();
        let processor = TimeEntryProcessor::new(
            Box::new(StalledClient),
            RecordingAudit::default(),
            Box::new(TestClock),
        )
        .with_cancellation(cancellation.clone());

        cancellation.cancel();
        let result = processor
            .process(&ProcessingRequest::new("worked", &test_profile()))
            .await;
        assert!(matches!(result, Err(ProcessingError::Cancelled)));
        assert!(processor.audit.0.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn audit_failure_does_not_fail_the_run() -> Result<()> {
        let mut client = MockLlmClient::new();
        client.expect_generate().returning(|_, _| Ok(dev_response()));
        let processor =
            TimeEntryProcessor::new(Box::new(client), FailingAudit, Box::new(TestClock));

        let result = processor
            .process(&ProcessingRequest::new("worked", &test_profile()))
            .await?;
        assert_eq!(result.entry_count, 1);
        Ok(())
    }

    #[test]
    fn result_shape() -> Result<()> {
        let failed: Result<ProcessedEntries, ProcessingError> = Err(ProcessingError::Timeout);
        let failure = ProcessingResult::from(&failed);
        assert_eq!(
            serde_json::to_value(&failure)?,
            serde_json::json!({"success": false, "error": "AI service timeout. Please try again."})
        );

        let processed: Result<ProcessedEntries, ProcessingError> = Ok(ProcessedEntries {
            expanded_input: "x".into(),
            formatted_output: "x,y;".into(),
            explanation: "## Processing Summary".into(),
            format_warnings: vec![],
            entry_count: 1,
        });
        let success = ProcessingResult::from(&processed);
        assert_eq!(
            serde_json::to_value(&success)?,
            serde_json::json!({
                "success": true,
                "formattedOutput": "x,y;",
                "explanation": "## Processing Summary"
            })
        );
        Ok(())
    }
}
