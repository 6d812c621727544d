use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt, stream};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

use crate::archive::{ArchiveSink, archive_run};
use crate::config::Config;
use crate::messages::Message;
use crate::report::{DigestReport, ReportKind, RunStatistics, render_digest, render_statistics};
use crate::rules::{Classifier, RuleSet};
use crate::runs::{AnalysisWindow, Run, RunStatus, TriggerKind};
use crate::store::{MessageStore, StoreError};
use crate::summary::{ChatGroup, ChatSummarizer, ChatSummary};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    WindowComputed,
    MessagesFetched,
    Classified,
    Summarizing,
    Merging,
    Reported,
    Archived,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::WindowComputed => "window_computed",
            RunPhase::MessagesFetched => "messages_fetched",
            RunPhase::Classified => "classified",
            RunPhase::Summarizing => "summarizing",
            RunPhase::Merging => "merging",
            RunPhase::Reported => "reported",
            RunPhase::Archived => "archived",
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("a run is already in progress")]
    Overlap,
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("run exceeded {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub window: AnalysisWindow,
    pub report: ReportKind,
    pub delivered: bool,
    pub total_messages: usize,
    pub active_chat_count: usize,
    pub summarized_chats: usize,
    pub failed_chats: usize,
    /// `None` when archiving was not attempted.
    pub archived: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub window: chrono::Duration,
    pub run_timeout: Duration,
    pub concurrency: usize,
    pub target_chat_id: String,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window: chrono::Duration::minutes(i64::from(config.schedule.window_minutes)),
            run_timeout: Duration::from_secs(config.schedule.run_timeout_secs),
            concurrency: config.summarizer.concurrency,
            target_chat_id: config.telegram.target_chat_id.clone(),
        }
    }
}

/// Executes runs one at a time. A trigger arriving while a run is active is rejected.
pub struct WindowedRunner {
    store: Arc<dyn MessageStore>,
    classifier: Arc<Classifier>,
    summarizer: ChatSummarizer,
    transport: Arc<dyn Transport>,
    archive: Option<Arc<dyn ArchiveSink>>,
    settings: RunnerSettings,
    gate: Arc<Mutex<()>>,
    phase: watch::Sender<RunPhase>,
}

impl WindowedRunner {
    pub fn new(
        store: Arc<dyn MessageStore>,
        classifier: Arc<Classifier>,
        summarizer: ChatSummarizer,
        transport: Arc<dyn Transport>,
        settings: RunnerSettings,
    ) -> Self {
        let (phase, _) = watch::channel(RunPhase::Idle);
        Self {
            store,
            classifier,
            summarizer,
            transport,
            archive: None,
            settings,
            gate: Arc::new(Mutex::new(())),
            phase,
        }
    }

    pub fn with_archive(mut self, archive: Arc<dyn ArchiveSink>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    pub fn archive_enabled(&self) -> bool {
        self.archive.is_some()
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Runs `trigger` on its own task. The run finishes and records its status
    /// even if the caller stops waiting on the handle.
    pub fn spawn_trigger(
        self: &Arc<Self>,
        kind: TriggerKind,
        triggered_at: DateTime<Utc>,
    ) -> JoinHandle<Result<RunOutcome, RunError>> {
        let runner = Arc::clone(self);
        tokio::spawn(async move { runner.trigger(kind, triggered_at).await })
    }

    /// Runs the window ending at `triggered_at`.
    pub async fn trigger(
        &self,
        kind: TriggerKind,
        triggered_at: DateTime<Utc>,
    ) -> Result<RunOutcome, RunError> {
        let _permit = self
            .gate
            .clone()
            .try_lock_owned()
            .map_err(|_| RunError::Overlap)?;

        let window = AnalysisWindow::ending_at(triggered_at, self.settings.window);
        self.set_phase(RunPhase::WindowComputed);

        let run = match self.store.record_run(kind, triggered_at, &window).await {
            Ok(run) => run,
            Err(err) => {
                error!(error = %err, trigger = kind.as_str(), "failed to record run");
                self.set_phase(RunPhase::Idle);
                return Err(err.into());
            }
        };

        let span = info_span!("run", run_id = %run.id, trigger = kind.as_str());
        let result = async {
            info!(
                window_start = %window.start,
                window_end = %window.end,
                "run started"
            );
            let result = match tokio::time::timeout(self.settings.run_timeout, self.execute(&run))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(RunError::TimedOut(self.settings.run_timeout)),
            };
            self.finish(&run, &result).await;
            result
        }
        .instrument(span)
        .await;

        self.set_phase(RunPhase::Idle);
        result
    }

    async fn execute(&self, run: &Run) -> Result<RunOutcome, RunError> {
        let messages = self.store.fetch_window(&run.window).await?;
        self.set_phase(RunPhase::MessagesFetched);

        let rules = self.classifier.snapshot();
        let stats = RunStatistics::collect(&messages, &rules);
        let groups = group_work_messages(messages, &rules);
        self.set_phase(RunPhase::Classified);
        info!(
            total_messages = stats.total_messages,
            total_chats = stats.total_chats,
            work_chats = stats.work_chats,
            groups = groups.len(),
            rules_version = rules.version(),
            "window classified"
        );

        let mut outcome = RunOutcome {
            run_id: run.id.clone(),
            window: run.window,
            report: ReportKind::Statistics,
            delivered: false,
            total_messages: stats.total_messages,
            active_chat_count: groups.len(),
            summarized_chats: 0,
            failed_chats: 0,
            archived: None,
        };

        if groups.is_empty() {
            outcome.delivered = self.deliver(&render_statistics(&stats, 0)).await;
            self.set_phase(RunPhase::Reported);
            return Ok(outcome);
        }

        self.set_phase(RunPhase::Summarizing);
        let summaries = self.summarize_groups(&run.id, &groups).await;
        outcome.summarized_chats = summaries.len();
        outcome.failed_chats = groups.len() - summaries.len();

        self.set_phase(RunPhase::Merging);
        for summary in &summaries {
            self.store.record_chat_summary(&run.id, summary).await?;
        }

        if summaries.is_empty() {
            warn!(groups = groups.len(), "no chat could be summarized");
            outcome.delivered = self.deliver(&render_statistics(&stats, groups.len())).await;
            self.set_phase(RunPhase::Reported);
            return Ok(outcome);
        }

        let report = DigestReport::merge(groups.len(), &stats, &summaries);
        outcome.report = ReportKind::Digest;
        outcome.delivered = self.deliver(&render_digest(&report)).await;
        self.set_phase(RunPhase::Reported);

        if let Some(archive) = &self.archive {
            outcome.archived = Some(archive_run(archive.as_ref(), Utc::now(), &summaries).await);
            self.set_phase(RunPhase::Archived);
        }

        Ok(outcome)
    }

    /// Summaries come back in group order regardless of completion order.
    async fn summarize_groups(&self, run_id: &str, groups: &[ChatGroup]) -> Vec<ChatSummary> {
        // Built up front so the spawned run future stays Send.
        let pending: Vec<_> = groups
            .iter()
            .map(|group| self.summarizer.summarize(run_id, group).boxed())
            .collect();
        let results: Vec<_> = stream::iter(pending)
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        groups
            .iter()
            .zip(results)
            .filter_map(|(group, result)| match result {
                Ok(summary) => Some(summary),
                Err(err) => {
                    warn!(
                        chat_id = %group.chat_id,
                        messages = group.messages.len(),
                        error = %err,
                        transient = err.is_transient(),
                        "chat summary failed, dropping chat from digest"
                    );
                    None
                }
            })
            .collect()
    }

    async fn deliver(&self, text: &str) -> bool {
        match self
            .transport
            .send_text(&self.settings.target_chat_id, text)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, "failed to deliver report");
                false
            }
        }
    }

    async fn finish(&self, run: &Run, result: &Result<RunOutcome, RunError>) {
        let (status, error_text) = match result {
            Ok(outcome) => {
                info!(
                    report = outcome.report.as_str(),
                    delivered = outcome.delivered,
                    summarized = outcome.summarized_chats,
                    failed = outcome.failed_chats,
                    "run completed"
                );
                (RunStatus::Completed, None)
            }
            Err(err) => {
                error!(error = %err, "run failed");
                (RunStatus::Failed, Some(err.to_string()))
            }
        };

        if let Err(err) = self
            .store
            .finish_run(&run.id, status, error_text.as_deref())
            .await
        {
            warn!(error = %err, status = status.as_str(), "failed to record run status");
        }
    }

    fn set_phase(&self, phase: RunPhase) {
        self.phase.send_replace(phase);
    }
}

/// Groups messages that pass the work filter by chat. Chats keep the order in which
/// their first qualifying message appears; messages keep fetch order.
pub fn group_work_messages(messages: Vec<Message>, rules: &RuleSet) -> Vec<ChatGroup> {
    let mut groups: Vec<ChatGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for message in messages {
        if !rules.is_work_message(&message.text) {
            continue;
        }
        let slot = match index.get(&message.chat_id) {
            Some(slot) => *slot,
            None => {
                index.insert(message.chat_id.clone(), groups.len());
                groups.push(ChatGroup {
                    chat_id: message.chat_id.clone(),
                    chat_title: message.chat_title.clone(),
                    messages: Vec::new(),
                });
                groups.len() - 1
            }
        };
        groups[slot].messages.push(message);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(chat_id: &str, minute: u32, text: &str) -> Message {
        Message {
            id: format!("{chat_id}-{minute}"),
            chat_id: chat_id.into(),
            external_id: minute.to_string(),
            sender: "Ира".into(),
            text: text.into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 6, 11, minute, 0).unwrap(),
            chat_title: format!("Чат {chat_id}"),
            chat_is_work: false,
        }
    }

    #[test]
    fn groups_follow_first_qualifying_message() {
        let rules = RuleSet::from_rules(1, &[]);
        let messages = vec![
            message("a", 1, "как дела, семья?"),
            message("b", 2, "проект и бюджет на встречу"),
            message("a", 3, "договор и счет отправлены"),
            message("b", 4, "смотрим кино"),
            message("b", 5, "дедлайн по задаче"),
        ];

        let groups = group_work_messages(messages, &rules);

        assert_eq!(
            groups.iter().map(|g| g.chat_id.as_str()).collect::<Vec<_>>(),
            vec!["b", "a"]
        );
        assert_eq!(
            groups[0]
                .messages
                .iter()
                .map(|m| m.external_id.as_str())
                .collect::<Vec<_>>(),
            vec!["2", "5"]
        );
        assert_eq!(groups[1].messages.len(), 1);
    }

    #[test]
    fn no_groups_when_nothing_passes_filter() {
        let rules = RuleSet::from_rules(1, &[]);
        let groups = group_work_messages(vec![message("a", 1, "привет")], &rules);
        assert!(groups.is_empty());
    }
}
