pub mod archive;
pub mod config;
pub mod db;
pub mod ingest;
pub mod llm;
pub mod messages;
pub mod migrations;
pub mod report;
pub mod rules;
pub mod runner;
pub mod runs;
pub mod scheduler;
pub mod store;
pub mod summary;
pub mod telemetry;
pub mod transport;

pub use archive::{ArchiveError, ArchiveSink, LocalArchive};
pub use config::Config;
pub use db::Database;
pub use ingest::{IngestError, IngestOutcome, ingest_message};
pub use llm::{GenaiLLMClient, LLMClient, MockLLMClient};
pub use messages::{Chat, Message, MessageRepository, NewMessage};
pub use report::{DigestReport, ReportKind, RunStatistics};
pub use rules::{Classifier, RuleKind, RuleRepository, RuleSet};
pub use runner::{RunError, RunOutcome, RunPhase, RunnerSettings, WindowedRunner};
pub use runs::{AnalysisWindow, Run, RunRepository, RunStatus, TriggerKind};
pub use scheduler::{Schedule, SchedulerConfig, run_scheduler};
pub use store::{LibsqlStore, MessageStore, RuleStore, StoreError};
pub use summary::{ChatGroup, ChatSummarizer, ChatSummary, SummarizerSettings};
pub use telemetry::{TelemetryError, TelemetryGuard, init_telemetry};
pub use transport::{TelegramTransport, Transport, TransportError};
