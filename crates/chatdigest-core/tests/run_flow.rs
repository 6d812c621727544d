use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chatdigest_core::llm::{
    CompletionRequest, CompletionResponse, LLMClient, LLMError, LlmCallContext,
};
use chatdigest_core::migrations::run_migrations;
use chatdigest_core::{
    AnalysisWindow, ChatSummarizer, Classifier, Database, LibsqlStore, LocalArchive,
    MessageRepository, MessageStore, MockLLMClient, NewMessage, ReportKind, Run, RunError,
    RunPhase, RunRepository, RunStatus, RunnerSettings, StoreError, SummarizerSettings,
    Transport, TransportError, TriggerKind, WindowedRunner, ingest_message,
};
use chatdigest_core::messages::Chat;
use chatdigest_core::rules::RuleRepository;
use chatdigest_core::summary::ChatSummary;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::Semaphore;

#[derive(Default, Clone)]
struct RecordingTransport {
    sent: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(&self, _target: &str, text: &str) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::Rejected {
                status: 502,
                description: "bad gateway".into(),
            });
        }
        self.sent.lock().expect("sent lock").push(text.to_string());
        Ok(())
    }
}

/// Holds every completion until permits are added to `gate`.
struct GatedLLMClient {
    inner: MockLLMClient,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl LLMClient for GatedLLMClient {
    async fn complete(
        &self,
        request: CompletionRequest,
        context: LlmCallContext,
    ) -> Result<CompletionResponse, LLMError> {
        let _permit = self.gate.acquire().await.expect("gate open");
        self.inner.complete(request, context).await
    }
}

struct Harness {
    db: Database,
    messages: MessageRepository,
    classifier: Arc<Classifier>,
    transport: RecordingTransport,
    dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db_name = format!("db_{}.sqlite", uuid::Uuid::new_v4());
        let db = Database::new(&dir.path().join(db_name))
            .await
            .expect("create db");
        run_migrations(&db).await.expect("migrations");
        let classifier = Arc::new(
            Classifier::load(Arc::new(RuleRepository::new(db.clone())))
                .await
                .expect("classifier"),
        );

        Self {
            messages: MessageRepository::new(db.clone()),
            db,
            classifier,
            transport: RecordingTransport::default(),
            dir,
        }
    }

    fn runner(&self, llm: Arc<dyn LLMClient>) -> WindowedRunner {
        self.runner_with(llm, Arc::new(LibsqlStore::new(self.db.clone())), StdDuration::from_secs(30))
    }

    fn runner_with(
        &self,
        llm: Arc<dyn LLMClient>,
        store: Arc<dyn MessageStore>,
        run_timeout: StdDuration,
    ) -> WindowedRunner {
        WindowedRunner::new(
            store,
            self.classifier.clone(),
            ChatSummarizer::new(
                llm,
                SummarizerSettings {
                    char_budget: 16_000,
                    temperature: 0.2,
                    max_tokens: 800,
                },
            ),
            Arc::new(self.transport.clone()),
            RunnerSettings {
                window: Duration::hours(1),
                run_timeout,
                concurrency: 1,
                target_chat_id: "owner".into(),
            },
        )
    }

    async fn add(&self, chat_id: &str, title: &str, external_id: &str, text: &str, ts: DateTime<Utc>) {
        ingest_message(
            &self.messages,
            &self.classifier,
            &NewMessage {
                chat_id: chat_id.into(),
                chat_title: Some(title.into()),
                chat_type: Some("group".into()),
                external_id: external_id.into(),
                sender: Some("Анна".into()),
                text: text.into(),
                timestamp: ts,
                raw: None,
            },
        )
        .await
        .expect("ingest");
    }

    async fn run_count(&self) -> i64 {
        let conn = self.db.connection().await.expect("conn");
        let mut rows = conn
            .query("SELECT COUNT(*) FROM runs", ())
            .await
            .expect("count runs");
        let row = rows.next().await.expect("row").expect("count row");
        row.get(0).expect("count")
    }
}

fn trigger_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
}

/// Chat A is allow-listed with three work messages; chat B is unlisted with one.
async fn seed_two_chats(h: &Harness) {
    let t = trigger_time();
    h.classifier.add_allow_chat("-100").await.expect("allow");
    h.add("-100", "Команда", "1", "проект: согласование бюджета", t - Duration::minutes(50))
        .await;
    h.add("-100", "Команда", "2", "договор подписан, оплата завтра", t - Duration::minutes(40))
        .await;
    h.add("-100", "Команда", "3", "созвон по релизу в 15:00", t - Duration::minutes(30))
        .await;
    h.add("-200", "Соседи", "1", "счет и договор отправлены", t - Duration::minutes(20))
        .await;
}

#[tokio::test]
async fn two_chats_produce_one_digest() {
    let h = Harness::new().await;
    seed_two_chats(&h).await;

    let llm = MockLLMClient::new();
    llm.enqueue_text(
        "ДОГОВОРЕННОСТИ:\n- Подписать договор\n\nРИСКИ:\n- Задержка оплаты\n\nРЕКОМЕНДАЦИИ:\n- Провести созвон",
        120,
        30,
    );
    llm.enqueue_text(
        "ДОГОВОРЕННОСТИ:\n- Отправить счет\n\nРЕКОМЕНДАЦИИ:\n- Проверить оплату",
        80,
        20,
    );
    let runner = h.runner(Arc::new(llm.clone()));

    let outcome = runner
        .trigger(TriggerKind::Manual, trigger_time())
        .await
        .expect("run");

    assert_eq!(outcome.report, ReportKind::Digest);
    assert_eq!(outcome.active_chat_count, 2);
    assert_eq!(outcome.summarized_chats, 2);
    assert_eq!(outcome.total_messages, 4);
    assert!(outcome.delivered);
    assert_eq!(runner.phase(), RunPhase::Idle);

    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].1.chat_id.as_deref(), Some("-100"));
    assert_eq!(requests[0].1.run_id.as_deref(), Some(outcome.run_id.as_str()));
    assert_eq!(requests[1].1.chat_id.as_deref(), Some("-200"));

    assert_eq!(
        h.transport.sent(),
        vec![
            "🗂 активные чаты за час: 2\n\n\
             📊 Всего чатов: 2 | 💼 Рабочих: 1 | 🏠 Личных: 1 | 📨 Сообщений: 4\n\n\
             📌 ключевые договоренности:\n- Подписать договор\n- Отправить счет\n\n\
             ⚠️ риски:\n- Задержка оплаты\n\n\
             🚀 рекомендации:\n- Провести созвон\n- Проверить оплату\n"
                .to_string()
        ]
    );

    let runs = RunRepository::new(h.db.clone());
    let run = runs.get(&outcome.run_id).await.expect("run row");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.window.start, trigger_time() - Duration::hours(1));
    let summaries = runs.list_summaries(&outcome.run_id).await.expect("summaries");
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].message_count, 3);
    assert_eq!(summaries[0].token_usage.prompt_tokens, 120);
}

#[tokio::test]
async fn window_end_belongs_to_next_run() {
    let h = Harness::new().await;
    let t = trigger_time();
    h.add("-1", "Проект", "start", "договор и счет", t - Duration::hours(1))
        .await;
    h.add("-1", "Проект", "end", "договор и счет", t).await;

    let llm = MockLLMClient::new();
    llm.enqueue_text("РЕКОМЕНДАЦИИ:\n- Первое", 0, 0);
    llm.enqueue_text("РЕКОМЕНДАЦИИ:\n- Второе", 0, 0);
    let runner = h.runner(Arc::new(llm.clone()));

    let first = runner.trigger(TriggerKind::Scheduled, t).await.expect("first run");
    assert_eq!(first.total_messages, 1);
    assert!(llm.requests()[0].0.messages[1].content.contains("[2024-05-06 11:00:00]"));

    let second = runner
        .trigger(TriggerKind::Scheduled, t + Duration::hours(1))
        .await
        .expect("second run");
    assert_eq!(second.total_messages, 1);
    assert!(llm.requests()[1].0.messages[1].content.contains("[2024-05-06 12:00:00]"));
}

#[tokio::test]
async fn personal_only_window_sends_statistics() {
    let h = Harness::new().await;
    let t = trigger_time();
    h.add("-7", "Семья", "1", "привет, как дела?", t - Duration::minutes(10))
        .await;
    h.add("-7", "Семья", "2", "смотрим фильм вечером", t - Duration::minutes(5))
        .await;

    let llm = MockLLMClient::new();
    let runner = h.runner(Arc::new(llm.clone()));
    let outcome = runner.trigger(TriggerKind::Manual, t).await.expect("run");

    assert_eq!(outcome.report, ReportKind::Statistics);
    assert_eq!(outcome.active_chat_count, 0);
    assert_eq!(llm.call_count(), 0);
    assert_eq!(
        h.transport.sent(),
        vec![
            "📊 Статистика за час:\n\n\
             🗂 Всего чатов: 1\n\
             💼 Рабочих чатов: 0\n\
             🏠 Личных чатов: 1\n\
             📨 Всего сообщений: 2\n\n\
             📋 Активность по чатам:\n\
             🏠 Семья: 2 сообщений\n\
             \n⚠️ Рабочих сообщений не найдено"
                .to_string()
        ]
    );
}

#[tokio::test]
async fn empty_window_sends_zero_statistics() {
    let h = Harness::new().await;
    let llm = MockLLMClient::new();
    let runner = h.runner(Arc::new(llm.clone()));

    let outcome = runner
        .trigger(TriggerKind::Scheduled, trigger_time())
        .await
        .expect("run");

    assert_eq!(outcome.report, ReportKind::Statistics);
    assert_eq!(outcome.total_messages, 0);
    assert_eq!(llm.call_count(), 0);
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("🗂 Всего чатов: 0\n"));
    assert!(!sent[0].contains("Активность по чатам"));
}

#[tokio::test]
async fn failed_chat_is_dropped_from_digest() {
    let h = Harness::new().await;
    seed_two_chats(&h).await;

    let llm = MockLLMClient::new();
    llm.enqueue_response(Err(LLMError::Timeout));
    llm.enqueue_text("РЕКОМЕНДАЦИИ:\n- Проверить оплату", 10, 5);
    let runner = h.runner(Arc::new(llm));

    let outcome = runner
        .trigger(TriggerKind::Manual, trigger_time())
        .await
        .expect("run");

    assert_eq!(outcome.report, ReportKind::Digest);
    assert_eq!(outcome.summarized_chats, 1);
    assert_eq!(outcome.failed_chats, 1);
    let sent = h.transport.sent();
    assert!(sent[0].starts_with("🗂 активные чаты за час: 2\n\n"));
    assert!(sent[0].ends_with("🚀 рекомендации:\n- Проверить оплату\n"));

    let summaries = RunRepository::new(h.db.clone())
        .list_summaries(&outcome.run_id)
        .await
        .expect("summaries");
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].chat_id, "-200");
}

#[tokio::test]
async fn all_chats_failing_falls_back_to_statistics() {
    let h = Harness::new().await;
    seed_two_chats(&h).await;

    let llm = MockLLMClient::new();
    llm.enqueue_response(Err(LLMError::Unavailable("overloaded".into())));
    llm.enqueue_response(Err(LLMError::Unavailable("overloaded".into())));
    let runner = h.runner(Arc::new(llm));

    let outcome = runner
        .trigger(TriggerKind::Manual, trigger_time())
        .await
        .expect("run");

    assert_eq!(outcome.report, ReportKind::Statistics);
    assert_eq!(outcome.failed_chats, 2);
    let sent = h.transport.sent();
    assert!(sent[0].starts_with("📊 Статистика за час:"));
    assert!(!sent[0].contains("Рабочих сообщений не найдено"));
}

#[tokio::test]
async fn delivery_failure_does_not_fail_run() {
    let mut h = Harness::new().await;
    h.transport.fail = true;
    let runner = h.runner(Arc::new(MockLLMClient::new()));

    let outcome = runner
        .trigger(TriggerKind::Manual, trigger_time())
        .await
        .expect("run");
    assert!(!outcome.delivered);

    let run = RunRepository::new(h.db.clone())
        .get(&outcome.run_id)
        .await
        .expect("run row");
    assert_eq!(run.status, RunStatus::Completed);
}

#[tokio::test]
async fn digest_runs_are_archived() {
    let h = Harness::new().await;
    seed_two_chats(&h).await;

    let llm = MockLLMClient::new();
    llm.enqueue_text("РЕКОМЕНДАЦИИ:\n- Провести созвон", 0, 0);
    llm.enqueue_text("РИСКИ:\n- Просрочка", 0, 0);
    let archive = LocalArchive::new(h.dir.path().join("archive"));
    let runner = h
        .runner(Arc::new(llm))
        .with_archive(Arc::new(archive.clone()));

    let outcome = runner
        .trigger(TriggerKind::Manual, trigger_time())
        .await
        .expect("run");
    assert_eq!(outcome.archived, Some(true));

    let index = std::fs::read_to_string(archive.index_path()).expect("index");
    let rows: Vec<&str> = index.lines().skip(1).collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].contains("\tКоманда\t"));
    assert!(rows[0].contains("\tПровести созвон\t"));
    assert!(rows[1].contains("\tНет рекомендаций\t"));
}

#[tokio::test]
async fn overlapping_trigger_is_rejected() {
    let h = Harness::new().await;
    seed_two_chats(&h).await;

    let inner = MockLLMClient::new();
    inner.enqueue_text("РЕКОМЕНДАЦИИ:\n- Один", 0, 0);
    inner.enqueue_text("РЕКОМЕНДАЦИИ:\n- Два", 0, 0);
    let gate = Arc::new(Semaphore::new(0));
    let runner = Arc::new(h.runner(Arc::new(GatedLLMClient {
        inner,
        gate: gate.clone(),
    })));

    let mut phase = runner.subscribe_phase();
    let background = runner.clone();
    let first = tokio::spawn(async move {
        background
            .trigger(TriggerKind::Scheduled, trigger_time())
            .await
    });
    phase
        .wait_for(|p| *p == RunPhase::Summarizing)
        .await
        .expect("phase");
    assert!(runner.is_busy());

    let second = runner
        .trigger(TriggerKind::Manual, trigger_time() + Duration::seconds(1))
        .await;
    assert!(matches!(second, Err(RunError::Overlap)));

    gate.add_permits(2);
    let outcome = first.await.expect("join").expect("first run");
    assert_eq!(outcome.summarized_chats, 2);
    assert_eq!(h.run_count().await, 1);
    assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test]
async fn spawned_run_finishes_after_caller_stops_waiting() {
    let h = Harness::new().await;
    seed_two_chats(&h).await;

    let inner = MockLLMClient::new();
    inner.enqueue_text("РЕКОМЕНДАЦИИ:\n- Один", 0, 0);
    inner.enqueue_text("РЕКОМЕНДАЦИИ:\n- Два", 0, 0);
    let gate = Arc::new(Semaphore::new(0));
    let runner = Arc::new(h.runner(Arc::new(GatedLLMClient {
        inner,
        gate: gate.clone(),
    })));
    let mut phase = runner.subscribe_phase();

    let waited = tokio::time::timeout(
        StdDuration::from_millis(200),
        runner.spawn_trigger(TriggerKind::Manual, trigger_time()),
    )
    .await;
    assert!(waited.is_err(), "run is held at the gate");
    assert!(runner.is_busy());

    gate.add_permits(2);
    phase
        .wait_for(|p| *p == RunPhase::Idle)
        .await
        .expect("phase");

    let run = RunRepository::new(h.db.clone())
        .latest()
        .await
        .expect("latest")
        .expect("run row");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test]
async fn run_past_timeout_is_marked_failed() {
    let h = Harness::new().await;
    seed_two_chats(&h).await;

    let gate = Arc::new(Semaphore::new(0));
    let runner = h.runner_with(
        Arc::new(GatedLLMClient {
            inner: MockLLMClient::new(),
            gate,
        }),
        Arc::new(LibsqlStore::new(h.db.clone())),
        StdDuration::from_millis(100),
    );

    let err = runner
        .trigger(TriggerKind::Manual, trigger_time())
        .await
        .expect_err("timeout");
    assert!(matches!(err, RunError::TimedOut(_)));
    assert!(h.transport.sent().is_empty());

    let run = RunRepository::new(h.db.clone())
        .latest()
        .await
        .expect("latest")
        .expect("run row");
    assert_eq!(run.status, RunStatus::Failed);
    assert!(!runner.is_busy());
}

/// Records runs but cannot read messages.
#[derive(Default)]
struct OfflineStore {
    finished: Mutex<Vec<(String, RunStatus)>>,
}

#[async_trait]
impl MessageStore for OfflineStore {
    async fn fetch_window(
        &self,
        _window: &AnalysisWindow,
    ) -> Result<Vec<chatdigest_core::Message>, StoreError> {
        Err(StoreError::NotFound("messages table offline".into()))
    }

    async fn list_work_chats(&self) -> Result<Vec<Chat>, StoreError> {
        Ok(Vec::new())
    }

    async fn record_run(
        &self,
        trigger: TriggerKind,
        triggered_at: DateTime<Utc>,
        window: &AnalysisWindow,
    ) -> Result<Run, StoreError> {
        Ok(Run {
            id: "offline-run".into(),
            trigger,
            triggered_at,
            window: *window,
            status: RunStatus::Running,
            error: None,
            created_at: triggered_at,
            finished_at: None,
        })
    }

    async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        _error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.finished
            .lock()
            .expect("finished lock")
            .push((run_id.to_string(), status));
        Ok(())
    }

    async fn record_chat_summary(
        &self,
        _run_id: &str,
        _summary: &ChatSummary,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

#[tokio::test]
async fn fetch_failure_fails_run_without_report() {
    let h = Harness::new().await;
    let store = Arc::new(OfflineStore::default());
    let runner = h.runner_with(
        Arc::new(MockLLMClient::new()),
        store.clone(),
        StdDuration::from_secs(5),
    );

    let err = runner
        .trigger(TriggerKind::Scheduled, trigger_time())
        .await
        .expect_err("fetch failure");
    assert!(matches!(err, RunError::Store(_)));
    assert!(h.transport.sent().is_empty());
    assert_eq!(
        *store.finished.lock().expect("finished lock"),
        vec![("offline-run".to_string(), RunStatus::Failed)]
    );
    assert_eq!(runner.phase(), RunPhase::Idle);
}
