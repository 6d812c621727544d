use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::summary::ChatSummary;

pub const INDEX_FILE: &str = "index.tsv";
pub const INDEX_HEADER: &str = "Дата\tЧат\tСсылка на файл\tКраткий итог\tСоздан";
pub const NO_RECOMMENDATIONS: &str = "Нет рекомендаций";

const SECTION_RULE_WIDTH: usize = 50;
const REPORT_RULE_WIDTH: usize = 30;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub date: NaiveDate,
    pub chat_title: String,
    pub file_link: String,
    pub short_summary: String,
    pub created_at: DateTime<Utc>,
}

/// Long-term storage for per-chat summaries. Failures never affect report delivery.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Writes the day's report file and returns a link to it.
    async fn write_daily_file(
        &self,
        date: NaiveDate,
        generated_at: DateTime<Utc>,
        summaries: &[ChatSummary],
    ) -> Result<String, ArchiveError>;

    async fn append_index_row(&self, row: &IndexRow) -> Result<(), ArchiveError>;
}

/// Archive kept as plain files: `<dir>/<date>.txt` per day plus `<dir>/index.tsv`.
#[derive(Debug, Clone)]
pub struct LocalArchive {
    dir: PathBuf,
}

impl LocalArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn daily_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.txt", date.format("%Y-%m-%d")))
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    async fn ensure_dir(&self) -> Result<(), ArchiveError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| io_error(&self.dir, source))
    }
}

#[async_trait]
impl ArchiveSink for LocalArchive {
    async fn write_daily_file(
        &self,
        date: NaiveDate,
        generated_at: DateTime<Utc>,
        summaries: &[ChatSummary],
    ) -> Result<String, ArchiveError> {
        self.ensure_dir().await?;
        let path = self.daily_path(date);
        let content = format_daily_report(date, generated_at, summaries);
        append(&path, &content).await?;
        Ok(path.display().to_string())
    }

    async fn append_index_row(&self, row: &IndexRow) -> Result<(), ArchiveError> {
        self.ensure_dir().await?;
        let path = self.index_path();
        let exists = fs::try_exists(&path)
            .await
            .map_err(|source| io_error(&path, source))?;

        let mut content = String::new();
        if !exists {
            content.push_str(INDEX_HEADER);
            content.push('\n');
        }
        content.push_str(&format_index_row(row));
        content.push('\n');
        append(&path, &content).await
    }
}

/// One block per run: header, then every chat with all of its items.
pub fn format_daily_report(
    date: NaiveDate,
    generated_at: DateTime<Utc>,
    summaries: &[ChatSummary],
) -> String {
    let mut lines = vec![
        "ОТЧЕТ TELEGRAM ANALYTICS BOT".to_string(),
        format!("Дата: {}", date.format("%Y-%m-%d")),
        format!("Создан: {}", generated_at.format("%Y-%m-%d %H:%M:%S")),
        "=".repeat(SECTION_RULE_WIDTH),
        String::new(),
    ];

    for (i, summary) in summaries.iter().enumerate() {
        lines.push(format!("ОТЧЕТ {}: {}", i + 1, summary.chat_title));
        lines.push("-".repeat(REPORT_RULE_WIDTH));
        for (header, items) in [
            ("ДОГОВОРЕННОСТИ:", &summary.agreements),
            ("РИСКИ:", &summary.risks),
            ("РЕКОМЕНДАЦИИ:", &summary.recommendations),
        ] {
            if items.is_empty() {
                continue;
            }
            lines.push(header.to_string());
            lines.extend(items.iter().map(|item| format!("- {item}")));
            lines.push(String::new());
        }
        lines.push("=".repeat(SECTION_RULE_WIDTH));
        lines.push(String::new());
    }

    let mut content = lines.join("\n");
    content.push('\n');
    content
}

pub fn short_summary(summary: &ChatSummary) -> String {
    summary
        .recommendations
        .first()
        .cloned()
        .unwrap_or_else(|| NO_RECOMMENDATIONS.to_string())
}

fn format_index_row(row: &IndexRow) -> String {
    [
        row.date.format("%Y-%m-%d").to_string(),
        sanitize_cell(&row.chat_title),
        sanitize_cell(&row.file_link),
        sanitize_cell(&row.short_summary),
        row.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    ]
    .join("\t")
}

fn sanitize_cell(value: &str) -> String {
    value
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect()
}

/// Writes the run's summaries to the archive. Errors are logged, never returned.
pub async fn archive_run(
    sink: &dyn ArchiveSink,
    generated_at: DateTime<Utc>,
    summaries: &[ChatSummary],
) -> bool {
    if summaries.is_empty() {
        return true;
    }

    let date = generated_at.date_naive();
    let link = match sink.write_daily_file(date, generated_at, summaries).await {
        Ok(link) => link,
        Err(err) => {
            warn!(error = %err, %date, "failed to write daily archive file");
            return false;
        }
    };

    let mut complete = true;
    for summary in summaries {
        let row = IndexRow {
            date,
            chat_title: summary.chat_title.clone(),
            file_link: link.clone(),
            short_summary: short_summary(summary),
            created_at: generated_at,
        };
        if let Err(err) = sink.append_index_row(&row).await {
            warn!(error = %err, chat_id = %summary.chat_id, "failed to append archive index row");
            complete = false;
        }
    }

    info!(%date, chats = summaries.len(), link = %link, "run archived");
    complete
}

async fn append(path: &Path, content: &str) -> Result<(), ArchiveError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| io_error(path, source))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|source| io_error(path, source))?;
    file.flush().await.map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> ArchiveError {
    ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}
