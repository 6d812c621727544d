use serde::{Deserialize, Serialize};

use crate::messages::Message;
use crate::rules::RuleSet;
use crate::summary::ChatSummary;

pub const MAX_AGREEMENTS: usize = 6;
pub const MAX_RISKS: usize = 3;
pub const MAX_RECOMMENDATIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatActivity {
    pub chat_id: String,
    pub title: String,
    pub message_count: usize,
    pub is_work: bool,
}

/// Per-window chat statistics, chats listed in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total_chats: usize,
    pub work_chats: usize,
    pub personal_chats: usize,
    pub total_messages: usize,
    pub chats: Vec<ChatActivity>,
}

impl RunStatistics {
    /// Every distinct chat in the window is classified, including chats whose
    /// messages are all filtered out later.
    pub fn collect(messages: &[Message], rules: &RuleSet) -> Self {
        let mut chats: Vec<ChatActivity> = Vec::new();
        for message in messages {
            match chats.iter_mut().find(|c| c.chat_id == message.chat_id) {
                Some(activity) => activity.message_count += 1,
                None => chats.push(ChatActivity {
                    chat_id: message.chat_id.clone(),
                    title: message.chat_title.clone(),
                    message_count: 1,
                    is_work: rules.is_work_chat(&message.chat_id, &message.chat_title),
                }),
            }
        }

        let work_chats = chats.iter().filter(|c| c.is_work).count();
        Self {
            total_chats: chats.len(),
            work_chats,
            personal_chats: chats.len() - work_chats,
            total_messages: messages.len(),
            chats,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestReport {
    pub active_chat_count: usize,
    pub total_messages: usize,
    pub total_chats: usize,
    pub work_chat_count: usize,
    pub personal_chat_count: usize,
    pub agreements: Vec<String>,
    pub risks: Vec<String>,
    pub recommendations: Vec<String>,
}

impl DigestReport {
    /// Concatenates sections in chat processing order, then applies the caps.
    pub fn merge(active_chat_count: usize, stats: &RunStatistics, summaries: &[ChatSummary]) -> Self {
        Self {
            active_chat_count,
            total_messages: stats.total_messages,
            total_chats: stats.total_chats,
            work_chat_count: stats.work_chats,
            personal_chat_count: stats.personal_chats,
            agreements: capped(summaries, |s| s.agreements.as_slice(), MAX_AGREEMENTS),
            risks: capped(summaries, |s| s.risks.as_slice(), MAX_RISKS),
            recommendations: capped(
                summaries,
                |s| s.recommendations.as_slice(),
                MAX_RECOMMENDATIONS,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Digest,
    Statistics,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Digest => "digest",
            ReportKind::Statistics => "statistics",
        }
    }
}

pub fn render_digest(report: &DigestReport) -> String {
    let mut text = format!(
        "🗂 активные чаты за час: {}\n\n",
        report.active_chat_count
    );
    text.push_str(&format!(
        "📊 Всего чатов: {} | 💼 Рабочих: {} | 🏠 Личных: {} | 📨 Сообщений: {}\n\n",
        report.total_chats,
        report.work_chat_count,
        report.personal_chat_count,
        report.total_messages
    ));

    if !report.agreements.is_empty() {
        text.push_str("📌 ключевые договоренности:\n");
        push_bullets(&mut text, &report.agreements);
        text.push('\n');
    }
    if !report.risks.is_empty() {
        text.push_str("⚠️ риски:\n");
        push_bullets(&mut text, &report.risks);
        text.push('\n');
    }
    if !report.recommendations.is_empty() {
        text.push_str("🚀 рекомендации:\n");
        push_bullets(&mut text, &report.recommendations);
    }
    text
}

/// `work_group_count` is the number of chats that had work messages in the window.
pub fn render_statistics(stats: &RunStatistics, work_group_count: usize) -> String {
    let mut text = String::from("📊 Статистика за час:\n\n");
    text.push_str(&format!("🗂 Всего чатов: {}\n", stats.total_chats));
    text.push_str(&format!("💼 Рабочих чатов: {}\n", stats.work_chats));
    text.push_str(&format!("🏠 Личных чатов: {}\n", stats.personal_chats));
    text.push_str(&format!("📨 Всего сообщений: {}\n\n", stats.total_messages));

    if stats.total_chats > 0 {
        text.push_str("📋 Активность по чатам:\n");
        for chat in &stats.chats {
            let marker = if chat.is_work { "💼" } else { "🏠" };
            text.push_str(&format!(
                "{marker} {}: {} сообщений\n",
                chat.title, chat.message_count
            ));
        }
    }

    if work_group_count == 0 {
        text.push_str("\n⚠️ Рабочих сообщений не найдено");
    }
    text
}

fn capped(
    summaries: &[ChatSummary],
    select: fn(&ChatSummary) -> &[String],
    cap: usize,
) -> Vec<String> {
    summaries
        .iter()
        .flat_map(|s| select(s).iter().cloned())
        .take(cap)
        .collect()
}

fn push_bullets(text: &mut String, items: &[String]) {
    for item in items {
        text.push_str("- ");
        text.push_str(item);
        text.push('\n');
    }
}
