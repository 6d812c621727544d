use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    AllowChat,
    DenyChat,
    Keyword,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::AllowChat => "allow_chat",
            RuleKind::DenyChat => "deny_chat",
            RuleKind::Keyword => "keyword",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "allow_chat" => Some(Self::AllowChat),
            "deny_chat" => Some(Self::DenyChat),
            "keyword" => Some(Self::Keyword),
            _ => None,
        }
    }

    /// Keywords are matched case-insensitively, so they are stored lowercased.
    pub fn normalize(&self, value: &str) -> String {
        let trimmed = value.trim();
        match self {
            RuleKind::Keyword => trimmed.to_lowercase(),
            RuleKind::AllowChat | RuleKind::DenyChat => trimmed.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub kind: RuleKind,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

/// Rules grouped by kind, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterListing {
    pub allow_chats: Vec<String>,
    pub deny_chats: Vec<String>,
    pub keywords: Vec<String>,
}

impl FilterListing {
    pub fn from_rules(rules: &[Rule]) -> Self {
        let mut listing = Self::default();
        for rule in rules {
            let bucket = match rule.kind {
                RuleKind::AllowChat => &mut listing.allow_chats,
                RuleKind::DenyChat => &mut listing.deny_chats,
                RuleKind::Keyword => &mut listing.keywords,
            };
            bucket.push(rule.value.clone());
        }
        listing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub allow_chats: usize,
    pub deny_chats: usize,
    pub custom_keywords: usize,
    pub work_keywords: usize,
    pub personal_keywords: usize,
}
