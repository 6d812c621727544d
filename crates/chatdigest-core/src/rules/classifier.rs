use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::info;

use crate::store::RuleStore;

use super::keywords::{PERSONAL_KEYWORDS, WORK_KEYWORDS};
use super::repository::RuleStoreError;
use super::types::{FilterListing, FilterStats, Rule, RuleKind};

/// Immutable view of the allow/deny/keyword rules at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    version: u64,
    allow_chats: HashSet<String>,
    deny_chats: HashSet<String>,
    custom_keywords: BTreeSet<String>,
}

impl RuleSet {
    pub fn from_rules(version: u64, rules: &[Rule]) -> Self {
        let mut set = Self {
            version,
            ..Self::default()
        };
        for rule in rules {
            let value = rule.kind.normalize(&rule.value);
            if value.is_empty() {
                continue;
            }
            match rule.kind {
                RuleKind::AllowChat => {
                    set.allow_chats.insert(value);
                }
                RuleKind::DenyChat => {
                    set.deny_chats.insert(value);
                }
                RuleKind::Keyword => {
                    set.custom_keywords.insert(value);
                }
            }
        }
        set
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// First match wins: allow-list membership, deny-list membership, then a
    /// keyword scan of the title, but only while the allow-list is empty.
    pub fn is_work_chat(&self, chat_id: &str, chat_title: &str) -> bool {
        if !self.allow_chats.is_empty() && self.allow_chats.contains(chat_id) {
            return true;
        }
        if self.deny_chats.contains(chat_id) {
            return false;
        }
        if self.allow_chats.is_empty() {
            let title = chat_title.to_lowercase();
            return !title.is_empty() && self.work_keywords().any(|kw| title.contains(kw));
        }
        false
    }

    /// Work iff strictly more distinct work keywords than personal keywords occur in the text.
    /// Matching is by substring, so "договор" also matches "договоренность".
    pub fn is_work_message(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        let text = text.to_lowercase();
        let work = self.work_keywords().filter(|kw| text.contains(kw)).count();
        let personal = PERSONAL_KEYWORDS
            .iter()
            .filter(|kw| text.contains(*kw))
            .count();
        work > personal
    }

    pub fn stats(&self) -> FilterStats {
        FilterStats {
            allow_chats: self.allow_chats.len(),
            deny_chats: self.deny_chats.len(),
            custom_keywords: self.custom_keywords.len(),
            work_keywords: WORK_KEYWORDS.len(),
            personal_keywords: PERSONAL_KEYWORDS.len(),
        }
    }

    /// Built-in and custom work keywords as one set.
    fn work_keywords(&self) -> impl Iterator<Item = &str> {
        WORK_KEYWORDS.iter().copied().chain(
            self.custom_keywords
                .iter()
                .map(String::as_str)
                .filter(|kw| !WORK_KEYWORDS.contains(kw)),
        )
    }
}

/// Shared classifier whose rule set is swapped wholesale after every mutation.
pub struct Classifier {
    store: Arc<dyn RuleStore>,
    current: RwLock<Arc<RuleSet>>,
    mutation: Mutex<()>,
}

impl Classifier {
    pub async fn load(store: Arc<dyn RuleStore>) -> Result<Self, RuleStoreError> {
        let rules = store.list_rules(None).await?;
        let set = RuleSet::from_rules(1, &rules);
        log_loaded(&set);
        Ok(Self {
            store,
            current: RwLock::new(Arc::new(set)),
            mutation: Mutex::new(()),
        })
    }

    /// Current rule set. Callers classifying a batch should hold on to one snapshot.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_work_chat(&self, chat_id: &str, chat_title: &str) -> bool {
        self.snapshot().is_work_chat(chat_id, chat_title)
    }

    pub fn is_work_message(&self, text: &str) -> bool {
        self.snapshot().is_work_message(text)
    }

    pub async fn add_allow_chat(&self, chat_id: &str) -> Result<Rule, RuleStoreError> {
        self.add_rule(RuleKind::AllowChat, chat_id).await
    }

    pub async fn add_deny_chat(&self, chat_id: &str) -> Result<Rule, RuleStoreError> {
        self.add_rule(RuleKind::DenyChat, chat_id).await
    }

    pub async fn add_keyword(&self, keyword: &str) -> Result<Rule, RuleStoreError> {
        self.add_rule(RuleKind::Keyword, keyword).await
    }

    /// Writes the rule through to the store, then rebuilds the in-memory set from it.
    pub async fn add_rule(&self, kind: RuleKind, value: &str) -> Result<Rule, RuleStoreError> {
        let _guard = self.mutation.lock().await;
        let rule = self.store.upsert_rule(kind, value).await?;
        self.reload_locked().await?;
        Ok(rule)
    }

    pub async fn remove_rule(&self, kind: RuleKind, value: &str) -> Result<bool, RuleStoreError> {
        let _guard = self.mutation.lock().await;
        let removed = self.store.remove_rule(kind, value).await?;
        self.reload_locked().await?;
        Ok(removed)
    }

    pub async fn reload(&self) -> Result<Arc<RuleSet>, RuleStoreError> {
        let _guard = self.mutation.lock().await;
        self.reload_locked().await
    }

    pub async fn list_filters(&self) -> Result<FilterListing, RuleStoreError> {
        let rules = self.store.list_rules(None).await?;
        Ok(FilterListing::from_rules(&rules))
    }

    pub fn filter_stats(&self) -> FilterStats {
        self.snapshot().stats()
    }

    async fn reload_locked(&self) -> Result<Arc<RuleSet>, RuleStoreError> {
        let rules = self.store.list_rules(None).await?;
        let version = self.snapshot().version + 1;
        let set = Arc::new(RuleSet::from_rules(version, &rules));
        log_loaded(&set);

        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = set.clone();
        Ok(set)
    }
}

fn log_loaded(set: &RuleSet) {
    info!(
        version = set.version,
        allow = set.allow_chats.len(),
        deny = set.deny_chats.len(),
        keywords = set.custom_keywords.len(),
        "loaded chat filters"
    );
}
