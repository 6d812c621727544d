pub mod classifier;
pub mod keywords;
pub mod repository;
pub mod types;

pub use classifier::{Classifier, RuleSet};
pub use repository::{RuleRepository, RuleStoreError};
pub use types::{FilterListing, FilterStats, Rule, RuleKind};
