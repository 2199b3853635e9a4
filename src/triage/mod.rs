//! Email triage: classification strategies and the polling loop.

pub mod importance;
pub mod orchestrator;
pub mod relevance;
pub mod types;

pub use importance::ImportanceClassifier;
pub use orchestrator::{CycleReport, IntervalTicker, Ticker, TriageLoop};
pub use relevance::KeywordMatcher;
pub use types::{
    Assessment, Category, Classifier, Delivery, Importance, MessageOutcome, Relevance,
    RunSummary, SkipStage, Verdict,
};
