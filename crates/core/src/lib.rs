//! Deterministic building blocks for restaurant review scoring.
//!
//! Everything here is pure or read-only: name canonicalization, the review
//! store lookup, the composite score formula, and process configuration.
//! Conversational orchestration lives in `savor-agent`.

pub mod config;
pub mod reviews;
pub mod sanitize;
pub mod scoring;

pub use config::{AppConfig, ConfigError, LoadOptions};
pub use reviews::{RestaurantReviews, ReviewRecord, ReviewStore, ReviewStoreError};
pub use sanitize::sanitize;
pub use scoring::{calculate_overall_score, CompositeScore, KeywordScale, ScorePair};
