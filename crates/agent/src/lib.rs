//! Conversational orchestration for restaurant review scoring.
//!
//! A run chains four bounded two-party stages. Each stage starts from a fixed
//! hand-off message plus the previous stage's summary, and only that summary
//! survives it:
//!
//! 1. **Retrieval** (`review_retrieval`) - extract the restaurant name and
//!    fetch its reviews through `fetch_restaurant_data`
//! 2. **Analysis** (`review_analysis`) - score every review from its keywords
//! 3. **Aggregation** (`score_aggregation`) - reduce the scores through
//!    `calculate_overall_score`
//! 4. **Report** (`final_report`) - answer with the overall score
//!
//! # Key Types
//!
//! - `Pipeline` - runs the stages in order (see `pipeline` module)
//! - `Stage` - one bounded exchange with termination rules
//! - `LlmClient` - pluggable completion engine behind every participant
//!
//! The language model only reads and writes text. Lookups and arithmetic are
//! done by the deterministic tools in `savor-core`.

pub mod boundary;
pub mod llm;
pub mod participant;
pub mod pipeline;
pub mod prompts;
pub mod stage;
pub mod tools;
pub mod transcript;

pub use llm::{LlmClient, OpenAiCompatibleClient};
pub use participant::{LlmParticipant, Participant, Reply};
pub use pipeline::{Pipeline, PipelineError, PipelineRun, Roster};
pub use stage::{Stage, StageContract, StageError, StageOutcome, StageState, TerminationPolicy};
pub use tools::{Tool, ToolError, ToolRegistry};
pub use transcript::{Side, Transcript, Turn};
