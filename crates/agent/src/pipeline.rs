use std::sync::Arc;

use savor_core::config::AppConfig;
use savor_core::reviews::ReviewStore;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::boundary::{self, Expectation, Finding};
use crate::llm::LlmClient;
use crate::participant::{LlmParticipant, Participant};
use crate::prompts;
use crate::stage::{Stage, StageContract, StageError, StageOutcome, TerminationPolicy};
use crate::tools::{
    CalculateOverallScoreTool, FetchRestaurantDataTool, ToolRegistry, CALCULATE_OVERALL_SCORE,
    FETCH_RESTAURANT_DATA,
};

pub const SUPERVISOR: &str = "supervisor";
pub const REVIEW_RETRIEVAL: &str = "review_retrieval";
pub const REVIEW_ANALYSIS: &str = "review_analysis";
pub const SCORE_AGGREGATION: &str = "score_aggregation";
pub const FINAL_REPORT: &str = "final_report";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageRole {
    Retrieval,
    Analysis,
    Aggregation,
    Report,
}

/// How a stage's first message is built from its seed text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opening {
    /// The user's query followed by a fixed instruction.
    Query { suffix: &'static str },
    /// A fixed hand-off message with the previous summary attached as context.
    Handoff { text: &'static str },
}

impl Opening {
    pub fn initial_message(&self, seed: &str) -> String {
        match self {
            Self::Query { suffix } => format!("{seed}. {suffix}"),
            Self::Handoff { text } => format!("{text}{}{seed}", prompts::CONTEXT_HEADER),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StagePlan {
    pub contract: StageContract,
    pub role: StageRole,
    pub opening: Opening,
    pub expectation: Expectation,
}

pub fn standard_plan() -> Vec<StagePlan> {
    vec![
        StagePlan {
            contract: StageContract {
                name: REVIEW_RETRIEVAL,
                role_instructions: prompts::retrieval_instructions(),
                bound_tools: vec![FETCH_RESTAURANT_DATA],
                max_turns: 2,
                max_consecutive_auto_replies: None,
                termination_policy: TerminationPolicy::default(),
            },
            role: StageRole::Retrieval,
            opening: Opening::Query { suffix: prompts::QUERY_SUFFIX },
            expectation: Expectation::ReviewList,
        },
        StagePlan {
            contract: StageContract {
                name: REVIEW_ANALYSIS,
                role_instructions: prompts::analysis_instructions(),
                bound_tools: Vec::new(),
                max_turns: 1,
                max_consecutive_auto_replies: None,
                termination_policy: TerminationPolicy::default(),
            },
            role: StageRole::Analysis,
            opening: Opening::Handoff { text: prompts::ANALYSIS_HANDOFF },
            expectation: Expectation::ScoreLines,
        },
        StagePlan {
            contract: StageContract {
                name: SCORE_AGGREGATION,
                role_instructions: prompts::aggregation_instructions(),
                bound_tools: vec![CALCULATE_OVERALL_SCORE],
                max_turns: 4,
                max_consecutive_auto_replies: Some(1),
                termination_policy: TerminationPolicy::default(),
            },
            role: StageRole::Aggregation,
            opening: Opening::Handoff { text: prompts::AGGREGATION_HANDOFF },
            expectation: Expectation::CompositeScore,
        },
        StagePlan {
            contract: StageContract {
                name: FINAL_REPORT,
                role_instructions: prompts::supervisor_instructions(),
                bound_tools: Vec::new(),
                max_turns: 1,
                max_consecutive_auto_replies: None,
                termination_policy: TerminationPolicy::default(),
            },
            role: StageRole::Report,
            opening: Opening::Handoff { text: prompts::REPORT_HANDOFF },
            expectation: Expectation::NumericAnswer,
        },
    ]
}

/// The participants of a run. The supervisor initiates every stage and is
/// also the recipient of the final report.
#[derive(Clone)]
pub struct Roster {
    pub supervisor: Arc<dyn Participant>,
    pub retrieval: Arc<dyn Participant>,
    pub analysis: Arc<dyn Participant>,
    pub aggregation: Arc<dyn Participant>,
}

impl Roster {
    pub fn with_llm(client: Arc<dyn LlmClient>) -> Self {
        let participant = |name: &str, instructions: String| -> Arc<dyn Participant> {
            Arc::new(LlmParticipant::new(name, instructions, client.clone()))
        };

        Self {
            supervisor: participant(SUPERVISOR, prompts::supervisor_instructions()),
            retrieval: participant(REVIEW_RETRIEVAL, prompts::retrieval_instructions()),
            analysis: participant(REVIEW_ANALYSIS, prompts::analysis_instructions()),
            aggregation: participant(SCORE_AGGREGATION, prompts::aggregation_instructions()),
        }
    }

    fn recipient(&self, role: StageRole) -> &dyn Participant {
        match role {
            StageRole::Retrieval => self.retrieval.as_ref(),
            StageRole::Analysis => self.analysis.as_ref(),
            StageRole::Aggregation => self.aggregation.as_ref(),
            StageRole::Report => self.supervisor.as_ref(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("pipeline has no stage at position {0}")]
    UnknownStage(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub outcomes: Vec<StageOutcome>,
    pub answer: String,
}

/// Runs the stages in order. Only each stage's summary reaches the next one.
pub struct Pipeline {
    roster: Roster,
    tools: ToolRegistry,
    plan: Vec<StagePlan>,
}

impl Pipeline {
    pub fn new(roster: Roster, store: ReviewStore) -> Self {
        let mut tools = ToolRegistry::default();
        tools.register(FetchRestaurantDataTool::new(store));
        tools.register(CalculateOverallScoreTool);

        Self { roster, tools, plan: standard_plan() }
    }

    pub fn from_config(config: &AppConfig, client: Arc<dyn LlmClient>) -> Self {
        Self::new(Roster::with_llm(client), ReviewStore::open(config.store.path.clone()))
    }

    /// The final stage's summary, verbatim.
    pub async fn run(&self, user_query: &str) -> Result<String, PipelineError> {
        Ok(self.run_detailed(user_query).await?.answer)
    }

    pub async fn run_detailed(&self, user_query: &str) -> Result<PipelineRun, PipelineError> {
        let run_id = Uuid::new_v4();
        let correlation_id = run_id.to_string();
        info!(
            event_name = "pipeline.run.started",
            correlation_id = %correlation_id,
            stages = self.plan.len(),
            "starting review scoring pipeline"
        );

        let mut seed = user_query.to_string();
        let mut outcomes = Vec::with_capacity(self.plan.len());
        for position in 0..self.plan.len() {
            let outcome = match self.execute(position, &seed, &correlation_id).await {
                Ok(outcome) => outcome,
                Err(failure) => {
                    error!(
                        event_name = "pipeline.run.failed",
                        correlation_id = %correlation_id,
                        position,
                        error = %failure,
                        "pipeline run aborted"
                    );
                    return Err(failure);
                }
            };
            seed = outcome.summary.clone();
            outcomes.push(outcome);
        }

        info!(
            event_name = "pipeline.run.completed",
            correlation_id = %correlation_id,
            "review scoring pipeline completed"
        );
        Ok(PipelineRun { run_id, outcomes, answer: seed })
    }

    /// Runs one stage in isolation from `seed`: the user query for the first
    /// stage, the previous stage's summary for the others.
    pub async fn run_stage(&self, position: usize, seed: &str) -> Result<StageOutcome, PipelineError> {
        self.execute(position, seed, "replay").await
    }

    async fn execute(
        &self,
        position: usize,
        seed: &str,
        correlation_id: &str,
    ) -> Result<StageOutcome, PipelineError> {
        let plan = self.plan.get(position).ok_or(PipelineError::UnknownStage(position))?;
        let contract = &plan.contract;
        let tools = self.tools.bound(&contract.bound_tools);

        let mut stage = Stage::new(
            contract,
            self.roster.supervisor.as_ref(),
            self.roster.recipient(plan.role),
            tools,
        );
        let outcome = stage.run(&plan.opening.initial_message(seed)).await?;

        info!(
            event_name = "pipeline.stage.completed",
            correlation_id,
            stage = outcome.stage,
            state = outcome.state.as_str(),
            turns = outcome.turns,
            "stage completed"
        );
        log_boundary(correlation_id, &outcome, plan.expectation);

        Ok(outcome)
    }
}

fn log_boundary(correlation_id: &str, outcome: &StageOutcome, expectation: Expectation) {
    match boundary::inspect(expectation, &outcome.summary) {
        Finding::Missing { expectation } => warn!(
            event_name = "pipeline.boundary.unexpected_summary",
            correlation_id,
            stage = outcome.stage,
            expected = expectation.as_str(),
            "stage summary is missing its expected structure"
        ),
        finding => debug!(
            event_name = "pipeline.boundary.checked",
            correlation_id,
            stage = outcome.stage,
            finding = ?finding,
            "stage summary has expected structure"
        ),
    }
}
