use std::error::Error as StdError;

use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::ToolCall;
use crate::participant::{Participant, Reply};
use crate::tools::{ToolError, ToolRegistry};
use crate::transcript::{Side, ToolResult, Transcript, Turn};

pub const TERMINATION_KEYWORD: &str = "TERMINATE";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageState {
    Idle,
    Active,
    TerminatedNormal,
    TerminatedMaxTurns,
    TerminatedByPolicy,
}

impl StageState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::TerminatedNormal | Self::TerminatedMaxTurns | Self::TerminatedByPolicy
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::TerminatedNormal => "terminated_normal",
            Self::TerminatedMaxTurns => "terminated_max_turns",
            Self::TerminatedByPolicy => "terminated_by_policy",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminationPolicy {
    pub keyword: Option<String>,
    pub stop_on_empty_reply: bool,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self { keyword: Some(TERMINATION_KEYWORD.to_string()), stop_on_empty_reply: true }
    }
}

impl TerminationPolicy {
    pub fn evaluate(&self, turn: &Turn) -> Option<StageState> {
        if let Some(keyword) = &self.keyword {
            if turn.text.contains(keyword.as_str()) {
                return Some(StageState::TerminatedNormal);
            }
        }

        let empty = turn.text.trim().is_empty() && turn.tool_calls.is_empty();
        (self.stop_on_empty_reply && empty).then_some(StageState::TerminatedByPolicy)
    }
}

/// Static description of one stage of the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageContract {
    pub name: &'static str,
    pub role_instructions: String,
    pub bound_tools: Vec<&'static str>,
    pub max_turns: usize,
    pub max_consecutive_auto_replies: Option<usize>,
    pub termination_policy: TerminationPolicy,
}

impl StageContract {
    /// Maximum number of recipient replies, whichever limit binds tighter.
    pub fn reply_budget(&self) -> usize {
        self.max_consecutive_auto_replies
            .map_or(self.max_turns, |limit| limit.min(self.max_turns))
    }
}

/// What escapes a stage: its summary and how it ended. The transcript does not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: &'static str,
    pub state: StageState,
    pub turns: usize,
    pub summary: String,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage `{stage}` failed waiting for `{participant}`: {source}")]
    Completion {
        stage: &'static str,
        participant: String,
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("stage `{stage}` aborted: {source}")]
    Tool { stage: &'static str, source: ToolError },
}

/// One bounded exchange between an initiator and a recipient.
///
/// Each turn is one initiator message followed by one recipient reply. When
/// the recipient requests tool calls the stage runs them and the serialized
/// results become the initiator's next message; otherwise the initiator
/// answers through its own participant.
pub struct Stage<'a> {
    contract: &'a StageContract,
    initiator: &'a dyn Participant,
    recipient: &'a dyn Participant,
    tools: ToolRegistry,
    state: StageState,
}

impl<'a> Stage<'a> {
    pub fn new(
        contract: &'a StageContract,
        initiator: &'a dyn Participant,
        recipient: &'a dyn Participant,
        tools: ToolRegistry,
    ) -> Self {
        Self { contract, initiator, recipient, tools, state: StageState::Idle }
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub async fn run(&mut self, initial_message: &str) -> Result<StageOutcome, StageError> {
        let contract = self.contract;
        let specs = self.tools.specs();
        let reply_budget = contract.reply_budget();
        let mut transcript = Transcript::default();
        let mut turns = 0;

        self.state = StageState::Active;
        transcript.push(Turn::message(Side::Initiator, self.initiator.name(), initial_message));

        while !self.state.is_terminal() {
            if turns >= contract.max_turns || transcript.replies_from(Side::Recipient) >= reply_budget
            {
                self.state = StageState::TerminatedMaxTurns;
                break;
            }

            let reply = self
                .recipient
                .reply(&transcript, Side::Recipient, &specs)
                .await
                .map_err(|error| self.completion_error(self.recipient, error))?;
            turns += 1;
            let turn = into_turn(Side::Recipient, self.recipient.name(), reply);
            let requested = turn.tool_calls.clone();
            transcript.push(turn);
            if self.settle(&transcript) {
                break;
            }
            if turns >= contract.max_turns {
                self.state = StageState::TerminatedMaxTurns;
                break;
            }

            let answer = if requested.is_empty() {
                let reply = self
                    .initiator
                    .reply(&transcript, Side::Initiator, &[])
                    .await
                    .map_err(|error| self.completion_error(self.initiator, error))?;
                into_turn(Side::Initiator, self.initiator.name(), reply)
            } else {
                let mut results = Vec::with_capacity(requested.len());
                for call in &requested {
                    results.push(self.invoke(call).await?);
                }
                Turn::tool_results(Side::Initiator, self.initiator.name(), results)
            };
            transcript.push(answer);
            self.settle(&transcript);
        }

        let summary = transcript.last().map(|turn| turn.text.clone()).unwrap_or_default();
        debug!(
            event_name = "pipeline.stage.transcript_closed",
            stage = contract.name,
            transcript_turns = transcript.len(),
            "stage transcript discarded"
        );

        Ok(StageOutcome { stage: contract.name, state: self.state, turns, summary })
    }

    /// Applies the termination policy to the latest turn; true once terminal.
    fn settle(&mut self, transcript: &Transcript) -> bool {
        if let Some(state) =
            transcript.last().and_then(|turn| self.contract.termination_policy.evaluate(turn))
        {
            self.state = state;
        }
        self.state.is_terminal()
    }

    async fn invoke(&self, call: &ToolCall) -> Result<ToolResult, StageError> {
        let content = match self.tools.execute(call).await {
            Ok(value) => value.to_string(),
            Err(error) if error.is_fatal() => {
                return Err(StageError::Tool { stage: self.contract.name, source: error });
            }
            Err(error) => {
                warn!(
                    event_name = "pipeline.stage.tool_rejected",
                    stage = self.contract.name,
                    tool = %call.name,
                    error = %error,
                    "tool call rejected; reporting back into the conversation"
                );
                format!("Error: {error}")
            }
        };

        Ok(ToolResult { call_id: call.id.clone(), content })
    }

    fn completion_error(&self, participant: &dyn Participant, error: anyhow::Error) -> StageError {
        StageError::Completion {
            stage: self.contract.name,
            participant: participant.name().to_string(),
            source: error.into(),
        }
    }
}

fn into_turn(side: Side, sender: &str, reply: Reply) -> Turn {
    Turn {
        side,
        sender: sender.to_string(),
        text: reply.text,
        tool_calls: reply.tool_calls,
        tool_results: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use savor_core::reviews::ReviewStore;

    use super::{Stage, StageContract, StageError, StageState, TerminationPolicy};
    use crate::llm::{ToolCall, ToolSpec};
    use crate::participant::{Participant, Reply};
    use crate::tools::{
        CalculateOverallScoreTool, FetchRestaurantDataTool, ToolRegistry, CALCULATE_OVERALL_SCORE,
        FETCH_RESTAURANT_DATA,
    };
    use crate::transcript::{Side, Transcript};

    /// Replays canned replies and records how many turns it could see.
    struct Scripted {
        name: &'static str,
        replies: Mutex<VecDeque<Result<Reply>>>,
        seen: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(name: &'static str, replies: Vec<Result<Reply>>) -> Self {
            Self { name, replies: Mutex::new(replies.into()), seen: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> usize {
            self.seen.lock().expect("lock").len()
        }
    }

    #[async_trait]
    impl Participant for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn reply(
            &self,
            transcript: &Transcript,
            _side: Side,
            _tools: &[ToolSpec],
        ) -> Result<Reply> {
            self.seen.lock().expect("lock").push(transcript.len());
            self.replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Ok(Reply::text("nothing scripted")))
        }
    }

    fn contract(max_turns: usize, auto: Option<usize>, tools: Vec<&'static str>) -> StageContract {
        StageContract {
            name: "test_stage",
            role_instructions: "test".to_string(),
            bound_tools: tools,
            max_turns,
            max_consecutive_auto_replies: auto,
            termination_policy: TerminationPolicy::default(),
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::default();
        registry.register(FetchRestaurantDataTool::new(ReviewStore::from_text(
            "Subway. Good food, awesome service.\n",
        )));
        registry.register(CalculateOverallScoreTool);
        registry
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall { id: "call_1".to_string(), name: name.to_string(), arguments: arguments.to_string() }
    }

    #[tokio::test]
    async fn single_turn_summary_is_the_recipient_reply() {
        let contract = contract(1, None, Vec::new());
        let initiator = Scripted::new("supervisor", Vec::new());
        let recipient = Scripted::new("analyst", vec![Ok(Reply::text("1. food_score: 4"))]);

        let mut stage = Stage::new(&contract, &initiator, &recipient, ToolRegistry::default());
        assert_eq!(stage.state(), StageState::Idle);
        let outcome = stage.run("These are the reviews").await.expect("stage");

        assert_eq!(outcome.state, StageState::TerminatedMaxTurns);
        assert_eq!(stage.state(), StageState::TerminatedMaxTurns);
        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.summary, "1. food_score: 4");
        assert_eq!(initiator.calls(), 0);
    }

    #[tokio::test]
    async fn tool_round_trip_feeds_results_back_to_recipient() {
        let contract = contract(2, None, vec![FETCH_RESTAURANT_DATA]);
        let initiator = Scripted::new("supervisor", Vec::new());
        let recipient = Scripted::new(
            "retrieval",
            vec![
                Ok(Reply::tool_call(call(FETCH_RESTAURANT_DATA, r#"{"restaurant_name":"subway"}"#))),
                Ok(Reply::text("Good food, awesome service.")),
            ],
        );

        let tools = registry().bound(&contract.bound_tools);
        let mut stage = Stage::new(&contract, &initiator, &recipient, tools);
        let outcome = stage.run("How good is Subway?").await.expect("stage");

        assert_eq!(outcome.turns, 2);
        assert_eq!(outcome.summary, "Good food, awesome service.");
        assert_eq!(*recipient.seen.lock().expect("lock"), vec![1, 3]);
        assert_eq!(initiator.calls(), 0, "tool results stand in for the initiator's reply");
    }

    #[tokio::test]
    async fn auto_reply_limit_ends_on_tool_result() {
        let contract = contract(4, Some(1), vec![CALCULATE_OVERALL_SCORE]);
        let initiator = Scripted::new("supervisor", Vec::new());
        let recipient = Scripted::new(
            "aggregator",
            vec![Ok(Reply::tool_call(call(
                CALCULATE_OVERALL_SCORE,
                r#"{"restaurant_name":"Subway","food_scores":[4],"customer_service_scores":[5]}"#,
            )))],
        );

        let tools = registry().bound(&contract.bound_tools);
        let mut stage = Stage::new(&contract, &initiator, &recipient, tools);
        let outcome = stage.run("score these").await.expect("stage");

        assert_eq!(outcome.state, StageState::TerminatedMaxTurns);
        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.summary, r#"{"Subway":8.0}"#);
        assert_eq!(recipient.calls(), 1);
    }

    #[tokio::test]
    async fn termination_keyword_ends_stage_normally() {
        let contract = contract(4, None, Vec::new());
        let initiator = Scripted::new("supervisor", vec![Ok(Reply::text("go on"))]);
        let recipient = Scripted::new(
            "analyst",
            vec![Ok(Reply::text("thinking")), Ok(Reply::text("Score is 7.5. TERMINATE"))],
        );

        let mut stage = Stage::new(&contract, &initiator, &recipient, ToolRegistry::default());
        let outcome = stage.run("score").await.expect("stage");

        assert_eq!(outcome.state, StageState::TerminatedNormal);
        assert_eq!(outcome.turns, 2);
        assert_eq!(outcome.summary, "Score is 7.5. TERMINATE");
        assert_eq!(initiator.calls(), 1);
    }

    #[tokio::test]
    async fn empty_reply_ends_stage_by_policy() {
        let contract = contract(3, None, Vec::new());
        let initiator = Scripted::new("supervisor", Vec::new());
        let recipient = Scripted::new("analyst", vec![Ok(Reply::text(""))]);

        let mut stage = Stage::new(&contract, &initiator, &recipient, ToolRegistry::default());
        let outcome = stage.run("anything?").await.expect("stage");

        assert_eq!(outcome.state, StageState::TerminatedByPolicy);
        assert_eq!(outcome.summary, "");
    }

    #[tokio::test]
    async fn malformed_tool_arguments_degrade_instead_of_failing() {
        let contract = contract(2, None, vec![CALCULATE_OVERALL_SCORE]);
        let initiator = Scripted::new("supervisor", Vec::new());
        let recipient = Scripted::new(
            "aggregator",
            vec![
                Ok(Reply::tool_call(call(CALCULATE_OVERALL_SCORE, "{not json"))),
                Ok(Reply::text("I could not compute the score.")),
            ],
        );

        let tools = registry().bound(&contract.bound_tools);
        let mut stage = Stage::new(&contract, &initiator, &recipient, tools);
        let outcome = stage.run("score these").await.expect("degraded, not failed");

        assert_eq!(outcome.state, StageState::TerminatedMaxTurns);
        assert_eq!(outcome.turns, 2);
        assert_eq!(outcome.summary, "I could not compute the score.");
    }

    #[tokio::test]
    async fn unbound_tool_is_reported_as_error_text() {
        let contract = contract(4, Some(1), Vec::new());
        let initiator = Scripted::new("supervisor", Vec::new());
        let recipient = Scripted::new(
            "analyst",
            vec![Ok(Reply::tool_call(call(FETCH_RESTAURANT_DATA, r#"{"restaurant_name":"x"}"#)))],
        );

        let tools = registry().bound(&contract.bound_tools);
        let mut stage = Stage::new(&contract, &initiator, &recipient, tools);
        let outcome = stage.run("reviews").await.expect("stage");

        assert!(outcome.summary.starts_with("Error: unknown tool `fetch_restaurant_data`"));
    }

    #[tokio::test]
    async fn fatal_tool_error_aborts_stage() {
        let contract = contract(2, None, vec![FETCH_RESTAURANT_DATA]);
        let mut registry = ToolRegistry::default();
        registry.register(FetchRestaurantDataTool::new(ReviewStore::from_text("no separator\n")));
        let initiator = Scripted::new("supervisor", Vec::new());
        let recipient = Scripted::new(
            "retrieval",
            vec![Ok(Reply::tool_call(call(FETCH_RESTAURANT_DATA, r#"{"restaurant_name":"x"}"#)))],
        );

        let mut stage = Stage::new(&contract, &initiator, &recipient, registry);
        let error = stage.run("How good is x?").await.expect_err("fatal");

        assert!(matches!(error, StageError::Tool { stage: "test_stage", .. }));
    }

    #[tokio::test]
    async fn completion_failure_is_fatal() {
        let contract = contract(2, None, Vec::new());
        let initiator = Scripted::new("supervisor", Vec::new());
        let recipient = Scripted::new("analyst", vec![Err(anyhow!("connection reset"))]);

        let mut stage = Stage::new(&contract, &initiator, &recipient, ToolRegistry::default());
        let error = stage.run("hello").await.expect_err("fatal");

        assert!(matches!(
            error,
            StageError::Completion { ref participant, .. } if participant == "analyst"
        ));
        assert!(error.to_string().contains("connection reset"));
    }

    #[test]
    fn reply_budget_takes_the_tighter_limit() {
        assert_eq!(contract(4, Some(1), Vec::new()).reply_budget(), 1);
        assert_eq!(contract(2, Some(5), Vec::new()).reply_budget(), 2);
        assert_eq!(contract(3, None, Vec::new()).reply_budget(), 3);
    }
}
