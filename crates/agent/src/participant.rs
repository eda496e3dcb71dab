use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::llm::{ChatMessage, CompletionRequest, LlmClient, ToolCall, ToolSpec};
use crate::transcript::{Side, Transcript};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), tool_calls: Vec::new() }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self { text: String::new(), tool_calls: vec![call] }
    }

    /// Nothing said and nothing requested.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// A party in a conversational stage. `side` tells the participant which of
/// the transcript's turns are its own.
#[async_trait]
pub trait Participant: Send + Sync {
    fn name(&self) -> &str;
    async fn reply(&self, transcript: &Transcript, side: Side, tools: &[ToolSpec])
        -> Result<Reply>;
}

/// Participant backed by a text-completion engine and fixed role instructions.
pub struct LlmParticipant {
    name: String,
    instructions: String,
    client: Arc<dyn LlmClient>,
}

impl LlmParticipant {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        client: Arc<dyn LlmClient>,
    ) -> Self {
        Self { name: name.into(), instructions: instructions.into(), client }
    }
}

#[async_trait]
impl Participant for LlmParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reply(
        &self,
        transcript: &Transcript,
        side: Side,
        tools: &[ToolSpec],
    ) -> Result<Reply> {
        let request = CompletionRequest {
            messages: build_messages(&self.instructions, transcript, side),
            tools: tools.to_vec(),
        };
        let completion = self.client.complete(&request).await?;

        Ok(Reply { text: completion.content.unwrap_or_default(), tool_calls: completion.tool_calls })
    }
}

/// Maps a transcript onto chat messages from `side`'s point of view.
///
/// Tool results become `tool` messages only when they answer calls this side
/// issued in the preceding turn; otherwise they read as plain user text.
pub fn build_messages(instructions: &str, transcript: &Transcript, side: Side) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(instructions)];
    let mut awaiting_results = false;

    for turn in transcript.turns() {
        if turn.side == side {
            messages.push(ChatMessage::assistant(turn.text.clone(), turn.tool_calls.clone()));
            awaiting_results = turn.requests_tools();
            continue;
        }

        if awaiting_results && !turn.tool_results.is_empty() {
            messages.extend(
                turn.tool_results
                    .iter()
                    .map(|result| ChatMessage::tool(result.call_id.clone(), result.content.clone())),
            );
        } else {
            messages.push(ChatMessage::user(turn.rendered_text()));
        }
        awaiting_results = false;
    }

    messages
}
