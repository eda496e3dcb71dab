use crate::llm::ToolCall;

/// Which end of a two-party stage produced a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Initiator,
    Recipient,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub side: Side,
    pub sender: String,
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
}

impl Turn {
    pub fn message(side: Side, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            side,
            sender: sender.into(),
            text: text.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    /// Tool results travel as text; several results are separated by a blank line.
    pub fn tool_results(side: Side, sender: impl Into<String>, results: Vec<ToolResult>) -> Self {
        let text =
            results.iter().map(|result| result.content.as_str()).collect::<Vec<_>>().join("\n\n");
        Self { side, sender: sender.into(), text, tool_calls: Vec::new(), tool_results: results }
    }

    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Text shown to a party that did not issue the turn's tool calls.
    pub fn rendered_text(&self) -> String {
        if !self.text.is_empty() || self.tool_calls.is_empty() {
            return self.text.clone();
        }
        self.tool_calls
            .iter()
            .map(|call| format!("Suggested tool call: {}({})", call.name, call.arguments))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Ordered turns of a single stage. Never outlives the stage that owns it.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn replies_from(&self, side: Side) -> usize {
        self.turns.iter().filter(|turn| turn.side == side).count()
    }
}
