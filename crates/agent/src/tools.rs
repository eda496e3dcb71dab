use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use savor_core::reviews::ReviewStore;
use savor_core::scoring::calculate_overall_score;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::llm::{ToolCall, ToolSpec};

pub const FETCH_RESTAURANT_DATA: &str = "fetch_restaurant_data";
pub const CALCULATE_OVERALL_SCORE: &str = "calculate_overall_score";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("invalid arguments for `{tool}`: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("tool `{tool}` failed: {source}")]
    Fatal { tool: String, source: Box<dyn StdError + Send + Sync> },
}

impl ToolError {
    /// Fatal errors abort the stage; the rest are reported back into the
    /// conversation as text.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn spec(&self) -> ToolSpec;
    async fn execute(&self, input: Value) -> Result<Value, ToolError>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// A registry holding only the named tools; unknown names are skipped.
    pub fn bound(&self, names: &[&str]) -> ToolRegistry {
        let tools = names
            .iter()
            .filter_map(|name| self.tools.get(*name).map(|tool| (name.to_string(), tool.clone())))
            .collect();
        ToolRegistry { tools }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn execute(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let tool =
            self.tools.get(&call.name).ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        let raw = if call.arguments.trim().is_empty() { "{}" } else { call.arguments.as_str() };
        let input = serde_json::from_str::<Value>(raw).map_err(|error| {
            ToolError::InvalidArguments { tool: call.name.clone(), message: error.to_string() }
        })?;

        tool.execute(input).await
    }
}

fn parse_arguments<T>(tool: &str, input: Value) -> Result<T, ToolError>
where
    T: DeserializeOwned,
{
    serde_json::from_value(input).map_err(|error| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: error.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct FetchArguments {
    restaurant_name: String,
}

/// Looks up every review for a restaurant in the review store.
pub struct FetchRestaurantDataTool {
    store: ReviewStore,
}

impl FetchRestaurantDataTool {
    pub fn new(store: ReviewStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for FetchRestaurantDataTool {
    fn name(&self) -> &'static str {
        FETCH_RESTAURANT_DATA
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: FETCH_RESTAURANT_DATA.to_string(),
            description: "Fetches the reviews for a specific restaurant.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "restaurant_name": {
                        "type": "string",
                        "description": "Restaurant name as written in the user's query."
                    }
                },
                "required": ["restaurant_name"]
            }),
        }
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let arguments: FetchArguments = parse_arguments(FETCH_RESTAURANT_DATA, input)?;
        let reviews = self.store.fetch_reviews(&arguments.restaurant_name).map_err(|error| {
            ToolError::Fatal { tool: FETCH_RESTAURANT_DATA.to_string(), source: Box::new(error) }
        })?;

        serde_json::to_value(reviews).map_err(|error| ToolError::Fatal {
            tool: FETCH_RESTAURANT_DATA.to_string(),
            source: Box::new(error),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ScoreArguments {
    restaurant_name: String,
    food_scores: Vec<i64>,
    customer_service_scores: Vec<i64>,
}

/// Deterministic composite score over parallel food/service score lists.
#[derive(Clone, Copy, Debug, Default)]
pub struct CalculateOverallScoreTool;

#[async_trait]
impl Tool for CalculateOverallScoreTool {
    fn name(&self) -> &'static str {
        CALCULATE_OVERALL_SCORE
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: CALCULATE_OVERALL_SCORE.to_string(),
            description: "Calculates the overall score for a restaurant from a list of food \
                          scores and a list of customer service scores (each 1-5)."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "restaurant_name": { "type": "string" },
                    "food_scores": {
                        "type": "array",
                        "items": { "type": "integer" }
                    },
                    "customer_service_scores": {
                        "type": "array",
                        "items": { "type": "integer" }
                    }
                },
                "required": ["restaurant_name", "food_scores", "customer_service_scores"]
            }),
        }
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let arguments: ScoreArguments = parse_arguments(CALCULATE_OVERALL_SCORE, input)?;
        let score = calculate_overall_score(
            &arguments.restaurant_name,
            &arguments.food_scores,
            &arguments.customer_service_scores,
        );

        serde_json::to_value(score).map_err(|error| ToolError::Fatal {
            tool: CALCULATE_OVERALL_SCORE.to_string(),
            source: Box::new(error),
        })
    }
}
