use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

pub const MIN_SUB_SCORE: u8 = 1;
pub const MAX_SUB_SCORE: u8 = 5;
pub const MAX_COMPOSITE_SCORE: f64 = 10.0;

/// Food and service sub-scores extracted from one review.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScorePair {
    pub food_score: u8,
    pub service_score: u8,
}

impl ScorePair {
    /// Splits pairs into the parallel lists the aggregator consumes.
    pub fn unzip(pairs: &[ScorePair]) -> (Vec<i64>, Vec<i64>) {
        pairs
            .iter()
            .map(|pair| (i64::from(pair.food_score), i64::from(pair.service_score)))
            .unzip()
    }
}

/// Final score for a restaurant. Serializes as `{"<restaurant_name>": <score>}`.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeScore {
    pub restaurant_name: String,
    pub score: f64,
}

impl Serialize for CompositeScore {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.restaurant_name, &self.score)?;
        map.end()
    }
}

/// Geometric-mean style composite in `[0, 10]` for sub-scores in `[1, 5]`.
///
/// Only the first `min(len)` pairs are used; the longer list's tail is
/// ignored. Each pair contributes `sqrt(food^2 * service) / (N * sqrt(125)) * 10`
/// and the sum is rounded to two decimals. Empty input scores `0.0`.
/// Out-of-range inputs are not rejected.
pub fn calculate_overall_score(
    restaurant_name: &str,
    food_scores: &[i64],
    service_scores: &[i64],
) -> CompositeScore {
    let pairs = food_scores.len().min(service_scores.len());
    if pairs == 0 {
        return CompositeScore { restaurant_name: restaurant_name.to_string(), score: 0.0 };
    }

    let normalizer = 1.0 / (pairs as f64 * 125f64.sqrt());
    let total: f64 = food_scores
        .iter()
        .zip(service_scores)
        .map(|(&food, &service)| {
            let food = food as f64;
            (food * food * service as f64).sqrt() * normalizer * MAX_COMPOSITE_SCORE
        })
        .sum();

    CompositeScore { restaurant_name: restaurant_name.to_string(), score: round_to_cents(total) }
}

fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

const SCALE: [(u8, [&str; 3]); 5] = [
    (1, ["awful", "horrible", "disgusting"]),
    (2, ["bad", "unpleasant", "offensive"]),
    (3, ["average", "uninspiring", "forgettable"]),
    (4, ["good", "enjoyable", "satisfying"]),
    (5, ["awesome", "incredible", "amazing"]),
];

/// Adjective table reviewers' wording is graded against.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordScale;

impl KeywordScale {
    pub fn score_for(&self, word: &str) -> Option<u8> {
        let word = word.to_ascii_lowercase();
        SCALE
            .iter()
            .find(|(_, adjectives)| adjectives.contains(&word.as_str()))
            .map(|(score, _)| *score)
    }

    /// First graded adjective scores the food, the second the service.
    pub fn score_review(&self, review: &str) -> Option<ScorePair> {
        let mut scores = review
            .split(|character: char| !character.is_ascii_alphabetic())
            .filter(|token| !token.is_empty())
            .filter_map(|token| self.score_for(token));

        let food_score = scores.next()?;
        let service_score = scores.next()?;
        Some(ScorePair { food_score, service_score })
    }

    /// One line per score level, e.g. `Score 1/5: awful, horrible, or disgusting.`
    pub fn describe(&self) -> String {
        SCALE
            .iter()
            .map(|(score, [first, second, third])| {
                format!("Score {score}/{MAX_SUB_SCORE}: {first}, {second}, or {third}.")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
