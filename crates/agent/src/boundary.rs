//! Best-effort parsing of the free-text summaries that cross stage boundaries.
//!
//! Nothing here changes a summary. The orchestrator only logs what it finds
//! so a degraded hand-off is visible in the run's log.

use savor_core::scoring::{ScorePair, MAX_SUB_SCORE, MIN_SUB_SCORE};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expectation {
    ReviewList,
    ScoreLines,
    CompositeScore,
    NumericAnswer,
}

impl Expectation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReviewList => "review_list",
            Self::ScoreLines => "score_lines",
            Self::CompositeScore => "composite_score",
            Self::NumericAnswer => "numeric_answer",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Finding {
    Reviews { count: usize },
    ScorePairs(Vec<ScorePair>),
    Score(f64),
    Missing { expectation: Expectation },
}

impl Finding {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }
}

pub fn inspect(expectation: Expectation, summary: &str) -> Finding {
    let found = match expectation {
        Expectation::ReviewList => {
            let count = count_reviews(summary);
            (count > 0).then_some(Finding::Reviews { count })
        }
        Expectation::ScoreLines => {
            let pairs = parse_score_lines(summary);
            (!pairs.is_empty()).then_some(Finding::ScorePairs(pairs))
        }
        Expectation::CompositeScore => parse_composite_score(summary).map(Finding::Score),
        Expectation::NumericAnswer => parse_first_number(summary).map(Finding::Score),
    };
    found.unwrap_or(Finding::Missing { expectation })
}

/// Reviews in a retrieval summary: the list inside a `{name: [...]}` mapping
/// when the summary is JSON, otherwise its non-empty lines.
pub fn count_reviews(summary: &str) -> usize {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(summary.trim()) {
        return map.values().filter_map(Value::as_array).map(Vec::len).sum();
    }
    summary.lines().filter(|line| !line.trim().is_empty()).count()
}

/// Lines shaped like `1. food_score: 4, customer_service_score: 5`.
/// Scores outside 1..=5 are dropped.
pub fn parse_score_lines(summary: &str) -> Vec<ScorePair> {
    summary
        .lines()
        .filter_map(|line| {
            let line = line.to_ascii_lowercase();
            let food_score = score_after(&line, "food_score")?;
            let service_score = score_after(&line, "customer_service_score")
                .or_else(|| score_after(&line, "service_score"))?;
            Some(ScorePair { food_score, service_score })
        })
        .collect()
}

fn score_after(line: &str, label: &str) -> Option<u8> {
    let start = find_label(line, label)? + label.len();
    let digits = line[start..]
        .trim_start_matches(|character: char| {
            character == ':' || character == '=' || character.is_whitespace() || character == '*'
        })
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>();
    let score = digits.parse::<u8>().ok()?;
    (MIN_SUB_SCORE..=MAX_SUB_SCORE).contains(&score).then_some(score)
}

/// Finds `label` as a whole word so `food_score` does not match inside
/// another identifier such as `bad_food_score`.
fn find_label(line: &str, label: &str) -> Option<usize> {
    line.match_indices(label).map(|(index, _)| index).find(|&index| {
        let before = line[..index].chars().next_back();
        !before.is_some_and(|character| character.is_ascii_alphanumeric() || character == '_')
    })
}

/// A `{name: score}` mapping, as produced by the aggregation tool.
pub fn parse_composite_score(summary: &str) -> Option<f64> {
    match serde_json::from_str::<Value>(summary.trim()).ok()? {
        Value::Object(map) if map.len() == 1 => map.values().next()?.as_f64(),
        _ => None,
    }
}

/// First decimal number in free text.
pub fn parse_first_number(summary: &str) -> Option<f64> {
    let mut candidate = String::new();
    for character in summary.chars() {
        if character.is_ascii_digit() || (character == '.' && !candidate.is_empty()) {
            candidate.push(character);
        } else if !candidate.is_empty() {
            break;
        }
    }
    candidate.trim_end_matches('.').parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use savor_core::scoring::ScorePair;

    use super::{
        count_reviews, inspect, parse_composite_score, parse_first_number, parse_score_lines,
        Expectation, Finding,
    };

    #[test]
    fn score_lines_are_parsed_in_order() {
        let summary = "\
1. food_score: 4, customer_service_score: 5
2. food_score: 1, customer_service_score: 2
Some closing remark.";

        assert_eq!(
            parse_score_lines(summary),
            vec![
                ScorePair { food_score: 4, service_score: 5 },
                ScorePair { food_score: 1, service_score: 2 },
            ]
        );
    }

    #[test]
    fn markdown_and_out_of_range_scores_are_tolerated() {
        let summary = "\
1. **food_score**: 3, **customer_service_score**: 4
2. food_score: 9, customer_service_score: 4";

        assert_eq!(parse_score_lines(summary), vec![ScorePair { food_score: 3, service_score: 4 }]);
    }

    #[test]
    fn composite_score_mapping_is_recognized() {
        assert_eq!(parse_composite_score(r#"{"Cafe Luna": 7.23}"#), Some(7.23));
        assert_eq!(parse_composite_score("7.23"), None);
        assert_eq!(parse_composite_score(r#"{"a": 1, "b": 2}"#), None);
    }

    #[test]
    fn first_number_is_extracted_from_prose() {
        assert_eq!(parse_first_number("7.230"), Some(7.23));
        assert_eq!(parse_first_number("The overall score is 8.94."), Some(8.94));
        assert_eq!(parse_first_number("no score"), None);
    }

    #[test]
    fn review_counts_accept_json_and_lines() {
        assert_eq!(count_reviews(r#"{"Subway": ["a", "b"]}"#), 2);
        assert_eq!(count_reviews("first review\n\nsecond review\n"), 2);
        assert_eq!(count_reviews(""), 0);
    }

    #[test]
    fn missing_structure_is_reported() {
        let finding = inspect(Expectation::NumericAnswer, "I don't know");
        assert_eq!(finding, Finding::Missing { expectation: Expectation::NumericAnswer });
        assert!(finding.is_missing());
        assert_eq!(inspect(Expectation::CompositeScore, r#"{"X":10.0}"#), Finding::Score(10.0));
    }
}
