use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::sanitize::sanitize;

/// Separator between the restaurant name and the review text on a store line.
pub const RECORD_SEPARATOR: char = '.';

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewRecord {
    pub restaurant_name: String,
    pub review_text: String,
}

impl ReviewRecord {
    /// Splits a store line on its first separator. Both fields are trimmed.
    pub fn parse(line: &str, line_number: usize) -> Result<Self, ReviewStoreError> {
        let (name, review) = line.split_once(RECORD_SEPARATOR).ok_or_else(|| {
            ReviewStoreError::MalformedRecord { line_number, line: line.to_string() }
        })?;

        Ok(Self { restaurant_name: name.trim().to_string(), review_text: review.trim().to_string() })
    }
}

#[derive(Debug, Error)]
pub enum ReviewStoreError {
    #[error("could not read review store `{path}`: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("malformed review record on line {line_number}: missing `.` separator in `{line}`")]
    MalformedRecord { line_number: usize, line: String },
}

/// Reviews found for one lookup, keyed by the name exactly as it was asked for.
///
/// Serializes as a single-entry mapping: `{"<restaurant_name>": ["...", ...]}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestaurantReviews {
    pub restaurant_name: String,
    pub reviews: Vec<String>,
}

impl Serialize for RestaurantReviews {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.restaurant_name, &self.reviews)?;
        map.end()
    }
}

#[derive(Clone, Debug)]
enum StoreSource {
    File(PathBuf),
    Text(String),
}

/// Read-only, line-oriented review store. Every lookup rescans the source.
#[derive(Clone, Debug)]
pub struct ReviewStore {
    source: StoreSource,
}

impl ReviewStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { source: StoreSource::File(path.into()) }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self { source: StoreSource::Text(text.into()) }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            StoreSource::File(path) => Some(path),
            StoreSource::Text(_) => None,
        }
    }

    /// Returns every review whose restaurant name sanitizes to the same key as
    /// `restaurant_name`, in store order. A line without a separator aborts the
    /// whole lookup.
    pub fn fetch_reviews(
        &self,
        restaurant_name: &str,
    ) -> Result<RestaurantReviews, ReviewStoreError> {
        let wanted = sanitize(restaurant_name);
        let mut reviews = Vec::new();

        let mut visit = |line_number: usize, line: &str| -> Result<(), ReviewStoreError> {
            let record = ReviewRecord::parse(line, line_number)?;
            if sanitize(&record.restaurant_name) == wanted {
                reviews.push(record.review_text);
            }
            Ok(())
        };

        match &self.source {
            StoreSource::File(path) => {
                let read_error =
                    |source: io::Error| ReviewStoreError::Read { path: path.clone(), source };
                let reader = BufReader::new(File::open(path).map_err(read_error)?);
                for (index, line) in reader.lines().enumerate() {
                    let line = line.map_err(read_error)?;
                    visit(index + 1, &line)?;
                }
            }
            StoreSource::Text(text) => {
                for (index, line) in text.lines().enumerate() {
                    visit(index + 1, line)?;
                }
            }
        }

        Ok(RestaurantReviews { restaurant_name: restaurant_name.to_string(), reviews })
    }
}
