//! Aggregation pipelines
//!
//! Pipelines arrive as a JSON array of single-key stage objects. The
//! primary store runs them natively; in failover mode only `$match`,
//! `$sort`, `$skip` and `$limit` are honoured and every other stage is
//! dropped. A leading run of them in canonical order becomes one indexed
//! query; the remainder runs in sequence over its result.

use safemode_common::{Document, Error, Filter, QueryOptions, Result, SortSpec};
use serde_json::Value;

/// One pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Sort(SortSpec),
    Skip(usize),
    Limit(usize),
    /// Any stage the failover path does not understand, kept verbatim
    Other(Value),
}

impl Stage {
    /// Parse a single stage object such as `{"$limit": 10}`
    pub fn from_value(value: &Value) -> Result<Self> {
        let Some((op, arg)) = value.as_object().and_then(|o| o.iter().next()) else {
            return Err(Error::Serialization(format!("invalid pipeline stage: {value}")));
        };
        let stage = match op.as_str() {
            "$match" => {
                let filter = arg
                    .as_object()
                    .cloned()
                    .ok_or_else(|| Error::Serialization("$match expects an object".to_string()))?;
                Self::Match(Filter::from(filter))
            }
            "$sort" => {
                // single-field sort: the first key wins
                let (field, dir) = arg
                    .as_object()
                    .and_then(|o| o.iter().next())
                    .ok_or_else(|| Error::Serialization("$sort expects a field".to_string()))?;
                if dir.as_i64() == Some(-1) {
                    Self::Sort(SortSpec::desc(field))
                } else {
                    Self::Sort(SortSpec::asc(field))
                }
            }
            "$skip" => Self::Skip(count_arg(op, arg)?),
            "$limit" => Self::Limit(count_arg(op, arg)?),
            _ => Self::Other(value.clone()),
        };
        Ok(stage)
    }
}

fn count_arg(op: &str, arg: &Value) -> Result<usize> {
    arg.as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| Error::Serialization(format!("{op} expects a non-negative integer")))
}

/// Parse a pipeline array
pub fn parse_pipeline(value: &Value) -> Result<Vec<Stage>> {
    value
        .as_array()
        .ok_or_else(|| Error::Serialization("pipeline must be an array".to_string()))?
        .iter()
        .map(Stage::from_value)
        .collect()
}

/// A pipeline split into an indexed query and the stages left to run after it
#[derive(Debug, Default, PartialEq)]
pub struct FoldedPipeline {
    pub filter: Filter,
    pub options: QueryOptions,
    /// Supported stages that must run, in order, over the query result
    pub rest: Vec<Stage>,
    /// Stages that were dropped
    pub ignored: usize,
}

/// Position of a stage in the canonical match, sort, skip, limit order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Match,
    Sort,
    Skip,
    Limit,
}

/// Fold the leading canonical-order stages into one filtered, sorted, paged query
///
/// Matches merge, skips accumulate and limits keep the smallest bound. The
/// first stage that would have to run before something already folded ends
/// the prefix; it and every supported stage after it go to `rest`.
pub fn fold(pipeline: &[Stage]) -> FoldedPipeline {
    let mut folded = FoldedPipeline::default();
    let mut phase = Phase::Match;
    for stage in pipeline {
        if matches!(stage, Stage::Other(_)) {
            folded.ignored += 1;
            continue;
        }
        if !folded.rest.is_empty() {
            folded.rest.push(stage.clone());
            continue;
        }
        match stage {
            Stage::Match(filter) if phase == Phase::Match => folded.filter.merge(filter.clone()),
            Stage::Sort(sort) if phase == Phase::Match => {
                folded.options.sort = Some(sort.clone());
                phase = Phase::Sort;
            }
            Stage::Skip(n) if phase <= Phase::Skip => {
                folded.options.skip = Some(folded.options.skip.unwrap_or(0) + n);
                phase = Phase::Skip;
            }
            Stage::Limit(n) => {
                folded.options.limit = Some(folded.options.limit.map_or(*n, |l| l.min(*n)));
                phase = Phase::Limit;
            }
            _ => folded.rest.push(stage.clone()),
        }
    }
    folded
}

/// Run supported stages in order over an in-memory result set
///
/// Unsupported stages are skipped.
pub fn run_stages(mut docs: Vec<Document>, stages: &[Stage]) -> Vec<Document> {
    for stage in stages {
        docs = match stage {
            Stage::Match(filter) => docs.into_iter().filter(|d| filter.matches(d)).collect(),
            Stage::Sort(sort) => QueryOptions::new().sort(sort.clone()).apply(docs),
            Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
            Stage::Limit(n) => docs.into_iter().take(*n).collect(),
            Stage::Other(_) => docs,
        };
    }
    docs
}
