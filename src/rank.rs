//! # Rank Builder
//!
//! Buckets content summaries into calendar periods and ranks the content ids of
//! each period by weighted popularity. Granularities are ranked in parallel.

use crate::config::{CollectionNames, RankWeights, RankingConfig, TieBreak};
use crate::error::Result;
use crate::model::{ContentSummary, Granularity, PopularityEntry};
use crate::store::DocumentStore;
use crate::temporal::{period_start, Instant};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RankReport {
    pub summaries: usize,
    pub malformed: usize,
    /// Summaries whose timestamp falls outside the supported calendar.
    pub unplaced: usize,
    pub entries: usize,
    pub replaced: usize,
    pub inserted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ranking {
    /// Grouped by granularity in the requested order, then by period start.
    pub entries: Vec<PopularityEntry>,
    pub unplaced: usize,
}

pub fn score(summary: &ContentSummary, weights: &RankWeights) -> i64 {
    let count = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);
    weights
        .read
        .saturating_mul(summary.read_num)
        .saturating_add(weights.comment.saturating_mul(count(summary.comment_num)))
        .saturating_add(weights.agree.saturating_mul(count(summary.agree_num)))
        .saturating_add(weights.share.saturating_mul(count(summary.share_num)))
}

fn rank_granularity(
    summaries: &[ContentSummary],
    granularity: Granularity,
    weights: &RankWeights,
    tie_break: TieBreak,
) -> (Vec<PopularityEntry>, usize) {
    let mut periods: BTreeMap<Instant, Vec<(i64, &str)>> = BTreeMap::new();
    let mut unplaced = 0;
    for summary in summaries {
        match period_start(summary.timestamp, granularity) {
            Some(start) => periods
                .entry(start)
                .or_default()
                .push((score(summary, weights), summary.aid.as_str())),
            None => unplaced += 1,
        }
    }

    let entries = periods
        .into_iter()
        .map(|(period_start, mut scored)| {
            match tie_break {
                TieBreak::AscendingContentId => {
                    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)))
                }
                TieBreak::DescendingContentId => scored.sort_by_key(|(s, aid)| Reverse((*s, *aid))),
            }
            PopularityEntry {
                period_start,
                granularity,
                aids: scored.into_iter().map(|(_, aid)| aid.to_string()).collect(),
            }
        })
        .collect();
    (entries, unplaced)
}

/// Rank `summaries` for every granularity in `granularities`.
pub fn rebuild_ranking(
    summaries: &[ContentSummary],
    granularities: &[Granularity],
    weights: &RankWeights,
    tie_break: TieBreak,
) -> Ranking {
    let per_granularity: Vec<(Vec<PopularityEntry>, usize)> = granularities
        .par_iter()
        .map(|granularity| rank_granularity(summaries, *granularity, weights, tie_break))
        .collect();

    let mut ranking = Ranking::default();
    for (entries, unplaced) in per_granularity {
        ranking.entries.extend(entries);
        ranking.unplaced += unplaced;
    }
    ranking
}

/// Rebuild the ranking from `beReads` and upsert it into `popular_rank`.
#[instrument(skip(store, collections, config), fields(destination = %collections.popular_rank))]
pub fn rank(
    store: &dyn DocumentStore,
    collections: &CollectionNames,
    config: &RankingConfig,
) -> Result<RankReport> {
    let docs = store.find_all(&collections.be_reads)?;
    let mut malformed = 0;
    let summaries: Vec<ContentSummary> = docs
        .iter()
        .filter_map(|doc| match ContentSummary::from_document(doc) {
            Ok(summary) => Some(summary),
            Err(err) => {
                warn!(error = %err, "skipping summary");
                malformed += 1;
                None
            }
        })
        .collect();

    let ranking = rebuild_ranking(
        &summaries,
        &config.granularities,
        &config.weights,
        config.tie_break,
    );
    debug!(entries = ranking.entries.len(), "ranking computed");

    let entries = ranking
        .entries
        .iter()
        .map(PopularityEntry::to_document)
        .collect::<Result<Vec<_>>>()?;
    let outcome = store.upsert_many(
        &collections.popular_rank,
        &PopularityEntry::KEY_FIELDS,
        entries,
    )?;

    let report = RankReport {
        summaries: summaries.len(),
        malformed,
        unplaced: ranking.unplaced,
        entries: ranking.entries.len(),
        replaced: outcome.replaced,
        inserted: outcome.inserted,
    };
    info!(
        entries = report.entries,
        replaced = report.replaced,
        inserted = report.inserted,
        "popularity ranking upserted"
    );
    Ok(report)
}
