//! # Summary Aggregator
//!
//! Rolls the interaction facts up into one [`ContentSummary`] per content id and
//! swaps the result into `beReads`.

use crate::config::{CollectionNames, RepresentativeRule};
use crate::error::Result;
use crate::model::{ContentSummary, Document, InteractionFact};
use crate::store::DocumentStore;
use crate::temporal::Instant;
use hashbrown::HashSet;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummaryReport {
    pub facts: usize,
    pub malformed: usize,
    /// Facts whose read duration was excluded from `readNum`.
    pub non_numeric: usize,
    pub summaries: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    /// Ordered by content id.
    pub summaries: Vec<ContentSummary>,
    pub non_numeric: usize,
}

#[derive(Debug, Default)]
struct UidList {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl UidList {
    fn push(&mut self, uid: &str) {
        if self.seen.insert(uid.to_string()) {
            self.ordered.push(uid.to_string());
        }
    }
}

#[derive(Debug)]
struct Group {
    representative: (Instant, u64),
    category: Option<String>,
    read_num: i64,
    comment_num: u64,
    agree_num: u64,
    share_num: u64,
    readers: UidList,
    commenters: UidList,
    agreers: UidList,
    sharers: UidList,
}

impl Group {
    fn new(fact: &InteractionFact) -> Self {
        Self {
            representative: (fact.timestamp, fact.doc_id),
            category: fact.category.clone(),
            read_num: 0,
            comment_num: 0,
            agree_num: 0,
            share_num: 0,
            readers: UidList::default(),
            commenters: UidList::default(),
            agreers: UidList::default(),
            sharers: UidList::default(),
        }
    }

    /// Facts arrive in `_id` order, so the first one seen is the earliest ingested.
    fn consider_representative(&mut self, fact: &InteractionFact, rule: RepresentativeRule) {
        if rule == RepresentativeRule::EarliestTimestamp
            && (fact.timestamp, fact.doc_id) < self.representative
        {
            self.representative = (fact.timestamp, fact.doc_id);
            self.category = fact.category.clone();
        }
    }

    fn into_summary(self, aid: String) -> ContentSummary {
        ContentSummary {
            aid,
            category: self.category,
            timestamp: self.representative.0,
            read_num: self.read_num,
            read_uid_list: self.readers.ordered,
            comment_num: self.comment_num,
            comment_uid_list: self.commenters.ordered,
            agree_num: self.agree_num,
            agree_uid_list: self.agreers.ordered,
            share_num: self.share_num,
            share_uid_list: self.sharers.ordered,
        }
    }
}

/// Build one summary per content id from `facts`, whatever order they come in.
pub fn rebuild_summaries(facts: &[InteractionFact], rule: RepresentativeRule) -> Aggregation {
    let mut ordered: Vec<&InteractionFact> = facts.iter().collect();
    ordered.sort_by_key(|fact| fact.doc_id);

    let mut groups: BTreeMap<&str, Group> = BTreeMap::new();
    let mut non_numeric = 0;
    for fact in ordered {
        let group = groups
            .entry(fact.aid.as_str())
            .or_insert_with(|| Group::new(fact));
        group.consider_representative(fact, rule);

        match fact.read_duration() {
            Ok(duration) => group.read_num = group.read_num.saturating_add(duration),
            Err(err) => {
                warn!(error = %err, "excluding read duration");
                non_numeric += 1;
            }
        }
        if fact.read {
            group.readers.push(&fact.uid);
        }
        if fact.commented {
            group.comment_num += 1;
            group.commenters.push(&fact.uid);
        }
        if fact.agreed {
            group.agree_num += 1;
            group.agreers.push(&fact.uid);
        }
        if fact.shared {
            group.share_num += 1;
            group.sharers.push(&fact.uid);
        }
    }

    Aggregation {
        summaries: groups
            .into_iter()
            .map(|(aid, group)| group.into_summary(aid.to_string()))
            .collect(),
        non_numeric,
    }
}

/// Decode fact documents, skipping the malformed ones. Returns the facts and the
/// number skipped.
pub fn decode_facts(docs: &[Document]) -> (Vec<InteractionFact>, usize) {
    let mut malformed = 0;
    let facts = docs
        .iter()
        .filter_map(|doc| match InteractionFact::from_document(doc) {
            Ok(fact) => Some(fact),
            Err(err) => {
                warn!(error = %err, "skipping fact");
                malformed += 1;
                None
            }
        })
        .collect();
    (facts, malformed)
}

/// Rebuild `beReads` from the current fact table.
#[instrument(skip(store, collections), fields(destination = %collections.be_reads))]
pub fn summarize(
    store: &dyn DocumentStore,
    collections: &CollectionNames,
    rule: RepresentativeRule,
) -> Result<SummaryReport> {
    let docs = store.find_all(&collections.reads)?;
    let (facts, malformed) = decode_facts(&docs);
    let aggregation = rebuild_summaries(&facts, rule);

    let summaries = aggregation
        .summaries
        .iter()
        .map(ContentSummary::to_document)
        .collect::<Result<Vec<_>>>()?;
    let written = store.replace_collection(&collections.be_reads, summaries)?;

    let report = SummaryReport {
        facts: docs.len(),
        malformed,
        non_numeric: aggregation.non_numeric,
        summaries: written,
    };
    info!(
        facts = report.facts,
        summaries = report.summaries,
        malformed = report.malformed,
        non_numeric = report.non_numeric,
        "content summaries rebuilt"
    );
    Ok(report)
}
