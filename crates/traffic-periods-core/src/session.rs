//! End-to-end analysis: validate groups, load through the cache, aggregate.

use log::{info, warn};

use crate::{
    aggregate::{self, FilterSpec, GroupReport, View},
    cache::{CacheError, CacheStore},
    coverage::serde::{coverage_from_ranges, coverage_to_ranges},
    fetch::Transport,
    model::{
        DataKind, Granularity, InvalidPeriodGroupError, PeriodGroup, PeriodGroupDef, SegmentId,
        TrafficRecord,
    },
};

/// Outcome for one input group: its report, or why it was rejected.
pub type GroupOutcome = Result<GroupReport, InvalidPeriodGroupError>;

/// What to analyse.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    /// Segment to analyse.
    pub segment: SegmentId,
    /// Record granularity.
    pub granularity: Granularity,
    /// Payload shape; the speed view needs [`DataKind::SpeedHistogram`].
    pub kind: DataKind,
    /// Groups to compare, unvalidated.
    pub groups: Vec<PeriodGroupDef>,
    /// Filters applied to every group.
    pub filter: FilterSpec,
    /// Views to compute.
    pub views: Vec<View>,
}

/// Owns the cache store and runs analyses against it.
#[derive(Debug)]
pub struct AnalysisSession<T> {
    cache: CacheStore<T>,
}

impl<T: Transport> AnalysisSession<T> {
    /// Session over `cache`.
    pub fn new(cache: CacheStore<T>) -> Self {
        Self { cache }
    }

    /// Run one analysis.
    ///
    /// Returns one outcome per input group, in input order. Invalid groups
    /// get their validation error and cause no cache or network work. A cache
    /// failure aborts the whole analysis.
    pub fn run(&mut self, request: &AnalysisRequest) -> Result<Vec<GroupOutcome>, CacheError> {
        let validated: Vec<Result<PeriodGroup, InvalidPeriodGroupError>> =
            request.groups.iter().map(PeriodGroupDef::validate).collect();

        let valid: Vec<PeriodGroup> = validated
            .iter()
            .filter_map(|g| g.as_ref().ok().cloned())
            .collect();
        for err in validated.iter().filter_map(|g| g.as_ref().err()) {
            warn!("skipping period group: {err}");
        }

        let records = self.load(request, &valid)?;
        info!(
            "aggregating {} records over {} group(s)",
            records.len(),
            valid.len()
        );
        let mut reports =
            aggregate::aggregate(&valid, &records, &request.filter, &request.views).into_iter();

        let mut outcomes = Vec::with_capacity(validated.len());
        for g in validated {
            match g {
                Ok(_) => outcomes.extend(reports.next().map(Ok)),
                Err(e) => outcomes.push(Err(e)),
            }
        }
        Ok(outcomes)
    }

    /// Records for the union of all groups' ranges.
    fn load(
        &mut self,
        request: &AnalysisRequest,
        groups: &[PeriodGroup],
    ) -> Result<Vec<TrafficRecord>, CacheError> {
        let spans = coverage_to_ranges(&coverage_from_ranges(
            groups.iter().flat_map(|g| g.ranges()),
        ));

        let mut records = Vec::new();
        for span in &spans {
            let read = self
                .cache
                .get(&request.segment, request.granularity, request.kind, span)?;
            records.extend(read.records);
        }
        Ok(records)
    }
}
