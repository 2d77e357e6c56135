//! Period-group aggregation.
//!
//! Pure functions over in-memory records: no I/O and no shared state, so
//! the same input always yields the same reports. Each group is processed on
//! its own; an empty group produces zero-filled views rather than an error.
//!
//! The modality columns and the speed bin layout are chosen once from the
//! whole record set so that every group's views share the same axes.

pub mod filter;
pub mod views;

use serde::Serialize;

pub use filter::{FilterError, FilterSpec, HourWindow, WeekdaySet};
pub use views::{
    DailyVolume, DayTotal, HourSlot, HourlyProfile, ModalShare, ModalSplit, SpeedBin,
    SpeedDistribution, SpeedUnit, View,
};

use crate::model::{Modality, PeriodGroup, SpeedBinLayout, TrafficRecord};

/// All requested views for one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupReport {
    /// Group name.
    pub group: String,
    /// Records that passed the group's ranges and the filter.
    pub matched: usize,
    /// Present when [`View::HourlyProfile`] was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hourly: Option<HourlyProfile>,
    /// Present when [`View::DailyVolume`] was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily: Option<DailyVolume>,
    /// Present when [`View::ModalSplit`] was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modal_split: Option<ModalSplit>,
    /// Present when [`View::SpeedDistribution`] was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<SpeedDistribution>,
}

/// Modalities reported by at least one record, in canonical order.
pub fn available_modalities(records: &[TrafficRecord]) -> Vec<Modality> {
    Modality::ALL
        .into_iter()
        .filter(|m| records.iter().any(|r| r.counts.get(*m).is_some()))
        .collect()
}

/// The histogram layout behind the most cars. Ties, including no histograms
/// at all, go to the earlier entry of [`SpeedBinLayout::PREFERENCE`].
pub fn dominant_speed_layout(records: &[TrafficRecord]) -> SpeedBinLayout {
    let cars_on = |layout: SpeedBinLayout| -> f64 {
        records
            .iter()
            .filter(|r| r.speed.as_ref().is_some_and(|h| h.layout == layout))
            .filter_map(|r| r.counts.get(Modality::Car))
            .sum()
    };

    let mut best = SpeedBinLayout::PREFERENCE[0];
    let mut best_cars = cars_on(best);
    for layout in SpeedBinLayout::PREFERENCE.into_iter().skip(1) {
        let cars = cars_on(layout);
        if cars > best_cars {
            best = layout;
            best_cars = cars;
        }
    }
    best
}

/// Compute `views` for every group from a shared record set.
///
/// `records` may hold data for days outside every group; each group selects
/// the records whose UTC date lies in one of its ranges. Reports come back in
/// group order.
pub fn aggregate(
    groups: &[PeriodGroup],
    records: &[TrafficRecord],
    filter: &FilterSpec,
    views: &[View],
) -> Vec<GroupReport> {
    let modalities = filter.select_modalities(&available_modalities(records));
    let layout = dominant_speed_layout(records);

    groups
        .iter()
        .map(|g| aggregate_group(g, records, filter, views, &modalities, layout))
        .collect()
}

fn aggregate_group(
    group: &PeriodGroup,
    records: &[TrafficRecord],
    filter: &FilterSpec,
    views: &[View],
    modalities: &[Modality],
    layout: SpeedBinLayout,
) -> GroupReport {
    let selected: Vec<&TrafficRecord> = records
        .iter()
        .filter(|r| group.contains(r.date()) && filter.keeps(r))
        .collect();

    let wants = |v: View| views.contains(&v);

    let daily = wants(View::DailyVolume).then(|| {
        let days = group
            .ranges()
            .iter()
            .flat_map(|r| r.iter_days())
            .filter(|d| filter.keeps_day(*d));
        views::daily_volume(selected.iter().copied(), days, modalities)
    });

    GroupReport {
        group: group.name().to_string(),
        matched: selected.len(),
        hourly: wants(View::HourlyProfile)
            .then(|| views::hourly_profile(selected.iter().copied(), modalities)),
        daily,
        modal_split: wants(View::ModalSplit)
            .then(|| views::modal_split(selected.iter().copied(), modalities)),
        speed: wants(View::SpeedDistribution)
            .then(|| views::speed_distribution(selected.iter().copied(), layout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DateRange, ModalityCounts, SpeedHistogram};
    use chrono::{NaiveDate, TimeZone, Utc};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn rec(m: u32, d: u32, h: u32, counts: ModalityCounts) -> TrafficRecord {
        TrafficRecord::new(Utc.with_ymd_and_hms(2024, m, d, h, 0, 0).unwrap(), counts)
    }

    fn range(a: (u32, u32), b: (u32, u32)) -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, a.0, a.1).unwrap(),
            NaiveDate::from_ymd_opt(2024, b.0, b.1).unwrap(),
        )
        .unwrap()
    }

    fn two_days_of_cars() -> Vec<TrafficRecord> {
        let mut out = Vec::new();
        for (day, car_at_8) in [(1, 20.0), (2, 30.0)] {
            for h in 0..24 {
                let car = if h == 8 { car_at_8 } else { 0.0 };
                out.push(rec(1, day, h, ModalityCounts::new().with(Modality::Car, car)));
            }
        }
        out
    }

    #[test]
    fn hour_eight_is_the_mean_of_both_days() -> TestResult {
        let group = PeriodGroup::new("A", vec![range((1, 1), (1, 2))])?;
        let reports = aggregate(
            &[group],
            &two_days_of_cars(),
            &FilterSpec::new(),
            &[View::HourlyProfile],
        );

        let profile = reports[0].hourly.as_ref().ok_or("missing profile")?;
        assert_eq!(profile.hours.len(), 24);
        assert_eq!(profile.mean(8, Modality::Car), Some(25.0));
        for h in (0..24).filter(|h| *h != 8) {
            assert_eq!(profile.mean(h, Modality::Car), Some(0.0));
        }
        assert!(reports[0].daily.is_none());
        Ok(())
    }

    #[test]
    fn modal_split_sums_to_one_hundred() -> TestResult {
        let records = vec![
            rec(
                1,
                1,
                8,
                ModalityCounts::new()
                    .with(Modality::Pedestrian, 3.0)
                    .with(Modality::Bike, 7.0)
                    .with(Modality::Car, 13.0)
                    .with(Modality::Heavy, 1.0),
            ),
            rec(1, 1, 9, ModalityCounts::new().with(Modality::Bike, 11.0)),
        ];
        let group = PeriodGroup::new("A", vec![range((1, 1), (1, 1))])?;
        let reports = aggregate(&[group], &records, &FilterSpec::new(), &[View::ModalSplit]);

        let split = reports[0].modal_split.as_ref().ok_or("missing split")?;
        let sum: f64 = split.shares.iter().map(|s| s.percent).sum();
        assert!((sum - 100.0).abs() < 1e-9);
        assert_eq!(split.shares.len(), 4);
        Ok(())
    }

    #[test]
    fn empty_group_gets_zero_filled_views_without_affecting_others() -> TestResult {
        let busy = PeriodGroup::new("busy", vec![range((1, 1), (1, 2))])?;
        let empty = PeriodGroup::new("empty", vec![range((6, 1), (6, 3))])?;
        let reports = aggregate(
            &[busy, empty],
            &two_days_of_cars(),
            &FilterSpec::new(),
            &View::ALL,
        );

        assert_eq!(reports[0].matched, 48);
        let e = &reports[1];
        assert_eq!(e.group, "empty");
        assert_eq!(e.matched, 0);
        let hourly = e.hourly.as_ref().ok_or("hourly")?;
        assert!(hourly.hours.iter().all(|s| s.means == vec![0.0]));
        let daily = e.daily.as_ref().ok_or("daily")?;
        assert_eq!(daily.days.len(), 3);
        let split = e.modal_split.as_ref().ok_or("split")?;
        assert_eq!(split.total, 0.0);
        let speed = e.speed.as_ref().ok_or("speed")?;
        assert_eq!(speed.bins.len(), SpeedBinLayout::Kmh0To120Plus.bin_count());
        Ok(())
    }

    #[test]
    fn filters_apply_per_group() -> TestResult {
        // 2024-01-06/07 is a weekend, 2024-01-08 a Monday
        let records: Vec<TrafficRecord> = (6..=8)
            .flat_map(|d| {
                [7, 12].map(|h| rec(1, d, h, ModalityCounts::new().with(Modality::Bike, 1.0)))
            })
            .collect();
        let group = PeriodGroup::new("A", vec![range((1, 6), (1, 8))])?;
        let filter = FilterSpec::new()
            .with_hours(HourWindow::new(6, 9)?)
            .with_days(WeekdaySet::WORKDAYS);

        let reports = aggregate(&[group], &records, &filter, &[View::DailyVolume]);
        assert_eq!(reports[0].matched, 1);
        let daily = reports[0].daily.as_ref().ok_or("daily")?;
        assert_eq!(daily.days.len(), 1);
        assert_eq!(daily.days[0].totals, vec![1.0]);
        Ok(())
    }

    #[test]
    fn group_ranges_may_come_in_any_order() -> TestResult {
        let group = PeriodGroup::new("A", vec![range((1, 2), (1, 2)), range((1, 1), (1, 1))])?;
        let reports = aggregate(&[group], &two_days_of_cars(), &FilterSpec::new(), &[View::DailyVolume]);
        let days: Vec<_> = reports[0]
            .daily
            .as_ref()
            .ok_or("daily")?
            .days
            .iter()
            .map(|d| (d.date, d.totals[0]))
            .collect();
        assert_eq!(
            days,
            vec![
                (NaiveDate::from_ymd_opt(2024, 1, 1).ok_or("date")?, 20.0),
                (NaiveDate::from_ymd_opt(2024, 1, 2).ok_or("date")?, 30.0),
            ]
        );
        Ok(())
    }

    fn with_hist(mut r: TrafficRecord, layout: SpeedBinLayout, bin: usize) -> TrafficRecord {
        let mut shares = vec![0.0; layout.bin_count()];
        shares[bin] = 100.0;
        r.speed = Some(SpeedHistogram { layout, shares });
        r
    }

    #[test]
    fn speed_layout_follows_the_data() {
        let layout = SpeedBinLayout::Kmh0To70Plus;
        let r = with_hist(rec(1, 1, 8, ModalityCounts::new().with(Modality::Car, 2.0)), layout, 0);
        assert_eq!(dominant_speed_layout(&[r]), layout);
        assert_eq!(dominant_speed_layout(&[]), SpeedBinLayout::Kmh0To120Plus);
    }

    #[test]
    fn mixed_speed_layouts_pick_by_cars_and_report_the_rest() -> TestResult {
        let car = |n: f64| ModalityCounts::new().with(Modality::Car, n);
        let records = vec![
            with_hist(rec(1, 1, 7, car(1.0)), SpeedBinLayout::Kmh0To70Plus, 5),
            with_hist(rec(1, 1, 8, car(1.0)), SpeedBinLayout::Kmh0To70Plus, 5),
            with_hist(rec(1, 1, 9, car(500.0)), SpeedBinLayout::Kmh0To120Plus, 3),
        ];
        let group = PeriodGroup::new("A", vec![range((1, 1), (1, 1))])?;
        let reports = aggregate(
            &[group],
            &records,
            &FilterSpec::new(),
            &[View::SpeedDistribution],
        );

        let speed = reports[0].speed.as_ref().ok_or("speed")?;
        assert_eq!(speed.layout, SpeedBinLayout::Kmh0To120Plus);
        assert_eq!(speed.cars, 500.0);
        assert_eq!(speed.excluded_cars, 2.0);
        assert_eq!(speed.excluded_records, 2);
        assert!((speed.bins[3].percent - 100.0).abs() < 1e-9);
        assert_eq!(speed.cars + speed.excluded_cars, 502.0);
        Ok(())
    }
}
