use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::coords;
use crate::domain::{BoundingBox, Event, FetchMode, Period, TimeWindow, Variable};
use crate::error::ProfileError;

pub const DEFAULT_PADDING_DEGREES: f64 = 0.5;
pub const DEFAULT_WINDOW_DAYS: i64 = 2;

#[derive(Debug, Clone, Copy)]
pub struct PlannerOptions {
    pub mode: FetchMode,
    pub padding_degrees: f64,
    pub window_days: i64,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            mode: FetchMode::Month,
            padding_degrees: DEFAULT_PADDING_DEGREES,
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

/// Everything needed to request and later reassemble one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionPlan {
    pub event_id: String,
    pub date: DateTime<Utc>,
    pub periods: BTreeSet<Period>,
    pub bbox: BoundingBox,
    pub window: TimeWindow,
    pub mode: FetchMode,
}

impl RegionPlan {
    /// Time range put on the wire for one of this plan's periods.
    pub fn query_window(&self, period: &Period) -> TimeWindow {
        match self.mode {
            FetchMode::Month => TimeWindow::period(period),
            FetchMode::Window | FetchMode::Slice => self.window,
        }
    }

    pub fn required(&self, variables: &[Variable]) -> Vec<(Variable, Period)> {
        variables
            .iter()
            .flat_map(|variable| self.periods.iter().map(move |period| (*variable, *period)))
            .collect()
    }
}

pub struct RegionPlanner {
    options: PlannerOptions,
}

impl RegionPlanner {
    pub fn new(options: PlannerOptions) -> Self {
        Self { options }
    }

    pub fn plan(&self, event: &Event) -> Result<RegionPlan, ProfileError> {
        let date = event.initial.ok_or_else(|| invalid(event, "missing initial date"))?;
        let bbox = self.padded_box(event)?;
        let periods = self.periods(&date);
        let window = match self.options.mode {
            FetchMode::Slice => TimeWindow::slice(date),
            FetchMode::Month | FetchMode::Window => {
                TimeWindow::around(date, self.options.window_days)
            }
        };
        debug!(
            event = %event.id,
            periods = periods.len(),
            west = bbox.west,
            east = bbox.east,
            "planned event"
        );
        Ok(RegionPlan {
            event_id: event.id.clone(),
            date,
            periods,
            bbox,
            window,
            mode: self.options.mode,
        })
    }

    /// Own month, plus the previous month near its start and the next month
    /// near its end, so the event window is fully covered.
    pub fn periods(&self, date: &DateTime<Utc>) -> BTreeSet<Period> {
        let own = Period::of(date);
        let mut periods = BTreeSet::from([own]);
        if self.options.mode == FetchMode::Slice {
            return periods;
        }
        let day = i64::from(date.day());
        let last_day = i64::from(own.days());
        let reach = self.options.window_days;
        if reach > 0 && day <= reach {
            periods.insert(own.previous());
        }
        if reach > 0 && day > last_day - reach {
            periods.insert(own.next());
        }
        periods
    }

    fn padded_box(&self, event: &Event) -> Result<BoundingBox, ProfileError> {
        let footprint = &event.footprint;
        let (Some(min_lon), Some(min_lat), Some(max_lon), Some(max_lat)) = (
            footprint.min_lon,
            footprint.min_lat,
            footprint.max_lon,
            footprint.max_lat,
        ) else {
            return Err(invalid(event, "footprint has missing coordinates"));
        };
        if ![min_lon, min_lat, max_lon, max_lat]
            .iter()
            .all(|value| value.is_finite())
        {
            return Err(invalid(event, "footprint has non-finite coordinates"));
        }
        if min_lat > max_lat {
            return Err(invalid(event, "footprint south edge lies north of its north edge"));
        }

        let ordered = coords::order_west_east(min_lon, max_lon);
        if ordered.swapped {
            warn!(
                event = %event.id,
                min_lon,
                max_lon,
                "footprint longitudes reordered; assuming it does not cross the 0/360 seam"
            );
        }

        let pad = self.options.padding_degrees;
        Ok(BoundingBox {
            west: (ordered.west - pad).max(0.0),
            south: (min_lat - pad).max(-90.0),
            east: (ordered.east + pad).min(360.0),
            north: (max_lat + pad).min(90.0),
        })
    }
}

fn invalid(event: &Event, reason: &str) -> ProfileError {
    ProfileError::InvalidEvent {
        id: event.id.clone(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::{Footprint, parse_instant};

    fn event(id: &str, date: &str, footprint: Footprint) -> Event {
        Event {
            id: id.to_string(),
            initial: Some(parse_instant(date).unwrap()),
            footprint,
            area_ha: Some(120.0),
        }
    }

    fn footprint(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Footprint {
        Footprint {
            min_lon: Some(min_lon),
            min_lat: Some(min_lat),
            max_lon: Some(max_lon),
            max_lat: Some(max_lat),
        }
    }

    fn periods(plan: &RegionPlan) -> Vec<String> {
        plan.periods.iter().map(|period| period.to_string()).collect()
    }

    #[test]
    fn mid_month_event_needs_one_period() {
        let planner = RegionPlanner::new(PlannerOptions::default());
        let plan = planner
            .plan(&event("1.0", "2020-08-15", footprint(-120.0, 38.0, -119.0, 39.0)))
            .unwrap();
        assert_eq!(periods(&plan), vec!["202008"]);
    }

    #[test]
    fn month_end_event_adds_next_period() {
        let planner = RegionPlanner::new(PlannerOptions::default());
        let plan = planner
            .plan(&event("1.0", "2020-08-30", footprint(-120.0, 38.0, -119.0, 39.0)))
            .unwrap();
        assert_eq!(periods(&plan), vec!["202008", "202009"]);
    }

    #[test]
    fn month_start_event_adds_previous_period() {
        let planner = RegionPlanner::new(PlannerOptions::default());
        let plan = planner
            .plan(&event("1.0", "2020-08-01", footprint(-120.0, 38.0, -119.0, 39.0)))
            .unwrap();
        assert_eq!(periods(&plan), vec!["202007", "202008"]);
    }

    #[test]
    fn short_month_spans_year_boundary() {
        let planner = RegionPlanner::new(PlannerOptions::default());
        let plan = planner
            .plan(&event("1.0", "2021-01-02", footprint(-120.0, 38.0, -119.0, 39.0)))
            .unwrap();
        assert_eq!(periods(&plan), vec!["202012", "202101"]);

        let plan = planner
            .plan(&event("2.0", "2021-02-27", footprint(-120.0, 38.0, -119.0, 39.0)))
            .unwrap();
        assert_eq!(periods(&plan), vec!["202102", "202103"]);
    }

    #[test]
    fn slice_mode_plans_own_period_only() {
        let planner = RegionPlanner::new(PlannerOptions {
            mode: FetchMode::Slice,
            ..PlannerOptions::default()
        });
        let plan = planner
            .plan(&event("1.0", "2020-08-31", footprint(-120.0, 38.0, -119.0, 39.0)))
            .unwrap();
        assert_eq!(periods(&plan), vec!["202008"]);
        assert_eq!(plan.window.start, plan.window.end);
    }

    #[test]
    fn box_is_normalized_and_padded() {
        let planner = RegionPlanner::new(PlannerOptions::default());
        let plan = planner
            .plan(&event("1.0", "2020-08-15", footprint(-120.0, 38.0, -119.0, 39.0)))
            .unwrap();
        assert_eq!(
            plan.bbox,
            BoundingBox {
                west: 239.5,
                south: 37.5,
                east: 241.5,
                north: 39.5,
            }
        );
        assert_eq!(
            plan.window.start.to_rfc3339(),
            "2020-08-13T00:00:00+00:00"
        );
        assert_eq!(plan.window.end.to_rfc3339(), "2020-08-17T00:00:00+00:00");
    }

    #[test]
    fn padding_stays_inside_grid_edges() {
        let planner = RegionPlanner::new(PlannerOptions::default());
        let plan = planner
            .plan(&event("1.0", "2020-08-15", footprint(0.2, 89.8, 0.4, 89.9)))
            .unwrap();
        assert_eq!(plan.bbox.west, 0.0);
        assert_eq!(plan.bbox.north, 90.0);
    }

    #[test]
    fn query_window_depends_on_mode() {
        let planner = RegionPlanner::new(PlannerOptions::default());
        let plan = planner
            .plan(&event("1.0", "2020-08-15", footprint(-120.0, 38.0, -119.0, 39.0)))
            .unwrap();
        let period = Period::new(2020, 8).unwrap();
        assert_eq!(plan.query_window(&period), TimeWindow::period(&period));

        let planner = RegionPlanner::new(PlannerOptions {
            mode: FetchMode::Window,
            ..PlannerOptions::default()
        });
        let plan = planner
            .plan(&event("1.0", "2020-08-15", footprint(-120.0, 38.0, -119.0, 39.0)))
            .unwrap();
        assert_eq!(plan.query_window(&period), plan.window);
    }

    #[test]
    fn missing_or_nan_coordinates_are_rejected() {
        let planner = RegionPlanner::new(PlannerOptions::default());
        let mut partial = footprint(-120.0, 38.0, -119.0, 39.0);
        partial.max_lat = None;
        assert_matches!(
            planner.plan(&event("1.0", "2020-08-15", partial)),
            Err(ProfileError::InvalidEvent { .. })
        );
        assert_matches!(
            planner.plan(&event("2.0", "2020-08-15", footprint(f64::NAN, 38.0, -119.0, 39.0))),
            Err(ProfileError::InvalidEvent { .. })
        );

        let mut undated = event("3.0", "2020-08-15", footprint(-120.0, 38.0, -119.0, 39.0));
        undated.initial = None;
        assert_matches!(planner.plan(&undated), Err(ProfileError::InvalidEvent { .. }));
    }

    #[test]
    fn required_pairs_cover_every_period() {
        let planner = RegionPlanner::new(PlannerOptions::default());
        let plan = planner
            .plan(&event("1.0", "2020-08-30", footprint(-120.0, 38.0, -119.0, 39.0)))
            .unwrap();
        let required = plan.required(&[Variable::Air, Variable::Tke]);
        assert_eq!(required.len(), 4);
    }
}
