use std::collections::HashSet;

use assert_matches::assert_matches;

use narr_fire_profiles::catalog::CatalogLoader;
use narr_fire_profiles::coords::normalize;
use narr_fire_profiles::dedupe::dedupe;
use narr_fire_profiles::domain::{FetchMode, Period, Variable};
use narr_fire_profiles::error::ProfileError;
use narr_fire_profiles::planner::{PlannerOptions, RegionPlanner};
use narr_fire_profiles::request::RequestBuilder;

#[test]
fn normalize_is_idempotent_and_in_range() {
    let mut lon = -725.0;
    while lon <= 725.0 {
        let once = normalize(lon);
        assert!((0.0..360.0).contains(&once), "{lon} -> {once}");
        assert_eq!(normalize(once), once);
        lon += 0.37;
    }
}

#[test]
fn parse_variable_and_mode() {
    let variable: Variable = "Omega".parse().unwrap();
    assert_eq!(variable.as_str(), "omega");
    assert_matches!("pres".parse::<Variable>(), Err(ProfileError::InvalidVariable(_)));
    let mode: FetchMode = "WINDOW".parse().unwrap();
    assert_eq!(mode, FetchMode::Window);
}

#[test]
fn catalog_events_plan_into_unique_tasks() {
    let events = CatalogLoader::parse(
        r#"[
            {"id": 1, "initial_date": "2020-08-30", "min_lon": -120, "min_lat": 38, "max_lon": -119, "max_lat": 39},
            {"id": 2, "initial_date": "2020-08-01", "min_lon": -120, "min_lat": 38, "max_lon": -119, "max_lat": 39},
            {"id": 3, "initial_date": "2020-08-16", "min_lon": -120, "min_lat": 38, "max_lon": -119, "max_lat": 39},
            {"id": 4, "initial_date": null, "min_lon": -120, "min_lat": 38, "max_lon": -119, "max_lat": 39}
        ]"#,
    )
    .unwrap();
    assert_eq!(events[0].id, "1.0");

    let planner = RegionPlanner::new(PlannerOptions::default());
    let builder = RequestBuilder::default();
    let mut tasks = Vec::new();
    let mut invalid = 0;
    for event in &events {
        let Ok(plan) = planner.plan(event) else {
            invalid += 1;
            continue;
        };
        for (variable, period) in plan.required(&Variable::ALL) {
            tasks.push(
                builder
                    .build(variable, period, plan.bbox, plan.query_window(&period))
                    .unwrap(),
            );
        }
    }
    assert_eq!(invalid, 1);

    let total = tasks.len();
    let deduped = dedupe(tasks);
    // 7 variables x {202007, 202008, 202009}
    assert_eq!(deduped.tasks.len(), 21);
    assert_eq!(deduped.collapsed, total - 21);

    let locators: HashSet<_> = deduped
        .tasks
        .iter()
        .map(|task| (task.variable, task.locator.clone()))
        .collect();
    assert_eq!(locators.len(), deduped.tasks.len());
    let paths: HashSet<_> = deduped.tasks.iter().map(|task| task.relative_path.clone()).collect();
    assert_eq!(paths.len(), deduped.tasks.len());
}

#[test]
fn window_mode_keeps_event_windows_apart() {
    let events = CatalogLoader::parse(
        r#"[
            {"id": "a", "initial_date": "2020-08-30", "min_lon": -120, "min_lat": 38, "max_lon": -119, "max_lat": 39},
            {"id": "b", "initial_date": "2020-08-01", "min_lon": -120, "min_lat": 38, "max_lon": -119, "max_lat": 39}
        ]"#,
    )
    .unwrap();
    let planner = RegionPlanner::new(PlannerOptions {
        mode: FetchMode::Window,
        ..PlannerOptions::default()
    });
    let builder = RequestBuilder::default();
    let august: Period = "202008".parse().unwrap();

    let locators: Vec<String> = events
        .iter()
        .map(|event| {
            let plan = planner.plan(event).unwrap();
            builder
                .build(Variable::Air, august, plan.bbox, plan.query_window(&august))
                .unwrap()
                .locator
        })
        .collect();
    assert_ne!(locators[0], locators[1]);
}
