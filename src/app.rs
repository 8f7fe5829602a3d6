use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::config::ResolvedConfig;
use crate::dataset::DatasetCodec;
use crate::dedupe::dedupe;
use crate::domain::{Event, Period, Variable};
use crate::error::{FetchError, FetchErrorKind, ProfileError};
use crate::executor::{FetchExecutor, FetchResult, FetchResults};
use crate::merge::{EventResults, MergeOutcome, ProfileMerger};
use crate::planner::{RegionPlan, RegionPlanner};
use crate::request::{FetchTask, RequestBuilder};
use crate::retry::policy_for;
use crate::store::Store;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

/// Receives phase messages and per-step progress. Steps of the fetch phase
/// arrive from worker threads.
pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);

    /// A phase of `total` countable steps begins.
    fn begin(&self, _phase: &str, _total: usize) {}

    /// One step of the current phase finished.
    fn step(&self, _detail: &str) {}

    fn end(&self) {}
}

/// One (variable, period) input an event needs. `task` is absent when the
/// request could not be built.
#[derive(Debug, Clone, Serialize)]
pub struct RequiredInput {
    pub variable: Variable,
    pub period: Period,
    pub task: Option<FetchTask>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedEvent {
    pub plan: RegionPlan,
    pub inputs: Vec<RequiredInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedEvent {
    pub event_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DegenerateTask {
    pub event_id: String,
    pub variable: Variable,
    pub period: Period,
    pub reason: String,
}

/// Planned events plus the deduplicated task list that covers all of them.
#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub events: Vec<PlannedEvent>,
    pub skipped: Vec<SkippedEvent>,
    pub degenerate: Vec<DegenerateTask>,
    pub tasks: Vec<FetchTask>,
    pub collapsed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskFailure {
    pub variable: Variable,
    pub period: Period,
    pub locator: String,
    pub error: FetchError,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventReport {
    pub event_id: String,
    pub outcome: MergeOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunCounts {
    pub events: usize,
    pub skipped_events: usize,
    pub degenerate_tasks: usize,
    pub tasks: usize,
    pub deduplicated: usize,
    pub fetched: usize,
    pub reused: usize,
    pub failed: usize,
    pub merged: usize,
    pub incomplete: usize,
    pub merge_failed: usize,
}

/// Persisted as `manifest.json` and printed at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output_root: String,
    pub counts: RunCounts,
    pub skipped: Vec<SkippedEvent>,
    pub degenerate: Vec<DegenerateTask>,
    pub failures: Vec<TaskFailure>,
    pub profiles: Vec<EventReport>,
}

pub struct App<T: Transport, C: DatasetCodec> {
    store: Store,
    variables: Vec<Variable>,
    planner: RegionPlanner,
    requests: RequestBuilder,
    executor: FetchExecutor<T>,
    merger: ProfileMerger<C>,
}

impl<T: Transport, C: DatasetCodec> App<T, C> {
    pub fn new(config: &ResolvedConfig, transport: T, codec: C) -> Self {
        let store = Store::new(config.output_root.clone());
        let executor = FetchExecutor::new(transport, store.clone(), config.executor_options())
            .with_retry_policy(policy_for(config.retries));
        let merger = ProfileMerger::new(
            codec,
            store.clone(),
            config.variables.clone(),
            config.skip_existing,
        );
        Self {
            store,
            variables: config.variables.clone(),
            planner: RegionPlanner::new(config.planner_options()),
            requests: RequestBuilder::new(&config.base_url),
            executor,
            merger,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn transport(&self) -> &T {
        self.executor.transport()
    }

    pub fn codec(&self) -> &C {
        self.merger.codec()
    }

    /// Plans every event and collapses identical requests across events.
    /// Invalid events and degenerate regions are recorded, never fatal.
    pub fn plan(&self, events: &[Event], sink: &dyn ProgressSink) -> RunPlan {
        sink.event(ProgressEvent {
            message: format!("phase=Plan; {} event(s)", events.len()),
            elapsed: None,
        });

        let mut planned = Vec::new();
        let mut skipped = Vec::new();
        let mut degenerate = Vec::new();
        let mut seen = HashSet::new();
        for event in events {
            let plan = match self.planner.plan(event) {
                Ok(plan) => plan,
                Err(err) => {
                    warn!(event = %event.id, %err, "skipping event");
                    skipped.push(SkippedEvent {
                        event_id: event.id.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            // Both would claim the same merged profile.
            if !seen.insert((plan.event_id.clone(), plan.date)) {
                warn!(event = %plan.event_id, date = %plan.date, "skipping duplicate event");
                skipped.push(SkippedEvent {
                    event_id: plan.event_id.clone(),
                    reason: format!(
                        "duplicate event {} on {}",
                        plan.event_id,
                        plan.date.date_naive()
                    ),
                });
                continue;
            }

            let mut inputs = Vec::new();
            for (variable, period) in plan.required(&self.variables) {
                let task = match self.requests.build(
                    variable,
                    period,
                    plan.bbox,
                    plan.query_window(&period),
                ) {
                    Ok(task) => Some(task),
                    Err(err) => {
                        warn!(event = %plan.event_id, %err, "skipping degenerate task");
                        degenerate.push(DegenerateTask {
                            event_id: plan.event_id.clone(),
                            variable,
                            period,
                            reason: err.to_string(),
                        });
                        None
                    }
                };
                inputs.push(RequiredInput {
                    variable,
                    period,
                    task,
                });
            }
            planned.push(PlannedEvent { plan, inputs });
        }

        let deduped = dedupe(
            planned
                .iter()
                .flat_map(|event| event.inputs.iter().filter_map(|input| input.task.clone())),
        );
        info!(
            events = planned.len(),
            skipped = skipped.len(),
            tasks = deduped.tasks.len(),
            collapsed = deduped.collapsed,
            "planned fetches"
        );

        RunPlan {
            events: planned,
            skipped,
            degenerate,
            tasks: deduped.tasks,
            collapsed: deduped.collapsed,
        }
    }

    /// Plans and downloads; no merging.
    pub fn fetch(
        &self,
        events: &[Event],
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, ProfileError> {
        let started_at = Utc::now();
        let plan = self.plan(events, sink);
        self.store.ensure_root()?;
        let results = self.download(&plan, cancel, sink)?;
        self.finish("fetch", started_at, &plan, &results, Vec::new())
    }

    /// Merges from files already on disk; the network is never touched.
    pub fn merge(
        &self,
        events: &[Event],
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, ProfileError> {
        let started_at = Utc::now();
        let plan = self.plan(events, sink);
        self.store.ensure_root()?;
        let results = self.existing_results(&plan.tasks);
        let profiles = self.merge_events(&plan, &results, sink);
        self.finish("merge", started_at, &plan, &results, profiles)
    }

    /// Plan, fetch and merge every event.
    pub fn run(
        &self,
        events: &[Event],
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, ProfileError> {
        let started_at = Utc::now();
        let plan = self.plan(events, sink);
        self.store.ensure_root()?;
        let results = self.download(&plan, cancel, sink)?;
        let profiles = self.merge_events(&plan, &results, sink);
        self.finish("run", started_at, &plan, &results, profiles)
    }

    fn download(
        &self,
        plan: &RunPlan,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<FetchResults, ProfileError> {
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {} task(s)", plan.tasks.len()),
            elapsed: None,
        });
        let start = Instant::now();
        sink.begin("fetch", plan.tasks.len());
        let results = self.executor.execute_with(&plan.tasks, cancel, &|task, result| {
            sink.step(&format!("{} {} {}", task.variable, task.period, result.status()));
        });
        sink.end();
        let results = results?;
        sink.event(ProgressEvent {
            message: "phase=Fetch; done".to_string(),
            elapsed: Some(start.elapsed()),
        });
        Ok(results)
    }

    fn existing_results(&self, tasks: &[FetchTask]) -> FetchResults {
        tasks
            .iter()
            .map(|task| {
                let path = self.store.fetch_path(task);
                let result = if Store::is_populated(&path) {
                    FetchResult::Reused {
                        path: path.to_string(),
                    }
                } else {
                    FetchResult::Failed {
                        error: FetchError::new(FetchErrorKind::Io, format!("{path} not fetched")),
                        attempts: 0,
                    }
                };
                (task.clone(), result)
            })
            .collect()
    }

    fn merge_events(
        &self,
        plan: &RunPlan,
        results: &FetchResults,
        sink: &dyn ProgressSink,
    ) -> Vec<EventReport> {
        sink.event(ProgressEvent {
            message: format!("phase=Merge; {} event(s)", plan.events.len()),
            elapsed: None,
        });
        let start = Instant::now();
        sink.begin("merge", plan.events.len());
        let reports = plan
            .events
            .iter()
            .map(|event| {
                let outcome = self
                    .merger
                    .merge(&event.plan, &event_results(event, results));
                sink.step(&format!("{} {}", event.plan.event_id, outcome.status()));
                EventReport {
                    event_id: event.plan.event_id.clone(),
                    outcome,
                }
            })
            .collect();
        sink.end();
        sink.event(ProgressEvent {
            message: "phase=Merge; done".to_string(),
            elapsed: Some(start.elapsed()),
        });
        reports
    }

    fn finish(
        &self,
        command: &str,
        started_at: DateTime<Utc>,
        plan: &RunPlan,
        results: &FetchResults,
        profiles: Vec<EventReport>,
    ) -> Result<RunSummary, ProfileError> {
        let mut counts = RunCounts {
            events: plan.events.len() + plan.skipped.len(),
            skipped_events: plan.skipped.len(),
            degenerate_tasks: plan.degenerate.len(),
            tasks: plan.tasks.len(),
            deduplicated: plan.collapsed,
            ..RunCounts::default()
        };

        let mut failures = Vec::new();
        for task in &plan.tasks {
            match results.get(task) {
                Some(FetchResult::Fetched { .. }) => counts.fetched += 1,
                Some(FetchResult::Reused { .. }) => counts.reused += 1,
                Some(FetchResult::Failed { error, attempts }) => {
                    counts.failed += 1;
                    failures.push(TaskFailure {
                        variable: task.variable,
                        period: task.period,
                        locator: task.locator.clone(),
                        error: error.clone(),
                        attempts: *attempts,
                    });
                }
                None => {}
            }
        }
        for report in &profiles {
            match report.outcome {
                MergeOutcome::Merged(_) => counts.merged += 1,
                MergeOutcome::Incomplete { .. } => counts.incomplete += 1,
                MergeOutcome::Failed { .. } => counts.merge_failed += 1,
            }
        }

        let summary = RunSummary {
            command: command.to_string(),
            started_at,
            finished_at: Utc::now(),
            output_root: self.store.root().to_string(),
            counts,
            skipped: plan.skipped.clone(),
            degenerate: plan.degenerate.clone(),
            failures,
            profiles,
        };
        Store::write_json_atomic(&self.store.manifest_path(), &summary)?;
        info!(
            fetched = summary.counts.fetched,
            reused = summary.counts.reused,
            failed = summary.counts.failed,
            merged = summary.counts.merged,
            incomplete = summary.counts.incomplete,
            merge_failed = summary.counts.merge_failed,
            "run finished"
        );
        Ok(summary)
    }
}

fn event_results(event: &PlannedEvent, results: &FetchResults) -> EventResults {
    event
        .inputs
        .iter()
        .filter_map(|input| {
            let result = results.get(input.task.as_ref()?)?;
            Some(((input.variable, input.period), result.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::dataset::Dataset;
    use crate::domain::{FetchMode, Footprint, parse_instant};
    use crate::executor::DelayRange;
    use crate::output::JsonOutput;

    #[derive(Default)]
    struct MockTransport {
        calls: Mutex<usize>,
    }

    impl Transport for MockTransport {
        fn fetch(
            &self,
            _locator: &str,
            _sink: &mut dyn Write,
            _cancel: &CancellationToken,
        ) -> Result<u64, FetchError> {
            *self.calls.lock().unwrap() += 1;
            Err(FetchError::new(FetchErrorKind::Status(404), "not found"))
        }
    }

    struct NoCodec;

    impl DatasetCodec for NoCodec {
        fn read(&self, path: &camino::Utf8Path) -> Result<Dataset, ProfileError> {
            Err(ProfileError::Dataset(format!("unexpected read of {path}")))
        }

        fn write(&self, path: &camino::Utf8Path, _dataset: &Dataset) -> Result<(), ProfileError> {
            Err(ProfileError::Dataset(format!("unexpected write of {path}")))
        }
    }

    fn config(root: Utf8PathBuf) -> ResolvedConfig {
        ResolvedConfig {
            output_root: root,
            variables: vec![Variable::Air, Variable::Tke],
            mode: FetchMode::Month,
            concurrency: 2,
            delay: DelayRange::NONE,
            ..ResolvedConfig::default()
        }
    }

    fn event(id: &str, date: &str) -> Event {
        Event {
            id: id.to_string(),
            initial: Some(parse_instant(date).unwrap()),
            footprint: Footprint {
                min_lon: Some(-120.0),
                min_lat: Some(38.0),
                max_lon: Some(-119.0),
                max_lat: Some(39.0),
            },
            area_ha: None,
        }
    }

    #[test]
    fn plan_records_invalid_events_and_collapses_shared_tasks() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("assets")).unwrap();
        let app = App::new(&config(root), MockTransport::default(), NoCodec);

        let mut broken = event("3.0", "2020-08-15");
        broken.footprint.max_lat = None;
        let plan = app.plan(
            &[event("1.0", "2020-08-30"), event("2.0", "2020-08-01"), broken],
            &JsonOutput,
        );

        assert_eq!(plan.events.len(), 2);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].event_id, "3.0");
        // 2 variables x {202007, 202008, 202009}; 202008 is shared.
        assert_eq!(plan.tasks.len(), 6);
        assert_eq!(plan.collapsed, 2);
    }

    #[test]
    fn duplicate_events_are_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("assets")).unwrap();
        let app = App::new(&config(root), MockTransport::default(), NoCodec);

        let mut moved = event("7", "2020-08-15");
        moved.footprint.min_lon = Some(-110.0);
        moved.footprint.max_lon = Some(-109.0);
        let plan = app.plan(
            &[event("7", "2020-08-15"), moved, event("7", "2020-08-16")],
            &JsonOutput,
        );

        assert_eq!(plan.events.len(), 2);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].event_id, "7");
        assert!(plan.skipped[0].reason.contains("duplicate"));
    }

    #[test]
    fn merge_never_touches_the_network() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("assets")).unwrap();
        let app = App::new(&config(root), MockTransport::default(), NoCodec);

        let summary = app.merge(&[event("1.0", "2020-08-15")], &JsonOutput).unwrap();

        assert_eq!(*app.transport().calls.lock().unwrap(), 0);
        assert_eq!(summary.counts.incomplete, 1);
        assert_eq!(summary.counts.failed, 2);
        assert!(Store::is_populated(&app.store().manifest_path()));
    }
}
