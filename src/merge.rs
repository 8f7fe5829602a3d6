use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use ndarray::Axis;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::dataset::{AttrValue, Dataset, DatasetCodec};
use crate::domain::{FetchMode, Period, TimeWindow, Variable};
use crate::error::ProfileError;
use crate::executor::FetchResult;
use crate::planner::RegionPlan;
use crate::store::Store;

const TIME: &str = "time";
const TIME_AXIS: Axis = Axis(0);

/// Fetch outcomes relevant to one event, keyed by what the plan requires.
pub type EventResults = BTreeMap<(Variable, Period), FetchResult>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingInput {
    pub variable: Variable,
    pub period: Period,
    pub reason: String,
}

/// One per-event multi-variable file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventProfile {
    pub event_id: String,
    pub path: String,
    pub variables: Vec<Variable>,
    pub periods: Vec<Period>,
    /// Absent when an existing profile was kept without reading it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_steps: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_values_repaired: Option<usize>,
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeOutcome {
    Merged(EventProfile),
    Incomplete { missing: Vec<MissingInput> },
    Failed { reason: String },
}

impl MergeOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            MergeOutcome::Merged(profile) if profile.reused => "kept",
            MergeOutcome::Merged(_) => "merged",
            MergeOutcome::Incomplete { .. } => "incomplete",
            MergeOutcome::Failed { .. } => "failed",
        }
    }

    /// The per-event error this outcome represents, if any.
    pub fn error(&self, event_id: &str) -> Option<ProfileError> {
        match self {
            MergeOutcome::Merged(_) => None,
            MergeOutcome::Incomplete { missing } => Some(ProfileError::MergeIncomplete {
                event_id: event_id.to_string(),
                missing: missing.len(),
            }),
            MergeOutcome::Failed { reason } => Some(ProfileError::MergeFailure {
                event_id: event_id.to_string(),
                reason: reason.clone(),
            }),
        }
    }
}

pub struct ProfileMerger<C: DatasetCodec> {
    codec: C,
    store: Store,
    variables: Vec<Variable>,
    skip_existing: bool,
}

impl<C: DatasetCodec> ProfileMerger<C> {
    pub fn new(codec: C, store: Store, variables: Vec<Variable>, skip_existing: bool) -> Self {
        Self {
            codec,
            store,
            variables,
            skip_existing,
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Builds the event's profile when every required input was fetched.
    /// Nothing is written for incomplete or failed events.
    pub fn merge(&self, plan: &RegionPlan, results: &EventResults) -> MergeOutcome {
        let mut inputs: Vec<(Variable, Vec<Utf8PathBuf>)> = Vec::new();
        let mut missing = Vec::new();
        for variable in &self.variables {
            let mut paths = Vec::new();
            for period in &plan.periods {
                match results.get(&(*variable, *period)) {
                    Some(result) => match result.path() {
                        Some(path) => paths.push(Utf8PathBuf::from(path)),
                        None => missing.push(MissingInput {
                            variable: *variable,
                            period: *period,
                            reason: failure_reason(result),
                        }),
                    },
                    None => missing.push(MissingInput {
                        variable: *variable,
                        period: *period,
                        reason: "no fetch task".to_string(),
                    }),
                }
            }
            inputs.push((*variable, paths));
        }

        if !missing.is_empty() {
            warn!(
                event = %plan.event_id,
                missing = missing.len(),
                "profile incomplete, skipping merge"
            );
            return MergeOutcome::Incomplete { missing };
        }

        let dest = self.store.merged_path(&plan.event_id, &plan.date);
        if self.skip_existing && Store::is_populated(&dest) {
            debug!(event = %plan.event_id, path = %dest, "reusing merged profile");
            return MergeOutcome::Merged(EventProfile {
                event_id: plan.event_id.clone(),
                path: dest.to_string(),
                variables: self.variables.clone(),
                periods: plan.periods.iter().copied().collect(),
                time_steps: None,
                fill_values_repaired: None,
                reused: true,
            });
        }

        match self.build(plan, &inputs).and_then(|(dataset, repaired)| {
            self.write(&dest, &dataset)?;
            Ok((dataset, repaired))
        }) {
            Ok((dataset, repaired)) => {
                let time_steps = dataset.dimension(TIME).map(|dim| dim.len).unwrap_or(0);
                info!(
                    event = %plan.event_id,
                    path = %dest,
                    time_steps,
                    "profile merged"
                );
                MergeOutcome::Merged(EventProfile {
                    event_id: plan.event_id.clone(),
                    path: dest.to_string(),
                    variables: self.variables.clone(),
                    periods: plan.periods.iter().copied().collect(),
                    time_steps: Some(time_steps),
                    fill_values_repaired: Some(repaired),
                    reused: false,
                })
            }
            Err(reason) => {
                error!(event = %plan.event_id, %reason, "merge failed");
                MergeOutcome::Failed { reason }
            }
        }
    }

    fn build(
        &self,
        plan: &RegionPlan,
        inputs: &[(Variable, Vec<Utf8PathBuf>)],
    ) -> Result<(Dataset, usize), String> {
        let mut merged: Option<Dataset> = None;
        for (variable, paths) in inputs {
            let mut combined: Option<Dataset> = None;
            for path in paths {
                let dataset = self.codec.read(path).map_err(|err| err.to_string())?;
                combined = Some(match combined {
                    None => dataset,
                    Some(acc) => concat_time(acc, &dataset)
                        .map_err(|reason| format!("{variable}: {reason}"))?,
                });
            }
            let Some(combined) = combined else {
                continue;
            };
            merged = Some(match merged {
                None => combined,
                Some(acc) => union(acc, &combined)?,
            });
        }

        let mut dataset = merged.ok_or_else(|| "no input files".to_string())?;
        drop_grid_mappings(&mut dataset);
        let repaired = repair_fill_values(&mut dataset);
        if plan.mode != FetchMode::Slice {
            clip_time(&mut dataset, &plan.window)?;
        }
        Ok((dataset, repaired))
    }

    fn write(&self, dest: &camino::Utf8Path, dataset: &Dataset) -> Result<(), String> {
        let staged = Store::staging_path(dest).map_err(|err| err.to_string())?;
        let staged_path = Utf8PathBuf::from_path_buf(staged.to_path_buf())
            .map_err(|path| format!("non UTF-8 staging path {}", path.display()))?;
        self.codec
            .write(&staged_path, dataset)
            .map_err(|err| err.to_string())?;
        Store::persist_path(staged, dest).map_err(|err| err.to_string())
    }
}

fn failure_reason(result: &FetchResult) -> String {
    match result {
        FetchResult::Failed { error, .. } => error.to_string(),
        _ => "no output file".to_string(),
    }
}

/// Appends `next` to `acc` along the time axis. Variables without a time
/// axis must be identical in both.
pub fn concat_time(mut acc: Dataset, next: &Dataset) -> Result<Dataset, String> {
    let acc_len = acc
        .dimension(TIME)
        .map(|dim| dim.len)
        .ok_or("missing time dimension")?;
    let next_len = next
        .dimension(TIME)
        .map(|dim| dim.len)
        .ok_or("missing time dimension")?;

    for dim in next.dims.iter().filter(|dim| dim.name != TIME) {
        match acc.dimension(&dim.name) {
            Some(existing) if existing.len == dim.len => {}
            Some(existing) => {
                return Err(format!(
                    "dimension {} changes length between periods ({} vs {})",
                    dim.name, existing.len, dim.len
                ));
            }
            None => return Err(format!("dimension {} appears in one period only", dim.name)),
        }
    }
    if let Some(extra) = next.vars.iter().find(|var| acc.variable(&var.name).is_none()) {
        return Err(format!("variable {} appears in one period only", extra.name));
    }

    for var in &mut acc.vars {
        let other = next
            .variable(&var.name)
            .ok_or_else(|| format!("variable {} appears in one period only", var.name))?;
        if var.dims != other.dims {
            return Err(format!("variable {} changes dimensions between periods", var.name));
        }
        if var.leads_with(TIME) {
            var.values = var
                .values
                .concat(&other.values, TIME_AXIS)
                .map_err(|reason| format!("variable {}: {reason}", var.name))?;
        } else if var.dims.iter().any(|dim| dim == TIME) {
            return Err(format!("variable {} has a non-leading time axis", var.name));
        } else if var.values != other.values {
            return Err(format!("coordinate {} differs between periods", var.name));
        }
    }

    acc.set_dimension_len(TIME, acc_len + next_len);
    Ok(acc)
}

/// Adds `other`'s dimensions and variables to `acc`. Anything present in both
/// must agree exactly.
pub fn union(mut acc: Dataset, other: &Dataset) -> Result<Dataset, String> {
    for dim in &other.dims {
        match acc.dimension(&dim.name) {
            Some(existing) if existing.len != dim.len => {
                return Err(format!(
                    "dimension {} differs across variables ({} vs {})",
                    dim.name, existing.len, dim.len
                ));
            }
            Some(_) => {}
            None => acc.dims.push(dim.clone()),
        }
    }
    for var in &other.vars {
        match acc.variable(&var.name) {
            Some(existing) if existing.dims != var.dims || existing.values != var.values => {
                return Err(format!("shared variable {} differs across variables", var.name));
            }
            Some(_) => {}
            None => acc.vars.push(var.clone()),
        }
    }
    Ok(acc)
}

/// Removes grid-mapping descriptor variables and references to them.
pub fn drop_grid_mappings(dataset: &mut Dataset) -> Vec<String> {
    let dropped: Vec<String> = dataset
        .vars
        .iter()
        .filter(|var| var.attr("grid_mapping_name").is_some())
        .map(|var| var.name.clone())
        .collect();
    if dropped.is_empty() {
        return dropped;
    }
    dataset.vars.retain(|var| !dropped.contains(&var.name));
    for var in &mut dataset.vars {
        let references_dropped = var
            .attr("grid_mapping")
            .and_then(AttrValue::as_text)
            .map(|name| dropped.iter().any(|dropped| dropped == name.trim()))
            .unwrap_or(false);
        if references_dropped {
            var.remove_attr("grid_mapping");
        }
    }
    debug!(dropped = ?dropped, "dropped grid mapping variables");
    dropped
}

/// Sets `_FillValue` from `missing_value`, cast to each variable's storage
/// type. Returns how many variables were touched.
pub fn repair_fill_values(dataset: &mut Dataset) -> usize {
    let mut repaired = 0;
    for var in &mut dataset.vars {
        let Some(missing) = var
            .attr("missing_value")
            .and_then(AttrValue::as_number)
            .and_then(|values| values.first_f64())
        else {
            continue;
        };
        let fill = var.values.scalar_like(missing);
        var.set_attr("_FillValue", AttrValue::Number(fill));
        repaired += 1;
    }
    repaired
}

/// Keeps only the time steps whose decoded instant lies inside `window`.
pub fn clip_time(dataset: &mut Dataset, window: &TimeWindow) -> Result<usize, String> {
    let Some(time) = dataset.variable(TIME) else {
        return Ok(0);
    };
    let units = time
        .attr("units")
        .and_then(AttrValue::as_text)
        .ok_or("time variable has no units")?;
    let (step_seconds, reference) = parse_time_units(units)?;

    let instants = time
        .values
        .to_f64()
        .into_iter()
        .map(|offset| offset_instant(reference, step_seconds, offset))
        .collect::<Result<Vec<_>, _>>()?;
    let keep: Vec<usize> = instants
        .iter()
        .enumerate()
        .filter(|(_, instant)| window.contains(instant))
        .map(|(idx, _)| idx)
        .collect();

    if keep.is_empty() {
        return Err(format!(
            "no time steps between {} and {}",
            window.start, window.end
        ));
    }
    if keep.len() == instants.len() {
        return Ok(keep.len());
    }

    for var in dataset.vars.iter_mut().filter(|var| var.leads_with(TIME)) {
        var.values = var.values.select(TIME_AXIS, &keep);
    }
    dataset.set_dimension_len(TIME, keep.len());
    Ok(keep.len())
}

/// Decodes CF `<unit> since <reference>` into seconds per step and the
/// reference instant (UTC).
pub fn parse_time_units(units: &str) -> Result<(f64, DateTime<Utc>), String> {
    let (unit, reference) = units
        .split_once(" since ")
        .ok_or_else(|| format!("unsupported time units {units:?}"))?;
    let step_seconds = match unit.trim().to_ascii_lowercase().as_str() {
        "days" | "day" | "d" => 86_400.0,
        "hours" | "hour" | "hrs" | "hr" | "h" => 3_600.0,
        "minutes" | "minute" | "mins" | "min" => 60.0,
        "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
        other => return Err(format!("unsupported time unit {other:?}")),
    };
    Ok((step_seconds, parse_reference(reference)?))
}

fn parse_reference(text: &str) -> Result<DateTime<Utc>, String> {
    let text = text.trim().trim_end_matches("UTC").trim().trim_end_matches('Z');
    let (date, clock) = match text.split_once(['T', ' ']) {
        Some((date, clock)) => (date, clock.trim()),
        None => (text, ""),
    };
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|err| format!("bad time reference {text:?}: {err}"))?;

    // Offsets other than UTC do not occur in the reanalysis files.
    let clock = clock.split(['+', 'Z']).next().unwrap_or_default();
    let mut seconds = 0.0;
    for (field, scale) in clock.split(':').zip([3_600.0, 60.0, 1.0]) {
        if field.is_empty() {
            continue;
        }
        let value: f64 = field
            .parse()
            .map_err(|_| format!("bad time reference clock {clock:?}"))?;
        seconds += value * scale;
    }

    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| format!("bad time reference {text:?}"))?
        .and_utc();
    offset_instant(midnight, 1.0, seconds)
}

fn offset_instant(
    reference: DateTime<Utc>,
    step_seconds: f64,
    offset: f64,
) -> Result<DateTime<Utc>, String> {
    let millis = (offset * step_seconds * 1000.0).round();
    TimeDelta::try_milliseconds(millis as i64)
        .and_then(|delta| reference.checked_add_signed(delta))
        .ok_or_else(|| format!("time offset {offset} out of range"))
}
