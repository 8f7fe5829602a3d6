use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::{BoundingBox, Period, TimeWindow, Variable};
use crate::error::ProfileError;

pub const DEFAULT_BASE_URL: &str = "https://psl.noaa.gov/thredds/ncss/grid/Datasets/NARR/pressure";

const DIGEST_CHARS: usize = 16;

/// One remote subset request. Identity is `(variable, locator)`: tasks built
/// for different events collapse when their locators match.
#[derive(Debug, Clone, Serialize)]
pub struct FetchTask {
    pub variable: Variable,
    pub period: Period,
    pub bbox: BoundingBox,
    pub window: TimeWindow,
    pub locator: String,
    /// Location under the store root, derived from the locator alone.
    pub relative_path: String,
}

impl PartialEq for FetchTask {
    fn eq(&self, other: &Self) -> bool {
        self.variable == other.variable && self.locator == other.locator
    }
}

impl Eq for FetchTask {}

impl Hash for FetchTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.variable.hash(state);
        self.locator.hash(state);
    }
}

#[derive(Debug, Clone)]
pub struct RequestBuilder {
    base_url: String,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl RequestBuilder {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn build(
        &self,
        variable: Variable,
        period: Period,
        bbox: BoundingBox,
        window: TimeWindow,
    ) -> Result<FetchTask, ProfileError> {
        if bbox.is_degenerate() {
            return Err(ProfileError::DegenerateRegion {
                variable: variable.to_string(),
                period: period.to_string(),
                reason: format!(
                    "zero-area box west={} east={} south={} north={}",
                    bbox.west, bbox.east, bbox.south, bbox.north
                ),
            });
        }
        if bbox.west > bbox.east || bbox.south > bbox.north {
            return Err(ProfileError::DegenerateRegion {
                variable: variable.to_string(),
                period: period.to_string(),
                reason: "box edges are inverted".to_string(),
            });
        }

        let locator = self.locator(variable, &period, &bbox, &window);
        let relative_path = content_path(variable, &period, &locator);
        Ok(FetchTask {
            variable,
            period,
            bbox,
            window,
            locator,
            relative_path,
        })
    }

    fn locator(
        &self,
        variable: Variable,
        period: &Period,
        bbox: &BoundingBox,
        window: &TimeWindow,
    ) -> String {
        let params = BTreeMap::from([
            ("accept", "netcdf4-classic".to_string()),
            ("east", format_degrees(bbox.east)),
            ("horizStride", "1".to_string()),
            ("north", format_degrees(bbox.north)),
            ("south", format_degrees(bbox.south)),
            ("time_end", format_instant(window.end)),
            ("time_start", format_instant(window.start)),
            ("west", format_degrees(bbox.west)),
        ]);
        let query = params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        format!(
            "{}/{}.{:04}{:02}.nc?{}",
            self.base_url, variable, period.year, period.month, query
        )
    }
}

fn content_path(variable: Variable, period: &Period, locator: &str) -> String {
    let digest = hex::encode(Sha256::digest(locator.as_bytes()));
    format!(
        "{variable}/{variable}.{period}.{}.nc",
        &digest[..DIGEST_CHARS]
    )
}

fn format_degrees(value: f64) -> String {
    let rendered = format!("{value:.4}");
    if rendered == "-0.0000" {
        "0.0000".to_string()
    } else {
        rendered
    }
}

fn format_instant(instant: chrono::DateTime<chrono::Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::parse_instant;

    fn bbox() -> BoundingBox {
        BoundingBox {
            west: 239.5,
            south: 37.5,
            east: 241.5,
            north: 39.5,
        }
    }

    fn august() -> Period {
        Period::new(2020, 8).unwrap()
    }

    #[test]
    fn locator_is_canonical() {
        let builder = RequestBuilder::default();
        let task = builder
            .build(
                Variable::Air,
                august(),
                bbox(),
                TimeWindow::period(&august()),
            )
            .unwrap();
        assert_eq!(
            task.locator,
            "https://psl.noaa.gov/thredds/ncss/grid/Datasets/NARR/pressure/air.202008.nc?\
             accept=netcdf4-classic&east=241.5000&horizStride=1&north=39.5000&south=37.5000&\
             time_end=2020-08-31T23:59:59Z&time_start=2020-08-01T00:00:00Z&west=239.5000"
        );
        assert!(task.relative_path.starts_with("air/air.202008."));
        assert!(task.relative_path.ends_with(".nc"));
    }

    #[test]
    fn build_is_deterministic() {
        let builder = RequestBuilder::default();
        let window = TimeWindow::around(parse_instant("2020-08-30").unwrap(), 2);
        let first = builder.build(Variable::Shum, august(), bbox(), window).unwrap();
        let second = builder.build(Variable::Shum, august(), bbox(), window).unwrap();
        assert_eq!(first.locator, second.locator);
        assert_eq!(first.relative_path, second.relative_path);
    }

    #[test]
    fn different_windows_give_different_paths() {
        let builder = RequestBuilder::default();
        let first = builder
            .build(
                Variable::Air,
                august(),
                bbox(),
                TimeWindow::around(parse_instant("2020-08-30").unwrap(), 2),
            )
            .unwrap();
        let second = builder
            .build(
                Variable::Air,
                august(),
                bbox(),
                TimeWindow::around(parse_instant("2020-08-01").unwrap(), 2),
            )
            .unwrap();
        assert_ne!(first, second);
        assert_ne!(first.relative_path, second.relative_path);
    }

    #[test]
    fn degenerate_box_is_rejected() {
        let builder = RequestBuilder::default();
        let mut flat = bbox();
        flat.north = flat.south;
        let err = builder
            .build(Variable::Air, august(), flat, TimeWindow::period(&august()))
            .unwrap_err();
        assert_matches!(err, ProfileError::DegenerateRegion { .. });
    }

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let builder = RequestBuilder::new("http://localhost:8080/ncss/");
        let task = builder
            .build(Variable::Tke, august(), bbox(), TimeWindow::period(&august()))
            .unwrap();
        assert!(task.locator.starts_with("http://localhost:8080/ncss/tke.202008.nc?"));
    }
}
