use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

/// NARR pressure-level variables served by the remote catalog.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Variable {
    Air,
    Hgt,
    Omega,
    Shum,
    Tke,
    Uwnd,
    Vwnd,
}

impl Variable {
    pub const ALL: [Variable; 7] = [
        Variable::Air,
        Variable::Hgt,
        Variable::Omega,
        Variable::Shum,
        Variable::Tke,
        Variable::Uwnd,
        Variable::Vwnd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variable::Air => "air",
            Variable::Hgt => "hgt",
            Variable::Omega => "omega",
            Variable::Shum => "shum",
            Variable::Tke => "tke",
            Variable::Uwnd => "uwnd",
            Variable::Vwnd => "vwnd",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Variable::Air => "air temperature",
            Variable::Hgt => "geopotential height",
            Variable::Omega => "vertical velocity in pressure coordinates",
            Variable::Shum => "specific humidity",
            Variable::Tke => "turbulent kinetic energy",
            Variable::Uwnd => "u-component of wind",
            Variable::Vwnd => "v-component of wind",
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Variable {
    type Err = ProfileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Variable::ALL
            .into_iter()
            .find(|variable| variable.as_str() == normalized)
            .ok_or_else(|| ProfileError::InvalidVariable(value.to_string()))
    }
}

/// How the time dimension of each request is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Request the whole period; the event window is applied when merging.
    #[default]
    Month,
    /// Request the event window; the server intersects it with the period.
    Window,
    /// Request the exact event instant.
    Slice,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMode::Month => write!(f, "month"),
            FetchMode::Window => write!(f, "window"),
            FetchMode::Slice => write!(f, "slice"),
        }
    }
}

impl FromStr for FetchMode {
    type Err = ProfileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "month" => Ok(FetchMode::Month),
            "window" => Ok(FetchMode::Window),
            "slice" => Ok(FetchMode::Slice),
            _ => Err(ProfileError::InvalidMode(value.to_string())),
        }
    }
}

/// One remote file's temporal granularity: a calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn of(instant: &DateTime<Utc>) -> Self {
        Self {
            year: instant.year(),
            month: instant.month(),
        }
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn days(&self) -> u32 {
        let next = self.next();
        match (
            NaiveDate::from_ymd_opt(self.year, self.month, 1),
            NaiveDate::from_ymd_opt(next.year, next.month, 1),
        ) {
            (Some(first), Some(following)) => (following - first).num_days() as u32,
            _ => 30,
        }
    }

    pub fn first_instant(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
    }

    pub fn last_instant(&self) -> DateTime<Utc> {
        self.next().first_instant() - Duration::seconds(1)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = ProfileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = trimmed.len() == 6 && trimmed.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(ProfileError::InvalidDate(value.to_string()));
        }
        let year = trimmed[..4]
            .parse()
            .map_err(|_| ProfileError::InvalidDate(value.to_string()))?;
        let month = trimmed[4..]
            .parse()
            .map_err(|_| ProfileError::InvalidDate(value.to_string()))?;
        Period::new(year, month).ok_or_else(|| ProfileError::InvalidDate(value.to_string()))
    }
}

/// `(west, south, east, north)` in unsigned degrees east.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn is_degenerate(&self) -> bool {
        self.west == self.east || self.south == self.north
    }
}

/// Closed interval of UTC instants. A time slice has `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn around(instant: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: instant - Duration::days(days),
            end: instant + Duration::days(days),
        }
    }

    pub fn slice(instant: DateTime<Utc>) -> Self {
        Self {
            start: instant,
            end: instant,
        }
    }

    pub fn period(period: &Period) -> Self {
        Self {
            start: period.first_instant(),
            end: period.last_instant(),
        }
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        *instant >= self.start && *instant <= self.end
    }
}

/// Footprint rectangle as delivered by the catalog; any component may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Footprint {
    pub min_lon: Option<f64>,
    pub min_lat: Option<f64>,
    pub max_lon: Option<f64>,
    pub max_lat: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub id: String,
    pub initial: Option<DateTime<Utc>>,
    pub footprint: Footprint,
    pub area_ha: Option<f64>,
}

/// Parses `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS[Z]` or RFC 3339 into a UTC instant.
pub fn parse_instant(value: &str) -> Result<DateTime<Utc>, ProfileError> {
    let trimmed = value.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(instant.with_timezone(&Utc));
    }
    let without_zone = trimmed.trim_end_matches('Z');
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(without_zone, format) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ProfileError::InvalidDate(value.to_string()))
}
