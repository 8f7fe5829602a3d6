use std::fs;

use camino::Utf8Path;
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::{Event, Footprint, parse_instant};
use crate::error::ProfileError;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Events(Vec<CatalogEntry>),
    Wrapped { events: Vec<CatalogEntry> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EventId {
    Text(String),
    Number(f64),
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: EventId,
    #[serde(default)]
    initial_date: Option<String>,
    #[serde(default)]
    min_lon: Option<f64>,
    #[serde(default)]
    min_lat: Option<f64>,
    #[serde(default)]
    max_lon: Option<f64>,
    #[serde(default)]
    max_lat: Option<f64>,
    #[serde(default)]
    area_ha: Option<f64>,
}

impl EventId {
    /// Numeric ids keep one decimal, matching the upstream fire catalog.
    fn render(&self) -> String {
        match self {
            EventId::Text(text) => text.trim().to_string(),
            EventId::Number(number) => format!("{number:.1}"),
        }
    }
}

pub struct CatalogLoader;

impl CatalogLoader {
    pub fn load(path: &Utf8Path) -> Result<Vec<Event>, ProfileError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| ProfileError::CatalogRead(path.as_std_path().to_path_buf()))?;
        let events = Self::parse(&content)?;
        info!(path = %path, events = events.len(), "loaded catalog");
        Ok(events)
    }

    pub fn parse(content: &str) -> Result<Vec<Event>, ProfileError> {
        let file: CatalogFile = serde_json::from_str(content)
            .map_err(|err| ProfileError::CatalogParse(err.to_string()))?;
        let entries = match file {
            CatalogFile::Events(entries) => entries,
            CatalogFile::Wrapped { events } => events,
        };
        Ok(entries.into_iter().map(to_event).collect())
    }
}

fn to_event(entry: CatalogEntry) -> Event {
    let id = entry.id.render();
    let initial = match entry.initial_date.as_deref() {
        Some(raw) => match parse_instant(raw) {
            Ok(instant) => Some(instant),
            Err(err) => {
                warn!(event = %id, %err, "unparseable initial date");
                None
            }
        },
        None => None,
    };
    Event {
        id,
        initial,
        footprint: Footprint {
            min_lon: entry.min_lon,
            min_lat: entry.min_lat,
            max_lon: entry.max_lon,
            max_lat: entry.max_lat,
        },
        area_ha: entry.area_ha,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_bare_array() {
        let events = CatalogLoader::parse(
            r#"[{"id": 1234, "initial_date": "2020-08-30", "min_lon": -120.5,
                 "min_lat": 38.0, "max_lon": -119.0, "max_lat": 39.0, "area_ha": 5120.5}]"#,
        )
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "1234.0");
        assert_eq!(events[0].footprint.min_lon, Some(-120.5));
        assert_eq!(events[0].area_ha, Some(5120.5));
        assert_eq!(
            events[0].initial.map(|date| date.to_rfc3339()),
            Some("2020-08-30T00:00:00+00:00".to_string())
        );
    }

    #[test]
    fn parses_wrapped_object_with_nulls() {
        let events = CatalogLoader::parse(
            r#"{"events": [{"id": "CA-17", "initial_date": "not a date",
                            "min_lon": null, "min_lat": 1.0}]}"#,
        )
        .unwrap();
        assert_eq!(events[0].id, "CA-17");
        assert_eq!(events[0].initial, None);
        assert_eq!(events[0].footprint.min_lon, None);
        assert_eq!(events[0].footprint.max_lat, None);
    }

    #[test]
    fn rejects_malformed_catalog() {
        let err = CatalogLoader::parse(r#"{"fires": 3}"#).unwrap_err();
        assert_matches!(err, ProfileError::CatalogParse(_));
    }
}
