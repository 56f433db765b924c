//! Loads an [`InputSnapshot`] from a directory of CSV files.
//!
//! The directory may be a local path or an `http(s)://` base URL. Each file
//! is looked up as-is first, then with a `.gz` suffix.
//!
//! | file | columns | required |
//! |---|---|---|
//! | `history.csv` | `station_id,date,tmax_c,tmin_c,prcp_mm` | yes |
//! | `stations.csv` | `station_id,lat,lon` | no |
//! | `gridpoints.csv` | `grid_id,lat,lon,primary_station_id` | no |
//! | `neighbors.csv` | `grid_id,station_id,distance_km` | no |
//! | `current_temps.json` | `{"<station_id>": <temp_c>}` | no |

use anyhow::{Context, Result};
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{HistoryByStation, InputSnapshot};
use crate::fetch::{HttpClient, fetch_bytes, fetch_optional};
use crate::types::{Coordinates, GridPoint, Neighbor, StationObservation};

pub const HISTORY_FILE: &str = "history.csv";
pub const STATIONS_FILE: &str = "stations.csv";
pub const GRIDPOINTS_FILE: &str = "gridpoints.csv";
pub const NEIGHBORS_FILE: &str = "neighbors.csv";
pub const CURRENT_TEMPS_FILE: &str = "current_temps.json";

#[derive(Deserialize)]
struct HistoryRow {
    station_id: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    tmax_c: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    tmin_c: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    prcp_mm: Option<f64>,
}

#[derive(Deserialize)]
struct StationRow {
    station_id: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    lat: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    lon: Option<f64>,
}

#[derive(Deserialize)]
struct GridRow {
    grid_id: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    primary_station_id: Option<String>,
}

#[derive(Deserialize)]
struct NeighborRow {
    grid_id: String,
    station_id: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    distance_km: Option<f64>,
}

fn read_rows<T: DeserializeOwned>(bytes: &[u8], name: &str) -> Result<Vec<T>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes)
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .with_context(|| format!("failed to parse {name}"))
}

/// Groups history rows by station, keeping file order within a station.
pub fn parse_history(bytes: &[u8]) -> Result<HistoryByStation> {
    let mut history = HistoryByStation::new();
    for row in read_rows::<HistoryRow>(bytes, HISTORY_FILE)? {
        history
            .entry(row.station_id)
            .or_default()
            .push(StationObservation {
                date: row.date,
                tmax_c: row.tmax_c,
                tmin_c: row.tmin_c,
                prcp_mm: row.prcp_mm,
            });
    }
    Ok(history)
}

/// Station coordinates. Rows without a usable position are dropped.
pub fn parse_stations(bytes: &[u8]) -> Result<HashMap<String, Coordinates>> {
    Ok(read_rows::<StationRow>(bytes, STATIONS_FILE)?
        .into_iter()
        .filter_map(|row| match (row.lat, row.lon) {
            (Some(lat), Some(lon)) => Some((row.station_id, Coordinates { lat, lon })),
            _ => None,
        })
        .collect())
}

/// Gridpoints without neighbours. An empty primary station column means none.
pub fn parse_gridpoints(bytes: &[u8]) -> Result<Vec<GridPoint>> {
    Ok(read_rows::<GridRow>(bytes, GRIDPOINTS_FILE)?
        .into_iter()
        .map(|row| GridPoint {
            id: row.grid_id,
            lat: row.lat,
            lon: row.lon,
            primary_station_id: row.primary_station_id.filter(|s| !s.is_empty()),
            neighbors: Vec::new(),
        })
        .collect())
}

pub fn parse_neighbors(bytes: &[u8]) -> Result<HashMap<String, Vec<Neighbor>>> {
    let mut by_grid: HashMap<String, Vec<Neighbor>> = HashMap::new();
    for row in read_rows::<NeighborRow>(bytes, NEIGHBORS_FILE)? {
        by_grid.entry(row.grid_id).or_default().push(Neighbor {
            station_id: row.station_id,
            distance_km: row.distance_km,
        });
    }
    Ok(by_grid)
}

/// Null temperatures are dropped.
pub fn parse_current_temps(bytes: &[u8]) -> Result<HashMap<String, f64>> {
    let raw: HashMap<String, Option<f64>> =
        serde_json::from_slice(bytes).with_context(|| format!("failed to parse {CURRENT_TEMPS_FILE}"))?;
    Ok(raw
        .into_iter()
        .filter_map(|(id, t)| t.map(|t| (id, t)))
        .collect())
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .context("failed to decompress gzip input")?;
    Ok(out)
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Reads a single file from a local path or URL, decompressing `.gz`.
#[tracing::instrument(skip(client))]
pub async fn read_source(source: &str, client: &dyn HttpClient) -> Result<Vec<u8>> {
    let bytes = if is_remote(source) {
        fetch_bytes(client, source).await?
    } else {
        tokio::fs::read(source)
            .await
            .with_context(|| format!("failed to read {source}"))?
    };
    if source.ends_with(".gz") {
        gunzip(&bytes)
    } else {
        Ok(bytes)
    }
}

/// Reads `name` (or `name.gz`) from the directory, `None` when neither exists.
async fn read_file(
    location: &str,
    name: &str,
    client: &dyn HttpClient,
) -> Result<Option<Vec<u8>>> {
    let gz_name = format!("{name}.gz");
    for (candidate, compressed) in [(name, false), (gz_name.as_str(), true)] {
        let bytes = if is_remote(location) {
            let url = format!("{}/{}", location.trim_end_matches('/'), candidate);
            fetch_optional(client, &url).await?
        } else {
            let path = Path::new(location).join(candidate);
            if path.exists() {
                Some(
                    tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("failed to read {}", path.display()))?,
                )
            } else {
                None
            }
        };
        if let Some(bytes) = bytes {
            debug!(location, file = candidate, bytes = bytes.len(), "Input file read");
            return if compressed {
                gunzip(&bytes).map(Some)
            } else {
                Ok(Some(bytes))
            };
        }
    }
    Ok(None)
}

/// Reads and parses an optional file. A file that is missing, unreadable or
/// malformed yields `None`; the last two are logged.
async fn read_optional<T>(
    location: &str,
    name: &str,
    client: &dyn HttpClient,
    parse: fn(&[u8]) -> Result<T>,
) -> Option<T> {
    let parsed = match read_file(location, name, client).await {
        Ok(Some(bytes)) => parse(&bytes),
        Ok(None) => return None,
        Err(e) => Err(e),
    };
    parsed
        .inspect_err(|e| warn!(location, file = name, error = %format!("{e:#}"), "Ignoring optional input"))
        .ok()
}

/// Loads every input file found under `location`. Only the history file is
/// required; missing or malformed optional files leave their part of the
/// snapshot empty.
#[tracing::instrument(skip(client))]
pub async fn load(location: &str, client: &dyn HttpClient) -> Result<InputSnapshot> {
    let history = read_file(location, HISTORY_FILE, client)
        .await?
        .with_context(|| format!("{HISTORY_FILE} not found in {location}"))?;
    let history = parse_history(&history)?;

    let coords = read_optional(location, STATIONS_FILE, client, parse_stations)
        .await
        .unwrap_or_else(|| {
            warn!(location, "No {STATIONS_FILE}, station forecasts will not be stored");
            HashMap::new()
        });
    let current_temps = read_optional(location, CURRENT_TEMPS_FILE, client, parse_current_temps)
        .await
        .unwrap_or_default();
    let mut gridpoints = read_optional(location, GRIDPOINTS_FILE, client, parse_gridpoints)
        .await
        .unwrap_or_default();

    if let Some(mut neighbors) = read_optional(location, NEIGHBORS_FILE, client, parse_neighbors).await {
        for grid in &mut gridpoints {
            if let Some(list) = neighbors.remove(&grid.id) {
                grid.neighbors = list;
            }
        }
    }

    info!(
        stations = history.len(),
        located = coords.len(),
        current_temps = current_temps.len(),
        gridpoints = gridpoints.len(),
        "Inputs loaded"
    );

    Ok(InputSnapshot {
        history,
        coords,
        current_temps,
        gridpoints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::env;
    use std::fs;
    use std::io::Write;

    const HISTORY: &str = "station_id,date,tmax_c,tmin_c,prcp_mm\n\
        S1,2024-01-01,5.0,-1.0,0.4\n\
        S1,2024-01-02,6.5,0.5,\n\
        S2,2024-01-01,NA,1.0,0.0\n";

    #[test]
    fn test_parse_history_groups_and_tolerates_gaps() {
        let history = parse_history(HISTORY.as_bytes()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history["S1"].len(), 2);
        assert_eq!(history["S1"][1].prcp_mm, None);
        assert_eq!(history["S2"][0].tmax_c, None);
        assert_eq!(history["S2"][0].tmin_c, Some(1.0));
    }

    #[test]
    fn test_parse_stations_drops_missing_positions() {
        let coords = parse_stations(b"station_id,lat,lon\nS1,39.7,-104.9\nS2,,\n").unwrap();
        assert_eq!(coords.len(), 1);
        assert_eq!(coords["S1"], Coordinates { lat: 39.7, lon: -104.9 });
    }

    #[test]
    fn test_parse_gridpoints_and_neighbors() {
        let grids =
            parse_gridpoints(b"grid_id,lat,lon,primary_station_id\nG1,1.0,2.0,S1\nG2,3.0,4.0,\n")
                .unwrap();
        assert_eq!(grids[0].primary_station_id.as_deref(), Some("S1"));
        assert_eq!(grids[1].primary_station_id, None);

        let neighbors =
            parse_neighbors(b"grid_id,station_id,distance_km\nG1,S1,1.5\nG1,S2,3.0\n").unwrap();
        assert_eq!(neighbors["G1"].len(), 2);
        assert_eq!(neighbors["G1"][1].distance_km, Some(3.0));
    }

    #[test]
    fn test_parse_current_temps_skips_nulls() {
        let temps = parse_current_temps(br#"{"S1": 21.5, "S2": null}"#).unwrap();
        assert_eq!(temps.len(), 1);
        assert_eq!(temps["S1"], 21.5);
    }

    #[tokio::test]
    async fn test_load_local_dir_with_gzip_history() {
        let dir = env::temp_dir().join("wx_forecast_csv_dir_test");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(HISTORY.as_bytes()).unwrap();
        fs::write(dir.join("history.csv.gz"), encoder.finish().unwrap()).unwrap();
        fs::write(dir.join("stations.csv"), "station_id,lat,lon\nS1,39.7,-104.9\n").unwrap();
        fs::write(
            dir.join("gridpoints.csv"),
            "grid_id,lat,lon,primary_station_id\nG1,39.8,-105.0,S1\n",
        )
        .unwrap();
        fs::write(dir.join("neighbors.csv"), "grid_id,station_id,distance_km\nG1,S2,2.5\n")
            .unwrap();

        let client = BasicClient::new().unwrap();
        let snapshot = load(dir.to_str().unwrap(), &client).await.unwrap();
        assert_eq!(snapshot.history.len(), 2);
        assert_eq!(snapshot.coords.len(), 1);
        assert!(snapshot.current_temps.is_empty());
        assert_eq!(snapshot.gridpoints[0].neighbors[0].station_id, "S2");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_load_ignores_malformed_optional_files() {
        let dir = env::temp_dir().join("wx_forecast_csv_dir_bad_optional_test");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("history.csv"), HISTORY).unwrap();
        fs::write(dir.join("current_temps.json"), r#"{"S1": "warm"}"#).unwrap();
        fs::write(dir.join("stations.csv"), "station_id,lat,lon\nS1,39.7\n").unwrap();
        fs::write(
            dir.join("gridpoints.csv"),
            "grid_id,lat,lon,primary_station_id\nG1,39.8,-105.0,S1\n",
        )
        .unwrap();
        fs::write(dir.join("neighbors.csv"), "grid_id,station_id,distance_km\nG1\n").unwrap();

        let client = BasicClient::new().unwrap();
        let snapshot = load(dir.to_str().unwrap(), &client).await.unwrap();
        assert_eq!(snapshot.history.len(), 2);
        assert!(snapshot.current_temps.is_empty());
        assert!(snapshot.coords.is_empty());
        assert_eq!(snapshot.gridpoints.len(), 1);
        assert!(snapshot.gridpoints[0].neighbors.is_empty());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_load_requires_history() {
        let dir = env::temp_dir().join("wx_forecast_csv_dir_empty_test");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let client = BasicClient::new().unwrap();
        assert!(load(dir.to_str().unwrap(), &client).await.is_err());

        fs::remove_dir_all(&dir).unwrap();
    }
}
