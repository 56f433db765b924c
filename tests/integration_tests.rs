use chrono::{Duration, NaiveDate};
use std::env;
use std::f64::consts::PI;
use std::fmt::Write as _;
use std::fs;

use wx_forecast::bootstrap;
use wx_forecast::config::Settings;
use wx_forecast::fetch::BasicClient;
use wx_forecast::inputs::csv_dir;
use wx_forecast::store::{MemoryStore, PredictionStore};
use wx_forecast::types::SourceType;
use wx_forecast::worker::{BootstrapWorker, Trigger};

fn forecast_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, 15).unwrap()
}

fn history_csv() -> String {
    let end = forecast_date() - Duration::days(1);
    let mut csv = String::from("station_id,date,tmax_c,tmin_c,prcp_mm\n");
    for (station, offset) in [("USW1", 12.0), ("USW2", 16.0)] {
        for i in 0..150 {
            let date = end - Duration::days(149 - i);
            let tmean = offset + 8.0 * (2.0 * PI * i as f64 / 365.25).sin();
            writeln!(csv, "{station},{date},{:.1},{:.1},0.0", tmean + 6.0, tmean - 6.0).unwrap();
        }
    }
    csv
}

fn write_data_dir(name: &str) -> String {
    let dir = env::temp_dir().join(name);
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("history.csv"), history_csv()).unwrap();
    fs::write(
        dir.join("stations.csv"),
        "station_id,lat,lon\nUSW1,39.70,-104.90\nUSW2,39.75,-104.95\n",
    )
    .unwrap();
    fs::write(
        dir.join("gridpoints.csv"),
        "grid_id,lat,lon,primary_station_id\nG1,39.72,-104.92,USW1\nG2,60.0,-150.0,\n",
    )
    .unwrap();
    fs::write(
        dir.join("neighbors.csv"),
        "grid_id,station_id,distance_km\nG1,USW1,1.0\nG1,USW2,4.0\n",
    )
    .unwrap();
    fs::write(dir.join("current_temps.json"), r#"{"USW1": 18.5, "USW2": null}"#).unwrap();
    dir.to_str().unwrap().to_string()
}

fn settings() -> Settings {
    Settings {
        gpr_enabled: false,
        horizon_days: 4,
        ..Settings::default()
    }
}

#[tokio::test]
async fn test_csv_dir_bootstrap_end_to_end() {
    let dir = write_data_dir("wx_forecast_it_end_to_end");
    let client = BasicClient::new().unwrap();
    let inputs = csv_dir::load(&dir, &client).await.unwrap();
    let store = MemoryStore::new();

    let stats = bootstrap::run(&settings(), &inputs, &store, forecast_date())
        .await
        .unwrap();

    assert_eq!(stats.stations_forecast, 2);
    assert_eq!(stats.gridpoints_forecast, 1);
    assert_eq!(stats.gridpoints_no_contributors, 1);
    assert!(stats.error_message.is_none());

    assert!(
        store
            .exists(SourceType::Station, "USW1", forecast_date(), 4)
            .await
            .unwrap()
    );
    let grid = store
        .load(SourceType::Gridpoint, "G1", forecast_date(), 4)
        .await
        .unwrap();
    assert!(!grid.is_empty());
    assert!(grid.windows(2).all(|w| w[0].horizon_hours <= w[1].horizon_hours));
    for point in &grid {
        assert!(point.tmin_c <= point.tmean_c + 1e-9 && point.tmean_c <= point.tmax_c + 1e-9);
        assert!(point.prcp_mm >= 0.0);
        assert!((0.1..=1.0).contains(&point.confidence));
        assert_eq!(point.date, forecast_date() + Duration::days(i64::from(point.horizon_hours / 24)));
        assert!(point.model_detail.contains("stations=2"));
    }

    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_store_file_survives_reload() {
    let dir = write_data_dir("wx_forecast_it_store_file");
    let store_path = format!("{dir}/predictions.csv");
    let client = BasicClient::new().unwrap();
    let inputs = csv_dir::load(&dir, &client).await.unwrap();

    let store = MemoryStore::from_csv(&store_path).unwrap();
    bootstrap::run(&settings(), &inputs, &store, forecast_date())
        .await
        .unwrap();
    store.save_csv(&store_path).await.unwrap();
    let rows = store.len().await;

    let reloaded = MemoryStore::from_csv(&store_path).unwrap();
    assert_eq!(reloaded.len().await, rows);
    let stats = bootstrap::run(&settings(), &inputs, &reloaded, forecast_date())
        .await
        .unwrap();
    assert_eq!(stats.stations_existing, 2);
    assert_eq!(stats.gridpoints_existing, 1);
    assert_eq!(reloaded.len().await, rows);

    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_worker_reruns_bootstrap() {
    let dir = write_data_dir("wx_forecast_it_worker");
    let client = BasicClient::new().unwrap();
    let inputs = std::sync::Arc::new(csv_dir::load(&dir, &client).await.unwrap());
    let store = std::sync::Arc::new(MemoryStore::new());

    let run_inputs = inputs.clone();
    let run_store = store.clone();
    let worker = BootstrapWorker::spawn(move |_trigger| {
        let inputs = run_inputs.clone();
        let store = run_store.clone();
        async move {
            bootstrap::run_logged(&settings(), inputs.as_ref(), store.as_ref(), forecast_date()).await
        }
    });
    worker.trigger(Trigger::Manual).await.unwrap();
    let last = worker.subscribe();
    worker.join().await;

    let stats = last.borrow().clone().unwrap();
    assert_eq!(stats.stations_existing, 2);
    assert_eq!(stats.stations_forecast, 0);

    fs::remove_dir_all(&dir).unwrap();
}
