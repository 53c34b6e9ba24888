//! API integration tests for the read projection server.

use chrono::{DateTime, Utc};
use serde_json::Value;
use speedwatch::server::{AppState, create_router};
use speedwatch::{Measurement, MeasurementGroup, MeasurementStore};
use tokio::net::TcpListener;

// =============================================================================
// Test Helpers
// =============================================================================

fn group_at(secs: i64) -> MeasurementGroup {
    let date = DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
    MeasurementGroup {
        date,
        results: vec![Measurement {
            server_id: "16683".to_string(),
            timestamp: date,
            ping_ms: 15.0,
            download_bps: 94_000_000.0,
            upload_bps: 12_000_000.0,
            bytes_received: 110_000_000,
            bytes_sent: 16_000_000,
            share_url: Some("http://www.speedtest.net/result/1.png".to_string()),
            server: serde_json::json!({"sponsor": "Example Host", "id": "16683"}),
            client: serde_json::json!({"isp": "Example ISP"}),
        }],
    }
}

/// Start a test server over a fresh store and return its base URL.
async fn start_test_server(view_limit: usize) -> (String, MeasurementStore) {
    let store = MeasurementStore::new();
    let router = create_router(AppState {
        store: store.clone(),
        view_limit,
    });

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // Give server time to start
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (format!("http://{}", addr), store)
}

// =============================================================================
// Health Probe Tests
// =============================================================================

#[tokio::test]
async fn test_healthz_reports_group_count() {
    let (base_url, store) = start_test_server(24).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/healthz", base_url))
        .send()
        .await
        .expect("Failed to send healthz request");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("Failed to parse healthz response");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["groups"], 0);

    store.append(group_at(100));
    let body: Value = client
        .get(format!("{}/healthz", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["groups"], 1);
}

// =============================================================================
// Groups API Tests
// =============================================================================

#[tokio::test]
async fn test_groups_api_returns_newest_first() {
    let (base_url, store) = start_test_server(24).await;
    store.append(group_at(100));
    store.append(group_at(300));
    store.append(group_at(200));

    let client = reqwest::Client::new();
    let body: Value = client
        .get(format!("{}/api/groups", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let groups = body.as_array().expect("expected JSON array");
    assert_eq!(groups.len(), 3);
    let dates: Vec<&str> = groups
        .iter()
        .map(|g| g["date"].as_str().unwrap())
        .collect();
    let mut sorted = dates.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(dates, sorted, "groups must be sorted newest first");

    // Measurement payload passes through untouched.
    let result = &groups[0]["results"][0];
    assert_eq!(result["server_id"], "16683");
    assert_eq!(result["server"]["sponsor"], "Example Host");
    assert_eq!(result["client"]["isp"], "Example ISP");
}

#[tokio::test]
async fn test_groups_api_bounded_by_configured_limit() {
    let (base_url, store) = start_test_server(24).await;
    for i in 0..30 {
        store.append(group_at(1_000 + i));
    }

    let client = reqwest::Client::new();
    let body: Value = client
        .get(format!("{}/api/groups", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let groups = body.as_array().unwrap();
    assert_eq!(groups.len(), 24);
    // The most recent timestamp wins the first slot.
    let first: DateTime<Utc> = groups[0]["date"].as_str().unwrap().parse().unwrap();
    assert_eq!(first.timestamp(), 1_029);
}

#[tokio::test]
async fn test_groups_api_limit_override() {
    let (base_url, store) = start_test_server(24).await;
    for i in 0..10 {
        store.append(group_at(i));
    }

    let client = reqwest::Client::new();
    let body: Value = client
        .get(format!("{}/api/groups?limit=3", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body.as_array().unwrap().len(), 3);
}
