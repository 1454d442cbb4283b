//! HttpJobClient against an in-process warp server

use jobrace_channels::{HttpJobClient, InMemoryChangeFeed, JobSubmitter, JobTransport, TransportError};
use jobrace_core::prelude::*;
use jobrace_core::{HttpChannelConfig, HttpFailurePolicy, JobraceConfig};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use warp::Filter;

/// Port nothing listens on; connections are refused immediately
const REFUSED: &str = "http://127.0.0.1:1/jobs";

fn serve() -> SocketAddr {
    let jobs = warp::post()
        .and(warp::path("jobs"))
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::json())
        .map(|auth: Option<String>, body: Value| {
            warp::reply::json(&json!({
                "job_id": body["job_id"],
                "auth": auth,
                "echo": body["request"],
            }))
        });
    let fail = warp::post().and(warp::path("fail")).map(|| {
        warp::reply::with_status("overloaded", warp::http::StatusCode::SERVICE_UNAVAILABLE)
    });
    let garbage = warp::post().and(warp::path("garbage")).map(|| "not json");

    let (addr, server) = warp::serve(jobs.or(fail).or(garbage)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

fn client(endpoint: String) -> HttpJobClient {
    HttpJobClient::new(
        HttpChannelConfig::new(endpoint).with_request_timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

#[tokio::test]
async fn posts_job_and_decodes_response() {
    let addr = serve();
    let client = HttpJobClient::new(
        HttpChannelConfig::new(format!("http://{addr}/jobs")).with_bearer_token("anon-key"),
    )
    .unwrap();

    let response = client
        .submit(&JobId::from("H1"), json!({ "symbol": "ETHUSDT" }))
        .await
        .unwrap();

    assert_eq!(response["job_id"], "H1");
    assert_eq!(response["auth"], "Bearer anon-key");
    assert_eq!(response["echo"]["symbol"], "ETHUSDT");
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let addr = serve();
    let err = client(format!("http://{addr}/fail"))
        .submit(&JobId::from("H2"), json!({}))
        .await
        .unwrap_err();

    match err {
        TransportError::Status { status, ref body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "overloaded");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.is_transport_level());
}

#[tokio::test]
async fn invalid_json_is_a_decode_error() {
    let addr = serve();
    let err = client(format!("http://{addr}/garbage"))
        .submit(&JobId::from("H3"), json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Decode(_)));
}

#[tokio::test]
async fn refused_connection_is_transport_level() {
    let err = client(REFUSED.to_string())
        .submit(&JobId::from("H4"), json!({}))
        .await
        .unwrap_err();
    assert!(err.is_transport_level());
    assert!(err.to_payload()["error"].is_string());
}

#[tokio::test]
async fn submitter_resolves_on_real_http() {
    let addr = serve();
    let feed = InMemoryChangeFeed::new();
    let arbiter = CompletionArbiter::new(Arc::new(feed), ArbiterConfig::default()).unwrap();
    let submitter = JobSubmitter::new(arbiter, Arc::new(client(format!("http://{addr}/jobs"))));

    let pending = submitter.submit(json!({ "report": "weekly" }));
    let id = pending.job_id().clone();
    let resolution = pending.wait().await.unwrap();

    assert_eq!(resolution.channel, ChannelKind::Http);
    assert_eq!(resolution.outcome.payload()["job_id"], id.as_str());
    assert_eq!(resolution.outcome.payload()["echo"]["report"], "weekly");
}

#[tokio::test]
async fn refused_http_defers_to_change_feed() {
    let feed = InMemoryChangeFeed::new();
    let arbiter = CompletionArbiter::new(Arc::new(feed.clone()), ArbiterConfig::default()).unwrap();
    let submitter = JobSubmitter::new(arbiter.clone(), Arc::new(client(REFUSED.to_string())))
        .with_failure_policy(HttpFailurePolicy::DeferToChannel);

    let pending = submitter.submit(json!({}));
    let id = pending.job_id().clone();

    // Give the refused request time to fail.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(arbiter.is_pending(&id));

    feed.publish(&JobRecord::completed(id, json!({ "setup": "mean-reversion" })));
    let resolution = pending.wait().await.unwrap();
    assert_eq!(resolution.channel, ChannelKind::Channel);
}

#[tokio::test]
async fn refused_http_reports_failure_by_default() {
    let feed = InMemoryChangeFeed::new();
    let arbiter = CompletionArbiter::new(Arc::new(feed), ArbiterConfig::default()).unwrap();
    let submitter = JobSubmitter::new(arbiter, Arc::new(client(REFUSED.to_string())));

    let resolution = submitter.submit(json!({})).wait().await.unwrap();
    assert_eq!(resolution.channel, ChannelKind::Http);
    assert!(resolution.outcome.is_error());
}

#[tokio::test]
async fn configured_policy_defers_refused_http() {
    let config = HttpChannelConfig::new(REFUSED)
        .with_request_timeout(Duration::from_secs(5))
        .with_failure_policy(HttpFailurePolicy::DeferToChannel);
    let feed = InMemoryChangeFeed::new();
    let arbiter = CompletionArbiter::new(Arc::new(feed.clone()), ArbiterConfig::default()).unwrap();
    let transport = Arc::new(HttpJobClient::new(config.clone()).unwrap());
    let submitter = JobSubmitter::from_config(arbiter.clone(), transport, &config);
    assert_eq!(submitter.failure_policy(), HttpFailurePolicy::DeferToChannel);

    let pending = submitter.submit(json!({}));
    let id = pending.job_id().clone();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(arbiter.is_pending(&id));

    feed.publish(&JobRecord::completed(id, json!({ "via": "feed" })));
    let resolution = pending.wait().await.unwrap();
    assert_eq!(resolution.channel, ChannelKind::Channel);
}

#[tokio::test]
async fn configured_default_policy_reports_refused_http() {
    let config = JobraceConfig::from_toml_str(&format!("[http]\nendpoint = \"{REFUSED}\"\n"))
        .unwrap()
        .http;
    let feed = InMemoryChangeFeed::new();
    let arbiter = CompletionArbiter::new(Arc::new(feed), ArbiterConfig::default()).unwrap();
    let transport = Arc::new(HttpJobClient::new(config.clone()).unwrap());
    let submitter = JobSubmitter::from_config(arbiter, transport, &config);

    let resolution = submitter.submit(json!({})).wait().await.unwrap();
    assert_eq!(resolution.channel, ChannelKind::Http);
    assert!(resolution.outcome.is_error());
}
