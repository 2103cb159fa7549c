use assert_json_diff::assert_json_eq;
use common_redis::{Client, CustomRedisError};
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::common::*;

mod common;

#[tokio::test]
async fn seed_data_replaces_lists() {
    let server = ServerHandle::new().await;
    let csv = TempCsv::new("1:follower_ids,2,3\n2:followee_ids,1\n3:followee_ids,1\n");

    let response = server.seed("data", csv.location()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_json_eq!(body, json!({"cache": "data", "rows": 3}));
    assert_eq!(server.data.list("1:follower_ids"), vec!["2", "3"]);
    assert_eq!(server.data.list("3:followee_ids"), vec!["1"]);
    assert!(server.html.get_calls().is_empty());

    // A second load replaces instead of appending
    let csv = TempCsv::new("1:follower_ids,4\n");
    let response = server.seed("data", csv.location()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(server.data.list("1:follower_ids"), vec!["4"]);
}

#[tokio::test]
async fn seed_html_stores_fragments_verbatim() {
    let server = ServerHandle::new().await;
    let csv = TempCsv::new(
        "1:followers,\"<div class=\"\"user-container\"\">@bob</div>\"\n\
         2:followees,\"<div class=\"\"user-container\"\">@alice</div>\"\n",
    );

    let response = server.seed("html", csv.location()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        server.html.list("1:followers"),
        vec!["<div class=\"user-container\">@bob</div>"]
    );
    assert!(server.data.get_calls().is_empty());
}

#[tokio::test]
async fn seeded_followers_are_used_by_the_fanout() {
    let server = ServerHandle::new().await;
    let csv = TempCsv::new("1:follower_ids,5,6\n");
    assert_eq!(
        server.seed("data", csv.location()).await.status(),
        StatusCode::OK
    );

    server.send_tweet(json!({"tweet_id": 20, "author_id": 1}));
    assert_or_retry(|| server.bus.pending(&server.config.fanout_data_topic) == 1).await;

    assert_json_eq!(
        server.pop_fanout_data().unwrap(),
        json!({"tweet_id": 20, "follower_ids": ["5", "6"]})
    );
}

#[tokio::test]
async fn malformed_rows_reject_the_whole_load() {
    let server = ServerHandle::new().await;
    let csv = TempCsv::new("1:follower_ids,2\n1:followers,3\n2:followee_ids,abc\n");

    let response = server.seed("data", csv.location()).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    let rows: Vec<u64> = body["failures"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["row"].as_u64().unwrap())
        .collect();
    assert_eq!(rows, vec![2, 3]);
    assert!(server.data.get_calls().is_empty());
}

#[tokio::test]
async fn unreadable_sources_are_bad_requests() {
    let server = ServerHandle::new().await;

    let response = server.seed("data", "/nonexistent/seed.csv").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = reqwest::Client::new()
        .post(format!("http://{}/seed/html", server.addr))
        .form(&[("other", "value")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn json_bodies_are_accepted() {
    let server = ServerHandle::new().await;
    let csv = TempCsv::new("9:followee_ids,1\n");

    let response = reqwest::Client::new()
        .post(format!("http://{}/seed/data", server.addr))
        .json(&json!({"csv_url": csv.location()}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(server.data.list("9:followee_ids"), vec!["1"]);
}

#[tokio::test]
async fn failed_rows_are_reported_and_the_rest_applied() {
    let server = ServerHandle::new().await;
    server
        .data
        .fail("replace_list", "2:follower_ids", CustomRedisError::Timeout, 1);
    let csv = TempCsv::new("1:follower_ids,5\n2:follower_ids,6\n");

    let response = server.seed("data", csv.location()).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["failures"][0]["key"], "2:follower_ids");
    assert_eq!(server.data.list("1:follower_ids"), vec!["5"]);
}

#[tokio::test]
async fn unknown_cache_is_not_found() {
    let server = ServerHandle::new().await;
    let csv = TempCsv::new("1:follower_ids,5\n");

    let response = server.seed("timeline", csv.location()).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn seeded_values_are_stored_byte_for_byte() {
    let server = ServerHandle::new().await;
    let csv = TempCsv::new("1:followers,\"  <div class=\"\"user-container\"\">@b</div> \"\n");

    let response = server.seed("html", csv.location()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        server.html.list("1:followers"),
        vec!["  <div class=\"user-container\">@b</div> "]
    );
}

#[tokio::test]
async fn rejected_rows_do_not_echo_the_source() {
    let server = ServerHandle::new().await;
    let csv = TempCsv::new(
        "root:x:0:0:root:/root:/bin/bash\n\
         daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n",
    );

    let response = server.seed("data", csv.location()).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response.text().await.unwrap();
    for leaked in ["root:x", "daemon", "/bin/bash", "nologin"] {
        assert!(!body.contains(leaked), "{leaked} found in {body}");
    }
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["failures"].as_array().unwrap().len(), 2);
    assert!(body["failures"][0].get("key").is_none());
    assert!(server.data.get_calls().is_empty());
}

#[tokio::test]
async fn reseeding_after_a_flush_starts_clean() {
    let server = ServerHandle::new().await;
    server
        .data
        .fail("replace_list", "*", CustomRedisError::Timeout, 100);
    let csv = TempCsv::new("1:follower_ids,5\n");
    assert_eq!(
        server.seed("data", csv.location()).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );

    server.flush_caches().await;
    server.html.rpush("9:followers".to_owned(), "stale".to_owned()).await.unwrap();
    server.flush_caches().await;

    let csv = TempCsv::new("2:follower_ids,6,7\n3:followee_ids\n");
    let response = server.seed("data", csv.location()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(server.data.list("2:follower_ids"), vec!["6", "7"]);
    assert!(!server.data.contains_key("1:follower_ids"));
    assert!(!server.data.contains_key("3:followee_ids"));
    assert!(!server.html.contains_key("9:followers"));
}
