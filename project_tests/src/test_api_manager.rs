//! # `ApiManager` Live Smoke Run
//!
//! Exercises the manager end to end against `httpbin.org`, a public echo service:
//! path templates, search parameters, the header chain, JSON bodies, configured
//! request methods, error tagging and the metadata cache.
//!
//! Run manually with `cargo run -p project_tests --bin test_api_manager`; it needs
//! network access and is not part of `cargo test`.

#![forbid(unsafe_code)]

use serde::Deserialize;
use serde_json::json;

use lib_apiclient::{
    ApiCollectionConfig, ApiManager, ClientError, HeadersHook, QueryConfig, RequestConfig,
    RequestParams,
};

/// The part of an httpbin echo we look at.
#[derive(Debug, Deserialize)]
struct HttpbinEcho {
    url: Option<String>,
    headers: Option<std::collections::HashMap<String, String>>,
    args: Option<std::collections::HashMap<String, String>>,
    json: Option<serde_json::Value>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Register the collection
    let manager = ApiManager::new()?;
    manager.register(
        ApiCollectionConfig::new("httpbin")
            .with_base_url("https://httpbin.org/")
            .debug(true)
            .with_process_headers(HeadersHook::computed(|_| {
                Ok([("X-Custom-Client".to_string(), "Rust-Test-Suite".to_string())].into())
            }))
            .with_query("get", "/get")
            .with_query("anything", QueryConfig::new("/anything").with_meta("/anything/meta"))
            .with_command("post", "/post")
            .with_request("status", RequestConfig::new("/status/{code}", "GET"))
            .with_request("put", RequestConfig::new("/put", "PUT")),
    )?;

    println!("--- Starting ApiManager Smoke Run ---");

    // --- TEST 1: Query with search params and the header chain ---
    println!("\n[Test 1] Query with search params...");
    let res = manager
        .query("httpbin:get", RequestParams::new().with_search("q", "rust client"))
        .await?
        .into_typed::<HttpbinEcho>()?;
    assert_eq!(res.status, 200);
    let args = res.data.args.unwrap_or_default();
    assert_eq!(args.get("q").map(String::as_str), Some("rust client"));
    let headers = res.data.headers.unwrap_or_default();
    assert_eq!(headers.get("X-Custom-Client").map(String::as_str), Some("Rust-Test-Suite"));
    println!("✅ URL: {:?}", res.data.url);

    // --- TEST 2: Command with a JSON body ---
    println!("\n[Test 2] Command POST body...");
    let res = manager
        .send("post", Some(json!({ "message": "Hello from Rust" })), RequestParams::new())
        .await?
        .into_typed::<HttpbinEcho>()?;
    assert_eq!(res.data.json, Some(json!({ "message": "Hello from Rust" })));
    println!("✅ Server received: {:?}", res.data.json);

    // --- TEST 3: Configured PUT request ---
    println!("\n[Test 3] PUT request...");
    let res = manager
        .request("httpbin:put", Some(json!({ "n": 1 })), RequestParams::new())
        .await?;
    assert_eq!(res.data["json"], json!({ "n": 1 }));
    println!("✅ PUT echoed");

    // --- TEST 4: Non-2xx status becomes a tagged ApiError ---
    println!("\n[Test 4] 404 handling...");
    match manager
        .request("httpbin:status", None, RequestParams::new().with_path_param("code", 404))
        .await
    {
        Err(ClientError::Api(err)) => {
            assert_eq!(err.status, Some(404));
            assert_eq!(err.operation, "httpbin:status");
            println!("✅ {}", err);
        }
        other => anyhow::bail!("expected an ApiError, got {:?}", other),
    }

    // --- TEST 5: Metadata cache ---
    println!("\n[Test 5] Metadata cache...");
    let first = manager.query_meta("httpbin:anything", RequestParams::new()).await?;
    let second = manager.query_meta("httpbin:anything", RequestParams::new()).await?;
    assert!(first.cache.is_none());
    assert_eq!(second.cache, Some(true));
    let stats = manager.get_collection(Some("httpbin"))?.get_metadata_cache_stats();
    println!("✅ Cache stats: {:?}", stats);

    println!("\n--- All Checks Passed ---");
    Ok(())
}
