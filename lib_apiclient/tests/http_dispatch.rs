mod common;

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use lib_apiclient::{
    load_collections, ApiCollectionConfig, ApiManager, ClientError, QueryConfig, RequestConfig,
    RequestParams,
};

#[derive(Clone, Default)]
struct Counters {
    meta_hits: Arc<AtomicUsize>,
}

async fn get_post(Path(id): Path<String>) -> Json<Value> {
    Json(json!({ "data": { "id": id }, "meta": { "version": 1 } }))
}

async fn get_meta(State(counters): State<Counters>) -> Json<Value> {
    counters.meta_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "fields": ["title", "body"] }))
}

async fn create_post(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    (StatusCode::CREATED, Json(json!({ "body": body, "contentType": content_type })))
}

async fn search(RawQuery(query): RawQuery) -> Json<Value> {
    Json(json!({ "query": query }))
}

async fn boom() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "kaboom")
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(10)).await;
    "late"
}

async fn start() -> (String, Counters) {
    let counters = Counters::default();
    let app = Router::new()
        .route("/posts/{id}", get(get_post))
        .route("/posts", post(create_post))
        .route("/_meta/posts/", get(get_meta))
        .route("/search", get(search))
        .route("/boom", get(boom))
        .route("/slow", get(slow))
        .with_state(counters.clone());
    let (addr, _) = common::serve(app).await;
    (format!("http://{}", addr), counters)
}

fn blog(base_url: &str) -> ApiCollectionConfig {
    ApiCollectionConfig::new("blog")
        .with_base_url(base_url)
        .with_query("getPost", QueryConfig::new("/posts/{id}").with_item("/posts/{_id}"))
        .with_query("rawPost", "/posts/{id}")
        .with_query("posts", "/posts/")
        .with_query("search", "/search")
        .with_query("boom", "/boom")
        .with_query("slow", "/slow")
        .with_command("createPost", "/posts")
        .with_request("createViaRequest", RequestConfig::new("/posts", "POST"))
}

#[tokio::test]
async fn query_item_hits_item_path_and_unwraps_envelope() {
    let (base, _) = start().await;
    let manager = ApiManager::new().unwrap();
    manager.register(blog(&base)).unwrap();

    let res = manager
        .query_item("blog:getPost", "42", RequestParams::new())
        .await
        .unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.data, json!({ "id": "42" }));
    assert_eq!(res.meta, Some(json!({ "version": 1 })));
}

#[tokio::test]
async fn query_item_without_item_override_needs_every_placeholder() {
    let (base, _) = start().await;
    let manager = ApiManager::new().unwrap();
    manager.register(blog(&base)).unwrap();

    let err = manager
        .query_item("blog:rawPost", "42", RequestParams::new())
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("id"));

    let res = manager
        .query_item("blog:rawPost", "42", RequestParams::new().with_path_param("id", "7"))
        .await;
    // `/posts/7/42` has no route on the test server
    assert!(res.unwrap_err().is_api());
}

#[tokio::test]
async fn metadata_is_cached_until_cleared() {
    let (base, counters) = start().await;
    let manager = ApiManager::new().unwrap();
    let blog = manager.register(blog(&base)).unwrap();

    let first = manager.query_meta("blog:posts", RequestParams::new()).await.unwrap();
    let second = manager.query_meta("blog:posts", RequestParams::new()).await.unwrap();
    assert_eq!(first.data, json!({ "fields": ["title", "body"] }));
    assert_eq!(second.cache, Some(true));
    assert_eq!(counters.meta_hits.load(Ordering::SeqCst), 1);

    let stats = blog.get_metadata_cache_stats();
    assert_eq!(stats.size, 1);
    assert_eq!(stats.entries, vec![format!("{}/_meta/posts/", base)]);

    blog.clear_metadata_cache();
    manager.query_meta("blog:posts", RequestParams::new()).await.unwrap();
    assert_eq!(counters.meta_hits.load(Ordering::SeqCst), 2);

    manager
        .query_meta("blog:posts", RequestParams::new().with_cache(false))
        .await
        .unwrap();
    assert_eq!(counters.meta_hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn send_and_post_request_carry_json_bodies() {
    let (base, _) = start().await;
    let manager = ApiManager::new().unwrap();
    manager.register(blog(&base)).unwrap();

    let res = manager
        .send("blog:createPost", Some(json!({ "title": "hello" })), RequestParams::new())
        .await
        .unwrap();
    assert_eq!(res.status, 201);
    assert_eq!(res.data["body"], json!({ "title": "hello" }));
    assert_eq!(res.data["contentType"], json!("application/json"));

    let res = manager
        .request("blog:createViaRequest", Some(json!({ "title": "again" })), RequestParams::new())
        .await
        .unwrap();
    assert_eq!(res.data["body"], json!({ "title": "again" }));
}

#[tokio::test]
async fn search_params_are_url_encoded() {
    let (base, _) = start().await;
    let manager = ApiManager::new().unwrap();
    manager.register(blog(&base)).unwrap();

    let res = manager
        .query(
            "search",
            RequestParams::new().with_search("q", "a b").with_search("page", 2),
        )
        .await
        .unwrap();
    assert_eq!(res.data, json!({ "query": "q=a+b&page=2" }));
}

#[tokio::test]
async fn server_errors_surface_as_tagged_api_errors() {
    let (base, _) = start().await;
    let manager = ApiManager::new().unwrap();
    manager.register(blog(&base)).unwrap();

    match manager.query("blog:boom", RequestParams::new()).await {
        Err(ClientError::Api(err)) => {
            assert_eq!(err.operation, "blog:boom");
            assert_eq!(err.status, Some(500));
            assert_eq!(err.body.as_deref(), Some("kaboom"));
        }
        other => panic!("expected ApiError, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_aborts_in_flight_request() {
    let (base, _) = start().await;
    let manager = ApiManager::new().unwrap();
    manager.register(blog(&base)).unwrap();

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = manager
        .query("blog:slow", RequestParams::new().with_cancel(token))
        .await
        .unwrap_err();
    assert!(err.is_api());
    assert!(err.to_string().contains("cancelled"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn collections_load_from_json5_files() {
    let (base, _) = start().await;
    let mut file = tempfile::Builder::new().suffix(".json5").tempfile().unwrap();
    write!(
        file,
        r#"[
            // comments are allowed in JSON5
            {{ name: "blog", baseUrl: "{base}", queries: {{ getPost: {{ path: "/posts/{{id}}", item: "/posts/{{_id}}" }} }} }},
            {{ name: "other", dynamic: true }},
        ]"#
    )
    .unwrap();

    let manager = ApiManager::new().unwrap();
    for config in load_collections(file.path()).unwrap() {
        manager.register(config).unwrap();
    }
    assert_eq!(manager.list_collections(), vec!["blog".to_string(), "other".to_string()]);

    let res = manager.query_item("getPost", "9", RequestParams::new()).await.unwrap();
    assert_eq!(res.data, json!({ "id": "9" }));
}
