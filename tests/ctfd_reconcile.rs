//! Integration tests driving the HTTP client and the reconciler against an
//! in-process fake of the CTFd v1 API.
//!
//! Run with: cargo test --test ctfd_reconcile

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use clap::Parser;
use ctfd_challenge_sync::cli::Cli;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use ctfd_challenge_sync::ctfd::{RemoteChallenge, RemoteRequirements, RemoteTag, RemoteTopic};
use ctfd_challenge_sync::{
    ApiError, Behavior, Challenge, ChallengeApi, ChallengeType, ClientConfig, CtfdClient,
    DecayFunction, ReadOutcome, ReconcileError, Reconciler, Requirements, StateFile,
};

const TOKEN: &str = "ctfd_test_token";

#[derive(Default)]
struct FakeCtfd {
    next_id: i64,
    challenges: BTreeMap<i64, RemoteChallenge>,
    requirements: HashMap<i64, RemoteRequirements>,
    tags: BTreeMap<i64, RemoteTag>,
    topics: BTreeMap<i64, RemoteTopic>,
}

impl FakeCtfd {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

type Shared = Arc<Mutex<FakeCtfd>>;

fn ok(data: impl Serialize) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "message": "The requested URL was not found on the server." })),
    )
        .into_response()
}

async fn require_token(request: Request, next: Next) -> Response {
    let expected = format!("Token {}", TOKEN);
    let authorized = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str());
    if !authorized {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "success": false, "message": "You don't have the permission to access the requested resource." })),
        )
            .into_response();
    }
    next.run(request).await
}

/// Copy the scoring fields of a create/patch body onto `challenge`.
fn apply_body(challenge: &mut RemoteChallenge, body: &Value) {
    let text = |key: &str| body[key].as_str().map(str::to_string);
    if let Some(name) = text("name") {
        challenge.name = name;
    }
    if let Some(category) = text("category") {
        challenge.category = category;
    }
    if let Some(description) = text("description") {
        challenge.description = description;
    }
    if let Some(state) = text("state") {
        challenge.state = state;
    }
    challenge.connection_info = text("connection_info");
    challenge.max_attempts = body["max_attempts"].as_i64();
    challenge.next_id = body["next_id"].as_i64();

    if challenge.challenge_type == "dynamic" {
        challenge.initial = body["initial"].as_i64();
        challenge.decay = body["decay"].as_i64();
        challenge.minimum = body["minimum"].as_i64();
        challenge.function = text("function");
    } else {
        challenge.value = body["value"].as_i64().unwrap_or_default();
        challenge.function = Some("static".to_string());
    }
}

fn parse_requirements(body: &Value) -> Option<RemoteRequirements> {
    match body.get("requirements") {
        Some(Value::Null) | None => None,
        Some(raw) => serde_json::from_value(raw.clone()).ok(),
    }
}

async fn create_challenge(State(store): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut fake = store.lock().expect("lock");
    let id = fake.allocate();
    let mut challenge = RemoteChallenge {
        id,
        name: String::new(),
        category: String::new(),
        description: String::new(),
        connection_info: None,
        max_attempts: None,
        function: None,
        value: 0,
        initial: None,
        decay: None,
        minimum: None,
        state: "hidden".to_string(),
        challenge_type: body["type"].as_str().unwrap_or("standard").to_string(),
        next_id: None,
    };
    apply_body(&mut challenge, &body);
    if challenge.challenge_type == "dynamic" {
        challenge.value = challenge.initial.unwrap_or_default();
    }
    if let Some(reqs) = parse_requirements(&body) {
        fake.requirements.insert(id, reqs);
    }
    fake.challenges.insert(id, challenge.clone());
    ok(challenge)
}

async fn get_challenge(State(store): State<Shared>, Path(id): Path<i64>) -> Response {
    let fake = store.lock().expect("lock");
    match fake.challenges.get(&id) {
        Some(challenge) => ok(challenge),
        None => not_found(),
    }
}

async fn update_challenge(
    State(store): State<Shared>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    let mut fake = store.lock().expect("lock");
    let Some(challenge) = fake.challenges.get_mut(&id) else {
        return not_found();
    };
    apply_body(challenge, &body);
    let updated = challenge.clone();
    match parse_requirements(&body) {
        Some(reqs) => fake.requirements.insert(id, reqs),
        None => fake.requirements.remove(&id),
    };
    ok(updated)
}

async fn delete_challenge(State(store): State<Shared>, Path(id): Path<i64>) -> Response {
    let mut fake = store.lock().expect("lock");
    if fake.challenges.remove(&id).is_none() {
        return not_found();
    }
    fake.requirements.remove(&id);
    fake.tags.retain(|_, t| t.challenge_id != Some(id));
    fake.topics.retain(|_, t| t.challenge_id != Some(id));
    ok(Value::Null)
}

async fn get_requirements(State(store): State<Shared>, Path(id): Path<i64>) -> Response {
    let fake = store.lock().expect("lock");
    if !fake.challenges.contains_key(&id) {
        return not_found();
    }
    ok(fake.requirements.get(&id))
}

async fn list_tags(State(store): State<Shared>, Path(id): Path<i64>) -> Response {
    let fake = store.lock().expect("lock");
    if !fake.challenges.contains_key(&id) {
        return not_found();
    }
    let tags: Vec<&RemoteTag> = fake
        .tags
        .values()
        .filter(|t| t.challenge_id == Some(id))
        .collect();
    ok(tags)
}

async fn list_topics(State(store): State<Shared>, Path(id): Path<i64>) -> Response {
    let fake = store.lock().expect("lock");
    if !fake.challenges.contains_key(&id) {
        return not_found();
    }
    let topics: Vec<&RemoteTopic> = fake
        .topics
        .values()
        .filter(|t| t.challenge_id == Some(id))
        .collect();
    ok(topics)
}

async fn create_tag(State(store): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut fake = store.lock().expect("lock");
    let challenge_id = body["challenge"].as_i64().unwrap_or_default();
    if !fake.challenges.contains_key(&challenge_id) {
        return not_found();
    }
    let id = fake.allocate();
    let tag = RemoteTag {
        id,
        challenge_id: Some(challenge_id),
        value: body["value"].as_str().unwrap_or_default().to_string(),
    };
    fake.tags.insert(id, tag.clone());
    ok(tag)
}

async fn delete_tag(State(store): State<Shared>, Path(id): Path<i64>) -> Response {
    let mut fake = store.lock().expect("lock");
    match fake.tags.remove(&id) {
        Some(_) => ok(Value::Null),
        None => not_found(),
    }
}

async fn create_topic(State(store): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut fake = store.lock().expect("lock");
    if body["type"].as_str() != Some("challenge") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "errors": { "type": ["Invalid target type"] } })),
        )
            .into_response();
    }
    let challenge_id = body["challenge"].as_i64().unwrap_or_default();
    let value = body["value"].as_str().unwrap_or_default().to_string();
    let id = fake.allocate();
    let topic = RemoteTopic {
        id,
        challenge_id: Some(challenge_id),
        topic_id: Some(id),
        value,
    };
    fake.topics.insert(id, topic.clone());
    ok(topic)
}

async fn delete_topic(
    State(store): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut fake = store.lock().expect("lock");
    if params.get("type").map(String::as_str) != Some("challenge") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": "Invalid target type" })),
        )
            .into_response();
    }
    let target = params.get("target_id").and_then(|v| v.parse::<i64>().ok());
    match target.and_then(|id| fake.topics.remove(&id)) {
        Some(_) => ok(Value::Null),
        None => not_found(),
    }
}

fn router(store: Shared) -> Router {
    Router::new()
        .route("/api/v1/challenges", post(create_challenge))
        .route(
            "/api/v1/challenges/:id",
            get(get_challenge)
                .patch(update_challenge)
                .delete(delete_challenge),
        )
        .route("/api/v1/challenges/:id/requirements", get(get_requirements))
        .route("/api/v1/challenges/:id/tags", get(list_tags))
        .route("/api/v1/challenges/:id/topics", get(list_topics))
        .route("/api/v1/tags", post(create_tag))
        .route("/api/v1/tags/:id", delete(delete_tag))
        .route("/api/v1/topics", post(create_topic).delete(delete_topic))
        .layer(middleware::from_fn(require_token))
        .with_state(store)
}

/// Start a fake CTFd on an ephemeral port and return its base URL.
async fn spawn_fake() -> (String, Shared) {
    let store = Shared::default();
    let app = router(store.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = listener.local_addr().expect("should have address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake CTFd failed");
    });
    (format!("http://{}", addr), store)
}

fn client_for(url: &str) -> CtfdClient {
    let config = ClientConfig::new(url, Some(TOKEN.to_string())).with_timeout(Duration::from_secs(5));
    CtfdClient::new(&config)
}

async fn setup() -> (Reconciler, Shared, String) {
    let (url, store) = spawn_fake().await;
    let reconciler = Reconciler::new(Arc::new(client_for(&url)));
    (reconciler, store, url)
}

fn standard_fixture() -> Challenge {
    Challenge::new(
        "Warmup",
        "misc",
        "Find the flag in the page source.",
        ChallengeType::Standard,
        100,
    )
    .with_tags(["web", "easy"])
    .with_topics(["html"])
}

#[tokio::test]
async fn test_standard_create_then_read_converges() {
    let (reconciler, _store, _) = setup().await;

    let created = reconciler
        .create(standard_fixture())
        .await
        .expect("create should succeed");
    assert!(created.is_created());
    assert_eq!(created.function, None);

    let read = reconciler
        .read(&created.id)
        .await
        .expect("read should succeed")
        .into_found()
        .expect("challenge should exist");
    assert_eq!(read, created);
    assert_eq!(read.value, 100);
    assert_eq!(read.tags, vec!["web", "easy"]);
    assert_eq!(read.topics, vec!["html"]);
}

#[tokio::test]
async fn test_dynamic_value_is_initial_after_solves() {
    let (reconciler, store, _) = setup().await;

    let desired = Challenge::new("Heap", "pwn", "Overflow it.", ChallengeType::Dynamic, 500)
        .with_dynamic_scoring(10, 50);
    let created = reconciler.create(desired).await.expect("create should succeed");
    assert_eq!(created.function, Some(DecayFunction::Logarithmic));
    assert_eq!(created.decay, Some(10));
    assert_eq!(created.minimum, Some(50));

    let id: i64 = created.id.parse().expect("numeric id");
    store
        .lock()
        .expect("lock")
        .challenges
        .get_mut(&id)
        .expect("stored challenge")
        .value = 320;

    let read = reconciler
        .import(&created.id)
        .await
        .expect("import should succeed");
    assert_eq!(read.value, 500);
    assert_eq!(read, created);
}

#[tokio::test]
async fn test_update_replaces_sets_and_clears_requirements() {
    let (reconciler, store, _) = setup().await;

    let prerequisite = reconciler
        .create(Challenge::new("Intro", "misc", "Start here.", ChallengeType::Standard, 10))
        .await
        .expect("create should succeed");

    let desired = standard_fixture().with_requirements(Requirements {
        behavior: Some(Behavior::Anonymized),
        prerequisites: vec![prerequisite.id.clone()],
    });
    let created = reconciler
        .create(desired)
        .await
        .expect("create should succeed");
    let id: i64 = created.id.parse().expect("numeric id");
    assert_eq!(
        store.lock().expect("lock").requirements.get(&id),
        Some(&RemoteRequirements {
            prerequisites: vec![prerequisite.id.parse().expect("numeric id")],
            anonymize: Some(true),
        })
    );

    // A tag added out of band must not survive the next update.
    {
        let mut fake = store.lock().expect("lock");
        let tag_id = fake.allocate();
        fake.tags.insert(
            tag_id,
            RemoteTag {
                id: tag_id,
                challenge_id: Some(id),
                value: "manual".to_string(),
            },
        );
    }

    let mut next = standard_fixture().with_tags(["web", "medium"]).with_topics(["dom"]);
    next.value = 200;
    let updated = reconciler
        .update(next, &created)
        .await
        .expect("update should succeed");
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.tags, vec!["web", "medium"]);
    assert_eq!(updated.requirements, None);

    let read = reconciler
        .read(&created.id)
        .await
        .expect("read should succeed")
        .into_found()
        .expect("challenge should exist");
    assert_eq!(read.value, 200);
    assert_eq!(read.tags, vec!["web", "medium"]);
    assert_eq!(read.topics, vec!["dom"]);
    assert_eq!(read.requirements, None);

    let fake = store.lock().expect("lock");
    assert_eq!(
        fake.topics.values().filter(|t| t.challenge_id == Some(id)).count(),
        1
    );
}

#[tokio::test]
async fn test_repeated_update_is_idempotent() {
    let (reconciler, store, _) = setup().await;

    let created = reconciler
        .create(standard_fixture())
        .await
        .expect("create should succeed");
    let first = reconciler
        .update(standard_fixture(), &created)
        .await
        .expect("first update should succeed");
    let second = reconciler
        .update(standard_fixture(), &first)
        .await
        .expect("second update should succeed");
    assert_eq!(first, second);

    let read = reconciler
        .read(&created.id)
        .await
        .expect("read should succeed")
        .into_found()
        .expect("challenge should exist");
    assert_eq!(read, second);
    assert_eq!(store.lock().expect("lock").tags.len(), 2);
}

#[tokio::test]
async fn test_delete_then_read_reports_missing() {
    let (reconciler, store, _) = setup().await;

    let created = reconciler
        .create(standard_fixture())
        .await
        .expect("create should succeed");
    reconciler
        .delete(&created.id)
        .await
        .expect("delete should succeed");

    {
        let fake = store.lock().expect("lock");
        assert!(fake.challenges.is_empty());
        assert!(fake.tags.is_empty());
        assert!(fake.topics.is_empty());
    }

    let outcome = reconciler.read(&created.id).await.expect("read should succeed");
    assert_eq!(outcome, ReadOutcome::Missing);

    reconciler
        .delete(&created.id)
        .await
        .expect("deleting a missing challenge should succeed");

    let err = reconciler.import(&created.id).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Missing(_)));
}

#[tokio::test]
async fn test_anonymize_false_is_fatal() {
    let (reconciler, store, _) = setup().await;

    let created = reconciler
        .create(standard_fixture())
        .await
        .expect("create should succeed");
    let id: i64 = created.id.parse().expect("numeric id");
    store.lock().expect("lock").requirements.insert(
        id,
        RemoteRequirements {
            prerequisites: vec![],
            anonymize: Some(false),
        },
    );

    let err = reconciler.read(&created.id).await.unwrap_err();
    assert!(matches!(err, ReconcileError::InvariantViolation(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let (url, _store) = spawn_fake().await;
    let client = CtfdClient::new(&ClientConfig::new(&url, None));

    let err = client.get_challenge(1).await.unwrap_err();
    match err {
        ApiError::Status { code, message } => {
            assert_eq!(code, 403);
            assert!(message.contains("permission"));
        }
        other => panic!("Expected Status error, got {:?}", other),
    }
}

fn cli_args(url: &str, state_path: &std::path::Path, command: &[&str]) -> Cli {
    let mut argv = vec![
        "ctfd-challenge-sync".to_string(),
        "--url".to_string(),
        url.to_string(),
        "--api-key".to_string(),
        TOKEN.to_string(),
        "--state".to_string(),
        state_path.display().to_string(),
    ];
    argv.extend(command.iter().map(|s| s.to_string()));
    Cli::try_parse_from(argv).expect("should parse")
}

#[tokio::test]
async fn test_cli_apply_update_and_destroy() {
    let (url, store) = spawn_fake().await;
    let dir = TempDir::new().expect("tempdir");
    let manifest = dir.path().join("challenge.yaml");
    let state_path = dir.path().join("state.json");

    std::fs::write(
        &manifest,
        "name: Warmup\ncategory: misc\ndescription: hi\ntype: standard\nvalue: 100\ntags: [web]\n",
    )
    .expect("write manifest");

    let args = |command: &[&str]| cli_args(&url, &state_path, command);
    let manifest_arg = manifest.display().to_string();

    ctfd_challenge_sync::cli::run_with_cli(args(&["apply", "-f", &manifest_arg]))
        .await
        .expect("first apply should succeed");
    let state = StateFile::new(&state_path);
    let first = state.load().expect("load").expect("state should exist");
    assert_eq!(first.serial, 1);
    assert!(!first.tainted);

    std::fs::write(
        &manifest,
        "name: Warmup\ncategory: misc\ndescription: hi\ntype: standard\nvalue: 150\ntags: [web, easy]\n",
    )
    .expect("write manifest");
    ctfd_challenge_sync::cli::run_with_cli(args(&["apply", "-f", &manifest_arg]))
        .await
        .expect("second apply should succeed");
    let second = state.load().expect("load").expect("state should exist");
    assert_eq!(second.serial, 2);
    assert_eq!(second.challenge.id, first.challenge.id);
    assert_eq!(second.challenge.value, 150);
    assert_eq!(store.lock().expect("lock").challenges.len(), 1);

    // Changing the type needs --replace.
    std::fs::write(
        &manifest,
        "name: Warmup\ncategory: misc\ndescription: hi\ntype: dynamic\nvalue: 150\ndecay: 5\nminimum: 10\n",
    )
    .expect("write manifest");
    assert!(
        ctfd_challenge_sync::cli::run_with_cli(args(&["apply", "-f", &manifest_arg]))
            .await
            .is_err()
    );
    ctfd_challenge_sync::cli::run_with_cli(args(&["apply", "-f", &manifest_arg, "--replace"]))
        .await
        .expect("replacing apply should succeed");
    let replaced = state.load().expect("load").expect("state should exist");
    assert_ne!(replaced.challenge.id, first.challenge.id);
    assert_eq!(replaced.challenge.challenge_type, ChallengeType::Dynamic);

    ctfd_challenge_sync::cli::run_with_cli(args(&["destroy"]))
        .await
        .expect("destroy should succeed");
    assert!(state.load().expect("load").is_none());
    assert!(store.lock().expect("lock").challenges.is_empty());
}

#[tokio::test]
async fn test_cli_apply_recreates_challenge_deleted_out_of_band() {
    let (url, store) = spawn_fake().await;
    let dir = TempDir::new().expect("tempdir");
    let manifest = dir.path().join("challenge.yaml");
    let state_path = dir.path().join("state.json");
    std::fs::write(
        &manifest,
        "name: Warmup\ncategory: misc\ndescription: hi\ntype: standard\nvalue: 100\ntags: [web]\n",
    )
    .expect("write manifest");
    let manifest_arg = manifest.display().to_string();

    let apply = || cli_args(&url, &state_path, &["apply", "-f", &manifest_arg]);

    ctfd_challenge_sync::cli::run_with_cli(apply())
        .await
        .expect("first apply should succeed");
    let state = StateFile::new(&state_path);
    let first = state.load().expect("load").expect("state should exist");

    {
        let mut fake = store.lock().expect("lock");
        fake.challenges.clear();
        fake.tags.clear();
    }

    ctfd_challenge_sync::cli::run_with_cli(apply())
        .await
        .expect("apply after out-of-band delete should succeed");

    let recreated = state.load().expect("load").expect("state should exist");
    assert_ne!(recreated.challenge.id, first.challenge.id);
    assert!(!recreated.tainted);
    assert_eq!(recreated.challenge.tags, vec!["web"]);

    let fake = store.lock().expect("lock");
    assert_eq!(fake.challenges.len(), 1);
    assert_eq!(fake.tags.len(), 1);
}
