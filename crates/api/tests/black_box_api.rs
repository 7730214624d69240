use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use scenecraft_api::app::{build_app, AppServices};
use scenecraft_core::JobId;
use scenecraft_engine::{
    BlocklistPolicy, Collaborators, DirectoryArtifactStore, EngineConfig, ExecutionCapability,
    ExecutionError, GenerationEngine, ProgressObserver, StaticDeviceProbe, SynthesisOutput,
    SynthesisRequest,
};

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// Answers every request with a tiny PNG after walking the progress steps.
struct StubBackend;

impl ExecutionCapability for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn run(
        &self,
        request: &SynthesisRequest,
        progress: &dyn ProgressObserver,
    ) -> Result<SynthesisOutput, ExecutionError> {
        for step in 0..=request.steps {
            progress.on_step(step, request.steps);
        }
        Ok(SynthesisOutput {
            image: PNG.to_vec(),
            width: request.width,
            height: request.height,
        })
    }
}

struct Options {
    rate_limit: usize,
    queue_capacity: usize,
    with_worker: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            rate_limit: 30,
            queue_capacity: 10,
            with_worker: true,
        }
    }
}

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    _output: tempfile::TempDir,
}

impl TestServer {
    async fn spawn(options: Options) -> Self {
        let output = tempfile::tempdir().expect("failed to create temp dir");
        let config = EngineConfig {
            queue_capacity: options.queue_capacity,
            rate_limit_per_minute: options.rate_limit,
            enqueue_timeout: Duration::from_millis(20),
            dequeue_timeout: Duration::from_millis(20),
            output_dir: output.path().to_path_buf(),
            ..EngineConfig::default()
        };

        let artifacts = Arc::new(DirectoryArtifactStore::open(output.path()).unwrap());
        let engine = Arc::new(GenerationEngine::new(
            config,
            Arc::new(StaticDeviceProbe::cpu()),
            Arc::new(BlocklistPolicy::from_csv("gore, weapon")),
        ));
        let services = Arc::new(AppServices::new(engine.clone(), artifacts.clone()));
        if options.with_worker {
            let worker = engine
                .spawn_worker(Arc::new(StubBackend), Collaborators::new(artifacts))
                .unwrap();
            services.attach_worker(worker);
        }

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            base_url,
            handle,
            _output: output,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn submit(client: &reqwest::Client, srv: &TestServer, body: Value) -> reqwest::Response {
    client
        .post(srv.url("/api/generate"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn wait_for_status(
    client: &reqwest::Client,
    srv: &TestServer,
    job_id: &str,
    status: &str,
) -> Value {
    for _ in 0..200 {
        let res = client
            .get(srv.url(&format!("/api/job/{job_id}")))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        if body["status"] == status {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached {status}");
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn(Options::default()).await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn generated_job_completes_and_its_image_is_served() {
    let srv = TestServer::spawn(Options::default()).await;
    let client = reqwest::Client::new();

    let res = submit(&client, &srv, json!({ "prompt": "a misty harbour at dawn" })).await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "queued");
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert!(JobId::is_well_formed(&job_id));

    let job = wait_for_status(&client, &srv, &job_id, "completed").await;
    assert_eq!(job["progress"], 100);
    assert_eq!(job["retry_count"], 0);
    assert_eq!(job["can_rate"], true);
    assert!(job.get("error").is_none());
    assert!(job["completed_at"].is_string());
    let result = &job["result"];
    assert_eq!(result["width"], 512);
    assert_eq!(result["model"], "sd15");
    assert!(result.get("path").is_none());

    let image_url = result["image_url"].as_str().unwrap();
    assert!(image_url.starts_with("/api/image/scene_"));
    let res = client.get(srv.url(image_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "image/png");
    assert_eq!(res.bytes().await.unwrap().as_ref(), PNG);

    let listed: Value = client
        .get(srv.url("/api/images"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["images"][0]["url"], image_url);

    let res = client
        .post(srv.url(&format!("/api/job/{job_id}/cancel")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "ALREADY_TERMINAL");
}

#[tokio::test]
async fn malformed_and_unknown_job_ids() {
    let srv = TestServer::spawn(Options::default()).await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/api/job/not-a-job")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "INVALID_JOB_ID");

    let res = client
        .post(srv.url("/api/job/not-a-job/cancel"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let unknown = JobId::generate();
    let res = client
        .get(srv.url(&format!("/api/job/{unknown}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pending_job_can_be_cancelled_once() {
    let srv = TestServer::spawn(Options {
        with_worker: false,
        ..Options::default()
    })
    .await;
    let client = reqwest::Client::new();

    let body: Value = submit(&client, &srv, json!({ "prompt": "lighthouse" }))
        .await
        .json()
        .await
        .unwrap();
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let res = client
        .post(srv.url(&format!("/api/job/{job_id}/cancel")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "job_id": job_id, "status": "cancelled" }));

    let job = wait_for_status(&client, &srv, &job_id, "cancelled").await;
    assert_eq!(job["can_rate"], false);
    assert!(job.get("result").is_none());

    let res = client
        .post(srv.url(&format!("/api/job/{job_id}/cancel")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn rate_limit_is_per_client() {
    let srv = TestServer::spawn(Options {
        rate_limit: 2,
        with_worker: false,
        ..Options::default()
    })
    .await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let res = submit(&client, &srv, json!({ "prompt": "forest" })).await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }

    let res = submit(&client, &srv, json!({ "prompt": "forest" })).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = res.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "RATE_LIMITED");
    assert_eq!(body["retry_after"], retry_after);

    let res = client
        .post(srv.url("/api/generate"))
        .header("X-Forwarded-For", "198.51.100.4, 10.0.0.1")
        .json(&json!({ "prompt": "forest" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn full_queue_rejects_without_creating_a_job() {
    let srv = TestServer::spawn(Options {
        queue_capacity: 1,
        with_worker: false,
        ..Options::default()
    })
    .await;
    let client = reqwest::Client::new();

    let res = submit(&client, &srv, json!({ "prompt": "desert" })).await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let res = submit(&client, &srv, json!({ "prompt": "desert" })).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "QUEUE_FULL");

    let status: Value = client
        .get(srv.url("/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["queue"]["depth"], 1);
    assert_eq!(status["queue"]["jobs"]["total"], 1);
}

#[tokio::test]
async fn blocked_prompt_is_rejected() {
    let srv = TestServer::spawn(Options::default()).await;
    let client = reqwest::Client::new();

    let res = submit(&client, &srv, json!({ "prompt": "a battlefield full of GORE" })).await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "CONTENT_BLOCKED");
    assert_eq!(body["blocked_categories"], json!(["gore"]));
}

#[tokio::test]
async fn invalid_requests_are_validation_errors() {
    let srv = TestServer::spawn(Options::default()).await;
    let client = reqwest::Client::new();

    for body in [
        json!({ "prompt": "   " }),
        json!({ "prompt": "castle", "model": "no-such-model" }),
        json!({ "negative_prompt": "missing prompt" }),
    ] {
        let res = submit(&client, &srv, body.clone()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{body}");
        let err: Value = res.json().await.unwrap();
        assert_eq!(err["error"], "VALIDATION_ERROR");
    }

    let res = client
        .post(srv.url("/api/generate"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_reports_device_and_catalogue() {
    let srv = TestServer::spawn(Options::default()).await;
    let body: Value = reqwest::get(srv.url("/api/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["device"]["device"]["kind"], "cpu");
    assert_eq!(body["device"]["recommended_model"], "sd15");
    assert!(!body["device"]["models"].as_array().unwrap().is_empty());
    assert!(!body["device"]["quality_modes"].as_array().unwrap().is_empty());
    assert_eq!(body["queue"]["capacity"], 10);
    assert!(body["worker"].is_object());
}

#[tokio::test]
async fn image_names_cannot_escape_the_store() {
    let srv = TestServer::spawn(Options::default()).await;
    let client = reqwest::Client::new();

    for path in ["/api/image/..%2FCargo.toml", "/api/image/.hidden.png"] {
        let res = client.get(srv.url(path)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{path}");
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"], "INVALID_FILENAME");
    }

    let res = client
        .get(srv.url("/api/image/scene_0_000000000000.png"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
