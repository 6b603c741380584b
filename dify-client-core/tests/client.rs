use dify_client_core::{
    handler::StatusHandler,
    http::StatusCode,
    request::{Part, RequestSpec, ResponseType},
    Client, Config, Error,
};
use futures::StreamExt;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::{
    io,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{subscriber::DefaultGuard, Level};
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Collects DEBUG output of the current thread.
fn capture_logs() -> (Captured, DefaultGuard) {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (captured, tracing::subscriber::set_default(subscriber))
}

fn get_client(server: &MockServer) -> Client {
    Client::new(&server.uri(), "app-secret-key").unwrap()
}

#[test]
fn test_config() {
    let config = Config {
        base_url: "https://api.dify.ai".into(),
        api_key: Some(SecretString::new("API_KEY".into())),
        timeout: Duration::from_secs(30),
        ..Config::default()
    };
    assert_eq!(config.base_url, "https://api.dify.ai");
    assert_eq!(config.timeout, Duration::from_secs(30));
    assert!(!format!("{config:?}").contains("API_KEY"));
}

#[test]
fn test_new_client_with_config() {
    let config = Config {
        base_url: "https://api.dify.ai/".into(),
        timeout: Duration::from_secs(60),
        ..Config::default()
    };
    let client = Client::new_with_config(config).unwrap();
    assert_eq!(client.config.base_url, "https://api.dify.ai");
    assert_eq!(client.config.timeout, Duration::from_secs(60));
}

#[tokio::test]
async fn test_buffered_body_is_logged_masked_and_replayed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/console/api/login"))
        .and(header("Authorization", "Bearer app-secret-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "success",
            "data": {"access_token": "tok-abc", "refresh_token": "tok-def"}
        })))
        .mount(&server)
        .await;

    let (logs, _guard) = capture_logs();
    let client = get_client(&server);
    let request = RequestSpec::post("/console/api/login")
        .json(&json!({"email": "a@b.c", "password": "hunter2"}))
        .unwrap()
        .build()
        .unwrap();
    let response = client.execute(request).await.unwrap();

    assert!(response.is_buffered());
    let first = response.body_text().unwrap();
    let second = response.body_text().unwrap();
    assert_eq!(first, second);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["access_token"], "tok-abc");

    let logs = logs.text();
    assert!(logs.contains("dify request"));
    assert!(logs.contains("dify response"));
    assert!(logs.contains("***MASKED***"));
    for secret in ["app-secret-key", "hunter2", "tok-abc", "tok-def"] {
        assert!(!logs.contains(secret), "{secret} leaked into logs");
    }
}

#[tokio::test]
async fn test_query_secrets_are_masked_in_logs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/files"))
        .and(query_param("api_key", "qs-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let (logs, _guard) = capture_logs();
    let request = RequestSpec::get("/v1/files")
        .uri_builder(|b| b.query_param("api_key", "qs-secret").query_param("page", 1).build())
        .build()
        .unwrap();
    let text = get_client(&server).execute_text(request).await.unwrap();
    assert_eq!(text, "ok");

    let logs = logs.text();
    assert!(logs.contains("page=1"));
    assert!(!logs.contains("qs-secret"));
}

#[tokio::test]
async fn test_event_stream_is_not_buffered() {
    let server = MockServer::start().await;
    let events = "data: {\"event\": \"message\", \"answer\": \"Hel\"}\n\n\
                  data: {\"event\": \"message\", \"answer\": \"lo\"}\n\n\
                  data: {\"event\": \"message_end\"}\n\n";
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .and(header("Accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(events, "text/event-stream"))
        .mount(&server)
        .await;

    let (logs, _guard) = capture_logs();
    let request = RequestSpec::post("/v1/chat-messages")
        .json(&json!({"query": "hi", "user": "u1", "inputs": {}, "response_mode": "streaming"}))
        .unwrap()
        .response_type(ResponseType::Stream)
        .build()
        .unwrap();
    let response = get_client(&server).execute(request).await.unwrap();
    assert!(!response.is_buffered());

    let mut answer = String::new();
    let mut stream = response.into_events();
    while let Some(event) = stream.next().await {
        let data: Value = serde_json::from_str(&event.unwrap().data).unwrap();
        if let Some(part) = data["answer"].as_str() {
            answer.push_str(part);
        }
    }
    assert_eq!(answer, "Hello");
    assert!(logs.text().contains("Streaming"));
}

#[tokio::test]
async fn test_large_body_passes_through_intact() {
    let server = MockServer::start().await;
    let big = "x".repeat(20 * 1024);
    Mock::given(method("GET"))
        .and(path("/v1/big"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(big.clone(), "text/plain"))
        .mount(&server)
        .await;

    let (logs, _guard) = capture_logs();
    let request = RequestSpec::get("/v1/big").build().unwrap();
    let response = get_client(&server).execute(request).await.unwrap();
    assert!(!response.is_buffered());
    assert_eq!(response.text().await.unwrap(), big);
    assert!(logs.text().contains("TooLarge"));
}

#[tokio::test]
async fn test_status_handlers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/down"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "not_found",
            "message": "App not found",
            "status": 404
        })))
        .mount(&server)
        .await;

    let mut client = get_client(&server);
    client.on_status(StatusHandler::on_5xx(|resp| {
        anyhow::bail!(
            "upstream unavailable: {}",
            resp.body_text().unwrap_or_default()
        )
    }));

    let err = client
        .execute(RequestSpec::get("/v1/down").build().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Handler(_)));
    assert_eq!(err.to_string(), "upstream unavailable: maintenance");

    let response = client
        .execute(RequestSpec::get("/v1/missing").build().unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    match response.json::<Value>().await.unwrap_err() {
        Error::Api(err) => assert_eq!(err.message, "App not found"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_multipart_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/files/upload"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "file-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let (logs, _guard) = capture_logs();
    let request = RequestSpec::post("/v1/files/upload")
        .multipart(vec![
            Part::text("user", "u1"),
            Part::file("file", "a.png", b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec().into()),
        ])
        .build()
        .unwrap();
    let file: Value = get_client(&server).execute_json(request).await.unwrap();
    assert_eq!(file["id"], "file-1");
    assert!(logs.text().contains("a.png"));
}

#[tokio::test]
async fn test_connection_errors_are_reported() {
    let (logs, _guard) = capture_logs();
    let client = Client::new("http://127.0.0.1:9", "key").unwrap();
    let err = client
        .execute(RequestSpec::get("/v1/meta").build().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    let logs = logs.text();
    assert!(logs.contains("dify request failed"));
    assert!(logs.contains("Failed"));
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let config = Config {
        base_url: server.uri(),
        timeout: Duration::from_millis(50),
        ..Config::default()
    };
    let client = Client::new_with_config(config).unwrap();
    let err = client
        .execute(RequestSpec::get("/v1/slow").build().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout));
    assert!(err.is_timeout());
}
