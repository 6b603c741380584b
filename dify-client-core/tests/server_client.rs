use dify_client_core::{
    auth::{AuthPhase, TokenManager, TokenState},
    logging::LoggingConfig,
    request::RequestSpec,
    Client, Config, Error, ServerClient, ServerConfig,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::{
    matchers::{body_json, header, method, path},
    Match, Mock, MockServer, Request, ResponseTemplate,
};

/// Matches requests whose `Cookie` header carries `name=value`.
struct HasCookie(&'static str, &'static str);

impl Match for HasCookie {
    fn matches(&self, request: &Request) -> bool {
        let expected = format!("{}={}", self.0, self.1);
        request
            .headers
            .get_all("cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|line| line.split(';'))
            .any(|pair| pair.trim() == expected)
    }
}

fn server_client(server: &MockServer) -> ServerClient {
    let config = Config {
        base_url: server.uri(),
        logging: LoggingConfig {
            enabled: false,
            ..LoggingConfig::default()
        },
        ..Config::default()
    };
    let account = ServerConfig::new("admin@example.com", SecretString::new("pa55word".into()));
    ServerClient::new(config, account).unwrap()
}

fn with_tokens(client: ServerClient, access: &str, refresh: &str) -> ServerClient {
    let tokens = TokenState::new(Some(access.into()), Some(refresh.into()), Some("csrf".into()));
    client.with_token_manager(Arc::new(TokenManager::with_tokens(tokens)))
}

#[tokio::test]
async fn test_login_reads_tokens_from_cookies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/console/api/login"))
        .and(body_json(json!({
            "email": "admin@example.com",
            "password": "pa55word",
            "language": "en-US",
            "remember_me": true,
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": "success"}))
                .append_header("Set-Cookie", "__Host-access_token=tok1; Path=/; Secure; HttpOnly")
                .append_header("Set-Cookie", "__Host-refresh_token=tok2; Path=/; Secure; HttpOnly")
                .append_header("Set-Cookie", "__Host-csrf_token=tok3; Path=/; Secure"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = server_client(&server);
    assert_eq!(client.token_manager().phase(), AuthPhase::Unauthenticated);
    let tokens = client.login().await.unwrap();
    assert_eq!(tokens.access_token(), Some("tok1"));
    assert_eq!(tokens.refresh_token(), Some("tok2"));
    assert_eq!(tokens.csrf_token(), Some("tok3"));
    assert_eq!(client.token_manager().phase(), AuthPhase::Authenticated);
}

#[tokio::test]
async fn test_login_body_wins_and_password_is_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/console/api/login"))
        .and(body_json(json!({
            "email": "admin@example.com",
            "password": "cGE1NXdvcmQ=",
            "language": "en-US",
            "remember_me": true,
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "result": "success",
                    "data": {"access_token": "A", "refresh_token": "B"}
                }))
                .append_header("Set-Cookie", "access_token=cookie; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = Config {
        base_url: server.uri(),
        ..Config::default()
    };
    let mut account = ServerConfig::new("admin@example.com", SecretString::new("pa55word".into()));
    account.password_encryption = true;
    let client = ServerClient::new(config, account).unwrap();

    let tokens = client.login().await.unwrap();
    assert_eq!(tokens.access_token(), Some("A"));
    assert_eq!(tokens.refresh_token(), Some("B"));
    assert_eq!(tokens.csrf_token(), None);
}

#[tokio::test]
async fn test_login_without_tokens_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/console/api/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "fail"})))
        .mount(&server)
        .await;

    let client = server_client(&server);
    let err = client.login().await.unwrap_err();
    assert!(matches!(err, Error::MissingToken("access_token")));
    assert_eq!(client.token_manager().phase(), AuthPhase::Unauthenticated);
}

#[tokio::test]
async fn test_login_rejected_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/console/api/login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
        .mount(&server)
        .await;

    let err = server_client(&server).request_login().await.unwrap_err();
    assert!(err.is_authentication_rejected());
    assert_eq!(err.status().map(|s| s.as_u16()), Some(401));
}

#[tokio::test]
async fn test_refresh_sends_both_cookies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/console/api/refresh-token"))
        .and(body_json(json!({"refresh_token": "r1"})))
        .and(HasCookie("refresh_token", "r1"))
        .and(HasCookie("__Host-refresh_token", "r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "success",
            "data": {"access_token": "new", "refresh_token": "r2"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = server_client(&server).refresh_token("r1").await.unwrap();
    assert_eq!(tokens.access_token(), Some("new"));
    assert_eq!(tokens.refresh_token(), Some("r2"));
}

#[tokio::test]
async fn test_401_refreshes_and_retries_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/console/api/apps"))
        .and(header("Authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/console/api/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "success",
            "data": {"access_token": "new", "refresh_token": "r2", "csrf_token": "c2"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/console/api/apps"))
        .and(header("Authorization", "Bearer new"))
        .and(header("X-CSRF-Token", "c2"))
        .and(HasCookie("access_token", "new"))
        .and(HasCookie("__Host-access_token", "new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [], "total": 0})))
        .expect(1)
        .mount(&server)
        .await;

    let client = with_tokens(server_client(&server), "old", "r1");
    let request = RequestSpec::get("/console/api/apps").build().unwrap();
    let apps: Value = client.send_authenticated(request).await.unwrap();
    assert_eq!(apps["total"], 0);
    assert_eq!(client.token_manager().tokens().access_token(), Some("new"));
}

#[tokio::test]
async fn test_second_rejection_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/console/api/apps"))
        .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/console/api/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "success",
            "data": {"access_token": "new", "refresh_token": "r2"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = with_tokens(server_client(&server), "old", "r1");
    let request = RequestSpec::get("/console/api/apps").build().unwrap();
    let err = client.execute_with_retry(request).await.unwrap_err();
    assert!(err.is_authentication_rejected());
}

#[tokio::test]
async fn test_failed_refresh_falls_back_to_login() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/console/api/apps"))
        .and(header("Authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/console/api/refresh-token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("refresh token expired"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/console/api/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": "success"}))
                .append_header("Set-Cookie", "access_token=fresh; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/console/api/apps"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = with_tokens(server_client(&server), "old", "r1");
    let request = RequestSpec::get("/console/api/apps").build().unwrap();
    let response = client.execute_with_retry(request).await.unwrap();
    assert!(response.is_success());
    assert_eq!(client.token_manager().tokens().refresh_token(), None);
}

#[tokio::test]
async fn test_first_call_logs_in() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/console/api/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "success",
            "data": {"access_token": "A", "refresh_token": "B", "csrf_token": "C"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/console/api/apps/app-1"))
        .and(header("Authorization", "Bearer A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "app-1"})))
        .expect(2)
        .mount(&server)
        .await;

    let client = server_client(&server);
    for _ in 0..2 {
        let request = RequestSpec::get("/console/api/apps/{app_id}")
            .uri_vars(["app-1"])
            .build()
            .unwrap();
        let app: Value = client.send_authenticated(request).await.unwrap();
        assert_eq!(app["id"], "app-1");
    }
}

#[tokio::test]
async fn test_other_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/console/api/apps"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "code": "forbidden",
            "message": "not allowed",
            "status": 403
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = with_tokens(server_client(&server), "A", "B");
    let request = RequestSpec::get("/console/api/apps").build().unwrap();
    let err = client.send_authenticated::<Value>(request).await.unwrap_err();
    match err {
        Error::Api(resp) => {
            assert_eq!(resp.code, "forbidden");
            assert_eq!(resp.status, 403);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_server_client_shares_the_plain_client() {
    let server = MockServer::start().await;
    let client = Client::new(&server.uri(), "app-key").unwrap();
    let account = ServerConfig::new("admin@example.com", SecretString::new("pw".into()));
    let console = ServerClient::with_client(client.clone(), account);
    assert_eq!(console.client().config.base_url, client.config.base_url);
}
