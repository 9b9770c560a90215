//! Proxy credential source against a mock HTTP server.

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voxy_voice::config::CredentialSettings;
use voxy_voice::core::credentials::{
    ChainedCredentialProvider, CredentialProvider, ProxyCredentialProvider,
};
use voxy_voice::core::realtime::RealtimeError;

async fn proxy_with(body: serde_json::Value, status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/proxy.php"))
        .and(query_param("action", "get-api-key"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_proxy_returns_key() {
    let server = proxy_with(
        json!({ "apiKey": "sk-from-proxy", "status": "success", "timestamp": "2024-10-01 12:00:00" }),
        200,
    )
    .await;

    let provider = ProxyCredentialProvider::new(format!("{}/proxy.php", server.uri())).unwrap();
    let credential = provider.credential().await.unwrap().unwrap();
    assert_eq!(credential.expose(), "sk-from-proxy");
}

#[tokio::test]
async fn test_proxy_without_success_status_yields_nothing() {
    let server = proxy_with(json!({ "status": "error", "error": "API key not configured" }), 200).await;

    let provider = ProxyCredentialProvider::new(format!("{}/proxy.php", server.uri())).unwrap();
    assert!(provider.credential().await.unwrap().is_none());
}

#[tokio::test]
async fn test_proxy_http_error() {
    let server = proxy_with(json!({ "error": "forbidden" }), 403).await;

    let provider = ProxyCredentialProvider::new(format!("{}/proxy.php", server.uri())).unwrap();
    match provider.credential().await {
        Err(RealtimeError::AuthenticationFailed(msg)) => assert!(msg.contains("403")),
        other => panic!("Expected AuthenticationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_proxy_unreachable() {
    // Nothing listens on the discard port
    let provider = ProxyCredentialProvider::new("http://127.0.0.1:9/proxy.php").unwrap();
    assert!(matches!(
        provider.credential().await,
        Err(RealtimeError::ConnectionFailed(_))
    ));
}

#[tokio::test]
async fn test_chain_prefers_proxy_and_checks_prefix() {
    let server = proxy_with(json!({ "apiKey": "not-a-key", "status": "success" }), 200).await;

    let mut settings = CredentialSettings::default();
    settings.proxy_url = Some(format!("{}/proxy.php", server.uri()));
    settings.api_key = None;

    let chain = ChainedCredentialProvider::from_settings(&settings).unwrap();
    assert_eq!(chain.provider_names()[0], "proxy");

    // The proxy key lacks the `sk-` prefix, so it is skipped
    let credential = chain.credential().await.unwrap();
    if let Some(credential) = credential {
        assert_ne!(credential.expose(), "not-a-key");
    }
}
