// CSRF token cache against a mock login page

use credcheck::csrf_cache::{CsrfCache, FetchSettings};
use credcheck::http::SessionSettings;
use std::collections::BTreeMap;
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

const LOGIN_PAGE: &str = r#"
<html><body>
  <form method="post" action="/login">
    <input type="hidden" name="authenticity_token" value="tok-1" />
    <input type="text" name="username" />
    <input type="password" name="password" />
  </form>
</body></html>
"#;

fn settings() -> FetchSettings {
    FetchSettings {
        user_agents: vec!["credcheck-test".to_string()],
        session: SessionSettings {
            cookies: BTreeMap::new(),
            cookie_urls: Vec::new(),
            proxy: None,
            timeout: Duration::from_secs(5),
        },
    }
}

#[tokio::test]
async fn test_token_is_fetched_once_within_ttl() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .expect(1)
        .mount(&mock_server)
        .await;

    let cache = CsrfCache::new();
    let url = format!("{}/login", mock_server.uri());

    let first = cache.get_or_fetch(&url, "authenticity_token", &settings()).await.unwrap();
    let second = cache.get_or_fetch(&url, "authenticity_token", &settings()).await.unwrap();

    assert_eq!(first.value, "tok-1");
    assert_eq!(first, second);
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn test_token_is_refetched_after_expiry() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .expect(2)
        .mount(&mock_server)
        .await;

    let cache = CsrfCache::with_ttl(Duration::from_millis(50));
    let url = format!("{}/login", mock_server.uri());

    assert!(cache.get_or_fetch(&url, "authenticity_token", &settings()).await.is_some());
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(cache.get_or_fetch(&url, "authenticity_token", &settings()).await.is_some());
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .expect(2)
        .mount(&mock_server)
        .await;

    let cache = CsrfCache::new();
    let url = format!("{}/login", mock_server.uri());

    cache.get_or_fetch(&url, "authenticity_token", &settings()).await;
    cache.invalidate(&url).await;
    assert!(cache.is_empty().await);
    cache.get_or_fetch(&url, "authenticity_token", &settings()).await;
}

#[tokio::test]
async fn test_missing_field_is_not_cached() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(&mock_server)
        .await;

    let cache = CsrfCache::new();
    let url = format!("{}/login", mock_server.uri());

    assert!(cache.get_or_fetch(&url, "_csrf", &settings()).await.is_none());
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_fetch_failure_yields_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let cache = CsrfCache::new();
    let url = format!("{}/login", mock_server.uri());

    assert!(cache.get_or_fetch(&url, "authenticity_token", &settings()).await.is_none());
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_fetch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(LOGIN_PAGE)
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let cache = std::sync::Arc::new(CsrfCache::new());
    let url = format!("{}/login", mock_server.uri());

    let mut handles = Vec::new();
    for _ in 0..5 {
        let cache = std::sync::Arc::clone(&cache);
        let url = url.clone();
        handles.push(tokio::spawn(async move {
            cache.get_or_fetch(&url, "authenticity_token", &settings()).await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().value, "tok-1");
    }
}

#[tokio::test]
async fn test_slow_page_does_not_block_other_pages() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(LOGIN_PAGE)
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fast/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(&mock_server)
        .await;

    let cache = std::sync::Arc::new(CsrfCache::new());
    let slow_url = format!("{}/slow/login", mock_server.uri());
    let fast_url = format!("{}/fast/login", mock_server.uri());

    let slow = {
        let cache = std::sync::Arc::clone(&cache);
        tokio::spawn(async move { cache.get_or_fetch(&slow_url, "authenticity_token", &settings()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let fast = cache.get_or_fetch(&fast_url, "authenticity_token", &settings()).await;
    assert_eq!(fast.unwrap().value, "tok-1");
    assert!(!slow.is_finished());

    assert_eq!(slow.await.unwrap().unwrap().value, "tok-1");
    assert_eq!(cache.len().await, 2);
}
