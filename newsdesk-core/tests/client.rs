use newsdesk_core::{ApiErrorClass, Article, BookmarkClient};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn list_bookmarks_sends_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/bookmarks"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "b1",
                "userId": "alice",
                "article": {"url": "https://news.example/a", "title": "A"},
                "savedAt": "2024-01-02T00:00:00Z"
            },
            {
                "id": "b2",
                "userId": "alice",
                "article": {"url": "https://news.example/b"},
                "savedAt": "2024-01-01T00:00:00Z"
            }
        ])))
        .mount(&server)
        .await;

    let client = BookmarkClient::with_base_url(&server.uri(), "test-token").unwrap();
    let list = client.list_bookmarks().await.unwrap();

    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id, "b1");
    assert_eq!(list[0].article.title.as_deref(), Some("A"));
    assert_eq!(list[1].url(), "https://news.example/b");
}

#[tokio::test]
async fn create_bookmark_posts_article_envelope() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/bookmarks"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(json!({
            "article": {"url": "https://news.example/a", "title": "A"}
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "srv-1",
            "userId": "alice",
            "article": {"url": "https://news.example/a", "title": "A"},
            "savedAt": "2024-01-02T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = BookmarkClient::with_base_url(&server.uri(), "test-token").unwrap();
    let created = client
        .create_bookmark(&Article::new("https://news.example/a").with_title("A"))
        .await
        .unwrap();

    assert_eq!(created.id, "srv-1");
    assert_eq!(created.user_id, "alice");
}

#[tokio::test]
async fn create_bookmark_conflict_is_classified() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/bookmarks"))
        .respond_with(ResponseTemplate::new(409).set_body_string("already saved"))
        .mount(&server)
        .await;

    let client = BookmarkClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .create_bookmark(&Article::new("https://news.example/a"))
        .await
        .unwrap_err();

    assert_eq!(err.classification(), ApiErrorClass::Conflict);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn delete_bookmark_encodes_id_segment() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/bookmarks/a%2Fb"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = BookmarkClient::with_base_url(&server.uri(), "test-token").unwrap();
    client.delete_bookmark("a/b").await.unwrap();
}

#[tokio::test]
async fn delete_missing_bookmark_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/bookmarks/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = BookmarkClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client.delete_bookmark("gone").await.unwrap_err();

    assert_eq!(err.classification(), ApiErrorClass::NotFound);
}

#[tokio::test]
async fn server_errors_are_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/bookmarks"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = BookmarkClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client.list_bookmarks().await.unwrap_err();

    assert_eq!(err.classification(), ApiErrorClass::Transient);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn rejected_credentials_are_auth_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/bookmarks"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = BookmarkClient::with_base_url(&server.uri(), "stale").unwrap();
    let err = client.list_bookmarks().await.unwrap_err();

    assert_eq!(err.classification(), ApiErrorClass::Auth);
}

#[tokio::test]
async fn refused_connection_is_unreachable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client =
        BookmarkClient::with_base_url(&format!("http://127.0.0.1:{port}"), "test-token").unwrap();
    let err = client.list_bookmarks().await.unwrap_err();

    assert_eq!(err.classification(), ApiErrorClass::Unreachable);
    assert!(err.is_retryable());
}
