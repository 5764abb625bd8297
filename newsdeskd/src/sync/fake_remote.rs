use std::sync::{Arc, Mutex, PoisonError};

use newsdesk_core::{Article, Bookmark};
use serde_json::{Value, json};
use time::OffsetDateTime;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// In-process bookmark service with real create/list/delete state, mounted on
/// a wiremock server.
#[derive(Clone, Default)]
pub(crate) struct FakeBookmarkService {
    state: Arc<Mutex<FakeState>>,
}

#[derive(Default)]
struct FakeState {
    records: Vec<Bookmark>,
    next_id: u64,
    fail_next: usize,
    token: Option<String>,
    refused: Vec<String>,
    mutations: usize,
}

impl FakeBookmarkService {
    pub(crate) async fn mount(server: &MockServer) -> Self {
        let fake = Self::default();
        Mock::given(any())
            .respond_with(fake.clone())
            .mount(server)
            .await;
        fake
    }

    pub(crate) fn seed(&self, id: &str, url: &str) -> Bookmark {
        let record = Bookmark {
            id: id.to_string(),
            user_id: "alice".into(),
            article: Article::new(url),
            saved_at: OffsetDateTime::now_utc(),
        };
        let mut state = self.lock();
        // Later creates must not reuse a seeded id.
        if let Some(n) = id.strip_prefix("srv-").and_then(|n| n.parse::<u64>().ok()) {
            state.next_id = state.next_id.max(n);
        }
        state.records.push(record.clone());
        record
    }

    pub(crate) fn records(&self) -> Vec<Bookmark> {
        self.lock().records.clone()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .lock()
            .records
            .iter()
            .map(|record| record.url().to_string())
            .collect();
        urls.sort();
        urls
    }

    /// The next `count` requests of any kind answer 503.
    pub(crate) fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    /// Requests without `Bearer <token>` answer 401 from now on.
    pub(crate) fn require_token(&self, token: &str) {
        self.lock().token = Some(token.to_string());
    }

    /// Creates of `url` answer 422 from now on.
    pub(crate) fn refuse_url(&self, url: &str) {
        self.lock().refused.push(url.to_string());
    }

    /// Creates and deletes that changed server state.
    pub(crate) fn mutations(&self) -> usize {
        self.lock().mutations
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Respond for FakeBookmarkService {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut state = self.lock();

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return ResponseTemplate::new(503);
        }
        if let Some(token) = &state.token {
            let expected = format!("Bearer {token}");
            let presented = request
                .headers
                .get("authorization")
                .and_then(|value| value.to_str().ok());
            if presented != Some(expected.as_str()) {
                return ResponseTemplate::new(401);
            }
        }

        let segments: Vec<&str> = request
            .url
            .path_segments()
            .map(|segments| segments.collect())
            .unwrap_or_default();

        match (request.method.as_str(), segments.as_slice()) {
            ("GET", ["bookmarks"]) => ResponseTemplate::new(200).set_body_json(&state.records),
            ("POST", ["bookmarks"]) => {
                let body: Value = match serde_json::from_slice(&request.body) {
                    Ok(body) => body,
                    Err(_) => return ResponseTemplate::new(400),
                };
                let article: Article = match serde_json::from_value(body["article"].clone()) {
                    Ok(article) => article,
                    Err(_) => return ResponseTemplate::new(400),
                };
                if state.refused.contains(&article.url) {
                    return ResponseTemplate::new(422).set_body_json(json!({"error": "invalid"}));
                }
                if state.records.iter().any(|record| record.url() == article.url) {
                    return ResponseTemplate::new(409).set_body_json(json!({"error": "exists"}));
                }
                state.next_id += 1;
                let record = Bookmark {
                    id: format!("srv-{}", state.next_id),
                    user_id: "alice".into(),
                    article,
                    saved_at: OffsetDateTime::now_utc(),
                };
                state.records.push(record.clone());
                state.mutations += 1;
                ResponseTemplate::new(201).set_body_json(&record)
            }
            ("DELETE", ["bookmarks", id]) => {
                let before = state.records.len();
                state.records.retain(|record| record.id != *id);
                if state.records.len() == before {
                    ResponseTemplate::new(404)
                } else {
                    state.mutations += 1;
                    ResponseTemplate::new(200)
                }
            }
            _ => ResponseTemplate::new(405),
        }
    }
}
