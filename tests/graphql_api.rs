use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::Layer;
use tempfile::TempDir;
use updoot::config::Config;
use updoot::db;
use updoot::graphql::{build_schema, ForumSchema, RequestContext, SessionState};
use updoot::mail::MemoryMailer;
use updoot::state::DbPool;

struct Harness {
    _dir: TempDir,
    db: DbPool,
    config: Arc<Config>,
    mailer: MemoryMailer,
    schema: ForumSchema,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        let db = db::create_pool(&dir.path().join("test.db")).expect("Failed to create test database");
        db::run_migrations(&db).expect("Failed to run migrations");

        let mut config = Config::default();
        config.auth.bcrypt_cost = 4;
        tweak(&mut config);

        Self {
            _dir: dir,
            db,
            config: Arc::new(config),
            mailer: MemoryMailer::new(),
            schema: build_schema(),
        }
    }

    async fn execute(&self, session: &SessionState, query: &str) -> async_graphql::Response {
        let context = RequestContext::new(
            self.db.clone(),
            self.config.clone(),
            Arc::new(self.mailer.clone()),
            session.clone(),
        );
        self.schema
            .execute(async_graphql::Request::new(query).data(context))
            .await
    }

    /// Run a query that must succeed and return its data.
    async fn ok(&self, session: &SessionState, query: &str) -> Value {
        let result = self.execute(session, query).await;
        assert!(
            result.errors.is_empty(),
            "Expected no errors for {}, got: {:?}",
            query,
            result.errors
        );
        result.data.into_json().unwrap()
    }

    /// Run a query that must fail and return the first error's code.
    async fn error_code(&self, session: &SessionState, query: &str) -> String {
        let result = self.execute(session, query).await;
        assert!(!result.errors.is_empty(), "Expected an error for {}", query);
        let json = serde_json::to_value(&result).unwrap();
        json["errors"][0]["extensions"]["code"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }

    async fn register(&self, username: &str) -> SessionState {
        let session = SessionState::anonymous();
        let data = self
            .ok(
                &session,
                &format!(
                    r#"mutation {{
                        register(options: {{ username: "{0}", email: "{0}@example.com", password: "password123" }}) {{
                            errors {{ field message }}
                            user {{ id username }}
                        }}
                    }}"#,
                    username
                ),
            )
            .await;
        assert!(data["register"]["errors"].is_null(), "{:?}", data);
        session
    }

    async fn create_post(&self, session: &SessionState, title: &str) -> i64 {
        let data = self
            .ok(
                session,
                &format!(
                    r#"mutation {{ createPost(input: {{ title: "{}", text: "body" }}) {{ id }} }}"#,
                    title
                ),
            )
            .await;
        data["createPost"]["id"].as_i64().unwrap()
    }

    async fn points(&self, post_id: i64) -> i64 {
        let data = self
            .ok(
                &SessionState::anonymous(),
                &format!("{{ post(id: {}) {{ points }} }}", post_id),
            )
            .await;
        data["post"]["points"].as_i64().unwrap()
    }
}

/// Records the key count of every loader batch dispatched while installed.
#[derive(Clone, Default)]
struct BatchSizes {
    sizes: Arc<Mutex<Vec<u64>>>,
}

#[derive(Default)]
struct DispatchEvent {
    is_dispatch: bool,
    keys: Option<u64>,
}

impl Visit for DispatchEvent {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "keys" {
            self.keys = Some(value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" && format!("{:?}", value) == "Dispatching batch" {
            self.is_dispatch = true;
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for BatchSizes {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: LayerContext<'_, S>) {
        let mut visit = DispatchEvent::default();
        event.record(&mut visit);
        if let (true, Some(keys)) = (visit.is_dispatch, visit.keys) {
            self.sizes.lock().unwrap().push(keys);
        }
    }
}

fn reset_token_from(html: &str) -> String {
    let start = html.find("change-password/").unwrap() + "change-password/".len();
    let rest = &html[start..];
    rest[..rest.find('"').unwrap()].to_string()
}

#[tokio::test]
async fn register_logs_in_and_me_shows_own_email() {
    let h = Harness::new();
    let alice = h.register("alice").await;

    let data = h.ok(&alice, "{ me { username email } }").await;
    assert_eq!(data["me"]["username"], "alice");
    assert_eq!(data["me"]["email"], "alice@example.com");

    let data = h.ok(&SessionState::anonymous(), "{ me { id } }").await;
    assert!(data["me"].is_null());
}

#[tokio::test]
async fn register_reports_invalid_and_duplicate_fields() {
    let h = Harness::new();
    h.register("alice").await;

    let cases = [
        (r#"username: "al", email: "x@example.com", password: "password123""#, "username"),
        (r#"username: "a@b", email: "x@example.com", password: "password123""#, "username"),
        (r#"username: "carol", email: "nope", password: "password123""#, "email"),
        (r#"username: "carol", email: "x@example.com", password: "short""#, "password"),
        (r#"username: "alice", email: "x@example.com", password: "password123""#, "username"),
        (r#"username: "carol", email: "alice@example.com", password: "password123""#, "email"),
    ];

    for (options, field) in cases {
        let session = SessionState::anonymous();
        let data = h
            .ok(
                &session,
                &format!(
                    "mutation {{ register(options: {{ {} }}) {{ errors {{ field message }} user {{ id }} }} }}",
                    options
                ),
            )
            .await;
        assert_eq!(data["register"]["errors"][0]["field"], field, "{}", options);
        assert!(data["register"]["user"].is_null());
        assert_eq!(session.user_id(), None);
    }
}

#[tokio::test]
async fn login_accepts_username_or_email() {
    let h = Harness::new();
    h.register("alice").await;

    for who in ["alice", "alice@example.com"] {
        let session = SessionState::anonymous();
        let data = h
            .ok(
                &session,
                &format!(
                    r#"mutation {{ login(usernameOrEmail: "{}", password: "password123") {{ errors {{ field }} user {{ username }} }} }}"#,
                    who
                ),
            )
            .await;
        assert_eq!(data["login"]["user"]["username"], "alice");
        assert!(session.user_id().is_some());
    }

    let data = h
        .ok(
            &SessionState::anonymous(),
            r#"mutation { login(usernameOrEmail: "alice", password: "wrong-password") { errors { field message } } }"#,
        )
        .await;
    assert_eq!(data["login"]["errors"][0]["field"], "password");

    let data = h
        .ok(
            &SessionState::anonymous(),
            r#"mutation { login(usernameOrEmail: "nobody", password: "password123") { errors { field } } }"#,
        )
        .await;
    assert_eq!(data["login"]["errors"][0]["field"], "usernameOrEmail");
}

#[tokio::test]
async fn logout_ends_the_session() {
    let h = Harness::new();
    let alice = h.register("alice").await;

    let data = h.ok(&alice, "mutation { logout }").await;
    assert_eq!(data["logout"], true);
    assert_eq!(alice.user_id(), None);

    let data = h.ok(&alice, "{ me { id } }").await;
    assert!(data["me"].is_null());
}

#[tokio::test]
async fn votes_move_points_and_vote_status() {
    let h = Harness::new();
    let alice = h.register("alice").await;
    let bob = h.register("bob").await;
    let post_id = h.create_post(&alice, "hello").await;

    h.ok(&bob, &format!("mutation {{ vote(postId: {}, value: 1) }}", post_id)).await;
    assert_eq!(h.points(post_id).await, 1);

    // repeating the same vote changes nothing
    h.ok(&bob, &format!("mutation {{ vote(postId: {}, value: 1) }}", post_id)).await;
    assert_eq!(h.points(post_id).await, 1);

    // flipping moves the score by two
    h.ok(&bob, &format!("mutation {{ vote(postId: {}, value: -1) }}", post_id)).await;
    assert_eq!(h.points(post_id).await, -1);

    h.ok(&alice, &format!("mutation {{ vote(postId: {}, value: -1) }}", post_id)).await;
    assert_eq!(h.points(post_id).await, -2);

    let query = "{ posts(limit: 10) { posts { id points voteStatus } } }";
    let data = h.ok(&bob, query).await;
    assert_eq!(data["posts"]["posts"][0]["voteStatus"], -1);

    let data = h.ok(&SessionState::anonymous(), query).await;
    assert!(data["posts"]["posts"][0]["voteStatus"].is_null());

    let conn = h.db.get().unwrap();
    let tally: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(value), 0) FROM votes WHERE post_id = ?1",
            [post_id],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(tally, -2);
}

#[tokio::test]
async fn votes_in_one_request_apply_in_order() {
    let h = Harness::new();
    let alice = h.register("alice").await;
    let post_id = h.create_post(&alice, "hello").await;

    let data = h
        .ok(
            &alice,
            &format!(
                "mutation {{ first: vote(postId: {0}, value: 1) second: vote(postId: {0}, value: -1) }}",
                post_id
            ),
        )
        .await;
    assert_eq!(data["first"], true);
    assert_eq!(data["second"], true);
    assert_eq!(h.points(post_id).await, -1);

    let data = h
        .ok(&alice, &format!("{{ post(id: {}) {{ voteStatus }} }}", post_id))
        .await;
    assert_eq!(data["post"]["voteStatus"], -1);
}

#[tokio::test]
async fn vote_errors_carry_codes() {
    let h = Harness::new();
    let alice = h.register("alice").await;
    let post_id = h.create_post(&alice, "hello").await;

    let code = h
        .error_code(
            &SessionState::anonymous(),
            &format!("mutation {{ vote(postId: {}, value: 1) }}", post_id),
        )
        .await;
    assert_eq!(code, "UNAUTHENTICATED");

    let code = h
        .error_code(&alice, "mutation { vote(postId: 9999, value: 1) }")
        .await;
    assert_eq!(code, "NOT_FOUND");
    assert_eq!(h.points(post_id).await, 0);
}

#[tokio::test]
async fn lenient_voting_treats_other_values_as_up() {
    let h = Harness::new();
    let alice = h.register("alice").await;
    let post_id = h.create_post(&alice, "hello").await;

    h.ok(&alice, &format!("mutation {{ vote(postId: {}, value: 5) }}", post_id)).await;
    assert_eq!(h.points(post_id).await, 1);
}

#[tokio::test]
async fn strict_voting_rejects_other_values() {
    let h = Harness::with_config(|c| c.voting.strict = true);
    let alice = h.register("alice").await;
    let post_id = h.create_post(&alice, "hello").await;

    let code = h
        .error_code(&alice, &format!("mutation {{ vote(postId: {}, value: 0) }}", post_id))
        .await;
    assert_eq!(code, "BAD_USER_INPUT");
    assert_eq!(h.points(post_id).await, 0);
}

#[tokio::test]
async fn posts_paginate_newest_first() {
    let h = Harness::new();
    let alice = h.register("alice").await;
    let alice_id = alice.user_id().unwrap();

    {
        let conn = h.db.get().unwrap();
        for i in 1..=5 {
            conn.execute(
                "INSERT INTO posts (title, text, creator_id, created_at, updated_at)
                 VALUES (?1, 'body', ?2, ?3, ?3)",
                rusqlite::params![
                    format!("post {}", i),
                    alice_id,
                    format!("2024-01-01T00:00:0{}.000Z", i)
                ],
            )
            .unwrap();
        }
    }

    let page = |cursor: Option<&str>| match cursor {
        Some(c) => format!(
            r#"{{ posts(limit: 2, cursor: "{}") {{ hasMore posts {{ title createdAt }} }} }}"#,
            c
        ),
        None => "{ posts(limit: 2) { hasMore posts { title createdAt } } }".to_string(),
    };

    let anon = SessionState::anonymous();
    let first = h.ok(&anon, &page(None)).await;
    let titles: Vec<_> = first["posts"]["posts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["title"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(titles, vec!["post 5", "post 4"]);
    assert_eq!(first["posts"]["hasMore"], true);

    let cursor = first["posts"]["posts"][1]["createdAt"].as_str().unwrap().to_string();
    let second = h.ok(&anon, &page(Some(&cursor))).await;
    assert_eq!(second["posts"]["posts"][0]["title"], "post 3");
    assert_eq!(second["posts"]["posts"][1]["title"], "post 2");
    assert_eq!(second["posts"]["hasMore"], true);

    let cursor = second["posts"]["posts"][1]["createdAt"].as_str().unwrap().to_string();
    let last = h.ok(&anon, &page(Some(&cursor))).await;
    assert_eq!(last["posts"]["posts"].as_array().unwrap().len(), 1);
    assert_eq!(last["posts"]["posts"][0]["title"], "post 1");
    assert_eq!(last["posts"]["hasMore"], false);

    // epoch milliseconds work as a cursor too: 2024-01-01T00:00:03Z
    let data = h
        .ok(&anon, r#"{ posts(limit: 10, cursor: "1704067203000") { posts { title } } }"#)
        .await;
    assert_eq!(data["posts"]["posts"].as_array().unwrap().len(), 2);

    let data = h.ok(&anon, "{ posts(limit: 500) { hasMore posts { id } } }").await;
    assert_eq!(data["posts"]["posts"].as_array().unwrap().len(), 5);
    assert_eq!(data["posts"]["hasMore"], false);

    let code = h
        .error_code(&anon, r#"{ posts(limit: 2, cursor: "not a time") { hasMore } }"#)
        .await;
    assert_eq!(code, "BAD_USER_INPUT");
}

#[tokio::test]
async fn post_fields_resolve_creator_and_snippet() {
    let h = Harness::new();
    let alice = h.register("alice").await;
    let bob = h.register("bob").await;
    h.create_post(&alice, "from alice").await;
    h.create_post(&bob, "from bob").await;

    let long_text = "x".repeat(80);
    h.ok(
        &alice,
        &format!(
            r#"mutation {{ createPost(input: {{ title: "long", text: "{}" }}) {{ id }} }}"#,
            long_text
        ),
    )
    .await;

    let data = h
        .ok(
            &bob,
            "{ posts(limit: 10) { posts { title textSnippet creator { username email } } } }",
        )
        .await;
    let posts = data["posts"]["posts"].as_array().unwrap();
    assert_eq!(posts.len(), 3);

    for post in posts {
        let creator = &post["creator"];
        match creator["username"].as_str().unwrap() {
            "alice" => assert_eq!(creator["email"], ""),
            "bob" => assert_eq!(creator["email"], "bob@example.com"),
            other => panic!("unexpected creator {}", other),
        }
        if post["title"] == "long" {
            assert_eq!(post["textSnippet"].as_str().unwrap().len(), 50);
        }
    }
}

#[tokio::test]
async fn only_the_creator_can_edit_or_delete() {
    let h = Harness::new();
    let alice = h.register("alice").await;
    let bob = h.register("bob").await;
    let post_id = h.create_post(&alice, "original").await;
    h.ok(&bob, &format!("mutation {{ vote(postId: {}, value: 1) }}", post_id)).await;

    let edit = format!(
        r#"mutation {{ updatePost(id: {}, title: "edited", text: "new") {{ title }} }}"#,
        post_id
    );
    let data = h.ok(&bob, &edit).await;
    assert!(data["updatePost"].is_null());
    let data = h.ok(&alice, &edit).await;
    assert_eq!(data["updatePost"]["title"], "edited");

    let delete = format!("mutation {{ deletePost(id: {}) }}", post_id);
    assert_eq!(h.ok(&bob, &delete).await["deletePost"], false);
    assert_eq!(h.ok(&alice, &delete).await["deletePost"], true);

    let data = h
        .ok(&alice, &format!("{{ post(id: {}) {{ id }} }}", post_id))
        .await;
    assert!(data["post"].is_null());

    let conn = h.db.get().unwrap();
    let votes: i64 = conn
        .query_row("SELECT COUNT(*) FROM votes WHERE post_id = ?1", [post_id], |r| r.get(0))
        .unwrap();
    assert_eq!(votes, 0);
}

#[tokio::test]
async fn writing_posts_requires_login() {
    let h = Harness::new();
    let anon = SessionState::anonymous();

    let code = h
        .error_code(&anon, r#"mutation { createPost(input: { title: "t", text: "b" }) { id } }"#)
        .await;
    assert_eq!(code, "UNAUTHENTICATED");

    let code = h.error_code(&anon, "mutation { deletePost(id: 1) }").await;
    assert_eq!(code, "UNAUTHENTICATED");
}

#[tokio::test]
async fn password_reset_flow() {
    let h = Harness::new();
    h.register("alice").await;
    let anon = SessionState::anonymous();

    let data = h
        .ok(&anon, r#"mutation { forgotPassword(email: "nobody@example.com") }"#)
        .await;
    assert_eq!(data["forgotPassword"], true);
    assert!(h.mailer.sent().is_empty());

    let data = h
        .ok(&anon, r#"mutation { forgotPassword(email: "alice@example.com") }"#)
        .await;
    assert_eq!(data["forgotPassword"], true);
    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "alice@example.com");
    let token = reset_token_from(&sent[0].html);

    let change = |password: &str| {
        format!(
            r#"mutation {{ changePassword(token: "{}", newPassword: "{}") {{ errors {{ field message }} user {{ username }} }} }}"#,
            token, password
        )
    };

    let data = h.ok(&anon, &change("short")).await;
    assert_eq!(data["changePassword"]["errors"][0]["field"], "newPassword");

    let session = SessionState::anonymous();
    let data = h.ok(&session, &change("brand-new-password")).await;
    assert_eq!(data["changePassword"]["user"]["username"], "alice");
    assert!(session.user_id().is_some());

    // single use
    let data = h.ok(&anon, &change("another-password")).await;
    assert_eq!(data["changePassword"]["errors"][0]["field"], "token");

    let data = h
        .ok(
            &anon,
            r#"mutation { login(usernameOrEmail: "alice", password: "brand-new-password") { user { username } } }"#,
        )
        .await;
    assert_eq!(data["login"]["user"]["username"], "alice");
}

#[tokio::test]
async fn expired_reset_token_is_removed_when_used() {
    let h = Harness::new();
    let alice = h.register("alice").await;
    let alice_id = alice.user_id().unwrap();

    h.db.get()
        .unwrap()
        .execute(
            "INSERT INTO password_resets (token, user_id, expires_at)
             VALUES ('stale', ?1, datetime('now', '-1 hours'))",
            [alice_id],
        )
        .unwrap();

    let session = SessionState::anonymous();
    let data = h
        .ok(
            &session,
            r#"mutation { changePassword(token: "stale", newPassword: "brand-new-password") { errors { field } user { id } } }"#,
        )
        .await;
    assert_eq!(data["changePassword"]["errors"][0]["field"], "token");
    assert!(data["changePassword"]["user"].is_null());
    assert_eq!(session.user_id(), None);

    let left: i64 = h
        .db
        .get()
        .unwrap()
        .query_row(
            "SELECT COUNT(*) FROM password_resets WHERE token = 'stale'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(left, 0);
}

#[tokio::test]
async fn post_list_fields_batch_into_one_fetch_per_loader() {
    let h = Harness::new();
    let mut authors = Vec::new();
    for name in ["alice", "bob", "carol", "dave"] {
        authors.push(h.register(name).await);
    }
    for (i, author) in authors.iter().enumerate() {
        for n in 0..3 {
            h.create_post(author, &format!("post {} by {}", n, i)).await;
        }
    }

    let batches = BatchSizes::default();
    let subscriber = tracing_subscriber::registry().with(batches.clone());
    let data = {
        let _guard = tracing::subscriber::set_default(subscriber);
        h.ok(
            &authors[0],
            "{ posts(limit: 20) { posts { voteStatus creator { username } } } }",
        )
        .await
    };
    assert_eq!(data["posts"]["posts"].as_array().unwrap().len(), 12);

    let mut sizes = batches.sizes.lock().unwrap().clone();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![4, 12]);
}
