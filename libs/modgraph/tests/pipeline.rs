//! Request handling through a bootstrapped application.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use http::{header, Method, StatusCode};
use modgraph::{
    async_trait, AppOptions, Application, ControllerDef, DiResult, Guard, GuardOutcome, HttpError, HttpInterceptor,
    Injectable, ModuleDef, Next, Provider, Request, Resolver, Response, Route, TimeoutInterceptor, HTTP_INTERCEPTORS,
};
use serde_json::{json, Value};

struct UserRepo {
    source: &'static str,
}

impl Injectable for UserRepo {
    fn construct(_: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(Self { source: "memory" })
    }
}

struct UsersController {
    req: Arc<Request>,
    res: Arc<Response>,
    repo: Arc<UserRepo>,
}

impl Injectable for UsersController {
    fn construct(r: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(Self {
            req: r.get()?,
            res: r.get()?,
            repo: r.get()?,
        })
    }
}

impl UsersController {
    async fn get_user(&self) -> anyhow::Result<()> {
        self.res.send_json(&json!({
            "id": self.req.param("id"),
            "verbose": self.req.query("verbose"),
            "source": self.repo.source,
        }))
    }

    async fn create(&self) -> anyhow::Result<()> {
        let user: Value = self.req.body_as()?;
        self.res.set_status(StatusCode::CREATED);
        self.res.send_json(&user)
    }

    async fn forbidden(&self) -> anyhow::Result<()> {
        Err(HttpError::forbidden("nope").into())
    }

    async fn boom(&self) -> anyhow::Result<()> {
        anyhow::bail!("database exploded")
    }

    async fn silent(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct SlowController {
    res: Arc<Response>,
}

impl Injectable for SlowController {
    fn construct(r: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(Self { res: r.get()? })
    }
}

struct Missing;

struct BrokenController {
    _missing: Arc<Missing>,
}

impl Injectable for BrokenController {
    fn construct(r: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(Self { _missing: r.get()? })
    }
}

struct DenyGuard;

impl Injectable for DenyGuard {
    fn construct(_: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(DenyGuard)
    }
}

#[async_trait]
impl Guard for DenyGuard {
    async fn can_activate(&self, _: &[Value]) -> anyhow::Result<GuardOutcome> {
        Ok(GuardOutcome::Deny)
    }
}

struct TeapotGuard;

impl Injectable for TeapotGuard {
    fn construct(_: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(TeapotGuard)
    }
}

#[async_trait]
impl Guard for TeapotGuard {
    async fn can_activate(&self, _: &[Value]) -> anyhow::Result<GuardOutcome> {
        Ok(StatusCode::IM_A_TEAPOT.into())
    }
}

/// Allows requests whose `x-role` header equals the first guard parameter.
struct RoleGuard {
    req: Arc<Request>,
}

impl Injectable for RoleGuard {
    fn construct(r: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(Self { req: r.get()? })
    }
}

#[async_trait]
impl Guard for RoleGuard {
    async fn can_activate(&self, params: &[Value]) -> anyhow::Result<GuardOutcome> {
        let wanted = params.first().and_then(Value::as_str);
        Ok((wanted.is_some() && self.req.header("x-role") == wanted).into())
    }
}

struct TagInterceptor {
    res: Arc<Response>,
}

impl Injectable for TagInterceptor {
    fn construct(r: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(Self { res: r.get()? })
    }
}

#[async_trait]
impl HttpInterceptor for TagInterceptor {
    async fn intercept(&self, next: Next) -> anyhow::Result<()> {
        self.res
            .set_header(header::HeaderName::from_static("x-tag"), header::HeaderValue::from_static("tagged"));
        next.run().await
    }
}

async fn app_with(opts: AppOptions) -> Application {
    let users = ModuleDef::builder("users")
        .providers_per_mod([Provider::class::<UserRepo>()])
        .providers_per_req([
            Provider::class::<DenyGuard>(),
            Provider::class::<TeapotGuard>(),
            Provider::class::<RoleGuard>(),
            Provider::token_class::<dyn HttpInterceptor, TagInterceptor>(&*HTTP_INTERCEPTORS, |i| i).multi(),
        ])
        .controller(
            ControllerDef::of::<UsersController>()
                .route(Route::get("users/:id"), "get_user", |c| async move { c.get_user().await })
                .route(Route::post("users"), "create", |c| async move { c.create().await })
                .route(Route::post("users/locked").guard::<DenyGuard>(), "create_locked", |c| async move {
                    c.create().await
                })
                .route(
                    Route::post("users/admin").guard_with::<RoleGuard>(vec![json!("admin")]),
                    "create_admin",
                    |c| async move { c.create().await },
                )
                .route(Route::get("users/:id/secret").guard::<DenyGuard>(), "secret", |c| async move {
                    c.silent().await
                })
                .route(Route::get("teapot").guard::<TeapotGuard>(), "teapot", |c| async move {
                    c.silent().await
                })
                .route(
                    Route::get("admin").guard_with::<RoleGuard>(vec![json!("admin")]),
                    "admin",
                    |c| async move { c.silent().await },
                )
                .route(Route::get("forbidden"), "forbidden", |c| async move { c.forbidden().await })
                .route(Route::get("boom"), "boom", |c| async move { c.boom().await })
                .route(Route::get("silent"), "silent", |c| async move { c.silent().await })
                .build(),
        )
        .build();

    let slow = ModuleDef::builder("slow")
        .providers_per_req([TimeoutInterceptor::provider(Duration::from_millis(50))])
        .controller(
            ControllerDef::of::<SlowController>()
                .route(Route::get("slow"), "slow", |c| async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    c.res.send_text("too late");
                    Ok(())
                })
                .build(),
        )
        .build();

    let broken = ModuleDef::builder("broken")
        .controller(
            ControllerDef::of::<BrokenController>()
                .route(Route::get("broken"), "broken", |_| async move { Ok(()) })
                .build(),
        )
        .build();

    let root = ModuleDef::root("app")
        .server_name("test-server")
        .import(users.with_params().prefix("api").build())
        .imports([&slow, &broken])
        .build();

    Application::bootstrap(&root, opts).await.unwrap()
}

async fn app() -> Application {
    app_with(AppOptions::default()).await
}

fn get(uri: &str) -> http::Request<Body> {
    http::Request::get(uri).body(Body::empty()).unwrap()
}

async fn body_text(res: http::Response<Body>) -> String {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn params_query_and_module_providers_reach_the_handler() {
    let app = app().await;
    let res = app.handle(get("/api/users/42?verbose=1")).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::SERVER], "test-server");
    assert_eq!(res.headers()["x-tag"], "tagged");
    assert_eq!(res.headers()[header::CONTENT_TYPE], "application/json");
    let body: Value = serde_json::from_str(&body_text(res).await).unwrap();
    assert_eq!(body, json!({"id": "42", "verbose": "1", "source": "memory"}));
}

#[tokio::test]
async fn percent_encoded_params_are_decoded() {
    let app = app().await;
    let res = app.handle(get("/api/users/a%20b")).await;
    let body: Value = serde_json::from_str(&body_text(res).await).unwrap();
    assert_eq!(body["id"], "a b");
}

#[tokio::test]
async fn json_body_is_parsed_for_post() {
    let app = app().await;
    let req = http::Request::post("/api/users")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"name":"ann"}"#))
        .unwrap();
    let res = app.handle(req).await;

    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(body_text(res).await, r#"{"name":"ann"}"#);
}

#[tokio::test]
async fn invalid_json_is_a_bad_request() {
    let app = app().await;
    let req = http::Request::post("/api/users")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{oops"))
        .unwrap();
    let res = app.handle(req).await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(res).await.starts_with("invalid JSON body"));
}

#[tokio::test]
async fn body_limit_from_options_is_enforced() {
    let app = app_with(AppOptions {
        body_limit_bytes: Some(8),
        ..AppOptions::default()
    })
    .await;
    let payload = r#"{"name":"a much longer name"}"#;
    let req = http::Request::post("/api/users")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, payload.len())
        .body(Body::from(payload))
        .unwrap();
    let res = app.handle(req).await;

    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn denying_guard_answers_401_before_the_chain() {
    let app = app().await;
    let res = app.handle(get("/api/users/1/secret")).await;

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(res.headers().get(header::SERVER).is_none());
    assert!(res.headers().get("x-tag").is_none());
    assert_eq!(body_text(res).await, "Unauthorized");
}

fn post_json(uri: &str, body: &'static str) -> http::Request<Body> {
    http::Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-role", "admin")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn rejecting_guard_runs_before_the_body_is_parsed() {
    let app = app().await;
    let res = app.handle(post_json("/api/users/locked", "{bad")).await;

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_text(res).await, "Unauthorized");
}

#[tokio::test]
async fn passing_guard_lets_the_body_through() {
    let app = app().await;

    let res = app.handle(post_json("/api/users/admin", r#"{"name":"root"}"#)).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(body_text(res).await, r#"{"name":"root"}"#);

    let res = app.handle(post_json("/api/users/admin", "{bad")).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn guard_may_choose_the_status() {
    let app = app().await;
    let res = app.handle(get("/api/teapot")).await;
    assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
}

#[tokio::test]
async fn guard_parameters_are_passed_through() {
    let app = app().await;

    let allowed = http::Request::get("/api/admin")
        .header("x-role", "admin")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.handle(allowed).await.status(), StatusCode::OK);

    let res = app.handle(get("/api/admin")).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn http_errors_keep_their_status() {
    let app = app().await;
    let res = app.handle(get("/api/forbidden")).await;

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(res).await, "nope");
}

#[tokio::test]
async fn other_errors_become_500_without_details() {
    let app = app().await;
    let res = app.handle(get("/api/boom")).await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(res).await, "Internal server error");
}

#[tokio::test]
async fn handler_that_writes_nothing_still_gets_a_response() {
    let app = app().await;
    let res = app.handle(get("/api/silent")).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::SERVER], "test-server");
    assert!(body_text(res).await.is_empty());
}

#[tokio::test]
async fn unknown_path_or_method_is_404() {
    let app = app().await;

    let res = app.handle(get("/api/nothing")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(res.headers().get(header::SERVER).is_none());
    assert_eq!(body_text(res).await, "Not Found");

    let wrong_method = http::Request::builder()
        .method(Method::DELETE)
        .uri("/api/users/1")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.handle(wrong_method).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn timeout_interceptor_answers_504() {
    let app = app().await;
    let res = app.handle(get("/slow")).await;

    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body_text(res).await, "Gateway Timeout");
}

#[tokio::test]
async fn missing_controller_dependency_is_a_500_at_request_time() {
    let app = app().await;
    let res = app.handle(get("/broken")).await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(res).await, "Internal server error");
}

#[tokio::test]
async fn each_request_gets_its_own_controller() {
    let app = app().await;
    let a = app.handle(get("/api/users/1")).await;
    let b = app.handle(get("/api/users/2")).await;

    let a: Value = serde_json::from_str(&body_text(a).await).unwrap();
    let b: Value = serde_json::from_str(&body_text(b).await).unwrap();
    assert_eq!(a["id"], "1");
    assert_eq!(b["id"], "2");
}
