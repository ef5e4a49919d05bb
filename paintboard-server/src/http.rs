//! HTTP routes, served by warp.
//!
//! ```text
//! request ─► Router filter ┬─ <api_root>/getboard  (GET)
//!                          ├─ <api_root>/paint     (POST, JSON)
//!                          └─ anything else ─► recover ─► JSON error
//! ```
//!
//! Routes are registered by path before the listener starts accepting.
//! Every failure answers with the same envelope:
//! `{"statusCode":N,"data":{"errorType":"..."}}`.

use std::convert::Infallible;
use std::sync::Arc;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warp::filters::BoxedFilter;
use warp::http::header::{HeaderValue, CONTENT_TYPE};
use warp::http::{Method, StatusCode};
use warp::hyper::Body;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::engine::{now_ms, PaintEngine, PaintSource};
use crate::gate::{PaintRequest, Rejection as PaintRejection, Verdict};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: u64 = 64 * 1024;

/// A route's handler, mounted under its path by [`Router`].
pub type Route = BoxedFilter<(Response,)>;

// ─── Responses ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorData<'a> {
    error_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonEnvelope<'a> {
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<ErrorData<'a>>,
}

/// `{"statusCode":N,"data":{"errorType":..}}`
pub fn error_reply(status: StatusCode, error_type: &str, message: Option<String>) -> Response {
    let envelope = JsonEnvelope {
        status_code: status.as_u16(),
        data: Some(ErrorData { error_type, message }),
    };
    warp::reply::with_status(warp::reply::json(&envelope), status).into_response()
}

/// `{"statusCode":200}`
pub fn ok_reply() -> Response {
    warp::reply::json(&JsonEnvelope { status_code: 200, data: None }).into_response()
}

pub fn octet_stream(body: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    response
}

pub fn not_found() -> Response {
    error_reply(StatusCode::NOT_FOUND, "httpserver.notFound", None)
}

pub fn method_not_allowed() -> Response {
    error_reply(StatusCode::METHOD_NOT_ALLOWED, "httpserver.methodNotAllowed", None)
}

pub fn bad_request() -> Response {
    error_reply(StatusCode::BAD_REQUEST, "httpserver.badRequest", None)
}

// ─── Router ──────────────────────────────────────────────────

/// Path → route table, compiled into one warp filter.
#[derive(Default)]
pub struct Router {
    routes: Option<Route>,
    paths: Vec<String>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `route` at exactly `path`. Earlier registrations win on
    /// duplicates.
    pub fn register_route(&mut self, path: impl Into<String>, route: Route) {
        let path = path.into();
        let mounted = path_filter(&path).and(route).boxed();
        self.routes = Some(match self.routes.take() {
            Some(previous) => previous.or(mounted).unify().boxed(),
            None => mounted,
        });
        log::debug!("Registered HTTP route {path}");
        self.paths.push(path);
    }

    pub fn has_route(&self, path: &str) -> bool {
        let path = path.trim_end_matches('/');
        self.paths.iter().any(|p| p.trim_end_matches('/') == path)
    }

    /// All routes, with rejections turned into JSON errors.
    pub fn into_filter(self) -> Route {
        let routes = self.routes.unwrap_or_else(|| {
            warp::any()
                .and_then(|| async { Err::<Response, Rejection>(warp::reject::not_found()) })
                .boxed()
        });
        routes.recover(recover_rejection).unify().boxed()
    }
}

/// Match `path` segment by segment, and nothing after it.
fn path_filter(path: &str) -> BoxedFilter<()> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .fold(warp::any().boxed(), |filter, segment| {
            filter.and(warp::path(segment.to_string())).boxed()
        })
        .and(warp::path::end())
        .boxed()
}

async fn recover_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    if rejection.is_not_found() {
        return Ok(not_found());
    }
    if rejection.find::<warp::reject::PayloadTooLarge>().is_some()
        || rejection.find::<warp::reject::LengthRequired>().is_some()
    {
        return Ok(bad_request());
    }
    if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(method_not_allowed());
    }
    log::warn!("Unhandled HTTP rejection: {rejection:?}");
    Ok(error_reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        "unknown.internalServerError",
        None,
    ))
}

fn with_engine(
    engine: Arc<PaintEngine>,
) -> impl Filter<Extract = (Arc<PaintEngine>,), Error = Infallible> + Clone {
    warp::any().map(move || engine.clone())
}

/// 405 for any method but `allowed`; `allowed` falls through.
fn reject_other_methods(allowed: Method) -> Route {
    warp::method()
        .and_then(move |method: Method| {
            let allowed = allowed.clone();
            async move {
                if method == allowed {
                    Err(warp::reject::not_found())
                } else {
                    Ok(method_not_allowed())
                }
            }
        })
        .boxed()
}

// ─── Paintboard routes ───────────────────────────────────────

/// `GET <api_root>/getboard`: the raw packed buffer.
pub fn getboard_route(engine: Arc<PaintEngine>) -> Route {
    let get = warp::get()
        .and(with_engine(engine))
        .and_then(|engine: Arc<PaintEngine>| async move {
            Ok::<_, Rejection>(octet_stream(engine.snapshot().await))
        });
    reject_other_methods(Method::GET).or(get).unify().boxed()
}

/// JSON body of `POST <api_root>/paint`.
///
/// Numbers are read as JSON numbers and must be integral, so `1.0` is
/// accepted and `1.5` is not.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaintBody {
    pub x: f64,
    pub y: f64,
    pub color: f64,
    pub uid: f64,
    pub token: String,
}

fn integral(value: f64) -> Option<i64> {
    (value.is_finite() && value.fract() == 0.0).then(|| value as i64)
}

impl PaintBody {
    /// Convert to a gate request. Out-of-range integers become values the
    /// gate reports as malformed; a fractional number or an unparseable
    /// token yields `None`.
    pub fn into_request(self) -> Option<PaintRequest> {
        let token = Uuid::parse_str(self.token.trim()).ok()?;
        Some(PaintRequest {
            x: u32::try_from(integral(self.x)?).unwrap_or(u32::MAX),
            y: u32::try_from(integral(self.y)?).unwrap_or(u32::MAX),
            color: u32::try_from(integral(self.color)?).unwrap_or(u32::MAX),
            uid: u32::try_from(integral(self.uid)?).unwrap_or(0),
            token,
            request_id: 0,
        })
    }
}

/// `POST <api_root>/paint`: the same engine path as a WebSocket PAINT.
pub fn paint_route(engine: Arc<PaintEngine>) -> Route {
    let post = warp::post()
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_engine(engine))
        .and_then(handle_paint);
    reject_other_methods(Method::POST).or(post).unify().boxed()
}

async fn handle_paint(body: Bytes, engine: Arc<PaintEngine>) -> Result<Response, Rejection> {
    engine.telemetry().record_bandwidth(body.len() as u64);

    let request = serde_json::from_slice::<PaintBody>(&body)
        .ok()
        .and_then(PaintBody::into_request);
    let verdict = match request {
        Some(request) => engine.paint(request, PaintSource::Http).await,
        None => engine.reject_malformed(PaintSource::Http, now_ms()).await,
    };
    Ok(paint_response(verdict))
}

/// JSON response for a paint verdict.
pub fn paint_response(verdict: Verdict) -> Response {
    match verdict {
        Verdict::Authorized => ok_reply(),
        Verdict::Rejected(rejection) => {
            let message = match rejection {
                PaintRejection::Cooldown { remaining_ms } => Some(format!(
                    "Paint in cooldown: {}s left.",
                    remaining_ms as f64 / 1000.0
                )),
                _ => None,
            };
            let status = StatusCode::from_u16(rejection.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            error_reply(status, rejection.error_type(), message)
        }
    }
}
