use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::{Map, Value};
use transformations::{
    CancellationToken, ChainOutput, Coordinator, OperationKind, RequestContext, StepFailure,
};

use crate::config::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::error::{ImageWorkerError, Result};
use crate::middleware::{Identity, Interceptors, RequestId};

/// Shared per-worker state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub message: String,
    pub image: String,
    pub format: &'static str,
    pub width: u32,
    pub height: u32,
    pub warnings: Vec<StepFailure>,
}

impl From<ChainOutput> for ProcessResponse {
    fn from(output: ChainOutput) -> Self {
        Self {
            message: "Image processed successfully".to_string(),
            image: STANDARD.encode(&output.bytes),
            format: output.format.name(),
            width: output.width,
            height: output.height,
            warnings: output.degraded,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    pub features: Vec<String>,
}

/// Handles the process endpoint
///
/// Accepts `{ image, type, params }` or `{ image, operations: [...] }` with a
/// base64 image and returns the transformed image, also base64.
pub async fn process_image(
    req: HttpRequest,
    body: web::Json<Value>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let mut body = body.into_inner();
    let raw_input = take_image(&mut body)?;
    let ctx = request_context(&req);

    // Dropping this future (client gone) cancels any work not yet started.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let output = state
        .coordinator
        .process_with_deadline(&body, raw_input, &ctx, &cancel, state.request_timeout)
        .await?;

    if !output.degraded.is_empty() {
        log::warn!(
            "Request {} finished with {} degraded step(s)",
            ctx.request_id.as_deref().unwrap_or("-"),
            output.degraded.len()
        );
    }

    Ok(HttpResponse::Ok().json(ProcessResponse::from(output)))
}

pub async fn health_check() -> actix_web::Result<impl actix_web::Responder> {
    let health_status = HealthStatus {
        status: "healthy".to_string(),
        service: "image-worker".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        features: OperationKind::ALL
            .iter()
            .map(|kind| kind.name().to_string())
            .collect(),
    };

    Ok(web::Json(health_status))
}

/// Registers the process and health routes at the root and under `/api/v1`.
pub fn configure(cfg: &mut web::ServiceConfig, interceptors: Interceptors) {
    for prefix in ["", "/api/v1"] {
        cfg.service(
            web::resource(format!("{}/process", prefix))
                .wrap(interceptors.auth.clone())
                .wrap(interceptors.logger.clone())
                .route(web::post().to(process_image)),
        );
        cfg.route(&format!("{}/health", prefix), web::get().to(health_check));
    }
}

/// JSON extractor settings: body size limit and malformed bodies as 400s.
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req| ImageWorkerError::MalformedRequest(err.to_string()).into())
}

/// Removes the `image` field from the body and decodes it. What is left is
/// the operation description.
fn take_image(body: &mut Value) -> Result<Vec<u8>> {
    let fields: &mut Map<String, Value> = body.as_object_mut().ok_or_else(|| {
        ImageWorkerError::MalformedRequest("request body must be a JSON object".to_string())
    })?;

    let encoded = match fields.remove("image") {
        Some(Value::String(encoded)) => encoded,
        Some(Value::Null) | None => {
            return Err(ImageWorkerError::MalformedRequest(
                "missing 'image' field".to_string(),
            ))
        }
        Some(_) => {
            return Err(ImageWorkerError::MalformedRequest(
                "'image' must be a base64 string".to_string(),
            ))
        }
    };

    if !fields.contains_key("type") && !fields.contains_key("operations") {
        return Err(ImageWorkerError::MalformedRequest(
            "request must contain 'type' or 'operations'".to_string(),
        ));
    }

    decode_image(&encoded)
}

/// Accepts plain base64 or a `data:<mime>;base64,` URL.
fn decode_image(encoded: &str) -> Result<Vec<u8>> {
    let payload = encoded
        .split_once("base64,")
        .map_or(encoded, |(_, data)| data)
        .trim();

    let bytes = STANDARD.decode(payload)?;
    if bytes.is_empty() {
        return Err(ImageWorkerError::MalformedRequest(
            "'image' is empty".to_string(),
        ));
    }
    Ok(bytes)
}

fn request_context(req: &HttpRequest) -> RequestContext {
    let extensions = req.extensions();
    let user = extensions
        .get::<Identity>()
        .map(|identity| identity.user.clone())
        .unwrap_or_else(|| Identity::anonymous().user);

    let ctx = RequestContext::new(user, req.path());
    match extensions.get::<RequestId>() {
        Some(RequestId(id)) => ctx.with_request_id(id.clone()),
        None => ctx,
    }
}
