//! Request interceptors wrapped around the process route.
//!
//! actix runs the last `wrap` first, so the route wraps [`AuthGate`] before
//! [`RequestLogger`]: every request is stamped and logged, including the
//! ones the gate turns away.

use std::sync::Arc;
use std::time::Instant;

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use actix_web::{Error, HttpMessage, ResponseError};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::json;
use transformations::logging::emit;
use transformations::{LogEvent, LogSink};
use uuid::Uuid;

use crate::error::ImageWorkerError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const ANONYMOUS: &str = "anonymous";

/// The caller as established by the [`AuthGate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
}

impl Identity {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS)
    }
}

/// Per-request id assigned by the [`RequestLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> crate::error::Result<Identity>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    sub: Option<String>,
}

/// HS256 bearer tokens signed with a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> crate::error::Result<Identity> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| ImageWorkerError::Unauthorized(format!("invalid token: {}", e)))?;

        let user = data
            .claims
            .email
            .or(data.claims.sub)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                ImageWorkerError::Unauthorized("token carries no email or subject".to_string())
            })?;

        Ok(Identity::new(user))
    }
}

pub fn extract_bearer(headers: &HeaderMap) -> crate::error::Result<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ImageWorkerError::Unauthorized("missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| ImageWorkerError::Unauthorized("malformed Authorization header".to_string()))?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ImageWorkerError::Unauthorized("expected a Bearer token".to_string()))
}

/// Rejects requests without a valid bearer token. With no verifier every
/// request passes as [`Identity::anonymous`].
#[derive(Clone, Default)]
pub struct AuthGate {
    verifier: Option<Arc<dyn TokenVerifier>>,
}

impl AuthGate {
    pub fn new(verifier: Option<Arc<dyn TokenVerifier>>) -> Self {
        Self { verifier }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.verifier.is_some()
    }

    fn authenticate(&self, req: &ServiceRequest) -> crate::error::Result<Identity> {
        match &self.verifier {
            None => Ok(Identity::anonymous()),
            Some(verifier) => verifier.verify(extract_bearer(req.headers())?),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AuthGateMiddleware<S>;
    type InitError = ();
    type Future = Ready<std::result::Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthGateMiddleware {
            service,
            gate: self.clone(),
        }))
    }
}

pub struct AuthGateMiddleware<S> {
    service: S,
    gate: AuthGate,
}

impl<S, B> Service<ServiceRequest> for AuthGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        match self.gate.authenticate(&req) {
            Ok(identity) => {
                req.extensions_mut().insert(identity);
                let fut = self.service.call(req);
                Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) })
            }
            Err(e) => {
                log::warn!("Rejected request to {}: {}", req.path(), e);
                let response = e.error_response();
                Box::pin(async move { Ok(req.into_response(response).map_into_right_body()) })
            }
        }
    }
}

/// Stamps each request with a uuid, echoes it as `X-Request-Id` and emits
/// one request-level [`LogEvent`] once the response is known.
#[derive(Clone)]
pub struct RequestLogger {
    sink: Arc<dyn LogSink>,
}

impl RequestLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestLoggerMiddleware<S>;
    type InitError = ();
    type Future = Ready<std::result::Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware {
            service,
            sink: Arc::clone(&self.sink),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: S,
    sink: Arc<dyn LogSink>,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        req.extensions_mut().insert(RequestId(request_id.clone()));

        let endpoint = req.path().to_string();
        let method = req.method().to_string();
        let sink = Arc::clone(&self.sink);
        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;

            let (status, user) = match &result {
                Ok(res) => (
                    res.status(),
                    res.request()
                        .extensions()
                        .get::<Identity>()
                        .map(|identity| identity.user.clone()),
                ),
                Err(e) => (e.as_response_error().status_code(), None),
            };
            let user = user.unwrap_or_else(|| ANONYMOUS.to_string());
            let params = json!({ "method": method, "status": status.as_u16() });

            let event = if status.is_client_error() || status.is_server_error() {
                LogEvent::failure(
                    &user,
                    &endpoint,
                    params,
                    started.elapsed(),
                    format!("HTTP {}", status),
                )
            } else {
                LogEvent::success(&user, &endpoint, params, started.elapsed())
                    .with_message(format!("HTTP {}", status))
            };
            emit(sink.as_ref(), event.with_request_id(Some(&request_id))).await;

            let mut res = result?;
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                res.headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }
            Ok(res)
        })
    }
}

/// The interceptors for the process route, applied in order: request
/// logging outermost, then the auth gate.
#[derive(Clone)]
pub struct Interceptors {
    pub logger: RequestLogger,
    pub auth: AuthGate,
}

impl Interceptors {
    pub fn new(logger: RequestLogger, auth: AuthGate) -> Self {
        Self { logger, auth }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims<'a> {
        email: Option<&'a str>,
        sub: Option<&'a str>,
        exp: u64,
    }

    fn token(secret: &str, email: Option<&str>, sub: Option<&str>) -> String {
        let claims = TestClaims {
            email,
            sub,
            exp: 4_102_444_800,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_jwt_identity_prefers_email() {
        let verifier = JwtVerifier::new("secret");
        let identity = verifier
            .verify(&token("secret", Some("ada@example.com"), Some("42")))
            .unwrap();
        assert_eq!(identity.user, "ada@example.com");

        let identity = verifier.verify(&token("secret", None, Some("42"))).unwrap();
        assert_eq!(identity.user, "42");
    }

    #[test]
    fn test_jwt_rejects_wrong_secret() {
        let verifier = JwtVerifier::new("secret");
        let result = verifier.verify(&token("other", Some("ada@example.com"), None));
        assert!(matches!(result, Err(ImageWorkerError::Unauthorized(_))));
    }

    #[test]
    fn test_jwt_rejects_token_without_identity() {
        let verifier = JwtVerifier::new("secret");
        let result = verifier.verify(&token("secret", None, None));
        assert!(matches!(result, Err(ImageWorkerError::Unauthorized(_))));
    }

    #[test]
    fn test_extract_bearer() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(extract_bearer(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_bearer(&headers).unwrap(), "abc.def");
    }

    #[test]
    fn test_identity_anonymous() {
        assert_eq!(Identity::anonymous().user, "anonymous");
        assert!(!AuthGate::disabled().is_enabled());
        let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new("secret"));
        assert!(AuthGate::new(Some(verifier)).is_enabled());
    }
}
