//! # Image Worker
//!
//! An HTTP microservice that applies declarative image transformations.
//!
//! A client posts a base64 image together with either a single operation
//! (`type` + `params`) or an ordered `operations` pipeline. The request is
//! turned into a chain of operation nodes by the `transformations` crate,
//! evaluated lazily from the tail, and the encoded result is returned as
//! base64.
//!
//! ## Features
//!
//! - **Operations**: resize, crop, format, rotate and filter
//! - **Pipelines**: operations applied in order, each on the previous output
//! - **Fail-soft**: a failing step passes its input through and is reported
//!   as a warning
//! - **Auth**: optional HS256 bearer tokens
//!
//! ## Architecture
//!
//! - [`config`]: settings read from the environment
//! - [`error`]: error types and HTTP error responses
//! - [`handlers`]: HTTP request handlers for API endpoints
//! - [`middleware`]: request id, request logging and the auth gate
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use actix_web::{web, App, HttpServer};
//! use image_worker::handlers::{self, AppState};
//! use image_worker::middleware::{AuthGate, Interceptors, RequestLogger};
//! use transformations::{ConsoleSink, Coordinator, LogSink, RustCodec};
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let sink: Arc<dyn LogSink> = Arc::new(ConsoleSink);
//!     let coordinator = Arc::new(Coordinator::new(Arc::new(RustCodec::new()), sink.clone()));
//!     let state = web::Data::new(AppState::new(coordinator));
//!     let interceptors = Interceptors::new(RequestLogger::new(sink), AuthGate::disabled());
//!
//!     HttpServer::new(move || {
//!         let interceptors = interceptors.clone();
//!         App::new()
//!             .app_data(state.clone())
//!             .configure(move |cfg| handlers::configure(cfg, interceptors))
//!     })
//!     .bind("0.0.0.0:8080")?
//!     .run()
//!     .await
//! }
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;

pub use config::Config;
pub use error::{ImageWorkerError, Result};
