//! Chain evaluation.
//!
//! The [`Coordinator`] builds a chain from a request body, decodes the root
//! input, folds every node over the working image from root to tail and
//! encodes the result. Codec work runs on the blocking pool so a long chain
//! never stalls other requests, and every wait is cut short by the request's
//! [`CancellationToken`].

use crate::builder::ChainBuilder;
use crate::codec::{ImageCodec, OutputFormat, WorkingImage};
use crate::error::{Result, TransformationError};
use crate::logging::{emit, LogEvent, LogSink};
use crate::node::{Chain, NodeInput};
use crate::params::OperationParams;
use crate::registry::OperationKind;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// What a failed step does to the rest of the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Keep the step's input and carry on.
    #[default]
    Continue,
    /// Fail the request.
    Abort,
}

impl FailurePolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "continue" => Some(Self::Continue),
            "abort" => Some(Self::Abort),
            _ => None,
        }
    }
}

/// Who asked, and where, for log events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user: String,
    pub endpoint: String,
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn new(user: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            endpoint: endpoint.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("anonymous", "/process")
    }
}

/// Result of a single step. A degraded step hands back its untouched input
/// together with the error that stopped it.
#[derive(Debug)]
pub enum StepOutcome {
    Applied(WorkingImage),
    Degraded {
        image: WorkingImage,
        error: TransformationError,
    },
}

impl StepOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn into_image(self) -> WorkingImage {
        match self {
            Self::Applied(image) | Self::Degraded { image, .. } => image,
        }
    }
}

/// A step that was left out of the result under [`FailurePolicy::Continue`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    /// Position in the built chain, root is 0.
    pub index: usize,
    pub operation: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ChainOutput {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub degraded: Vec<StepFailure>,
}

pub struct Coordinator {
    codec: Arc<dyn ImageCodec>,
    sink: Arc<dyn LogSink>,
    builder: ChainBuilder,
    failure_policy: FailurePolicy,
}

impl Coordinator {
    pub fn new(codec: Arc<dyn ImageCodec>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            codec,
            sink,
            builder: ChainBuilder::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_builder(mut self, builder: ChainBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn builder(&self) -> &ChainBuilder {
        &self.builder
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// Builds the chain for `body` and runs it against `raw_input`.
    pub async fn process(
        &self,
        body: &Value,
        raw_input: Vec<u8>,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<ChainOutput> {
        let started = Instant::now();
        self.record_start("process", body.clone(), ctx).await;

        let result = match self.builder.build(body, raw_input) {
            Ok(chain) => self.run(chain, ctx, cancel).await,
            Err(e) => Err(e),
        };

        self.record_end("process", body.clone(), ctx, started, &result)
            .await;
        result
    }

    /// [`process`](Self::process) bounded by `deadline`. On expiry the token
    /// is cancelled so queued codec work is abandoned.
    pub async fn process_with_deadline(
        &self,
        body: &Value,
        raw_input: Vec<u8>,
        ctx: &RequestContext,
        cancel: &CancellationToken,
        deadline: Duration,
    ) -> Result<ChainOutput> {
        match tokio::time::timeout(deadline, self.process(body, raw_input, ctx, cancel)).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                let error = TransformationError::DeadlineExceeded(deadline);
                let event = LogEvent::failure(
                    &ctx.user,
                    &ctx.endpoint,
                    body.clone(),
                    deadline,
                    error.to_string(),
                )
                .with_request_id(ctx.request_id.as_deref());
                emit(self.sink.as_ref(), event).await;
                Err(error)
            }
        }
    }

    /// Evaluates a built chain and encodes the tail's output.
    pub async fn run(
        &self,
        chain: Chain,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<ChainOutput> {
        let started = Instant::now();
        let summary = chain_summary(&chain);
        self.record_start("run", summary.clone(), ctx).await;

        let result = self.evaluate(chain, ctx, cancel).await;

        self.record_end("run", summary, ctx, started, &result).await;
        result
    }

    /// Applies one operation to `image`. Codec errors come back as
    /// [`StepOutcome::Degraded`]; only cancellation and task failures are
    /// returned as `Err`.
    pub async fn execute_step(
        &self,
        kind: OperationKind,
        params: &OperationParams,
        image: WorkingImage,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let codec = Arc::clone(&self.codec);
        let params = params.clone();
        self.blocking(cancel, move || {
            match kind.apply(codec.as_ref(), &image, &params) {
                Ok(next) => StepOutcome::Applied(next),
                Err(error) => StepOutcome::Degraded { image, error },
            }
        })
        .await
    }

    async fn evaluate(
        &self,
        chain: Chain,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<ChainOutput> {
        let mut lineage = chain.into_lineage()?.into_iter();
        let root = lineage
            .next()
            .ok_or(TransformationError::NoOperationProduced)?;
        let (root_kind, root_params, root_input) = root.into_parts();
        let raw_input = match root_input {
            NodeInput::Raw(bytes) => bytes,
            NodeInput::Predecessor(_) => return Err(TransformationError::InputRequired),
        };

        let codec = Arc::clone(&self.codec);
        let mut image = self
            .blocking(cancel, move || codec.decode(&raw_input))
            .await??;

        let steps = std::iter::once((root_kind, root_params)).chain(lineage.map(|node| {
            let (kind, params, _) = node.into_parts();
            (kind, params)
        }));

        let mut degraded = Vec::new();
        for (index, (kind, params)) in steps.enumerate() {
            let step_started = Instant::now();
            image = match self.execute_step(kind, &params, image, cancel).await? {
                StepOutcome::Applied(next) => next,
                StepOutcome::Degraded { image, error } => {
                    log::warn!("Step {} ({}) left the image unchanged: {}", index, kind, error);
                    let event = LogEvent::failure(
                        &ctx.user,
                        &ctx.endpoint,
                        params.to_value(),
                        step_started.elapsed(),
                        format!("{} operation failed: {}", kind, error),
                    )
                    .with_operation(kind.name())
                    .with_request_id(ctx.request_id.as_deref());
                    emit(self.sink.as_ref(), event).await;

                    if self.failure_policy == FailurePolicy::Abort {
                        return Err(TransformationError::TransformFailed {
                            operation: kind.name(),
                            reason: error.to_string(),
                        });
                    }
                    degraded.push(StepFailure {
                        index,
                        operation: kind.name(),
                        message: error.to_string(),
                    });
                    image
                }
            };
        }

        let (format, width, height) = (image.format(), image.width(), image.height());
        let codec = Arc::clone(&self.codec);
        let bytes = self.blocking(cancel, move || codec.encode(&image)).await??;

        Ok(ChainOutput {
            bytes,
            format,
            width,
            height,
            degraded,
        })
    }

    async fn blocking<T, F>(&self, cancel: &CancellationToken, work: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(TransformationError::Cancelled);
        }
        let handle = tokio::task::spawn_blocking(work);
        tokio::select! {
            joined = handle => Ok(joined?),
            _ = cancel.cancelled() => Err(TransformationError::Cancelled),
        }
    }

    async fn record_start(&self, stage: &str, params: Value, ctx: &RequestContext) {
        let event = LogEvent::success(&ctx.user, &ctx.endpoint, params, Duration::ZERO)
            .with_message(format!("{} started", stage))
            .with_request_id(ctx.request_id.as_deref());
        emit(self.sink.as_ref(), event).await;
    }

    async fn record_end(
        &self,
        stage: &str,
        params: Value,
        ctx: &RequestContext,
        started: Instant,
        result: &Result<ChainOutput>,
    ) {
        let event = match result {
            Ok(output) => LogEvent::success(&ctx.user, &ctx.endpoint, params, started.elapsed())
                .with_message(format!(
                    "{} finished: {} bytes of {}",
                    stage,
                    output.bytes.len(),
                    output.format.name()
                )),
            Err(e) => LogEvent::failure(
                &ctx.user,
                &ctx.endpoint,
                params,
                started.elapsed(),
                format!("{} failed: {}", stage, e),
            ),
        };
        emit(
            self.sink.as_ref(),
            event.with_request_id(ctx.request_id.as_deref()),
        )
        .await;
    }
}

fn chain_summary(chain: &Chain) -> Value {
    Value::Array(
        chain
            .nodes()
            .iter()
            .map(|node| json!({ "type": node.kind().name(), "params": node.params().to_value() }))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CropPosition, FitMode, Region};
    use crate::logging::{LogLevel, MemorySink};
    use crate::rust_codec::RustCodec;
    use image::{DynamicImage, Rgb, RgbImage};

    /// Delegates to [`RustCodec`] but takes its time decoding.
    struct SlowCodec(Duration);

    impl ImageCodec for SlowCodec {
        fn decode(&self, bytes: &[u8]) -> Result<WorkingImage> {
            std::thread::sleep(self.0);
            RustCodec.decode(bytes)
        }
        fn resize(
            &self,
            image: &WorkingImage,
            w: Option<u32>,
            h: Option<u32>,
            fit: FitMode,
        ) -> Result<WorkingImage> {
            RustCodec.resize(image, w, h, fit)
        }
        fn crop(
            &self,
            image: &WorkingImage,
            w: Option<u32>,
            h: Option<u32>,
            position: CropPosition,
        ) -> Result<WorkingImage> {
            RustCodec.crop(image, w, h, position)
        }
        fn extract(&self, image: &WorkingImage, region: Region) -> Result<WorkingImage> {
            RustCodec.extract(image, region)
        }
        fn set_format(&self, image: &WorkingImage, format: OutputFormat) -> Result<WorkingImage> {
            RustCodec.set_format(image, format)
        }
        fn rotate(&self, image: &WorkingImage, angle: f64) -> Result<WorkingImage> {
            RustCodec.rotate(image, angle)
        }
        fn grayscale(&self, image: &WorkingImage) -> Result<WorkingImage> {
            RustCodec.grayscale(image)
        }
        fn blur(&self, image: &WorkingImage, sigma: f32) -> Result<WorkingImage> {
            RustCodec.blur(image, sigma)
        }
        fn sharpen(&self, image: &WorkingImage, sigma: f32) -> Result<WorkingImage> {
            RustCodec.sharpen(image, sigma)
        }
        fn encode(&self, image: &WorkingImage) -> Result<Vec<u8>> {
            RustCodec.encode(image)
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image =
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([40, 80, 120])));
        RustCodec.encode(&WorkingImage::new(image, OutputFormat::Png)).unwrap()
    }

    fn coordinator(sink: Arc<MemorySink>) -> Coordinator {
        Coordinator::new(Arc::new(RustCodec::new()), sink)
    }

    #[test]
    fn test_failure_policy_names() {
        assert_eq!(FailurePolicy::from_name("ABORT"), Some(FailurePolicy::Abort));
        assert_eq!(FailurePolicy::from_name("continue"), Some(FailurePolicy::Continue));
        assert_eq!(FailurePolicy::from_name("retry"), None);
    }

    #[tokio::test]
    async fn test_process_logs_start_and_end() {
        let sink = Arc::new(MemorySink::new());
        let coordinator = coordinator(sink.clone());
        let body = json!({ "type": "rotate", "params": { "angle": 90 } });
        let ctx = RequestContext::new("ana", "/process").with_request_id("req-7");

        let output = coordinator
            .process(&body, png(4, 2), &ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!((output.width, output.height), (2, 4));

        let events = sink.events();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.level == LogLevel::Info));
        assert!(events.iter().all(|e| e.user == "ana"));
        assert!(events.iter().all(|e| e.request_id.as_deref() == Some("req-7")));
        assert_eq!(events[0].message.as_deref(), Some("process started"));
        assert!(events[3].message.as_deref().unwrap().starts_with("process finished"));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_processing() {
        let sink = Arc::new(MemorySink::new());
        let coordinator = coordinator(sink.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = coordinator
            .process(&json!({ "type": "rotate" }), png(2, 2), &RequestContext::default(), &cancel)
            .await;
        assert!(matches!(result, Err(TransformationError::Cancelled)));
        assert!(!sink.errors().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let sink = Arc::new(MemorySink::new());
        let coordinator =
            Coordinator::new(Arc::new(SlowCodec(Duration::from_millis(300))), sink.clone());
        let cancel = CancellationToken::new();

        let result = coordinator
            .process_with_deadline(
                &json!({ "type": "rotate" }),
                png(2, 2),
                &RequestContext::default(),
                &cancel,
                Duration::from_millis(20),
            )
            .await;
        assert!(matches!(result, Err(TransformationError::DeadlineExceeded(_))));
        assert!(cancel.is_cancelled());
        assert!(sink
            .errors()
            .iter()
            .any(|e| e.message.as_deref().unwrap_or("").contains("deadline")));
    }

    #[tokio::test]
    async fn test_execute_step_degrades_on_bad_params() {
        let coordinator = coordinator(Arc::new(MemorySink::new()));
        let image = RustCodec.decode(&png(3, 3)).unwrap();
        let params = OperationParams::from_value(Some(&json!({ "width": "wide" }))).unwrap();

        let outcome = coordinator
            .execute_step(OperationKind::Resize, &params, image, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_degraded());
        let image = outcome.into_image();
        assert_eq!((image.width(), image.height()), (3, 3));
    }
}
