//! Request handlers for the relay endpoint.
//!
//! One path serves three methods:
//! - `GET` opens an event stream and registers it
//! - `POST` validates a message and broadcasts it to every open stream
//! - `OPTIONS` answers cross-origin preflight

use crate::config::Config;
use crate::error::ApiError;
use crate::metrics::{self, SubscriberMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::Stream;
use relay_protocol::{codec, publish, Headers, Message, PublishAck, PublishError};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tenvis_relay_core::{BroadcastReport, Registry, RegistryConfig, Subscription};
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{debug, info};

/// Methods advertised to cross-origin callers.
pub const ALLOW_METHODS: &str = "GET, POST, OPTIONS";

/// Request headers advertised to cross-origin callers.
pub const ALLOW_HEADERS: &str = "Content-Type, Accept, User-Agent";

/// Shared server state.
pub struct AppState {
    /// The subscriber registry.
    pub registry: Arc<Registry>,
    /// Server configuration.
    pub config: Config,
    /// One permit per open event stream, sized by `limits.max_subscribers`.
    stream_slots: Arc<Semaphore>,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry_config = RegistryConfig {
            subscriber_buffer: config.limits.subscriber_buffer,
        };

        let slots = config.limits.max_subscribers.min(Semaphore::MAX_PERMITS);

        Self {
            registry: Arc::new(Registry::with_config(registry_config)),
            stream_slots: Arc::new(Semaphore::new(slots)),
            config,
        }
    }

    /// Stamp, frame and fan out one message.
    ///
    /// # Errors
    ///
    /// Returns an error only if the message cannot be framed. Delivery
    /// failures are reported, never returned.
    pub fn broadcast(&self, message: Message) -> Result<BroadcastReport, ApiError> {
        let start = Instant::now();
        let frame = codec::encode(&message.stamped())?;
        let report = self.registry.broadcast(frame);
        metrics::record_broadcast(&report, start.elapsed().as_secs_f64());
        Ok(report)
    }

    fn heartbeat(&self) -> Option<Duration> {
        match self.config.heartbeat.interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let path = state.config.path.clone();
    let body_limit = state.config.limits.max_message_size;

    Router::new()
        .route(
            &path,
            get(subscribe_handler)
                .post(publish_handler)
                .options(preflight_handler),
        )
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        ))
        .with_state(state)
}

/// Run the HTTP server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", e);
        }
    }

    let app = app(Arc::clone(&state));

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Relay server listening on {}", addr);
    info!("Relay endpoint: http://{}{}", addr, config.path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state.registry)))
        .await?;

    info!("Relay server stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM, then end every open event stream.
async fn shutdown_signal(registry: Arc<Registry>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    registry.close_all();
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "subscribers": state.registry.len(),
    }))
}

/// Preflight handler. Cross-origin headers come from the router layers.
async fn preflight_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Open an event stream and register it until the client goes away.
async fn subscribe_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let Ok(permit) = Arc::clone(&state.stream_slots).try_acquire_owned() else {
        return Err(ApiError::TooManySubscribers {
            limit: state.config.limits.max_subscribers,
        });
    };

    let subscription = state.registry.subscribe();
    debug!(
        subscriber = %subscription.handle(),
        subscribers = state.registry.len(),
        "Subscriber connected"
    );

    let stream = event_stream(subscription, permit, state.heartbeat());

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Stream frames from a subscription, with keep-alive comments while idle.
///
/// The stream owns the subscription and its stream slot; dropping the
/// response body unregisters the subscriber and frees the slot.
fn event_stream(
    mut subscription: Subscription,
    permit: OwnedSemaphorePermit,
    heartbeat: Option<Duration>,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    let metrics_guard = SubscriberMetricsGuard::new();

    async_stream::stream! {
        let _metrics_guard = metrics_guard;
        let _permit = permit;
        let handle = subscription.handle();

        let mut ticker = heartbeat.map(|period| {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            let frame = match ticker.as_mut() {
                Some(ticker) => tokio::select! {
                    frame = subscription.recv() => {
                        ticker.reset();
                        frame
                    }
                    _ = ticker.tick() => Some(codec::keep_alive()),
                },
                None => subscription.recv().await,
            };

            match frame {
                Some(frame) => yield Ok(frame),
                None => break,
            }
        }

        debug!(subscriber = %handle, "Event stream closed by server");
    }
}

/// Validate a message and broadcast it to every open stream.
async fn publish_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<PublishAck>, ApiError> {
    let headers = lowercase_headers(&headers);
    log_request(&method, &uri, &headers, body.as_ref().ok());

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            publish::check_content_type(&headers)?;
            return Err(body_rejection(
                rejection,
                state.config.limits.max_message_size,
            ));
        }
    };

    let message = publish::validate(&headers, &body)?;
    let report = state.broadcast(message)?;

    debug!(
        recipients = report.recipients,
        delivered = report.delivered,
        failed = report.failed(),
        "Message broadcast"
    );

    Ok(Json(PublishAck::new(report.recipients)))
}

fn body_rejection(rejection: BytesRejection, limit: usize) -> ApiError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        PublishError::PayloadTooLarge { limit }.into()
    } else {
        ApiError::BodyRead(rejection.body_text())
    }
}

/// Header names are already lower-case in `HeaderMap`. Repeated headers keep
/// the last value.
fn lowercase_headers(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn log_request(method: &Method, uri: &Uri, headers: &Headers, body: Option<&Bytes>) {
    debug!(%method, %uri, ?headers, "Publish request");
    if let Some(body) = body {
        debug!(body = %String::from_utf8_lossy(body), "Publish body");
    }
}
