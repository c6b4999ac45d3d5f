use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::core::app::ChatApp;
use crate::core::config::{SamplingConfig, SamplingError, SamplingUpdate};
use crate::core::history::ArchiveError;
use crate::core::message::Message;
use crate::core::session::SessionError;

const INDEX_HTML: &str = include_str!("assets/index.html");

/// JSON error body with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: &self.message,
            }),
        )
            .into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match err {
            SessionError::EmptyInput => StatusCode::BAD_REQUEST,
            SessionError::Busy => StatusCode::CONFLICT,
            SessionError::Transport(_) => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<ArchiveError> for ApiError {
    fn from(err: ArchiveError) -> Self {
        let status = match err {
            ArchiveError::NotFound { .. } => StatusCode::NOT_FOUND,
            ArchiveError::InvalidName { .. } => StatusCode::BAD_REQUEST,
            ArchiveError::Parse { .. } | ArchiveError::Io { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<SamplingError> for ApiError {
    fn from(err: SamplingError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: err.to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StateResponse {
    model_name: String,
    messages: Vec<Message>,
    options: SamplingConfig,
    streaming: bool,
    history: Vec<String>,
}

#[derive(Serialize)]
struct MessagesResponse {
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct ChatBody {
    input: String,
}

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

#[derive(Serialize)]
struct HistoryResponse {
    choices: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SaveBody {
    prefix: String,
}

#[derive(Serialize)]
struct SaveResponse {
    name: String,
    path: String,
}

#[derive(Deserialize)]
struct LoadBody {
    name: String,
}

#[derive(Serialize)]
struct SeedResponse {
    seed: i64,
}

/// Routes of the browser UI.
pub fn router(app: Arc<ChatApp>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/state", get(state))
        .route("/api/reset", post(reset))
        .route("/api/chat", post(chat))
        .route("/api/cancel", post(cancel))
        .route("/api/history", get(history))
        .route("/api/history/save", post(save_history))
        .route("/api/history/load", post(load_history))
        .route("/api/options", get(options).post(update_options))
        .route("/api/seed", post(random_seed))
        .with_state(app)
}

/// Serves the UI on `listener` until `shutdown` resolves.
pub async fn serve<F>(app: Arc<ChatApp>, listener: TcpListener, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("UI listening on http://{addr}");
    }
    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn state(State(app): State<Arc<ChatApp>>) -> Result<Json<StateResponse>, ApiError> {
    Ok(Json(StateResponse {
        model_name: app.model_name().to_string(),
        messages: app.conversation().await,
        options: app.sampling_config().await,
        streaming: app.is_streaming(),
        history: app.history_choices()?,
    }))
}

async fn reset(State(app): State<Arc<ChatApp>>) -> Json<MessagesResponse> {
    Json(MessagesResponse {
        messages: app.reset_conversation().await,
    })
}

/// Streams the reply as SSE: one `snapshot` event per step carrying the full
/// text so far, an `error` event on failure, then `done`. Payloads are JSON
/// strings so carriage returns survive the framing. A client that
/// disconnects drops the session, which cancels it.
async fn chat(
    State(app): State<Arc<ChatApp>>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let session = app.start_session(&body.input).await?;
    debug!(stream_id = session.stream_id(), "streaming reply to browser");

    let steps = session.into_stream().map(|step| {
        let event = match step {
            Ok(text) => json_event("snapshot", &text),
            Err(err) => json_event("error", &err.to_string()),
        };
        Ok::<_, Infallible>(event)
    });
    let done = stream::once(async { Ok::<_, Infallible>(Event::default().event("done").data("")) });

    Ok(Sse::new(steps.chain(done)).keep_alive(KeepAlive::default()))
}

fn json_event(name: &'static str, text: &str) -> Event {
    Event::default()
        .event(name)
        .json_data(text)
        .unwrap_or_else(|err| Event::default().event("error").data(err.to_string()))
}

async fn cancel(State(app): State<Arc<ChatApp>>) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: app.cancel_session(),
    })
}

async fn history(State(app): State<Arc<ChatApp>>) -> Result<Json<HistoryResponse>, ApiError> {
    Ok(Json(HistoryResponse {
        choices: app.history_choices()?,
    }))
}

async fn save_history(
    State(app): State<Arc<ChatApp>>,
    Json(body): Json<SaveBody>,
) -> Result<Json<SaveResponse>, ApiError> {
    let path = app.save_history(&body.prefix).await?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Json(SaveResponse {
        name,
        path: path.display().to_string(),
    }))
}

async fn load_history(
    State(app): State<Arc<ChatApp>>,
    Json(body): Json<LoadBody>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let messages = app.load_history_by_name(&body.name).await?;
    Ok(Json(MessagesResponse { messages }))
}

async fn options(State(app): State<Arc<ChatApp>>) -> Json<SamplingConfig> {
    Json(app.sampling_config().await)
}

async fn update_options(
    State(app): State<Arc<ChatApp>>,
    Json(update): Json<SamplingUpdate>,
) -> Result<Json<SamplingConfig>, ApiError> {
    Ok(Json(app.update_sampling_config(update).await?))
}

async fn random_seed(State(app): State<Arc<ChatApp>>) -> Json<SeedResponse> {
    Json(SeedResponse {
        seed: app.draw_random_seed(),
    })
}
