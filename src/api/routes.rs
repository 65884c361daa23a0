use actix_web::{delete, get, post, put, web, HttpResponse, Result as WebResult};
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::debug;
use uuid::Uuid;

use crate::api::models::{ChatRequest, CreateSessionRequest, StreamFrame, UpdateSessionRequest};
use crate::chat::ChatEvent;
use crate::error::ChatError;
use crate::state::AppState;

pub const SESSION_ID_HEADER: &str = "X-Session-Id";

// --- Sessions ---

#[post("/create")]
pub async fn create_session(
    state: web::Data<AppState>,
    req: Option<web::Json<CreateSessionRequest>>,
) -> WebResult<HttpResponse> {
    let req = req.map(|r| r.into_inner()).unwrap_or_default();
    let session = state.sessions.create(req.name).await?;
    Ok(HttpResponse::Created().json(session))
}

#[get("")]
pub async fn list_sessions(state: web::Data<AppState>) -> WebResult<HttpResponse> {
    let sessions = state.sessions.list().await?;
    Ok(HttpResponse::Ok().json(sessions))
}

#[get("/{id}")]
pub async fn get_session(
    state: web::Data<AppState>,
    id: web::Path<Uuid>,
) -> WebResult<HttpResponse> {
    let session = state.sessions.get(id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(session))
}

#[put("/{id}")]
pub async fn rename_session(
    state: web::Data<AppState>,
    id: web::Path<Uuid>,
    req: web::Json<UpdateSessionRequest>,
) -> WebResult<HttpResponse> {
    let session = state
        .sessions
        .rename(id.into_inner(), req.into_inner().name)
        .await?;
    Ok(HttpResponse::Ok().json(session))
}

#[delete("/{id}")]
pub async fn delete_session(
    state: web::Data<AppState>,
    id: web::Path<Uuid>,
) -> WebResult<HttpResponse> {
    state.sessions.delete(id.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/{id}/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    id: web::Path<Uuid>,
) -> WebResult<HttpResponse> {
    let messages = state.messages.list(id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(messages))
}

// --- Chat ---

#[post("")]
pub async fn chat(
    state: web::Data<AppState>,
    req: web::Json<ChatRequest>,
) -> WebResult<HttpResponse> {
    let req = req.into_inner();
    let turn = state
        .orchestrator
        .complete_turn(req.session_id, &req.message)
        .await?;

    Ok(HttpResponse::Ok()
        .insert_header((SESSION_ID_HEADER, turn.session_id.to_string()))
        .json(turn))
}

#[post("/stream")]
pub async fn chat_stream(
    state: web::Data<AppState>,
    req: web::Json<ChatRequest>,
) -> WebResult<HttpResponse> {
    let req = req.into_inner();
    let reply = state
        .orchestrator
        .stream_turn(req.session_id, &req.message)
        .await?;

    let session_id = reply.session_id;
    let mut events = reply.events;

    // Dropping this body when the client disconnects drops `events`,
    // which cancels generation upstream.
    let body = async_stream::stream! {
        while let Some(event) = events.next().await {
            let data = match &event {
                ChatEvent::Fragment(content) => StreamFrame::Fragment { session_id, content }.to_sse(),
                ChatEvent::Done(message) => StreamFrame::Done {
                    session_id,
                    done: true,
                    assistant_message: message,
                }
                .to_sse(),
                ChatEvent::Failed(err) => StreamFrame::Error {
                    session_id,
                    error: err.to_string(),
                    kind: err.kind(),
                }
                .to_sse(),
            };
            yield Ok::<Bytes, actix_web::Error>(Bytes::from(data));

            if event.is_terminal() {
                break;
            }
        }
        debug!(%session_id, "event stream closed");
    };

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header((SESSION_ID_HEADER, session_id.to_string()))
        .streaming(body))
}

// --- Service ---

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "healthy"}))
}

pub async fn index() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"message": "TalkGPT chat API"}))
}

/// Malformed or incomplete JSON bodies get the same error body as other 4xx responses.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| ChatError::Validation(err.to_string()).into())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/", web::get().to(index))
        .route("/health", web::get().to(health))
        .service(
            web::scope("/api/sessions")
                .service(create_session)
                .service(list_sessions)
                .service(get_session)
                .service(rename_session)
                .service(delete_session)
                .service(get_messages),
        )
        .service(
            web::scope("/api/chat")
                .service(chat)
                .service(chat_stream),
        );
}
