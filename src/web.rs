use crate::{
    animals::{Animal, ImportReport},
    app::{task_runner::QueueDump, App, AppError, Recompute},
    embedding::{codec, GenerateOutcome},
    recommend::PreferenceSummary,
    signals::{InterestEvent, LikeFlag},
    users::User,
};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Path, Query, Request, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::{signal, sync::RwLock};

#[derive(Clone)]
pub struct SharedState {
    app: Arc<RwLock<App>>,
}

pub fn router(app: Arc<RwLock<App>>) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .route("/api/embeddings", post(generate_all))
        .route("/api/embeddings/:entity_id", post(generate_one))
        .route("/api/task_queue", get(task_queue))
        .route("/api/animals", get(list_animals).post(upsert_animals))
        .route("/api/animals/:animal_id", get(get_animal))
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/:user_id/interests", post(record_interest))
        .route("/api/users/:user_id/likes", get(liked).post(set_like))
        .route(
            "/api/users/:user_id/preference",
            get(get_preference).post(recompute_preference),
        )
        .route("/api/users/:user_id/recommendations", get(recommendations))
        .route("/api/users/:user_id/summary", get(summary))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(app: App) -> anyhow::Result<()> {
    let listen_addr = app.config().listen_addr.clone();
    let app = Arc::new(RwLock::new(app));

    let signal = shutdown_signal(app.clone());

    async fn shutdown_signal(app: Arc<RwLock<App>>) {
        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                log::error!("failed to install Ctrl+C handler: {err}");
                std::future::pending::<()>().await;
            }
        };

        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(err) => {
                    log::error!("failed to install signal handler: {err}");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        let mut app = app.write().await;
        // join on queue thread handle
        tokio::task::block_in_place(|| app.shutdown());
    }

    let router = router(app);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    log::info!("listening on {listen_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await?;

    Ok(())
}

pub fn start_daemon(app: App) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(app).await })
}

// Make our own error that wraps `AppError`.
#[derive(Debug)]
pub struct HttpError(AppError);

impl HttpError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Provider(err) if err.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,
            AppError::Serialization(_)
            | AppError::Store(_)
            | AppError::IO(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Tell axum how to convert `AppError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{self:?}");
        }

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

// This enables using `?` on functions that return `Result<_, AppError>` (or
// anything convertible into it) inside handlers.
impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// `Json` whose rejection is a 400 with the usual error body.
pub struct AppJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(HttpError(AppError::BadRequest(rejection.body_text()))),
        }
    }
}

async fn list_animals(State(state): State<Arc<SharedState>>) -> Result<Json<Vec<Animal>>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app.list_animals()?.into())
    })
}

async fn get_animal(
    State(state): State<Arc<SharedState>>,
    Path(animal_id): Path<String>,
) -> Result<Json<Animal>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app.get_animal(&animal_id)?.into())
    })
}

async fn upsert_animals(
    State(state): State<Arc<SharedState>>,
    AppJson(animals): AppJson<Vec<Animal>>,
) -> Result<Json<ImportReport>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app.upsert_animals(animals)?.into())
    })
}

async fn generate_one(
    State(state): State<Arc<SharedState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<GenerateOutcome>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app.generate_embedding(&entity_id)?.into())
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskCreatedResponse {
    pub task_id: String,
}

async fn generate_all(
    State(state): State<Arc<SharedState>>,
) -> Result<(StatusCode, Json<TaskCreatedResponse>), HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let id = app.enqueue_generate_all()?;
        Ok((
            StatusCode::ACCEPTED,
            TaskCreatedResponse {
                task_id: id.to_string(),
            }
            .into(),
        ))
    })
}

async fn task_queue(State(state): State<Arc<SharedState>>) -> Result<Json<QueueDump>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app.task_queue().into())
    })
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
}

async fn create_user(
    State(state): State<Arc<SharedState>>,
    AppJson(payload): AppJson<CreateUserRequest>,
) -> Result<Json<User>, HttpError> {
    log::debug!("payload: {payload:?}");
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app.add_user(&payload.name)?.into())
    })
}

async fn list_users(State(state): State<Arc<SharedState>>) -> Result<Json<Vec<User>>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app.list_users()?.into())
    })
}

#[derive(Debug, Deserialize)]
pub struct InterestRequest {
    pub entity_id: String,
    pub dwell_seconds: Option<u32>,
}

async fn record_interest(
    State(state): State<Arc<SharedState>>,
    Path(user_id): Path<u64>,
    AppJson(payload): AppJson<InterestRequest>,
) -> Result<Json<InterestEvent>, HttpError> {
    log::debug!("payload: {payload:?}");
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app
            .record_interest(user_id, &payload.entity_id, payload.dwell_seconds)?
            .into())
    })
}

#[derive(Debug, Deserialize)]
pub struct LikeRequest {
    pub entity_id: String,
    pub liked: bool,
}

async fn set_like(
    State(state): State<Arc<SharedState>>,
    Path(user_id): Path<u64>,
    AppJson(payload): AppJson<LikeRequest>,
) -> Result<Json<LikeFlag>, HttpError> {
    log::debug!("payload: {payload:?}");
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app
            .set_like(user_id, &payload.entity_id, payload.liked)?
            .into())
    })
}

async fn liked(
    State(state): State<Arc<SharedState>>,
    Path(user_id): Path<u64>,
) -> Result<Json<Vec<String>>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app.liked_entities(user_id)?.into())
    })
}

async fn recompute_preference(
    State(state): State<Arc<SharedState>>,
    Path(user_id): Path<u64>,
) -> Result<Json<Recompute>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app.recompute_preference_vector(user_id)?.into())
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PreferenceResponse {
    pub user_id: u64,
    pub dimension: usize,
    /// base64 of the binary vector encoding
    pub vector_b64: String,
}

async fn get_preference(
    State(state): State<Arc<SharedState>>,
    Path(user_id): Path<u64>,
) -> Result<Json<PreferenceResponse>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let pref = app.preference_vector(user_id)?;
        Ok(PreferenceResponse {
            user_id,
            dimension: pref.dimension(),
            vector_b64: codec::encode_text(&pref.vector)?,
        }
        .into())
    })
}

#[derive(Debug, Deserialize)]
pub struct RecommendationsQuery {
    pub top: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendationsResponse {
    pub user_id: u64,
    pub recommendations: Vec<String>,
    /// records for `recommendations`, same order
    pub animals: Vec<Animal>,
}

async fn recommendations(
    State(state): State<Arc<SharedState>>,
    Path(user_id): Path<u64>,
    Query(query): Query<RecommendationsQuery>,
) -> Result<Json<RecommendationsResponse>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let recommendations = app.recommend(user_id, query.top)?;
        let animals = app.resolve_animals(&recommendations)?;
        Ok(RecommendationsResponse {
            user_id,
            recommendations,
            animals,
        }
        .into())
    })
}

async fn summary(
    State(state): State<Arc<SharedState>>,
    Path(user_id): Path<u64>,
) -> Result<Json<PreferenceSummary>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app.summarize_preference(user_id)?.into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{app::NotFound, embedding::ProviderError};
    use std::time::Duration;

    #[test]
    fn test_error_status_mapping() {
        let status = |err: AppError| HttpError(err).status();

        assert_eq!(status(NotFound::User(1).into()), StatusCode::NOT_FOUND);
        assert_eq!(
            status(AppError::BadRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(ProviderError::Timeout(Duration::from_secs(1)).into()),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status(
                ProviderError::Status {
                    status: 500,
                    body: String::new()
                }
                .into()
            ),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(anyhow::anyhow!("boom").into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
