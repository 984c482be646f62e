//! Axum router for the topics surface.
//!
//! # Responsibility
//! - Route HTTP requests to [`CategorizeService`] operations.
//! - Translate wire DTOs to domain values and domain errors to statuses.
//! - Resolve the bearer token before touching storage.
//!
//! # Invariants
//! - Every request opens its own connection on a blocking worker; no state
//!   survives between calls.
//! - Authorization failures return 401 and publish a session event.
//! - Error bodies are always `{"detail", "error_code"}`, including rejected
//!   bodies, unknown routes and wrong methods.
//!
//! # See also
//! - `crate::dto` for the JSON shapes.

use crate::dto::{
    ApplyCategorizeRequest, AutoCategorizeRequest, AutoCategorizeResponse, ErrorBody,
    QuickCategorizeProposalDto, QuickCategorizeRequest, QuickCategorizeResponse,
    QuickCategorizeUncategorizedRequest, QuickCategorizeUncategorizedResponse, TopicDto,
    TopicNameRequest, TopicSearchResult,
};
use crate::session::{authorize, SessionEvent, SessionEvents, TokenVerifier};
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use log::{error, info, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use topicsort_core::{
    open_db, AnalyzeRequest, CategorizeError, CategorizeService, EngineConfig, OwnerId,
    SqliteTaxonomyStore, SuggestionOracle, TaxonomyStore, TopicId, TopicRef, TopicView,
};

/// Failed request: status plus the error body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

/// Error code carried on error responses so the request log can report it.
#[derive(Debug, Clone)]
struct ResponseErrorCode(String);

impl ApiError {
    fn new(status: StatusCode, error_code: &str, detail: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                detail: detail.into(),
                error_code: error_code.to_string(),
                stale_topic_ids: None,
                stale_entry_ids: None,
            },
        }
    }

    fn invalid_body(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_body", detail)
    }

    fn storage(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", detail)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &ErrorBody {
        &self.body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = ResponseErrorCode(self.body.error_code.clone());
        let mut response = (self.status, Json(self.body)).into_response();
        response.extensions_mut().insert(code);
        response
    }
}

impl From<CategorizeError> for ApiError {
    fn from(err: CategorizeError) -> Self {
        let status = match &err {
            CategorizeError::Validation(_)
            | CategorizeError::EmptyInput
            | CategorizeError::InvalidThreshold { .. } => StatusCode::BAD_REQUEST,
            CategorizeError::NotFound(_) => StatusCode::NOT_FOUND,
            CategorizeError::StaleProposal { .. } | CategorizeError::DuplicateTopicName(_) => {
                StatusCode::CONFLICT
            }
            CategorizeError::IncompleteOracleOutput { .. } => StatusCode::BAD_GATEWAY,
            CategorizeError::OracleUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CategorizeError::Repo(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut failure = Self::new(status, err.error_code(), err.to_string());
        if let CategorizeError::StaleProposal {
            topic_ids,
            entry_ids,
            ..
        } = &err
        {
            failure.body.stale_topic_ids = Some(topic_ids.clone());
            failure.body.stale_entry_ids = Some(entry_ids.clone());
        }
        failure
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_body(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "invalid_query",
            rejection.body_text(),
        )
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "route_not_found",
            rejection.body_text(),
        )
    }
}

/// `Json` with rejections reported as [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
struct ApiJson<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
struct ApiPath<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
struct ApiQuery<T>(T);

/// Owner resolved from the bearer token by [`require_owner`].
#[derive(Debug, Clone, Copy)]
struct Owner(OwnerId);

#[derive(Debug, Default, Deserialize)]
struct SuggestionsQuery {
    #[serde(default)]
    text: String,
}

/// Shared state behind the router: one database file and one oracle.
pub struct TopicsApi {
    db_path: PathBuf,
    oracle: Arc<dyn SuggestionOracle>,
    config: EngineConfig,
    tokens: Arc<dyn TokenVerifier>,
    session_events: SessionEvents,
}

impl TopicsApi {
    pub fn new(
        db_path: impl Into<PathBuf>,
        oracle: Arc<dyn SuggestionOracle>,
        config: EngineConfig,
        tokens: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            oracle,
            config,
            tokens,
            session_events: SessionEvents::new(),
        }
    }

    /// Channel that receives [`SessionEvent`]s on authorization failure.
    pub fn session_events(&self) -> &SessionEvents {
        &self.session_events
    }

    /// Opens the database and runs `work` against a fresh service on the
    /// blocking pool; SQLite and the oracle fan-out both block.
    async fn with_service<T, F>(self: Arc<Self>, work: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: for<'conn> FnOnce(
                &mut CategorizeService<SqliteTaxonomyStore<'conn>>,
            ) -> Result<T, ApiError>
            + Send
            + 'static,
    {
        let joined = tokio::task::spawn_blocking(move || {
            let mut conn = open_db(&self.db_path)
                .map_err(|err| ApiError::storage(format!("failed to open database: {err}")))?;
            let store = SqliteTaxonomyStore::try_new(&mut conn).map_err(CategorizeError::from)?;
            let mut service =
                CategorizeService::new(store, Arc::clone(&self.oracle), self.config.clone());
            work(&mut service)
        })
        .await;

        joined.unwrap_or_else(|err| {
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("request worker failed: {err}"),
            ))
        })
    }
}

/// Builds the router. Routes are served both bare and under `/api`.
pub fn create_router(api: Arc<TopicsApi>) -> Router {
    let topics = Router::new()
        .route(
            "/topics",
            get(list_topics)
                .post(create_topic)
                .fallback(method_not_allowed),
        )
        .route(
            "/topics/entry-counts",
            get(entry_counts).fallback(method_not_allowed),
        )
        .route(
            "/topics/suggestions",
            get(suggestions).fallback(method_not_allowed),
        )
        .route(
            "/topics/analyze-categorization",
            post(analyze_categorization).fallback(method_not_allowed),
        )
        .route(
            "/topics/apply-categorization",
            post(apply_categorization).fallback(method_not_allowed),
        )
        .route(
            "/topics/quick-categorize",
            post(quick_categorize).fallback(method_not_allowed),
        )
        .route(
            "/topics/quick-categorize-uncategorized",
            post(quick_categorize_uncategorized).fallback(method_not_allowed),
        )
        .route(
            "/topics/:topic_id",
            get(get_topic)
                .patch(update_topic)
                .delete(delete_topic)
                .fallback(method_not_allowed),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&api),
            require_owner,
        ));

    Router::new()
        .merge(topics.clone())
        .nest("/api", topics)
        .fallback(route_not_found)
        .layer(middleware::from_fn(log_request))
        .with_state(api)
}

async fn require_owner(
    State(api): State<Arc<TopicsApi>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .map(|value| value.to_str().unwrap_or_default());
    let outcome = authorize(api.tokens.as_ref(), header);

    match outcome {
        Ok(owner_id) => {
            request.extensions_mut().insert(Owner(owner_id));
            Ok(next.run(request).await)
        }
        Err(reason) => {
            api.session_events
                .publish(SessionEvent::Invalidated { reason });
            Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "not authenticated",
            ))
        }
    }
}

async fn log_request(request: Request, next: Next) -> Response {
    let started_at = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration_ms = started_at.elapsed().as_millis();
    match response.extensions().get::<ResponseErrorCode>() {
        None => info!(
            "event=api_request module=api status=ok method={} path={} http_status={} duration_ms={}",
            method, path, status, duration_ms
        ),
        Some(ResponseErrorCode(code)) if response.status().is_server_error() => error!(
            "event=api_request module=api status=error method={} path={} http_status={} error_code={} duration_ms={}",
            method, path, status, code, duration_ms
        ),
        Some(ResponseErrorCode(code)) => warn!(
            "event=api_request module=api status=error method={} path={} http_status={} error_code={} duration_ms={}",
            method, path, status, code, duration_ms
        ),
    }
    response
}

async fn route_not_found(uri: Uri) -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        "route_not_found",
        format!("no route for `{}`", uri.path()),
    )
}

async fn method_not_allowed(method: Method, uri: Uri) -> ApiError {
    ApiError::new(
        StatusCode::METHOD_NOT_ALLOWED,
        "method_not_allowed",
        format!("{method} is not allowed on `{}`", uri.path()),
    )
}

async fn list_topics(
    State(api): State<Arc<TopicsApi>>,
    Extension(Owner(owner_id)): Extension<Owner>,
) -> Result<Json<Vec<TopicDto>>, ApiError> {
    api.with_service(move |service| {
        let views = service.list_topic_views(owner_id)?;
        Ok(Json(views.iter().map(TopicDto::from).collect()))
    })
    .await
}

async fn create_topic(
    State(api): State<Arc<TopicsApi>>,
    Extension(Owner(owner_id)): Extension<Owner>,
    ApiJson(payload): ApiJson<TopicNameRequest>,
) -> Result<(StatusCode, Json<TopicDto>), ApiError> {
    api.with_service(move |service| {
        let topic = service.create_topic(owner_id, &payload.topic_name)?;
        Ok((
            StatusCode::CREATED,
            Json(TopicDto::from(&TopicView::Real(topic))),
        ))
    })
    .await
}

async fn entry_counts(
    State(api): State<Arc<TopicsApi>>,
    Extension(Owner(owner_id)): Extension<Owner>,
) -> Result<Json<BTreeMap<TopicId, u32>>, ApiError> {
    api.with_service(move |service| Ok(Json(service.topic_entry_counts(owner_id)?)))
        .await
}

async fn suggestions(
    State(api): State<Arc<TopicsApi>>,
    Extension(Owner(owner_id)): Extension<Owner>,
    ApiQuery(query): ApiQuery<SuggestionsQuery>,
) -> Result<Json<Vec<TopicSearchResult>>, ApiError> {
    api.with_service(move |service| Ok(Json(search_topics(&*service, owner_id, &query.text)?)))
        .await
}

async fn get_topic(
    State(api): State<Arc<TopicsApi>>,
    Extension(Owner(owner_id)): Extension<Owner>,
    ApiPath(topic_id): ApiPath<TopicId>,
) -> Result<Json<TopicDto>, ApiError> {
    api.with_service(move |service| {
        let view = service.get_topic_view(owner_id, topic_id)?;
        Ok(Json(TopicDto::from(&view)))
    })
    .await
}

async fn update_topic(
    State(api): State<Arc<TopicsApi>>,
    Extension(Owner(owner_id)): Extension<Owner>,
    ApiPath(topic_id): ApiPath<TopicId>,
    ApiJson(payload): ApiJson<TopicNameRequest>,
) -> Result<Json<TopicDto>, ApiError> {
    api.with_service(move |service| {
        let topic = service.rename_topic(owner_id, topic_id, &payload.topic_name)?;
        Ok(Json(TopicDto::from(&TopicView::Real(topic))))
    })
    .await
}

async fn delete_topic(
    State(api): State<Arc<TopicsApi>>,
    Extension(Owner(owner_id)): Extension<Owner>,
    ApiPath(topic_id): ApiPath<TopicId>,
) -> Result<StatusCode, ApiError> {
    api.with_service(move |service| {
        service.delete_topic(owner_id, topic_id)?;
        Ok(StatusCode::NO_CONTENT)
    })
    .await
}

async fn analyze_categorization(
    State(api): State<Arc<TopicsApi>>,
    Extension(Owner(owner_id)): Extension<Owner>,
    ApiJson(payload): ApiJson<AutoCategorizeRequest>,
) -> Result<Json<AutoCategorizeResponse>, ApiError> {
    let instructions = payload
        .instructions
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let analyze = AnalyzeRequest {
        instructions: instructions.clone(),
        topics_to_keep: payload.topics_to_keep.unwrap_or_default(),
    };
    api.with_service(move |service| {
        let set = service.analyze(owner_id, &analyze)?;
        Ok(Json(AutoCategorizeResponse::from_proposal_set(
            &set,
            instructions,
        )))
    })
    .await
}

async fn apply_categorization(
    State(api): State<Arc<TopicsApi>>,
    Extension(Owner(owner_id)): Extension<Owner>,
    ApiJson(payload): ApiJson<ApplyCategorizeRequest>,
) -> Result<StatusCode, ApiError> {
    let set = payload.to_proposal_set(owner_id).map_err(|detail| {
        ApiError::new(StatusCode::BAD_REQUEST, "validation_error", detail)
    })?;
    let snapshot_version = payload.snapshot_version;
    api.with_service(move |service| {
        service.apply(owner_id, &set, snapshot_version)?;
        Ok(StatusCode::NO_CONTENT)
    })
    .await
}

async fn quick_categorize(
    State(api): State<Arc<TopicsApi>>,
    Extension(Owner(owner_id)): Extension<Owner>,
    ApiJson(payload): ApiJson<QuickCategorizeRequest>,
) -> Result<Json<QuickCategorizeResponse>, ApiError> {
    api.with_service(move |service| {
        let proposals = service.quick_categorize(owner_id, &payload.entry_ids)?;
        Ok(Json(QuickCategorizeResponse {
            proposals: proposals
                .iter()
                .map(QuickCategorizeProposalDto::from)
                .collect(),
        }))
    })
    .await
}

async fn quick_categorize_uncategorized(
    State(api): State<Arc<TopicsApi>>,
    Extension(Owner(owner_id)): Extension<Owner>,
    ApiJson(payload): ApiJson<QuickCategorizeUncategorizedRequest>,
) -> Result<Json<QuickCategorizeUncategorizedResponse>, ApiError> {
    api.with_service(move |service| {
        let set =
            service.quick_categorize_uncategorized(owner_id, payload.entry_ids.as_deref())?;
        Ok(Json(QuickCategorizeUncategorizedResponse::from(&set)))
    })
    .await
}

fn search_topics<S: TaxonomyStore>(
    service: &CategorizeService<S>,
    owner_id: OwnerId,
    text: &str,
) -> Result<Vec<TopicSearchResult>, ApiError> {
    let suggestions = service.suggest_for_text(owner_id, text)?;
    let snapshot = service
        .store()
        .snapshot(owner_id)
        .map_err(CategorizeError::from)?;

    Ok(suggestions
        .iter()
        .map(|suggestion| {
            let topic = match suggestion.target {
                TopicRef::Existing(topic_id) => snapshot.topic(topic_id),
                TopicRef::ProposeNew => None,
            };
            TopicSearchResult {
                topic_id: suggestion.target.topic_id(),
                topic_name: suggestion.name.clone(),
                entry_count: topic.map_or(0, |topic| topic.entry_count),
                user_id: owner_id,
                creation_date: topic.map(|topic| topic.created_at),
                score: suggestion.confidence,
                is_ai_suggested: true,
                is_new_topic: suggestion.target.is_new(),
            }
        })
        .collect())
}
