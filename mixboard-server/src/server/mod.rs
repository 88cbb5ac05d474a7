pub mod auth;
mod config;
pub mod events;
pub mod mailer;

use std::sync::Arc;

use crate::server::auth::AuthCtx;
use crate::storage::{MixChange, StorageError, Store};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::{Method, StatusCode, header},
    routing::{delete, get, post},
};
use bcrypt::verify;
pub use config::{AppConfig, ConfigError, MailConfig};
use events::ChangeHub;
use mailer::{LogMailer, Mailer};
use mixboard_shared::api;
use mixboard_shared::domain::{
    DomainError, Mix, MixId, MixMetadata, MixTemplate, Stage, UserProfile, category_color,
    now_ms, validate_name, validate_stages,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    pub events: ChangeHub,
    pub mailer: Arc<dyn Mailer>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Self {
        Self::with_mailer(config, store, Arc::new(LogMailer))
    }

    pub fn with_mailer(config: AppConfig, store: Store, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            config,
            store,
            events: ChangeHub::default(),
            mailer,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token ends all open subscription streams.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Publishes a committed mix change and fires the final-stage mail if due.
    fn mix_changed(&self, change: &MixChange) {
        self.events.publish(change.after.id.clone());
        if !self.config.mail.enabled
            || !mailer::just_reached_final_stage(&change.before, &change.after)
        {
            return;
        }
        match mailer::final_stage_mail(&change.after, &self.config.mail.from) {
            Ok(Some(mail)) => {
                let mailer = self.mailer.clone();
                let mix_id = change.after.id.clone();
                tokio::spawn(async move {
                    if let Err(e) = mailer.send(mail).await {
                        tracing::warn!(mix_id = %mix_id, error=%e, "mail: final-stage notice failed");
                    }
                });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(mix_id = %change.after.id, error=%e, "mail: failed to compose")
            }
        }
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/api/v1/me", get(api_me))
        .route("/api/v1/mixes", get(api_list_mixes).post(api_create_mix))
        .route("/api/v1/mixes/from-template", post(api_create_from_template))
        .route("/api/v1/mixes/stream", get(events::api_mix_stream))
        .route(
            "/api/v1/mixes/{id}",
            get(api_get_mix).patch(api_update_mix).delete(api_delete_mix),
        )
        .route("/api/v1/mixes/{id}/advance", post(api_advance_mix))
        .route("/api/v1/mixes/{id}/template", post(api_save_as_template))
        .route(
            "/api/v1/templates",
            get(api_list_templates).post(api_create_template),
        )
        .route("/api/v1/templates/{id}", delete(api_delete_template))
        .with_state(state.clone())
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            user_id = tracing::field::Empty,
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/v1/auth/login", post(api_auth_login))
        .route("/api/v1/auth/signup", post(api_auth_signup))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let is_api = req.uri().path().starts_with("/api/");
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    if is_api {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        Span::current().record("user_id", tracing::field::display(auth.user_id()));
    }
    Ok(next.run(req).await)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

async fn api_auth_signup(
    State(state): State<AppState>,
    Json(body): Json<api::SignupReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let email = normalize_email(&body.email);
    if !auth::is_plausible_email(&email) {
        return Err(AppError::bad_request("a valid email address is required"));
    }
    if body.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let display_name = body
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    let hash = bcrypt::hash(&body.password, bcrypt::DEFAULT_COST).map_err(AppError::internal)?;
    let user = state
        .store
        .create_user(
            &Uuid::new_v4().to_string(),
            &email,
            display_name,
            &hash,
            now_ms(),
        )
        .await?;
    tracing::info!(user_id = %user.id, "signup: account created");
    let token = auth::issue_jwt_for_user(&state, &user.profile())?;
    Ok(Json(api::AuthResp { token }))
}

async fn api_auth_login(
    State(state): State<AppState>,
    Json(body): Json<api::AuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let email = normalize_email(&body.email);
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| {
            tracing::warn!(email = %email, "login: unknown email");
            AppError::unauthorized()
        })?;
    if !verify(&body.password, &user.password_hash).map_err(|e| {
        tracing::error!(user_id = %user.id, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        tracing::warn!(user_id = %user.id, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    let token = auth::issue_jwt_for_user(&state, &user.profile())?;
    Ok(Json(api::AuthResp { token }))
}

async fn api_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<UserProfile>, AppError> {
    let user = state
        .store
        .get_user(auth.user_id())
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(Json(user.profile()))
}

async fn api_list_mixes(
    State(state): State<AppState>,
    Query(q): Query<api::MixListQuery>,
) -> Result<Json<Vec<Mix>>, AppError> {
    let mixes = state.store.list_active_mixes(q.owner_id.as_deref()).await?;
    Ok(Json(mixes))
}

async fn api_get_mix(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Mix>, AppError> {
    let mix = state
        .store
        .get_mix(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("mix not found: {id}")))?;
    Ok(Json(mix))
}

/// Fills in the category colour when no explicit colour was given.
fn with_default_color(mut metadata: MixMetadata) -> MixMetadata {
    let blank = metadata
        .color
        .as_deref()
        .is_none_or(|c| c.trim().is_empty());
    if blank {
        metadata.color = Some(category_color(metadata.category.as_deref()).to_string());
    }
    metadata
}

fn new_mix(owner: &AuthCtx, name: &str, stages: Vec<Stage>, metadata: MixMetadata) -> Mix {
    let now = now_ms();
    Mix {
        id: MixId(Uuid::new_v4().to_string()),
        name: name.trim().to_string(),
        stages,
        current_stage_index: 0,
        current_stage_started_at_ms: now,
        owner: owner.profile().as_owner(),
        created_at_ms: now,
        is_deleted: false,
        metadata: with_default_color(metadata),
    }
}

async fn api_create_mix(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::CreateMixReq>,
) -> Result<(StatusCode, Json<Mix>), AppError> {
    validate_name(&body.name)?;
    validate_stages(&body.stages)?;
    let mix = new_mix(&auth, &body.name, body.stages, body.metadata);
    state.store.insert_mix(&mix).await?;
    tracing::info!(mix_id = %mix.id, stages = mix.stages.len(), "mix created");
    state.events.publish(mix.id.clone());
    Ok((StatusCode::CREATED, Json(mix)))
}

async fn api_create_from_template(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::CreateFromTemplateReq>,
) -> Result<(StatusCode, Json<Mix>), AppError> {
    let template = owned_template(&state, &auth, &body.template_id).await?;
    let mix = new_mix(&auth, &template.name, template.stages, template.metadata);
    state.store.insert_mix(&mix).await?;
    tracing::info!(mix_id = %mix.id, template_id = %template.id, "mix created from template");
    state.events.publish(mix.id.clone());
    Ok((StatusCode::CREATED, Json(mix)))
}

async fn api_advance_mix(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<api::AdvanceReq>,
) -> Result<Json<Mix>, AppError> {
    let from_index = body.from_index;
    let change = state
        .store
        .update_mix(&id, move |mix| {
            if mix.is_deleted {
                return Err(StorageError::NotFound(format!("mix not found: {}", mix.id)));
            }
            mix.advance(from_index, now_ms())?;
            Ok(())
        })
        .await?;
    tracing::info!(
        mix_id = %id,
        stage_index = change.after.current_stage_index,
        "mix advanced"
    );
    state.mix_changed(&change);
    Ok(Json(change.after))
}

async fn api_update_mix(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Json(body): Json<api::UpdateMixReq>,
) -> Result<Json<Mix>, AppError> {
    if let Some(name) = &body.name {
        validate_name(name)?;
    }
    let caller = auth.user_id().to_string();
    let change = state
        .store
        .update_mix(&id, move |mix| {
            ensure_live_and_owned(mix, &caller)?;
            if let Some(name) = body.name {
                mix.name = name.trim().to_string();
            }
            if let Some(stages) = body.stages {
                mix.replace_stages(stages)?;
            }
            if let Some(metadata) = body.metadata {
                mix.metadata = with_default_color(metadata);
            }
            Ok(())
        })
        .await?;
    tracing::info!(mix_id = %id, "mix edited");
    state.mix_changed(&change);
    Ok(Json(change.after))
}

async fn api_delete_mix(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let caller = auth.user_id().to_string();
    let change = state
        .store
        .update_mix(&id, move |mix| {
            ensure_live_and_owned(mix, &caller)?;
            mix.is_deleted = true;
            Ok(())
        })
        .await?;
    tracing::info!(mix_id = %id, "mix deleted");
    state.mix_changed(&change);
    Ok(StatusCode::NO_CONTENT)
}

fn ensure_live_and_owned(mix: &Mix, user_id: &str) -> Result<(), StorageError> {
    if mix.is_deleted {
        return Err(StorageError::NotFound(format!("mix not found: {}", mix.id)));
    }
    if mix.owner.id != user_id {
        return Err(StorageError::PermissionDenied(format!(
            "mix {} belongs to another user",
            mix.id
        )));
    }
    Ok(())
}

async fn api_save_as_template(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Json(body): Json<api::SaveAsTemplateReq>,
) -> Result<(StatusCode, Json<MixTemplate>), AppError> {
    validate_name(&body.template_name)?;
    let mix = state
        .store
        .get_mix(&id)
        .await?
        .filter(|m| !m.is_deleted)
        .ok_or_else(|| AppError::not_found(format!("mix not found: {id}")))?;
    let mut metadata = mix.metadata;
    metadata.batch_number = None;
    let template = MixTemplate {
        id: Uuid::new_v4().to_string(),
        owner_id: auth.user_id().to_string(),
        name: body.template_name.trim().to_string(),
        stages: mix.stages,
        metadata,
        created_at_ms: now_ms(),
    };
    state.store.insert_template(&template).await?;
    tracing::info!(template_id = %template.id, mix_id = %id, "mix saved as template");
    Ok((StatusCode::CREATED, Json(template)))
}

async fn api_list_templates(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<MixTemplate>>, AppError> {
    Ok(Json(state.store.list_templates(auth.user_id()).await?))
}

async fn api_create_template(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::CreateTemplateReq>,
) -> Result<(StatusCode, Json<MixTemplate>), AppError> {
    validate_name(&body.name)?;
    validate_stages(&body.stages)?;
    let mut metadata = with_default_color(body.metadata);
    metadata.batch_number = None;
    let template = MixTemplate {
        id: Uuid::new_v4().to_string(),
        owner_id: auth.user_id().to_string(),
        name: body.name.trim().to_string(),
        stages: body.stages,
        metadata,
        created_at_ms: now_ms(),
    };
    state.store.insert_template(&template).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn api_delete_template(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    owned_template(&state, &auth, &id).await?;
    if !state.store.delete_template(&id, auth.user_id()).await? {
        return Err(AppError::not_found(format!("template not found: {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn owned_template(
    state: &AppState,
    auth: &AuthCtx,
    id: &str,
) -> Result<MixTemplate, AppError> {
    let template = state
        .store
        .get_template(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("template not found: {id}")))?;
    if template.owner_id != auth.user_id() {
        tracing::warn!(template_id = %id, user_id = %auth.user_id(), "template: not owner");
        return Err(AppError::forbidden());
    }
    Ok(template)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<DomainError> for AppError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::StaleStage { .. } | DomainError::FinalStage => {
                AppError::Conflict(e.to_string())
            }
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(m) => AppError::NotFound(m),
            StorageError::Conflict(m) => AppError::Conflict(m),
            StorageError::InvalidInput(m) => AppError::BadRequest(m),
            StorageError::PermissionDenied(m) => {
                tracing::warn!(reason = %m, "permission denied");
                AppError::Forbidden
            }
            StorageError::Domain(d) => d.into(),
            other => AppError::internal(other),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into(), "forbidden", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m, "conflict", None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::warn!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}
