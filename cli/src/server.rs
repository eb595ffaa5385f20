use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use sillage_core::Error;
use sillage_core::auth::SESSION_TTL_HOURS;
use sillage_core::db::Database;
use sillage_core::models::{
    Brand, CollectionEntry, CollectionItem, CollectionStatus, Lookup, NewBrand, NewPerfume,
    NewReview, NewUser, NoteKind, Perfume, PerfumeFilter, PerfumeNote, RatingSummary, Review,
    ReviewPolicy, UpdatePerfume, UpdateReview, UpdateUser, User,
};
use sillage_core::quiz::{
    QUESTIONS, QuizChoice, QuizQuestion, QuizSession, ScoredPerfume, normalize_tags,
    resolve_answers,
};

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

/// Knobs set from `sillage serve` flags.
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    pub review_policy: ReviewPolicy,
    pub session_ttl: chrono::Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            review_policy: ReviewPolicy::default(),
            session_ttl: chrono::Duration::hours(SESSION_TTL_HOURS),
        }
    }
}

#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Database>>,
    options: ServerOptions,
}

impl AppState {
    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    expires_in: i64,
    user: User,
}

#[derive(Deserialize)]
struct CollectionQuery {
    #[serde(rename = "type")]
    status: Option<String>,
}

#[derive(Deserialize)]
struct SetCollectionRequest {
    perfume_id: i64,
    status: String,
}

#[derive(Deserialize)]
struct PerfumeQuery {
    brand_id: Option<i64>,
    gender_id: Option<i64>,
    family_id: Option<i64>,
    q: Option<String>,
}

#[derive(Serialize)]
struct PerfumeDetail {
    #[serde(flatten)]
    perfume: Perfume,
    notes: Vec<PerfumeNote>,
    rating: RatingSummary,
}

#[derive(Deserialize)]
struct AddNoteRequest {
    value: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct CreateReviewRequest {
    perfume_id: i64,
    rating: i64,
    comment: String,
}

/// Either question/option picks, raw tag groups, or both.
#[derive(Deserialize)]
struct RecommendationRequest {
    #[serde(default)]
    answers: Vec<QuizChoice>,
    #[serde(default)]
    tags: Vec<Vec<String>>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) => Self::BadRequest(msg),
            e @ Error::NotFound { .. } => Self::NotFound(e.to_string()),
            e @ Error::CapacityExceeded { .. } => Self::Conflict(e.to_string()),
            Error::Conflict(msg) => Self::Conflict(msg),
            e @ Error::InvalidCredentials => Self::Unauthorized(e.to_string()),
            Error::Forbidden(msg) => Self::Forbidden(msg),
            other => Self::Internal(other.into()),
        }
    }
}

// --- Authentication ---

/// The user behind the request's bearer token.
#[derive(Clone)]
struct AuthUser {
    user: User,
    token: String,
}

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Missing or invalid session token".to_string()))
    }
}

/// An authenticated user holding the admin role.
struct AdminUser(AuthUser);

impl<S: Send + Sync> FromRequestParts<S> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;
        if !auth.user.actor().is_admin() {
            return Err(ApiError::Forbidden("Admin role required".to_string()));
        }
        Ok(Self(auth))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Only the owner of a collection (or an admin) may read or change it.
fn ensure_self_or_admin(auth: &AuthUser, user_id: i64) -> Result<(), ApiError> {
    if auth.user.id == user_id || auth.user.actor().is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "Cannot access another user's collection".to_string(),
        ))
    }
}

// --- Middleware ---

/// Attach an [`AuthUser`] to requests carrying a live session token.
/// Handlers that need one reject the request themselves.
async fn resolve_session(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if let Some(token) = bearer_token(request.headers()).map(str::to_string) {
        let found = state.db().user_for_token(&token);
        match found {
            Ok(Some(user)) => {
                request.extensions_mut().insert(AuthUser { user, token });
            }
            Ok(None) => tracing::debug!("unknown or expired session token"),
            Err(e) => return ApiError::from(e).into_response(),
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Account handlers ---

async fn register(
    State(state): State<AppState>,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.db().create_user(&req)?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let db = state.db();
    let user = db.authenticate(&req.email, &req.password)?;
    let token = db.create_session(user.id, state.options.session_ttl)?;
    if let Err(e) = db.purge_expired_sessions() {
        tracing::warn!(error = %e, "could not purge expired sessions");
    }
    Ok(Json(LoginResponse {
        token,
        expires_in: state.options.session_ttl.num_seconds(),
        user,
    }))
}

async fn logout(State(state): State<AppState>, auth: AuthUser) -> Result<StatusCode, ApiError> {
    state.db().delete_session(&auth.token)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(auth: AuthUser) -> Json<User> {
    Json(auth.user)
}

async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.db().list_users()?))
}

async fn get_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.db().get_user(id)?))
}

async fn update_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUser>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.db().update_user(id, &req)?))
}

async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if admin.user.id == id {
        return Err(ApiError::BadRequest(
            "Admins cannot delete their own account".to_string(),
        ));
    }
    state.db().delete_user(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Collection handlers ---

async fn list_collection(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<i64>,
    Query(query): Query<CollectionQuery>,
) -> Result<Json<Vec<CollectionItem>>, ApiError> {
    ensure_self_or_admin(&auth, user_id)?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<CollectionStatus>)
        .transpose()?;
    let db = state.db();
    let items = match status {
        Some(status) => db.list_collection_by_status(user_id, status)?,
        None => db.list_collection(user_id)?,
    };
    Ok(Json(items))
}

async fn set_collection(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<i64>,
    Json(req): Json<SetCollectionRequest>,
) -> Result<(StatusCode, Json<CollectionEntry>), ApiError> {
    ensure_self_or_admin(&auth, user_id)?;
    let status: CollectionStatus = req.status.parse()?;
    let entry = state
        .db()
        .set_collection_status(user_id, req.perfume_id, status)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn clear_collection(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((user_id, perfume_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    ensure_self_or_admin(&auth, user_id)?;
    state.db().clear_collection_status(user_id, perfume_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Perfume handlers ---

async fn list_perfumes(
    State(state): State<AppState>,
    Query(query): Query<PerfumeQuery>,
) -> Result<Json<Vec<Perfume>>, ApiError> {
    let filter = PerfumeFilter {
        brand_id: query.brand_id,
        gender_id: query.gender_id,
        family_id: query.family_id,
        search: query.q,
    };
    Ok(Json(state.db().list_perfumes(&filter)?))
}

async fn get_perfume(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PerfumeDetail>, ApiError> {
    let db = state.db();
    let perfume = db.get_perfume(id)?;
    let notes = db.list_perfume_notes(id)?;
    let rating = db.perfume_rating_summary(id)?;
    Ok(Json(PerfumeDetail {
        perfume,
        notes,
        rating,
    }))
}

async fn create_perfume(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(req): Json<NewPerfume>,
) -> Result<(StatusCode, Json<Perfume>), ApiError> {
    let perfume = state.db().create_perfume(&req)?;
    Ok((StatusCode::CREATED, Json(perfume)))
}

async fn update_perfume(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdatePerfume>,
) -> Result<Json<Perfume>, ApiError> {
    Ok(Json(state.db().update_perfume(id, &req)?))
}

async fn delete_perfume(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.db().delete_perfume(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_perfume_notes(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<PerfumeNote>>, ApiError> {
    Ok(Json(state.db().list_perfume_notes(id)?))
}

async fn add_perfume_note(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<AddNoteRequest>,
) -> Result<(StatusCode, Json<PerfumeNote>), ApiError> {
    let kind: NoteKind = req.kind.parse()?;
    let note = state.db().add_perfume_note(id, &req.value, kind)?;
    Ok((StatusCode::CREATED, Json(note)))
}

// --- Brand handlers ---

async fn list_brands(State(state): State<AppState>) -> Result<Json<Vec<Brand>>, ApiError> {
    Ok(Json(state.db().list_brands()?))
}

async fn get_brand(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Brand>, ApiError> {
    Ok(Json(state.db().get_brand(id)?))
}

async fn list_brand_perfumes(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Perfume>>, ApiError> {
    Ok(Json(state.db().list_perfumes_by_brand(id)?))
}

async fn create_brand(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(req): Json<NewBrand>,
) -> Result<(StatusCode, Json<Brand>), ApiError> {
    let brand = state.db().create_brand(&req)?;
    Ok((StatusCode::CREATED, Json(brand)))
}

async fn update_brand(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<NewBrand>,
) -> Result<Json<Brand>, ApiError> {
    Ok(Json(state.db().update_brand(id, &req)?))
}

async fn delete_brand(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.db().delete_brand(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Lookup handlers ---

async fn list_genders(State(state): State<AppState>) -> Result<Json<Vec<Lookup>>, ApiError> {
    Ok(Json(state.db().list_genders()?))
}

async fn get_gender(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Lookup>, ApiError> {
    Ok(Json(state.db().get_gender(id)?))
}

async fn list_families(State(state): State<AppState>) -> Result<Json<Vec<Lookup>>, ApiError> {
    Ok(Json(state.db().list_olfactory_families()?))
}

async fn get_family(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Lookup>, ApiError> {
    Ok(Json(state.db().get_olfactory_family(id)?))
}

async fn list_notes(State(state): State<AppState>) -> Result<Json<Vec<Lookup>>, ApiError> {
    Ok(Json(state.db().list_olfactory_notes()?))
}

async fn get_note(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Lookup>, ApiError> {
    Ok(Json(state.db().get_olfactory_note(id)?))
}

// --- Review handlers ---

async fn list_reviews(State(state): State<AppState>) -> Result<Json<Vec<Review>>, ApiError> {
    Ok(Json(state.db().list_reviews()?))
}

async fn list_perfume_reviews(
    State(state): State<AppState>,
    Path(perfume_id): Path<i64>,
) -> Result<Json<Vec<Review>>, ApiError> {
    let db = state.db();
    db.get_perfume(perfume_id)?;
    Ok(Json(db.list_reviews_for_perfume(perfume_id)?))
}

async fn create_review(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<Review>), ApiError> {
    let review = NewReview {
        perfume_id: req.perfume_id,
        user_id: auth.user.id,
        rating: req.rating,
        comment: req.comment,
    };
    let created = state
        .db()
        .create_review(&review, &state.options.review_policy)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_review(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateReview>,
) -> Result<Json<Review>, ApiError> {
    let review =
        state
            .db()
            .update_review(id, auth.user.actor(), &req, &state.options.review_policy)?;
    Ok(Json(review))
}

async fn delete_review(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .db()
        .delete_review(id, auth.user.actor(), &state.options.review_policy)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Quiz handlers ---

async fn quiz_questions() -> Json<&'static [QuizQuestion]> {
    Json(QUESTIONS.as_slice())
}

async fn recommend(
    State(state): State<AppState>,
    Json(req): Json<RecommendationRequest>,
) -> Result<Json<Vec<ScoredPerfume>>, ApiError> {
    let mut answers = resolve_answers(&req.answers)?;
    answers.extend(req.tags.iter().map(normalize_tags));

    let db = state.db();
    let catalog = db.list_perfumes(&PerfumeFilter::default())?;
    let mut session = QuizSession::new(catalog);
    let results = session.recommend(&*db, &answers);
    tracing::debug!(
        answers = answers.len(),
        results = results.len(),
        "quiz recommendations"
    );
    Ok(Json(results))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/users/register", post(register))
        .route("/api/users/login", post(login))
        .route("/api/users/logout", post(logout))
        .route("/api/users/me", get(me))
        .route("/api/users", get(list_users))
        .route(
            "/api/users/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route(
            "/api/users/{id}/collection",
            get(list_collection).post(set_collection),
        )
        .route(
            "/api/users/{id}/collection/{perfume_id}",
            delete(clear_collection),
        )
        .route("/api/perfumes", get(list_perfumes).post(create_perfume))
        .route(
            "/api/perfumes/{id}",
            get(get_perfume).put(update_perfume).delete(delete_perfume),
        )
        .route(
            "/api/perfumes/{id}/notes",
            get(list_perfume_notes).post(add_perfume_note),
        )
        .route("/api/brands", get(list_brands).post(create_brand))
        .route(
            "/api/brands/{id}",
            get(get_brand).put(update_brand).delete(delete_brand),
        )
        .route("/api/brands/{id}/perfumes", get(list_brand_perfumes))
        .route("/api/genders", get(list_genders))
        .route("/api/genders/{id}", get(get_gender))
        .route("/api/olfactory-families", get(list_families))
        .route("/api/olfactory-families/{id}", get(get_family))
        .route("/api/olfactory-notes", get(list_notes))
        .route("/api/olfactory-notes/{id}", get(get_note))
        .route("/api/reviews", get(list_reviews).post(create_review))
        .route("/api/reviews/perfume/{perfume_id}", get(list_perfume_reviews))
        .route("/api/reviews/{id}", put(update_review).delete(delete_review))
        .route("/api/quiz", get(quiz_questions))
        .route("/api/quiz/recommendations", post(recommend))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            resolve_session,
        ))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    db: Database,
    port: u16,
    bind: &str,
    options: ServerOptions,
) -> anyhow::Result<()> {
    let purged = db.purge_expired_sessions()?;
    if purged > 0 {
        tracing::info!(purged, "removed expired sessions");
    }

    let state = AppState {
        db: Arc::new(Mutex::new(db)),
        options,
    };
    let app = build_router(state);

    if bind != "127.0.0.1" && bind != "localhost" {
        tracing::warn!(%bind, "listening beyond localhost; the API is reachable from the network");
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    tracing::info!(
        unique_reviews = options.review_policy.one_per_user_per_perfume,
        author_only = options.review_policy.author_only,
        "listening on http://{bind}:{port}"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use sillage_core::models::Role;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            db: Arc::new(Mutex::new(Database::open_in_memory().unwrap())),
            options: ServerOptions::default(),
        }
    }

    /// Creates a user directly and opens a session for it.
    fn seed_user(state: &AppState, name: &str, role: Role) -> (User, String) {
        let db = state.db();
        let user = db
            .create_user(&NewUser {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                password: "correct horse battery".to_string(),
            })
            .unwrap();
        let user = db.set_user_role(user.id, role).unwrap();
        let token = db
            .create_session(user.id, chrono::Duration::hours(1))
            .unwrap();
        (user, token)
    }

    fn seed_perfume(state: &AppState, brand: &str, name: &str, notes: &[&str]) -> i64 {
        let db = state.db();
        let (brand_id, _) = db.get_or_create_brand(brand).unwrap();
        let perfume = db
            .create_perfume(&NewPerfume {
                name: name.to_string(),
                brand_id,
                ..NewPerfume::default()
            })
            .unwrap();
        for note in notes {
            db.add_perfume_note(perfume.id, note, NoteKind::Heart)
                .unwrap();
        }
        perfume.id
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(state: &AppState, req: Request) -> (StatusCode, Value) {
        let response = build_router(state.clone()).oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn security_headers_present() {
        let app = build_router(test_state());

        let response = app
            .oneshot(
                axum::http::Request::get("/api/quiz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn quiz_lists_question_bank() {
        let state = test_state();
        let (status, json) = send(&state, request("GET", "/api/quiz", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        let questions = json.as_array().unwrap();
        assert_eq!(questions.len(), QUESTIONS.len());
        assert!(questions[0]["options"].as_array().unwrap().len() > 1);
    }

    #[tokio::test]
    async fn recommendations_capped_at_six() {
        let state = test_state();
        for i in 0..8 {
            seed_perfume(&state, "Maison", &format!("Rose {i}"), &["rose"]);
        }
        seed_perfume(&state, "Maison", "Agrume", &["citron"]);

        let (status, json) = send(
            &state,
            request(
                "POST",
                "/api/quiz/recommendations",
                None,
                Some(json!({ "tags": [["Rose"]] })),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let results = json.as_array().unwrap();
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r["score"].as_u64().unwrap() >= 2));
        assert!(results.iter().all(|r| r["name"] != "Agrume"));
    }

    #[tokio::test]
    async fn recommendations_from_answers() {
        let state = test_state();
        let option = &QUESTIONS[0].options[0];
        let p = seed_perfume(&state, "Maison", "Match", &[option.tags[0]]);

        let (status, json) = send(
            &state,
            request(
                "POST",
                "/api/quiz/recommendations",
                None,
                Some(json!({ "answers": [{ "question_id": QUESTIONS[0].id, "option_index": 0 }] })),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["id"], p);
    }

    #[tokio::test]
    async fn recommendations_reject_unknown_question() {
        let state = test_state();
        let (status, json) = send(
            &state,
            request(
                "POST",
                "/api/quiz/recommendations",
                None,
                Some(json!({ "answers": [{ "question_id": 999, "option_index": 0 }] })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("999"));
    }

    #[tokio::test]
    async fn empty_catalog_recommends_nothing() {
        let state = test_state();
        let (status, json) = send(
            &state,
            request(
                "POST",
                "/api/quiz/recommendations",
                None,
                Some(json!({ "tags": [["rose"]] })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_login_me_logout() {
        let state = test_state();

        let (status, user) = send(
            &state,
            request(
                "POST",
                "/api/users/register",
                None,
                Some(json!({
                    "username": "alice",
                    "email": "alice@example.com",
                    "password": "correct horse battery"
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(user["role"], "user");
        assert!(user.get("password_hash").is_none());

        let (status, login) = send(
            &state,
            request(
                "POST",
                "/api/users/login",
                None,
                Some(json!({ "email": "alice@example.com", "password": "correct horse battery" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = login["token"].as_str().unwrap().to_string();
        assert_eq!(login["expires_in"], SESSION_TTL_HOURS * 3600);

        let (status, me) = send(&state, request("GET", "/api/users/me", Some(&token), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["username"], "alice");

        let (status, _) = send(
            &state,
            request("POST", "/api/users/logout", Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&state, request("GET", "/api/users/me", Some(&token), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_purges_expired_sessions() {
        let state = test_state();
        let (alice, _) = seed_user(&state, "alice", Role::User);
        let stale = state
            .db()
            .create_session(alice.id, chrono::Duration::seconds(-1))
            .unwrap();

        let (status, json) = send(
            &state,
            request(
                "POST",
                "/api/users/login",
                None,
                Some(json!({ "email": "alice@example.com", "password": "correct horse battery" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["token"].is_string());

        let db = state.db();
        assert_eq!(db.purge_expired_sessions().unwrap(), 0);
        assert!(db.user_for_token(&stale).unwrap().is_none());
    }

    #[tokio::test]
    async fn login_with_wrong_password_returns_401() {
        let state = test_state();
        seed_user(&state, "alice", Role::User);
        let (status, json) = send(
            &state,
            request(
                "POST",
                "/api/users/login",
                None,
                Some(json!({ "email": "alice@example.com", "password": "wrong password" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "invalid email or password");
    }

    #[tokio::test]
    async fn duplicate_registration_returns_409() {
        let state = test_state();
        seed_user(&state, "alice", Role::User);
        let (status, _) = send(
            &state,
            request(
                "POST",
                "/api/users/register",
                None,
                Some(json!({
                    "username": "alice2",
                    "email": "alice@example.com",
                    "password": "correct horse battery"
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn missing_or_bogus_token_returns_401() {
        let state = test_state();
        let (status, json) = send(&state, request("GET", "/api/users/me", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "Missing or invalid session token");

        let (status, _) = send(
            &state,
            request("GET", "/api/users/me", Some("not-a-token"), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_routes_require_admin_role() {
        let state = test_state();
        let (_, user_token) = seed_user(&state, "alice", Role::User);
        let (_, admin_token) = seed_user(&state, "root", Role::Admin);

        let (status, _) = send(&state, request("GET", "/api/users", Some(&user_token), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, json) =
            send(&state, request("GET", "/api/users", Some(&admin_token), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn perfume_crud_is_admin_only() {
        let state = test_state();
        let (_, user_token) = seed_user(&state, "alice", Role::User);
        let (_, admin_token) = seed_user(&state, "root", Role::Admin);

        let (status, brand) = send(
            &state,
            request(
                "POST",
                "/api/brands",
                Some(&admin_token),
                Some(json!({ "name": "Guerlain" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let body = json!({ "name": "Shalimar", "brand_id": brand["id"], "release_year": 1925 });
        let (status, _) = send(
            &state,
            request("POST", "/api/perfumes", Some(&user_token), Some(body.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, perfume) = send(
            &state,
            request("POST", "/api/perfumes", Some(&admin_token), Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(perfume["brand_name"], "Guerlain");

        let id = perfume["id"].as_i64().unwrap();
        let (status, note) = send(
            &state,
            request(
                "POST",
                &format!("/api/perfumes/{id}/notes"),
                Some(&admin_token),
                Some(json!({ "value": "Vanille", "type": "base" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(note["type"], "base");

        let (status, detail) =
            send(&state, request("GET", &format!("/api/perfumes/{id}"), None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["notes"][0]["value"], "Vanille");
        assert_eq!(detail["rating"]["count"], 0);

        let (status, _) = send(
            &state,
            request("DELETE", &format!("/api/perfumes/{id}"), Some(&admin_token), None),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) =
            send(&state, request("GET", &format!("/api/perfumes/{id}"), None, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_note_type_returns_400() {
        let state = test_state();
        let (_, admin_token) = seed_user(&state, "root", Role::Admin);
        let p = seed_perfume(&state, "Guerlain", "Shalimar", &[]);
        let (status, _) = send(
            &state,
            request(
                "POST",
                &format!("/api/perfumes/{p}/notes"),
                Some(&admin_token),
                Some(json!({ "value": "Iris", "type": "bottom" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn perfume_filters_and_lookups() {
        let state = test_state();
        seed_perfume(&state, "Guerlain", "Shalimar", &[]);
        seed_perfume(&state, "Dior", "Eau Sauvage", &[]);

        let (status, json) =
            send(&state, request("GET", "/api/perfumes?q=guer", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["name"], "Shalimar");

        let (status, genders) = send(&state, request("GET", "/api/genders", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(genders.as_array().unwrap().len(), 3);

        let (status, _) =
            send(&state, request("GET", "/api/olfactory-notes/42", None, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn collection_round_trip() {
        let state = test_state();
        let (alice, token) = seed_user(&state, "alice", Role::User);
        let p = seed_perfume(&state, "Guerlain", "Shalimar", &[]);
        let base = format!("/api/users/{}/collection", alice.id);

        let (status, entry) = send(
            &state,
            request(
                "POST",
                &base,
                Some(&token),
                Some(json!({ "perfume_id": p, "status": "wishlist" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(entry["status"], "wishlist");

        let (status, list) = send(
            &state,
            request("GET", &format!("{base}?type=wishlist"), Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list[0]["id"], p);

        let (status, owned) = send(
            &state,
            request("GET", &format!("{base}?type=owned"), Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(owned.as_array().unwrap().is_empty());

        for _ in 0..2 {
            let (status, _) = send(
                &state,
                request("DELETE", &format!("{base}/{p}"), Some(&token), None),
            )
            .await;
            assert_eq!(status, StatusCode::NO_CONTENT);
        }

        let (_, all) = send(&state, request("GET", &base, Some(&token), None)).await;
        assert!(all.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_collection_returns_403() {
        let state = test_state();
        let (alice, _) = seed_user(&state, "alice", Role::User);
        let (_, bob_token) = seed_user(&state, "bob", Role::User);

        let (status, _) = send(
            &state,
            request(
                "GET",
                &format!("/api/users/{}/collection", alice.id),
                Some(&bob_token),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn full_wishlist_returns_409() {
        let state = test_state();
        let (alice, token) = seed_user(&state, "alice", Role::User);
        let ids: Vec<i64> = (0..11)
            .map(|i| seed_perfume(&state, "Maison", &format!("P{i}"), &[]))
            .collect();
        {
            let db = state.db();
            for id in &ids[..10] {
                db.set_collection_status(alice.id, *id, CollectionStatus::Wishlist)
                    .unwrap();
            }
        }

        let (status, json) = send(
            &state,
            request(
                "POST",
                &format!("/api/users/{}/collection", alice.id),
                Some(&token),
                Some(json!({ "perfume_id": ids[10], "status": "wishlist" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(json["error"].as_str().unwrap().contains("wishlist"));
        assert_eq!(
            state
                .db()
                .count_collection(alice.id, CollectionStatus::Wishlist)
                .unwrap(),
            10
        );
    }

    #[tokio::test]
    async fn collection_rejects_bad_input() {
        let state = test_state();
        let (alice, token) = seed_user(&state, "alice", Role::User);
        let base = format!("/api/users/{}/collection", alice.id);

        let (status, _) = send(
            &state,
            request("GET", &format!("{base}?type=borrowed"), Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &state,
            request(
                "POST",
                &base,
                Some(&token),
                Some(json!({ "perfume_id": 404, "status": "owned" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn review_author_is_token_user_and_edits_are_guarded() {
        let state = test_state();
        let (alice, alice_token) = seed_user(&state, "alice", Role::User);
        let (_, bob_token) = seed_user(&state, "bob", Role::User);
        let p = seed_perfume(&state, "Guerlain", "Shalimar", &[]);

        let (status, review) = send(
            &state,
            request(
                "POST",
                "/api/reviews",
                Some(&alice_token),
                Some(json!({ "perfume_id": p, "rating": 5, "comment": "Envoûtant" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(review["user_id"], alice.id);
        let id = review["id"].as_i64().unwrap();

        let (status, _) = send(
            &state,
            request(
                "PUT",
                &format!("/api/reviews/{id}"),
                Some(&bob_token),
                Some(json!({ "rating": 1 })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, updated) = send(
            &state,
            request(
                "PUT",
                &format!("/api/reviews/{id}"),
                Some(&alice_token),
                Some(json!({ "rating": 4 })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["rating"], 4);

        let (status, list) = send(
            &state,
            request("GET", &format!("/api/reviews/perfume/{p}"), None, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn out_of_range_rating_returns_400() {
        let state = test_state();
        let (_, token) = seed_user(&state, "alice", Role::User);
        let p = seed_perfume(&state, "Guerlain", "Shalimar", &[]);
        let (status, _) = send(
            &state,
            request(
                "POST",
                "/api/reviews",
                Some(&token),
                Some(json!({ "perfume_id": p, "rating": 6, "comment": "Trop" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unique_review_policy_returns_409() {
        let mut state = test_state();
        state.options.review_policy.one_per_user_per_perfume = true;
        let (_, token) = seed_user(&state, "alice", Role::User);
        let p = seed_perfume(&state, "Guerlain", "Shalimar", &[]);
        let body = json!({ "perfume_id": p, "rating": 3, "comment": "Bien" });

        let (status, _) = send(
            &state,
            request("POST", "/api/reviews", Some(&token), Some(body.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send(
            &state,
            request("POST", "/api/reviews", Some(&token), Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let app = build_router(test_state());

        let big_body = vec![b' '; BODY_LIMIT + 1];
        let response = app
            .oneshot(
                axum::http::Request::post("/api/quiz/recommendations")
                    .header("content-type", "application/json")
                    .body(Body::from(big_body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let error = ApiError::Internal(anyhow::anyhow!("secret database path /home/user/.sillage"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
    }

    #[test]
    fn core_errors_map_to_statuses() {
        let cases = [
            (Error::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (Error::CapacityExceeded { limit: 10 }, StatusCode::CONFLICT),
            (
                Error::NotFound {
                    entity: "Perfume",
                    id: 1,
                },
                StatusCode::NOT_FOUND,
            ),
            (Error::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (Error::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (Error::PasswordHash("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }
}
