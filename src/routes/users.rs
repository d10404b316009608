use axum::{
    Json, Router,
    extract::{Path, State, rejection::PathRejection},
    routing::get,
};
use uuid::Uuid;

use crate::{
    error::AppResult,
    middleware::auth::AuthUser,
    models::User,
    response::ApiResponse,
    services::user_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/{user_id}", get(get_user))
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User profile", body = ApiResponse<User>),
        (status = 400, description = "Malformed user ID"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn get_user(
    State(state): State<AppState>,
    user: AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<ApiResponse<User>>> {
    let Path(user_id) = path?;
    let resp = user_service::get_user(&state.pool, &user, user_id).await?;
    Ok(Json(resp))
}
