use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::errors::ServiceError;
use crate::handlers::common::{created_response, success_response};
use crate::services::addresses::NewAddress;
use crate::AppState;

/// Creates the router for address-book endpoints
pub fn addresses_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_addresses))
        .route("/", post(create_address))
        .route("/:id", get(get_address))
}

/// List the current user's addresses
#[utoipa::path(
    get,
    path = "/api/v1/addresses",
    responses(
        (status = 200, description = "Addresses, newest first")
    ),
    tag = "Addresses"
)]
pub async fn list_addresses(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let addresses = state.services.addresses.list(user.0).await?;
    Ok(success_response(addresses))
}

/// Add a shipping address
#[utoipa::path(
    post,
    path = "/api/v1/addresses",
    request_body = NewAddress,
    responses(
        (status = 201, description = "Address created", body = crate::entities::address::Model),
        (status = 400, description = "Invalid address", body = crate::errors::ErrorResponse)
    ),
    tag = "Addresses"
)]
pub async fn create_address(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<NewAddress>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let address = state.services.addresses.create(user.0, payload).await?;
    Ok(created_response(address))
}

/// Get one address
#[utoipa::path(
    get,
    path = "/api/v1/addresses/{id}",
    params(("id" = Uuid, Path, description = "Address id")),
    responses(
        (status = 200, description = "Address detail", body = crate::entities::address::Model),
        (status = 403, description = "Address belongs to another user", body = crate::errors::ErrorResponse),
        (status = 404, description = "Address not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Addresses"
)]
pub async fn get_address(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let address = state.services.addresses.get(user.0, id).await?;
    Ok(success_response(address))
}
