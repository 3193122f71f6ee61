/// Authentication Routes
///
/// Thin HTTP adapters over `TokenAuthority`. All session semantics live in
/// the authority; handlers only parse input and shape responses.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{require_role, AccessClaims, Registration, Role, TokenAuthority};
use crate::error::{AppError, ErrorContext};
use crate::middleware::bearer_token;

/// User registration request
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Refresh and logout request
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// POST /auth/register
///
/// Creates a credential with role `user`. Does not log the user in.
///
/// # Errors
/// - 400: Invalid email, name, or password
/// - 409: Email already registered
pub async fn register(
    form: web::Json<RegisterRequest>,
    authority: web::Data<TokenAuthority>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_registration");
    let form = form.into_inner();

    let user = authority
        .register(Registration {
            email: form.email,
            password: form.password,
            name: form.name,
        })
        .await?;

    tracing::info!(request_id = %context.request_id, user_id = %user.id, "Registration accepted");
    Ok(HttpResponse::Created().json(user))
}

/// POST /auth/login
///
/// # Errors
/// - 401: Unknown email or wrong password, indistinguishably
pub async fn login(
    form: web::Json<LoginRequest>,
    authority: web::Data<TokenAuthority>,
) -> Result<HttpResponse, AppError> {
    let result = authority.login(&form.email, &form.password).await?;
    Ok(HttpResponse::Ok().json(result))
}

/// POST /auth/refresh
///
/// Rotates the presented refresh token.
///
/// # Errors
/// - 401: Invalid refresh token or revoked family
/// - 403: Reuse detected, inside or outside the grace window
/// - 503: Backing store unavailable
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    authority: web::Data<TokenAuthority>,
) -> Result<HttpResponse, AppError> {
    let tokens = authority.refresh(&form.refresh_token).await?;
    Ok(HttpResponse::Ok().json(tokens))
}

/// POST /auth/logout
///
/// Deletes the refresh token's family and blacklists the bearer access
/// token, if one is sent. Repeating a logout still answers 204.
pub async fn logout(
    req: HttpRequest,
    form: web::Json<RefreshRequest>,
    authority: web::Data<TokenAuthority>,
) -> Result<HttpResponse, AppError> {
    let access_token = bearer_token(req.headers());
    authority
        .logout(&form.refresh_token, access_token.as_deref())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// GET /api/me
///
/// Claims are injected by `AuthMiddleware`.
pub async fn get_current_user(
    claims: web::ReqData<AccessClaims>,
    authority: web::Data<TokenAuthority>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;
    let user = authority.profile(user_id).await?;
    Ok(HttpResponse::Ok().json(user))
}

/// DELETE /api/admin/families/{family_id}
///
/// Kills one session lineage. Admin only; idempotent.
pub async fn revoke_family(
    claims: web::ReqData<AccessClaims>,
    path: web::Path<Uuid>,
    authority: web::Data<TokenAuthority>,
) -> Result<HttpResponse, AppError> {
    require_role(&claims, Role::Admin)?;

    let context = ErrorContext::new("family_revocation").with_user_id(claims.sub.clone());
    let family_id = path.into_inner();
    let removed = authority.revoke_family(family_id).await?;

    tracing::info!(
        request_id = %context.request_id,
        admin_id = ?context.user_id,
        family_id = %family_id,
        removed,
        "Administrative family revocation"
    );
    Ok(HttpResponse::NoContent().finish())
}
