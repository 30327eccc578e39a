//! Authentication middleware
//!
//! Tokens are issued by the external identity provider; this service only
//! validates them and resolves the current user, role and warehouse.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::error::{ErrorDetail, ErrorResponse};
use crate::AppState;

/// Authenticated user resolved from the identity token
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
    /// Warehouse the user operates from, if the provider assigns one
    pub almacen_id: Option<Uuid>,
}

impl AuthUser {
    /// Check if user has a specific role (case-insensitive)
    pub fn has_role(&self, role: &str) -> bool {
        self.role.eq_ignore_ascii_case(role)
    }
}

/// Authentication middleware that validates bearer tokens
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) => token,
        None => return unauthorized_response("Missing or invalid Authorization header"),
    };

    let claims = match decode_jwt(token, &state.config.auth.jwt_secret) {
        Ok(claims) => claims,
        Err(msg) => return unauthorized_response(&msg),
    };

    let auth_user = match resolve_user(claims, &state.config.auth.default_role) {
        Ok(user) => user,
        Err(msg) => return unauthorized_response(msg),
    };

    tracing::debug!(
        user_id = %auth_user.user_id,
        email = %auth_user.email,
        role = %auth_user.role,
        "Authenticated request"
    );
    request.extensions_mut().insert(auth_user);

    next.run(request).await
}

/// JWT claims structure
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    almacen_id: Option<String>,
    exp: i64,
}

/// Decode and validate JWT token
fn decode_jwt(token: &str, secret: &str) -> Result<Claims, String> {
    use jsonwebtoken::{decode, DecodingKey, Validation};

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| format!("Invalid token: {}", e))
}

/// Turn validated claims into an `AuthUser`, applying the default role
fn resolve_user(claims: Claims, default_role: &str) -> Result<AuthUser, &'static str> {
    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| "Invalid user ID in token")?;

    let almacen_id = match claims.almacen_id.as_deref() {
        Some(raw) => Some(Uuid::parse_str(raw).map_err(|_| "Invalid warehouse ID in token")?),
        None => None,
    };

    let role = claims
        .role
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| default_role.to_string());

    Ok(AuthUser {
        user_id,
        email: claims.email,
        role,
        almacen_id,
    })
}

/// Create unauthorized response
fn unauthorized_response(message: &str) -> Response {
    let error = ErrorResponse {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message_en: message.to_string(),
            message_es: "No autorizado".to_string(),
            field: None,
        },
    };

    (StatusCode::UNAUTHORIZED, Json(error)).into_response()
}

/// Extractor for authenticated user
/// Use this in handlers to get the current user
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| {
                let error = ErrorResponse {
                    error: ErrorDetail {
                        code: "UNAUTHORIZED".to_string(),
                        message_en: "Authentication required".to_string(),
                        message_es: "Debe iniciar sesión".to_string(),
                        field: None,
                    },
                };
                (StatusCode::UNAUTHORIZED, Json(error))
            })
    }
}
