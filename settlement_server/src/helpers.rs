use actix_web::HttpRequest;
use log::debug;

use crate::errors::ServerError;

/// The header an upstream authentication layer uses to tell us who is making the request.
pub const AUTHENTICATED_USER_HEADER: &str = "X-Authenticated-User";

/// Get the id of the user making the request from the [`AUTHENTICATED_USER_HEADER`].
///
/// The value is trusted as-is. A missing, empty or non-ASCII header yields [`ServerError::Unauthenticated`].
pub fn authenticated_user(req: &HttpRequest) -> Result<String, ServerError> {
    let value = req.headers().get(AUTHENTICATED_USER_HEADER).ok_or(ServerError::Unauthenticated)?;
    let user = value.to_str().map_err(|e| {
        debug!("💻️ Could not read the {AUTHENTICATED_USER_HEADER} header. {e}");
        ServerError::Unauthenticated
    })?;
    match user.trim() {
        "" => Err(ServerError::Unauthenticated),
        user => Ok(user.to_string()),
    }
}
