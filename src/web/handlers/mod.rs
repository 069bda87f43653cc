pub mod admin;
pub mod payments;
pub mod system;
pub mod webhook;

use actix_web::HttpRequest;

/// The x-api-key header, when present and valid UTF-8.
pub fn api_key(req: &HttpRequest) -> Option<&str> {
    req.headers().get("x-api-key")?.to_str().ok()
}
