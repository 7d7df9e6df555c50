use actix_web::{body::MessageBody, http::StatusCode, test, test::TestRequest, web::ServiceConfig, App};
use log::debug;
use serde_json::Value;

use crate::helpers::AUTHENTICATED_USER_HEADER;

// A real signing key from the standard local dev node mnemonic. DO NOT re-use it anywhere.
pub const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub async fn get_request<F>(user: &str, path: &str, configure: F) -> (StatusCode, String)
where F: FnOnce(&mut ServiceConfig) {
    let req = with_user(TestRequest::get().uri(path), user);
    call(req, configure).await
}

pub async fn post_request<F>(user: &str, path: &str, body: Option<Value>, configure: F) -> (StatusCode, String)
where F: FnOnce(&mut ServiceConfig) {
    let mut req = with_user(TestRequest::post().uri(path), user);
    if let Some(body) = body {
        req = req.set_json(body);
    }
    call(req, configure).await
}

fn with_user(req: TestRequest, user: &str) -> TestRequest {
    if user.is_empty() {
        req
    } else {
        req.insert_header((AUTHENTICATED_USER_HEADER, user))
    }
}

async fn call<F>(req: TestRequest, configure: F) -> (StatusCode, String)
where F: FnOnce(&mut ServiceConfig) {
    let app = App::new().configure(configure);
    let service = test::init_service(app).await;
    debug!("Making request");
    let res = test::call_service(&service, req.to_request()).await;
    let status = res.status();
    let body = res.into_body().try_into_bytes().map(|b| String::from_utf8_lossy(&b).into_owned()).unwrap_or_default();
    (status, body)
}

pub fn json(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("Response is not JSON ({e}): {body}"))
}
