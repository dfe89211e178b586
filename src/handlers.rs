//! Demo endpoints served by the binary.

use gatehouse::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

/// An account record. `account_id` never leaves the process.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct User {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "Balance")]
    pub balance: f32,
    #[serde(skip)]
    pub account_id: String,
}

/// `POST /echo`: decodes a [`User`] and sends it straight back.
pub async fn echo_user(req: Request) -> Response {
    let user: User = match serde_json::from_slice(req.body()) {
        Ok(user) => user,
        Err(e) => {
            info!(request_id = req.request_id().get(), "rejecting malformed user: {e}");
            return Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .text(format!("invalid user: {e}"));
        }
    };

    info!(user_id = user.id, balance = user.balance, "got some data");
    json(&user)
}

/// `GET /user`: returns a fixed record.
pub async fn fixed_user(req: Request) -> Response {
    let request_id = req.request_id().get();
    for (name, value) in req.headers() {
        info!(request_id, header = %name, value = ?value, "request header");
    }

    let user = User { id: 123, balance: 43.0, account_id: "ABCDEF123".to_owned() };
    info!(request_id, user_id = user.id, account_id = %user.account_id, "serving user");
    json(&user)
}

fn json(user: &User) -> Response {
    match serde_json::to_vec(user) {
        Ok(bytes) => Response::json(bytes),
        Err(_) => Response::status(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
