//! Response classification.
//!
//! Turns a raw status and body into what the dispatcher should do next.

use serde_json::Value;

use crate::{AuthFailure, HttpError, HttpResponse, ServerError};

/// What to do with a response.
#[derive(Debug)]
pub enum Outcome {
    /// 200. `session_token` is set when the body carries a `unicorn`.
    Success {
        body: Value,
        session_token: Option<String>,
    },
    /// The backend is overloaded: requeue after a delay.
    Overloaded,
    /// Any other failure. See [`HttpError::is_queue_fatal`].
    Failed(HttpError),
}

fn parse_body(body: &str) -> Result<Value, serde_json::Error> {
    if body.trim().is_empty() {
        Ok(Value::Null)
    } else {
        serde_json::from_str(body)
    }
}

/// Classifies one response.
pub fn classify(response: &HttpResponse) -> Outcome {
    let parsed = parse_body(&response.body);

    if response.status == 200 {
        return match parsed {
            Ok(body) => {
                let session_token = body
                    .get("unicorn")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                Outcome::Success {
                    body,
                    session_token,
                }
            }
            Err(e) => Outcome::Failed(HttpError::Decode(e)),
        };
    }

    let index = parsed
        .as_ref()
        .ok()
        .and_then(|body| body.get("index"))
        .and_then(Value::as_i64);

    if response.status == 401 {
        return Outcome::Failed(HttpError::Unauthorized(AuthFailure::from_index(index)));
    }

    match index.map(ServerError::from_index) {
        Some(ServerError::Overloaded) => Outcome::Overloaded,
        Some(server) => Outcome::Failed(HttpError::Server(server)),
        None => Outcome::Failed(HttpError::Logic {
            status: response.status,
            body: response.body.clone(),
        }),
    }
}
