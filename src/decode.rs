use serde::de::DeserializeOwned;

use crate::{wire::ErrorBody, ApiResponse, Decoded, GuacError, HttpFailure, Result};

/// Passes 2xx responses through and maps everything else to a typed error.
pub fn classify(response: ApiResponse) -> Result<ApiResponse> {
    if response.is_success() {
        return Ok(response);
    }

    let status = response.status;
    let (detail, code) = match serde_json::from_slice::<ErrorBody>(&response.body) {
        Ok(body) => {
            let detail = body
                .detail()
                .map(str::to_owned)
                .unwrap_or_else(|| fallback_detail(&response));
            let code = body.code_string().unwrap_or_else(|| status.to_string());
            (detail, code)
        }
        Err(_) => (fallback_detail(&response), status.to_string()),
    };

    let failure = HttpFailure::new(status, detail)
        .with_code(code)
        .with_response(response);
    Err(error_for_status(status, failure))
}

/// Picks the error variant for a non-success status.
pub fn error_for_status(status: u16, failure: HttpFailure) -> GuacError {
    match status {
        401 => GuacError::Auth(failure),
        403 => GuacError::Permission(failure),
        404 => GuacError::NotFound(failure),
        408 | 429 => GuacError::RateLimit(failure),
        500..=599 => GuacError::Server(failure),
        _ => GuacError::Http(failure),
    }
}

fn fallback_detail(response: &ApiResponse) -> String {
    let text = response.text();
    if text.trim().is_empty() {
        format!("Guacamole API request failed, HTTP {}", response.status)
    } else {
        text
    }
}

/// Decodes a successful response by content type.
pub fn decode(response: &ApiResponse) -> Result<Decoded> {
    if response.status == 204 {
        return Ok(Decoded::NoContent);
    }

    if response.content_type().contains("json") {
        return serde_json::from_slice(&response.body)
            .map(Decoded::Json)
            .map_err(|err| decode_error(response, &err));
    }

    Ok(Decoded::Text(response.text()))
}

/// Deserializes a successful response body into `T`.
///
/// A 204 is decoded as JSON `null`, so `Option<T>` and `()` targets accept it.
pub fn decode_json<T: DeserializeOwned>(response: &ApiResponse) -> Result<T> {
    let result = if response.status == 204 || response.body.is_empty() {
        serde_json::from_value(serde_json::Value::Null)
    } else {
        serde_json::from_slice(&response.body)
    };
    result.map_err(|err| decode_error(response, &err))
}

fn decode_error(response: &ApiResponse, err: &serde_json::Error) -> GuacError {
    GuacError::Decode(
        HttpFailure::new(
            response.status,
            format!("invalid response JSON: {err}; body: {}", response.text()),
        )
        .with_response(response.clone()),
    )
}
