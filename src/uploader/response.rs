use serde_json::Value;

use crate::errors::{AppError, AppResult};

/// Extract the uploaded file ids from a `{"uploaded": [{"id": ...}, ...]}` body.
///
/// The first entry must carry a string `id`; later entries without one are skipped.
pub fn parse_upload_response(body: &str) -> AppResult<Vec<String>> {
    log::debug!(
        "Upload response (first 300 chars): {}",
        body.chars().take(300).collect::<String>()
    );

    let json: Value = serde_json::from_str(body)
        .map_err(|e| AppError::malformed_response(&format!("body is not valid JSON: {}", e)))?;

    let uploaded = json
        .get("uploaded")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::malformed_response("missing 'uploaded' array"))?;

    let first_id = uploaded
        .first()
        .ok_or_else(|| AppError::malformed_response("'uploaded' array is empty"))?
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::malformed_response("first uploaded file has no 'id'"))?;

    let mut ids = vec![first_id.to_string()];
    ids.extend(
        uploaded
            .iter()
            .skip(1)
            .filter_map(|file| file.get("id").and_then(Value::as_str))
            .map(str::to_string),
    );

    if let Some(unsuccessful) = json.get("unsuccessful").and_then(Value::as_array) {
        if !unsuccessful.is_empty() {
            log::warn!("Service reported {} unsuccessful file(s)", unsuccessful.len());
        }
    }

    log::info!("Content uploaded with ID: {}", first_id);
    Ok(ids)
}
