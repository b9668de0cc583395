//! Response body interpretation

use bytes::Bytes;
use serde_json::Value;

use crate::transport::TransportResponse;
use crate::types::{ResponseBody, ResponseType};

fn json_or_text(bytes: &[u8]) -> ResponseBody {
    if bytes.is_empty() {
        return ResponseBody::Json(Value::Null);
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => ResponseBody::Json(value),
        Err(_) => ResponseBody::Text(String::from_utf8_lossy(bytes).into_owned()),
    }
}

async fn parse_multipart(content_type: &str, body: Bytes) -> Option<Vec<(String, String)>> {
    let boundary = multer::parse_boundary(content_type).ok()?;
    let stream = futures::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut fields = Vec::new();
    while let Some(field) = multipart.next_field().await.ok()? {
        let name = field.name().unwrap_or_default().to_string();
        let value = field.text().await.ok()?;
        fields.push((name, value));
    }
    Some(fields)
}

/// Interpret a response body by forced type, then by content type
pub(crate) async fn parse_body(response: TransportResponse, forced: ResponseType) -> ResponseBody {
    let content_type = response.content_type().unwrap_or_default().to_string();
    let body = response.body;

    match forced {
        ResponseType::Json => return json_or_text(&body),
        ResponseType::Text => return ResponseBody::Text(String::from_utf8_lossy(&body).into_owned()),
        ResponseType::Bytes => return ResponseBody::Bytes(body.to_vec()),
        ResponseType::Auto => {}
    }

    if body.is_empty() {
        return ResponseBody::Json(Value::Null);
    }

    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if mime == "application/json" || mime.ends_with("+json") {
        json_or_text(&body)
    } else if mime.starts_with("text/") {
        ResponseBody::Text(String::from_utf8_lossy(&body).into_owned())
    } else if mime == "application/x-www-form-urlencoded" {
        ResponseBody::Form(url::form_urlencoded::parse(&body).into_owned().collect())
    } else if mime == "multipart/form-data" {
        // Boundaries are case-sensitive, so parse from the original header
        match parse_multipart(&content_type, body.clone()).await {
            Some(fields) => ResponseBody::Form(fields),
            None => ResponseBody::Bytes(body.to_vec()),
        }
    } else {
        ResponseBody::Bytes(body.to_vec())
    }
}
