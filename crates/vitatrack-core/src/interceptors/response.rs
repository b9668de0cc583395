use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::{InterceptorError, ResponseInterceptor};
use crate::types::ApiResponse;

/// Unwraps paginated `{data, meta}` envelopes and tags object bodies with
/// `success: true`
pub struct EnvelopeInterceptor;

#[async_trait]
impl ResponseInterceptor for EnvelopeInterceptor {
    fn name(&self) -> &str {
        "envelope"
    }

    async fn on_response(&self, response: &mut ApiResponse) -> Result<(), InterceptorError> {
        let Some(Value::Object(map)) = response.body.as_json_mut() else {
            return Ok(());
        };

        if map.contains_key("data") && map.contains_key("meta") {
            let items = map.remove("data").unwrap_or(Value::Null);
            let meta = map.remove("meta").unwrap_or(Value::Null);
            let mut unwrapped = Map::new();
            unwrapped.insert("items".to_string(), items);
            unwrapped.insert("meta".to_string(), meta);
            unwrapped.insert("success".to_string(), Value::Bool(true));
            *map = unwrapped;
        } else if !map.contains_key("success") {
            map.insert("success".to_string(), Value::Bool(true));
        }
        Ok(())
    }
}

pub struct ResponseLoggingInterceptor;

#[async_trait]
impl ResponseInterceptor for ResponseLoggingInterceptor {
    fn name(&self) -> &str {
        "response-logging"
    }

    async fn on_response(&self, response: &mut ApiResponse) -> Result<(), InterceptorError> {
        debug!(
            method = %response.method,
            url = %response.url,
            status = response.status,
            "Response received"
        );
        Ok(())
    }
}
