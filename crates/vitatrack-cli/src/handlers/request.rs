//! Request command handler

use super::{build_client, parse_key_value};
use crate::cli::RequestArgs;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::timing::Timer;
use crate::output::OutputWriter;
use serde_json::Value;
use tracing::{info, instrument};
use vitatrack_core::{Method, RequestConfig};

/// Turn command-line arguments into a request description
pub(crate) fn build_request(args: &RequestArgs) -> Result<RequestConfig> {
    let method: Method = args
        .method
        .parse()
        .map_err(|e| Error::invalid_args(format!("{}", e)))?;

    let mut request = RequestConfig::new(method, args.url.as_str());

    if let Some(data) = &args.data {
        let body: Value = serde_json::from_str(data)
            .map_err(|e| Error::invalid_args(format!("--data is not valid JSON: {}", e)))?;
        request = request.with_json(body);
    }
    for pair in &args.query {
        let (key, value) = parse_key_value(pair)?;
        request = request.with_query(key, value);
    }
    for pair in &args.params {
        let (name, value) = parse_key_value(pair)?;
        request = request.with_path_param(name, value);
    }
    for pair in &args.headers {
        let (name, value) = parse_key_value(pair)?;
        request = request.with_header(&name, value);
    }
    if args.no_cache {
        request = request.with_cacheable(false);
    }
    if args.queueable {
        request = request.with_offline_queueable(true);
    }
    if args.anonymous {
        request = request.with_requires_auth(false);
    }
    if let Some(timeout) = args.timeout_ms {
        request = request.with_timeout_ms(timeout);
    }

    Ok(request)
}

/// Handle the request command
#[instrument(skip_all, fields(method = %args.method, url = %args.url))]
pub async fn handle_request(args: RequestArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let _timer = Timer::with_details("request", &format!("{} {}", args.method, args.url));
    let request = build_request(&args)?;
    let client = build_client(config).await?;

    let spinner = output.spinner(&format!("{} {}", request.method, request.url));
    let result = if args.retry {
        client.request_with_retry(request).await
    } else {
        client.request(request).await
    };
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let body = result?;
    if body.as_json().and_then(|v| v.get("queued")).and_then(Value::as_bool) == Some(true) {
        info!("Request queued while offline");
        output.warning("Device is offline; the request was queued and will be sent by `vitatrack queue drain`")?;
    }
    output.data(&body.to_json_value())
}
