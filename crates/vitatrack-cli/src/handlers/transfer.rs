//! Upload and download command handlers

use super::{build_client, parse_key_value};
use crate::cli::{DownloadArgs, UploadArgs};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::timing::Timer;
use crate::output::OutputWriter;
use anyhow::Context;
use std::path::Path;
use tracing::{info, instrument};
use vitatrack_core::UploadFile;

/// Content type implied by a file extension
pub(crate) fn guess_content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

/// Handle the upload command
#[instrument(skip_all, fields(url = %args.url, file = %args.file.display()))]
pub async fn handle_upload(args: UploadArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    if !args.file.exists() {
        return Err(Error::FileNotFound { path: args.file });
    }

    let fields = args
        .form
        .iter()
        .map(|pair| parse_key_value(pair))
        .collect::<Result<Vec<_>>>()?;
    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let file_name = args
        .file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("upload")
        .to_string();
    let content_type = args
        .content_type
        .clone()
        .unwrap_or_else(|| guess_content_type(&args.file).to_string());

    info!(size = bytes.len(), content_type = %content_type, "Uploading file");
    let client = build_client(config).await?;
    let spinner = output.spinner(&format!("Uploading {}", file_name));
    let result = client
        .upload(&args.url, &args.field, UploadFile::new(file_name, content_type, bytes), &fields)
        .await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let body = result?;
    output.success("✓ Upload complete")?;
    output.data(&body.to_json_value())
}

/// Handle the download command
#[instrument(skip_all, fields(url = %args.url, out = %args.out.display()))]
pub async fn handle_download(args: DownloadArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    if args.out.exists() && !args.force {
        return Err(Error::invalid_args(format!(
            "{} already exists; pass --force to overwrite",
            args.out.display()
        )));
    }

    let timer = Timer::with_details("download", &args.url);
    let client = build_client(config).await?;
    let spinner = output.spinner(&format!("Downloading {}", args.url));
    let result = client.download(&args.url).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let bytes = result?;
    std::fs::write(&args.out, &bytes)
        .with_context(|| format!("Failed to write {}", args.out.display()))?;

    output.success(&format!(
        "✓ Saved {} bytes to {} in {} ms",
        bytes.len(),
        args.out.display(),
        timer.elapsed().as_millis()
    ))
}
