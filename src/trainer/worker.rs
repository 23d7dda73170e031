//! Worker side of the process protocol
//!
//! Reads one JSON [`WorkerRequest`] until end of input, runs it, writes one
//! JSON [`WorkerResponse`]. Logging goes to stderr; stdout carries nothing but
//! the response.

use std::io::{Read, Write};

use tracing::info;

use super::{execute, WorkerRequest};
use crate::Result;

/// Serve a single request.
///
/// Job failures are reported in-band as a `failed` response; only protocol
/// errors (unreadable input, unwritable output) are returned.
///
/// # Errors
///
/// Returns error if the request cannot be read or parsed, or the response
/// cannot be written.
pub fn serve<R: Read, W: Write>(mut reader: R, mut writer: W) -> Result<()> {
    let mut input = Vec::new();
    reader.read_to_end(&mut input)?;
    let request: WorkerRequest = serde_json::from_slice(&input)?;
    let kind = request.kind();
    info!(kind, bytes = input.len(), "worker request received");
    drop(input);

    let response = execute(request);
    serde_json::to_writer(&mut writer, &response)?;
    writer.flush()?;
    info!(kind, response = response.kind(), "worker response written");
    Ok(())
}
