// src/pipeline/files.rs

//! File/body resolution stage.
//!
//! Form-data file parameters and file bodies are loaded through the file
//! resolver. Anything that cannot be loaded is dropped with a warning:
//!
//! - no file resolver configured;
//! - empty or missing `src`;
//! - the source is not a regular file (when the resolver can `stat`);
//! - the source cannot be read.
//!
//! A dropped form-data parameter is removed from the body; a dropped file
//! body leaves the request without a body.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::collection::{Body, FormParamKind};
use crate::errors::PipelineError;
use crate::fs::FileResolver;

use super::{Payload, PipelineReport, Stage, StageContext};

pub async fn run(
    payload: &mut Payload,
    ctx: &StageContext,
    report: &mut PipelineReport,
) -> Result<(), PipelineError> {
    let request = payload.request_mut(Stage::Files)?;

    match request.body.as_mut() {
        Some(Body::FormData { formdata }) => {
            formdata.retain_mut(|param| {
                if param.kind != FormParamKind::File || param.disabled {
                    return true;
                }
                match load(ctx, param.src.as_deref()) {
                    Ok(content) => {
                        param.content = Some(content);
                        true
                    }
                    Err(err) => {
                        report.warn(
                            ctx,
                            Stage::Files,
                            format!("form param '{}': {err:#}", param.key),
                        );
                        false
                    }
                }
            });
        }
        Some(Body::File { file }) => match load(ctx, file.src.as_deref()) {
            Ok(content) => file.content = Some(content),
            Err(err) => {
                report.warn(ctx, Stage::Files, format!("file body: {err:#}"));
                request.body = None;
            }
        },
        _ => {}
    }
    Ok(())
}

fn load(ctx: &StageContext, src: Option<&str>) -> Result<Vec<u8>> {
    let Some(files) = ctx.files.as_deref() else {
        bail!("no file resolver configured, skipping file upload");
    };
    let src = src.map(str::trim).unwrap_or_default();
    if src.is_empty() {
        bail!("missing file source");
    }
    read_regular_file(files, Path::new(src))
}

fn read_regular_file(files: &dyn FileResolver, path: &Path) -> Result<Vec<u8>> {
    if let Some(stat) = files.stat(path) {
        let stat = stat.with_context(|| format!("unable to stat {}", path.display()))?;
        if !stat.is_file {
            bail!("{} is not a regular file", path.display());
        }
    }

    match files.open_read(path) {
        Some(stream) => {
            let mut stream = stream.with_context(|| format!("unable to open {}", path.display()))?;
            let mut content = Vec::new();
            stream
                .read_to_end(&mut content)
                .with_context(|| format!("unable to read {}", path.display()))?;
            Ok(content)
        }
        None => files
            .read(path)
            .with_context(|| format!("unable to read {}", path.display())),
    }
}
