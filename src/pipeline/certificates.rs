// src/pipeline/certificates.rs

//! Client certificate stage.
//!
//! The first list entry whose patterns match the request URL supplies the
//! key and certificate paths. Both files are read through the file resolver;
//! any failure here is a warning, never a stage failure.

use std::path::{Path, PathBuf};

use crate::collection::ClientCertificate;
use crate::errors::PipelineError;

use super::url_match::UrlPatterns;
use super::{Payload, PipelineReport, Stage, StageContext};

/// One `[[certificate]]` entry.
#[derive(Debug, Clone)]
pub struct CertificateEntry {
    pub patterns: UrlPatterns,
    pub key: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CertificateList {
    entries: Vec<CertificateEntry>,
}

impl CertificateList {
    pub fn new(entries: Vec<CertificateEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, url: &str) -> Option<&CertificateEntry> {
        self.entries.iter().find(|e| e.patterns.matches(url))
    }
}

pub async fn run(
    payload: &mut Payload,
    ctx: &StageContext,
    report: &mut PipelineReport,
) -> Result<(), PipelineError> {
    let url = payload.request(Stage::Certificates)?.url.clone();
    let Some(entry) = ctx.certificates.find(&url) else {
        return Ok(());
    };

    let Some(files) = &ctx.files else {
        report.warn(
            ctx,
            Stage::Certificates,
            format!("certificate configured for {url} but no file resolver is available"),
        );
        return Ok(());
    };

    let mut read = |label: &str, path: &Option<PathBuf>| -> Option<Vec<u8>> {
        let path: &Path = path.as_deref()?;
        match files.read(path) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                report.warn(
                    ctx,
                    Stage::Certificates,
                    format!("unable to read certificate {label} {}: {err:#}", path.display()),
                );
                None
            }
        }
    };

    let key = read("key", &entry.key);
    let cert = read("cert", &entry.cert);
    if key.is_none() && cert.is_none() {
        return Ok(());
    }

    payload.request_mut(Stage::Certificates)?.certificate = Some(ClientCertificate {
        key,
        cert,
        passphrase: entry.passphrase.clone(),
    });
    Ok(())
}
