// src/pipeline/variables.rs

//! Variable resolution stage: turn the unresolved item into one whose
//! request text has every known `{{placeholder}}` expanded.
//!
//! Secret variables are held back here and expanded by the secrets stage
//! after the secret resolver has had its say.

use crate::collection::{Auth, Body, Request};
use crate::errors::PipelineError;
use crate::variables::Substitutor;

use super::{Payload, PipelineReport, StageContext};

pub async fn run(
    payload: &mut Payload,
    _ctx: &StageContext,
    _report: &mut PipelineReport,
) -> Result<(), PipelineError> {
    let unresolved = payload.unresolved.as_ref();
    if unresolved.request.is_none() {
        return Err(PipelineError::MissingRequest {
            item: unresolved.label().to_string(),
        });
    }

    let sub = Substitutor::new(&payload.scopes).holding_secrets();

    let mut item = unresolved.clone();
    if let Some(request) = item.request.as_mut() {
        substitute_request(request, &sub);
    }
    let auth = payload.auth.as_ref().map(|auth| substitute_auth(auth, &sub));

    payload.item = Some(item);
    payload.auth = auth;
    Ok(())
}

pub fn substitute_request(request: &mut Request, sub: &Substitutor<'_>) {
    request.method = sub.substitute(&request.method);
    request.url = sub.substitute(&request.url);

    for header in request.headers.iter_mut() {
        header.key = sub.substitute(&header.key);
        header.value = sub.substitute(&header.value);
    }

    match request.body.as_mut() {
        Some(Body::Raw { raw }) => *raw = sub.substitute(raw),
        Some(Body::UrlEncoded { urlencoded }) => {
            for param in urlencoded.iter_mut() {
                param.key = sub.substitute(&param.key);
                param.value = sub.substitute(&param.value);
            }
        }
        Some(Body::FormData { formdata }) => {
            for param in formdata.iter_mut() {
                param.key = sub.substitute(&param.key);
                param.value = sub.substitute(&param.value);
                if let Some(src) = param.src.as_mut() {
                    *src = sub.substitute(src);
                }
            }
        }
        Some(Body::File { file }) => {
            if let Some(src) = file.src.as_mut() {
                *src = sub.substitute(src);
            }
        }
        None => {}
    }

    if let Some(auth) = request.auth.as_mut() {
        *auth = substitute_auth(auth, sub);
    }
    if let Some(proxy) = request.proxy.as_mut() {
        proxy.host = sub.substitute(&proxy.host);
    }
}

pub fn substitute_auth(auth: &Auth, sub: &Substitutor<'_>) -> Auth {
    Auth {
        kind: auth.kind.clone(),
        params: auth
            .params
            .iter()
            .map(|(k, v)| (k.clone(), sub.substitute(v)))
            .collect(),
    }
}
