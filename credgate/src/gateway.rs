// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use credgate_core::utils::Redact;
use credgate_core::{Context, Error, ErrorKind, Result};
use http::header::AUTHORIZATION;
use http::{HeaderMap, Request, Response, StatusCode};
use log::{debug, error, warn};

use crate::forward::{forward, forwarded_headers, Forwarder};
use crate::{extract, ClaimsCodec, Config, DelegatedCredentials};

/// Status returned for every request the gateway could not complete.
pub const FAILURE_STATUS: StatusCode = StatusCode::INTERNAL_SERVER_ERROR;

/// How a single invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Upstream answered, its status is carried here.
    Completed(StatusCode),
    /// The caller was refused before anything was sent upstream.
    Rejected(ErrorKind),
    /// The upstream round trip did not complete.
    UpstreamFailed(ErrorKind),
}

impl Outcome {
    /// Returns true if upstream answered.
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }
}

/// Gateway authenticates bearer requests and forwards them upstream with the
/// credentials they carry.
///
/// Cloning is cheap and clones share the same transport.
///
/// ```no_run
/// use bytes::Bytes;
/// use credgate::{Config, Gateway};
/// use credgate_core::Context;
///
/// # async fn example(ctx: Context) -> credgate_core::Result<()> {
/// let gateway = Gateway::new(ctx, Config::new().with_jwt_secret("secret"))?;
///
/// let req = http::Request::get("/api/v1/buckets")
///     .header("authorization", "Bearer eyJ...")
///     .body(Bytes::new())?;
/// let resp = gateway.handle(req).await;
/// println!("upstream answered {}", resp.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    ctx: Context,
    codec: ClaimsCodec,
    forwarder: Forwarder,
    audience: Option<String>,
    upstream_timeout: Duration,
}

impl Gateway {
    /// Create a gateway from config, using the transport in `ctx`.
    pub fn new(ctx: Context, config: Config) -> Result<Self> {
        let secret = config.jwt_secret.as_deref().unwrap_or_default();
        let codec = ClaimsCodec::new(secret, config.jwt_algorithm)?;
        let forwarder = Forwarder::new(&config)?;
        if config.upstream_timeout.is_zero() {
            return Err(Error::config_invalid("upstream timeout must be positive"));
        }

        debug!("gateway initialized with {config:?}");
        Ok(Self {
            inner: Arc::new(Inner {
                ctx,
                codec,
                forwarder,
                audience: config.effective_audience().map(|v| v.to_string()),
                upstream_timeout: config.upstream_timeout,
            }),
        })
    }

    /// Create a gateway from the environment exposed by `ctx`.
    pub fn from_env(ctx: Context) -> Result<Self> {
        let config = Config::from_env(&ctx)?;
        Self::new(ctx, config)
    }

    /// Handle one inbound request.
    ///
    /// Always yields exactly one response: upstream's status and body when
    /// the round trip completed, [`FAILURE_STATUS`] with an empty body
    /// otherwise.
    pub async fn handle(&self, req: Request<Bytes>) -> Response<Bytes> {
        self.handle_with_outcome(req).await.0
    }

    /// Handle one inbound request and report how it ended.
    pub async fn handle_with_outcome(&self, req: Request<Bytes>) -> (Response<Bytes>, Outcome) {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let outbound = match self.prepare(req).await {
            Ok(outbound) => outbound,
            Err(err) if err.is_rejection() => {
                warn!("rejected {method} {path}: {err}");
                return (failure_response(), Outcome::Rejected(err.kind()));
            }
            Err(err) => {
                error!("failed to build upstream request for {method} {path}: {err:?}");
                return (failure_response(), Outcome::UpstreamFailed(err.kind()));
            }
        };

        match self.send(outbound).await {
            Ok(resp) => {
                debug!("{method} {path} completed with {}", resp.status());
                let status = resp.status();
                (respond(resp), Outcome::Completed(status))
            }
            Err(err) => {
                error!("upstream failed for {method} {path}: {err:?}");
                (failure_response(), Outcome::UpstreamFailed(err.kind()))
            }
        }
    }

    /// Handle one inbound request unless `cancelled` resolves first.
    ///
    /// On cancellation the in-flight upstream call is dropped and the failure
    /// response is returned.
    pub async fn handle_until<F>(&self, req: Request<Bytes>, cancelled: F) -> Response<Bytes>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            (resp, _) = self.handle_with_outcome(req) => resp,
            _ = cancelled => {
                error!("request cancelled before upstream answered");
                failure_response()
            }
        }
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<DelegatedCredentials> {
        let token = bearer_token(headers)?;
        debug!("validating bearer token {:?}", Redact::from(token));

        let claims = self
            .inner
            .codec
            .decode(token, self.inner.audience.as_deref())?;
        let cred = extract(claims)?;
        self.inner.forwarder.check_credential(&cred)?;
        Ok(cred)
    }

    /// Authenticate the caller and build the request sent upstream.
    async fn prepare(&self, req: Request<Bytes>) -> Result<Request<Bytes>> {
        let cred = self.authenticate(req.headers())?;
        self.inner.forwarder.outbound(req, &cred).await
    }

    async fn send(&self, req: Request<Bytes>) -> Result<Response<Bytes>> {
        let timeout = self.inner.upstream_timeout;
        tokio::time::timeout(timeout, forward(&self.inner.ctx, req))
            .await
            .map_err(|e| {
                Error::transport_failure(format!("upstream did not answer within {timeout:?}"))
                    .with_source(e)
            })?
    }
}

/// Read the token from `Authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| Error::invalid_token("authorization header is missing"))?
        .to_str()
        .map_err(|e| {
            Error::invalid_token("authorization header is not visible ascii").with_source(e)
        })?;

    let token = match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
        _ => return Err(Error::invalid_token("authorization header is not a bearer token")),
    };
    if token.is_empty() {
        return Err(Error::invalid_token("bearer token is empty"));
    }

    Ok(token)
}

fn respond(upstream: Response<Bytes>) -> Response<Bytes> {
    let (parts, body) = upstream.into_parts();

    let mut resp = Response::new(body);
    *resp.status_mut() = parts.status;
    *resp.headers_mut() = forwarded_headers(&parts.headers);
    resp
}

fn failure_response() -> Response<Bytes> {
    let mut resp = Response::new(Bytes::new());
    *resp.status_mut() = FAILURE_STATUS;
    resp
}
