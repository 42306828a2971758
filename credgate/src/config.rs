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

use std::str::FromStr;
use std::time::Duration;

use credgate_core::{Context, Error, Result};
use jsonwebtoken::Algorithm;

// Env values used by the gateway.
const CREDGATE_UPSTREAM_ENDPOINT: &str = "CREDGATE_UPSTREAM_ENDPOINT";
const CREDGATE_MOUNT_PREFIX: &str = "CREDGATE_MOUNT_PREFIX";
const CREDGATE_JWT_SECRET: &str = "CREDGATE_JWT_SECRET";
const CREDGATE_JWT_ALGORITHM: &str = "CREDGATE_JWT_ALGORITHM";
const CREDGATE_AUDIENCE: &str = "CREDGATE_AUDIENCE";
const CREDGATE_UPSTREAM_AUTH: &str = "CREDGATE_UPSTREAM_AUTH";
const CREDGATE_REGION: &str = "CREDGATE_REGION";
const CREDGATE_SERVICE: &str = "CREDGATE_SERVICE";
const CREDGATE_UPSTREAM_TIMEOUT_SECS: &str = "CREDGATE_UPSTREAM_TIMEOUT_SECS";

/// How delegated credentials are presented to the upstream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamAuth {
    /// Sign the request with the delegated access key.
    #[default]
    SigV4,
    /// Pass the delegated session token as a bearer token.
    SessionToken,
}

impl FromStr for UpstreamAuth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sigv4" => Ok(UpstreamAuth::SigV4),
            "session-token" => Ok(UpstreamAuth::SessionToken),
            v => Err(Error::config_invalid(format!(
                "upstream auth must be sigv4 or session-token, got {v}"
            ))),
        }
    }
}

/// Config carries all the configuration for the gateway.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the upstream control plane, e.g. `http://localhost:8787`.
    pub upstream_endpoint: String,
    /// Path prefix the gateway is mounted under, stripped before forwarding.
    pub mount_prefix: Option<String>,
    /// Secret used to verify bearer tokens.
    pub jwt_secret: Option<String>,
    /// HMAC algorithm bearer tokens must be signed with.
    pub jwt_algorithm: Algorithm,
    /// Audience bearer tokens must be scoped to.
    pub audience: Option<String>,
    /// How credentials are presented upstream.
    pub upstream_auth: UpstreamAuth,
    /// Region used for request signing.
    pub region: String,
    /// Service name used for request signing.
    pub service: String,
    /// Upper bound for a single upstream round trip.
    pub upstream_timeout: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("upstream_endpoint", &self.upstream_endpoint)
            .field("mount_prefix", &self.mount_prefix)
            .field(
                "jwt_secret",
                &credgate_core::utils::Redact::from(&self.jwt_secret),
            )
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("audience", &self.audience)
            .field("upstream_auth", &self.upstream_auth)
            .field("region", &self.region)
            .field("service", &self.service)
            .field("upstream_timeout", &self.upstream_timeout)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream_endpoint: "http://localhost:8787".to_string(),
            mount_prefix: None,
            jwt_secret: None,
            jwt_algorithm: Algorithm::HS512,
            audience: None,
            upstream_auth: UpstreamAuth::SigV4,
            region: "us-east-1".to_string(),
            service: "s3".to_string(),
            upstream_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Create a new config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the upstream endpoint.
    pub fn with_upstream_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.upstream_endpoint = endpoint.into();
        self
    }

    /// Set the mount prefix.
    pub fn with_mount_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.mount_prefix = Some(prefix.into());
        self
    }

    /// Set the token secret.
    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }

    /// Set the audience.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Set how credentials are presented upstream.
    pub fn with_upstream_auth(mut self, auth: UpstreamAuth) -> Self {
        self.upstream_auth = auth;
        self
    }

    /// Set the upstream timeout.
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    /// Load config from environment variables.
    ///
    /// Values not present in the environment keep their defaults.
    pub fn from_env(ctx: &Context) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = ctx.env_var(CREDGATE_UPSTREAM_ENDPOINT) {
            cfg.upstream_endpoint = v;
        }
        if let Some(v) = ctx.env_var(CREDGATE_MOUNT_PREFIX) {
            cfg.mount_prefix = Some(v);
        }
        if let Some(v) = ctx.env_var(CREDGATE_JWT_SECRET) {
            cfg.jwt_secret = Some(v);
        }
        if let Some(v) = ctx.env_var(CREDGATE_JWT_ALGORITHM) {
            cfg.jwt_algorithm = parse_hmac_algorithm(&v)?;
        }
        if let Some(v) = ctx.env_var(CREDGATE_AUDIENCE) {
            cfg.audience = Some(v);
        }
        if let Some(v) = ctx.env_var(CREDGATE_UPSTREAM_AUTH) {
            cfg.upstream_auth = v.parse()?;
        }
        if let Some(v) = ctx.env_var(CREDGATE_REGION) {
            cfg.region = v;
        }
        if let Some(v) = ctx.env_var(CREDGATE_SERVICE) {
            cfg.service = v;
        }
        if let Some(v) = ctx.env_var(CREDGATE_UPSTREAM_TIMEOUT_SECS) {
            let secs = v.trim().parse::<u64>().map_err(|e| {
                Error::config_invalid(format!("upstream timeout must be seconds, got {v}"))
                    .with_source(e)
            })?;
            if secs == 0 {
                return Err(Error::config_invalid(
                    "upstream timeout must be at least one second",
                ));
            }
            cfg.upstream_timeout = Duration::from_secs(secs);
        }

        Ok(cfg)
    }

    /// The audience tokens are checked against, treating an empty string as unset.
    pub(crate) fn effective_audience(&self) -> Option<&str> {
        self.audience.as_deref().filter(|v| !v.is_empty())
    }
}

/// Only HMAC algorithms are accepted, the gateway holds a shared secret.
fn parse_hmac_algorithm(v: &str) -> Result<Algorithm> {
    let alg = Algorithm::from_str(v.trim()).map_err(|e| {
        Error::config_invalid(format!("unknown jwt algorithm {v}")).with_source(e)
    })?;

    match alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(alg),
        _ => Err(Error::config_invalid(format!(
            "jwt algorithm must be one of HS256, HS384, HS512, got {v}"
        ))),
    }
}
