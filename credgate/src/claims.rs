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

//! Bearer tokens carrying delegated credentials.

use std::fmt::{Debug, Formatter};
use std::time::Duration;

use credgate_aws_sign::{Credential, SignerType};
use credgate_core::time::{format_iso8601, from_unix_seconds, now};
use credgate_core::utils::Redact;
use credgate_core::{Error, Result};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::debug;
use serde::{Deserialize, Serialize};

/// Claims is the verified payload of a bearer token.
///
/// Credential fields default to empty so that a well-formed token without an
/// identity still decodes; it is refused later by
/// [`extract`](crate::extract).
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Delegated access key id.
    #[serde(default)]
    pub access_key_id: String,
    /// Delegated secret access key.
    #[serde(default)]
    pub secret_access_key: String,
    /// Delegated session token, empty for long-lived keys.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_token: String,
    /// How the credential must be applied upstream.
    #[serde(default)]
    pub signer_type: SignerType,
    /// Console actions granted at issuance.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    /// Audience the token is scoped to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Expiry, in unix seconds.
    pub exp: i64,
    /// Issued at, in unix seconds.
    #[serde(default)]
    pub iat: i64,
}

impl Debug for Claims {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Claims")
            .field("access_key_id", &Redact::from(&self.access_key_id))
            .field("secret_access_key", &Redact::from(&self.secret_access_key))
            .field("session_token", &Redact::from(&self.session_token))
            .field("signer_type", &self.signer_type)
            .field("actions", &self.actions)
            .field("aud", &self.aud)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .finish()
    }
}

/// ClaimsCodec issues and verifies bearer tokens with a shared HMAC secret.
#[derive(Clone)]
pub struct ClaimsCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl Debug for ClaimsCodec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimsCodec")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl ClaimsCodec {
    /// Create a codec for the given secret.
    pub fn new(secret: &str, algorithm: Algorithm) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::config_invalid("jwt secret must not be empty"));
        }

        Ok(Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        })
    }

    /// Issue a token for the given credential.
    pub fn encode(
        &self,
        cred: &Credential,
        actions: &[String],
        audience: Option<&str>,
        ttl: Duration,
    ) -> Result<String> {
        let iat = now().timestamp();
        let claims = Claims {
            access_key_id: cred.access_key_id.clone(),
            secret_access_key: cred.secret_access_key.clone(),
            session_token: cred.session_token.clone().unwrap_or_default(),
            signer_type: cred.signer_type,
            actions: actions.to_vec(),
            aud: audience.filter(|v| !v.is_empty()).map(|v| v.to_string()),
            exp: iat.saturating_add(ttl.as_secs().try_into().unwrap_or(i64::MAX)),
            iat,
        };

        jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| Error::unexpected("failed to encode token").with_source(e))
    }

    /// Verify a token and return its claims.
    ///
    /// The audience only has to match when both the token and `audience`
    /// carry one.
    pub fn decode(&self, token: &str, audience: Option<&str>) -> Result<Claims> {
        if token.is_empty() {
            return Err(Error::invalid_token("token is empty"));
        }

        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        // jsonwebtoken refuses tokens without `aud` once an audience is set,
        // so the comparison is done below instead.
        validation.validate_aud = false;

        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                let message = match e.kind() {
                    JwtErrorKind::ExpiredSignature => "token expired",
                    JwtErrorKind::InvalidSignature => "token signature mismatch",
                    JwtErrorKind::InvalidAlgorithm => "token signed with unexpected algorithm",
                    _ => "token is malformed",
                };
                Error::invalid_token(message).with_source(e)
            })?
            .claims;

        let expected = audience.filter(|v| !v.is_empty());
        let actual = claims.aud.as_deref().filter(|v| !v.is_empty());
        if let (Some(expected), Some(actual)) = (expected, actual) {
            if expected != actual {
                return Err(Error::invalid_token(format!(
                    "token audience {actual} does not match {expected}"
                )));
            }
        }

        if let Ok(exp) = from_unix_seconds(claims.exp) {
            debug!("verified token expiring at {}", format_iso8601(exp));
        }
        Ok(claims)
    }
}
