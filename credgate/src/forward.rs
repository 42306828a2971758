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

//! Build the upstream request and run it through the transport.

use bytes::Bytes;
use credgate_aws_sign::{RequestSigner, SignerType, X_AMZ_CONTENT_SHA_256};
use credgate_core::hash::hex_sha256;
use credgate_core::utils::is_hop_by_hop;
use credgate_core::{Context, Error, Result, SignRequest};
use http::header::{HeaderName, AUTHORIZATION, CONNECTION, COOKIE, HOST};
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{HeaderMap, HeaderValue, Request, Response, Uri};
use log::debug;

use crate::{Config, DelegatedCredentials, UpstreamAuth};

/// Inbound headers that describe the caller rather than the request.
const CALLER_HEADERS: [HeaderName; 3] = [AUTHORIZATION, HOST, COOKIE];

/// Forwarder turns an inbound request into the request sent upstream.
#[derive(Debug)]
pub struct Forwarder {
    scheme: Scheme,
    authority: Authority,
    base_path: String,
    mount_prefix: Option<String>,
    upstream_auth: UpstreamAuth,
    signer: RequestSigner,
}

impl Forwarder {
    /// Create a forwarder from config.
    pub fn new(config: &Config) -> Result<Self> {
        let endpoint: Uri = config.upstream_endpoint.parse().map_err(|e| {
            Error::config_invalid(format!(
                "upstream endpoint {} is not a valid uri",
                config.upstream_endpoint
            ))
            .with_source(e)
        })?;
        let parts = endpoint.into_parts();
        let (Some(scheme), Some(authority)) = (parts.scheme, parts.authority) else {
            return Err(Error::config_invalid(format!(
                "upstream endpoint {} must carry a scheme and a host",
                config.upstream_endpoint
            )));
        };
        let base_path = parts
            .path_and_query
            .map(|v| v.path().trim_end_matches('/').to_string())
            .unwrap_or_default();

        let mount_prefix = config
            .mount_prefix
            .as_deref()
            .map(|v| v.trim_end_matches('/'))
            .filter(|v| !v.is_empty())
            .map(|v| {
                if v.starts_with('/') {
                    v.to_string()
                } else {
                    format!("/{v}")
                }
            });

        Ok(Self {
            scheme,
            authority,
            base_path,
            mount_prefix,
            upstream_auth: config.upstream_auth,
            signer: RequestSigner::new(&config.service, &config.region),
        })
    }

    /// Check that the credential can be presented upstream at all.
    pub fn check_credential(&self, cred: &DelegatedCredentials) -> Result<()> {
        if self.upstream_auth == UpstreamAuth::SessionToken && session_token(cred).is_none() {
            return Err(Error::missing_credentials(
                "token carries no session token to present upstream",
            ));
        }
        Ok(())
    }

    /// Build the outbound request, consuming the inbound one.
    pub async fn outbound(
        &self,
        req: Request<Bytes>,
        cred: &DelegatedCredentials,
    ) -> Result<Request<Bytes>> {
        let (inbound, body) = req.into_parts();

        let mut target = format!(
            "{}{}",
            self.base_path,
            self.strip_mount_prefix(inbound.uri.path())
        );
        if let Some(query) = inbound.uri.query() {
            target.push('?');
            target.push_str(query);
        }

        let mut uri = http::uri::Parts::default();
        uri.scheme = Some(self.scheme.clone());
        uri.authority = Some(self.authority.clone());
        uri.path_and_query = Some(target.parse::<PathAndQuery>()?);

        let mut req = Request::new(());
        *req.method_mut() = inbound.method;
        *req.uri_mut() = Uri::from_parts(uri)?;
        *req.headers_mut() = forwarded_headers(&inbound.headers);
        strip_caller_headers(req.headers_mut());
        let (mut parts, ()) = req.into_parts();

        match self.upstream_auth {
            UpstreamAuth::SigV4 => {
                if matches!(
                    cred.signer_type,
                    SignerType::Default | SignerType::V4 | SignerType::V4Streaming
                ) {
                    parts.headers.insert(
                        X_AMZ_CONTENT_SHA_256,
                        HeaderValue::from_str(&hex_sha256(&body))?,
                    );
                }
                self.signer.sign_request(&mut parts, Some(cred)).await?;
            }
            UpstreamAuth::SessionToken => {
                self.check_credential(cred)?;
                let token = session_token(cred).unwrap_or_default();
                let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
                value.set_sensitive(true);
                parts.headers.insert(AUTHORIZATION, value);
            }
        }

        Ok(Request::from_parts(parts, body))
    }

    fn strip_mount_prefix<'a>(&self, path: &'a str) -> &'a str {
        let Some(prefix) = self.mount_prefix.as_deref() else {
            return path;
        };

        match path.strip_prefix(prefix) {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => path,
        }
    }
}

fn strip_caller_headers(headers: &mut HeaderMap) {
    for name in CALLER_HEADERS.iter() {
        headers.remove(name);
    }
}

fn session_token(cred: &DelegatedCredentials) -> Option<&str> {
    cred.session_token.as_deref().filter(|v| !v.is_empty())
}

/// Copy end-to-end headers, dropping hop-by-hop ones and anything listed in
/// `Connection`.
pub(crate) fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || listed.iter().any(|v| v == name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Send the outbound request through the transport in `ctx`.
///
/// The upstream status is never interpreted: a response is returned as is and
/// a transport error is surfaced unchanged.
pub async fn forward(ctx: &Context, req: Request<Bytes>) -> Result<Response<Bytes>> {
    debug!("forwarding {} {}", req.method(), req.uri());
    ctx.http_send(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use credgate_core::ErrorKind;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn cred(signer_type: SignerType) -> DelegatedCredentials {
        DelegatedCredentials {
            access_key_id: "fakeAccessKeyID".to_string(),
            secret_access_key: "fakeSecretAccessKey".to_string(),
            session_token: Some("fakeSessionToken".to_string()),
            signer_type,
        }
    }

    fn inbound(uri: &str) -> Request<Bytes> {
        Request::builder()
            .method("PUT")
            .uri(uri)
            .header(AUTHORIZATION, "Bearer caller-token")
            .header(HOST, "console.example.com")
            .header(COOKIE, "session=abc")
            .header(CONNECTION, "keep-alive, x-drop-me")
            .header("keep-alive", "timeout=5")
            .header("x-drop-me", "1")
            .header("content-type", "application/json")
            .header("x-request-id", "42")
            .body(Bytes::from_static(b"{\"name\":\"bucket\"}"))
            .unwrap()
    }

    #[test_case(None, "/api/v1/buckets", "/api/v1/buckets" ; "no prefix")]
    #[test_case(Some("/api/v1/mkube"), "/api/v1/mkube/tenants", "/tenants" ; "prefix stripped")]
    #[test_case(Some("/api/v1/mkube/"), "/api/v1/mkube", "/" ; "prefix is whole path")]
    #[test_case(Some("api/v1/mkube"), "/api/v1/mkube/tenants", "/tenants" ; "prefix without leading slash")]
    #[test_case(Some("/api/v1/mkube"), "/api/v1/mkubex/tenants", "/api/v1/mkubex/tenants" ; "partial segment kept")]
    #[test_case(Some("/api/v1/mkube"), "/other", "/other" ; "unrelated path kept")]
    fn test_strip_mount_prefix(prefix: Option<&str>, path: &str, expected: &str) {
        let mut config = Config::new();
        config.mount_prefix = prefix.map(|v| v.to_string());
        let f = Forwarder::new(&config).unwrap();

        assert_eq!(f.strip_mount_prefix(path), expected);
    }

    #[test_case("http://m3:8787", "/tenants?limit=10", "http://m3:8787/tenants?limit=10" ; "plain endpoint")]
    #[test_case("http://m3:8787/", "/tenants", "http://m3:8787/tenants" ; "trailing slash")]
    #[test_case("https://m3.internal/api/", "/tenants", "https://m3.internal/api/tenants" ; "endpoint with base path")]
    #[tokio::test]
    async fn test_outbound_uri(endpoint: &str, path: &str, expected: &str) {
        let config = Config::new()
            .with_upstream_endpoint(endpoint)
            .with_upstream_auth(UpstreamAuth::SessionToken);
        let f = Forwarder::new(&config).unwrap();

        let req = f
            .outbound(inbound(path), &cred(SignerType::Default))
            .await
            .unwrap();
        assert_eq!(req.uri().to_string(), expected);
        assert_eq!(req.method(), http::Method::PUT);
    }

    #[tokio::test]
    async fn test_outbound_headers() {
        let config = Config::new().with_upstream_auth(UpstreamAuth::SessionToken);
        let f = Forwarder::new(&config).unwrap();

        let req = f
            .outbound(inbound("/tenants"), &cred(SignerType::Default))
            .await
            .unwrap();

        let headers = req.headers();
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["x-request-id"], "42");
        assert_eq!(headers[AUTHORIZATION], "Bearer fakeSessionToken");
        assert!(headers.get(HOST).is_none());
        assert!(headers.get(COOKIE).is_none());
        assert!(headers.get(CONNECTION).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("x-drop-me").is_none());
        assert_eq!(req.body().as_ref(), b"{\"name\":\"bucket\"}");
    }

    #[tokio::test]
    async fn test_outbound_session_token_missing() {
        let config = Config::new().with_upstream_auth(UpstreamAuth::SessionToken);
        let f = Forwarder::new(&config).unwrap();

        let mut cred = cred(SignerType::Default);
        cred.session_token = None;

        let err = f.check_credential(&cred).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCredentials);
        let err = f.outbound(inbound("/tenants"), &cred).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCredentials);
    }

    #[tokio::test]
    async fn test_outbound_sigv4() {
        let f = Forwarder::new(&Config::new()).unwrap();

        let req = f
            .outbound(inbound("/tenants"), &cred(SignerType::V4))
            .await
            .unwrap();

        let headers = req.headers();
        let auth = headers[AUTHORIZATION].to_str().unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=fakeAccessKeyID/"));
        assert!(auth.contains("/us-east-1/s3/aws4_request"));
        assert_eq!(
            headers[X_AMZ_CONTENT_SHA_256],
            hex_sha256(b"{\"name\":\"bucket\"}").as_str()
        );
        assert_eq!(headers["x-amz-security-token"], "fakeSessionToken");
        assert_eq!(headers[HOST], "localhost:8787");
    }

    #[test_case(SignerType::V4 ; "sigv4")]
    #[test_case(SignerType::V2 ; "sigv2")]
    #[test_case(SignerType::Anonymous ; "anonymous")]
    #[tokio::test]
    async fn test_outbound_keeps_query(signer_type: SignerType) {
        let f = Forwarder::new(&Config::new()).unwrap();

        let req = f
            .outbound(
                inbound("/tenants?sort=name&sort=date&q=a+b&empty="),
                &cred(signer_type),
            )
            .await
            .unwrap();

        assert_eq!(req.uri().path(), "/tenants");
        assert_eq!(req.uri().query(), Some("sort=name&sort=date&q=a+b&empty="));
    }

    #[tokio::test]
    async fn test_outbound_sigv2() {
        let f = Forwarder::new(&Config::new()).unwrap();

        let req = f
            .outbound(inbound("/tenants"), &cred(SignerType::V2))
            .await
            .unwrap();

        let headers = req.headers();
        let auth = headers[AUTHORIZATION].to_str().unwrap();
        assert!(auth.starts_with("AWS fakeAccessKeyID:"));
        assert!(headers.get(X_AMZ_CONTENT_SHA_256).is_none());
    }

    #[tokio::test]
    async fn test_outbound_anonymous() {
        let f = Forwarder::new(&Config::new()).unwrap();

        let req = f
            .outbound(inbound("/tenants"), &cred(SignerType::Anonymous))
            .await
            .unwrap();

        assert!(req.headers().get(AUTHORIZATION).is_none());
    }

    #[test_case("not a uri" ; "garbage")]
    #[test_case("/relative/path" ; "no authority")]
    fn test_invalid_endpoint(endpoint: &str) {
        let config = Config::new().with_upstream_endpoint(endpoint);
        let err = Forwarder::new(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }
}
