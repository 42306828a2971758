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

use crate::constants::{
    AWS_QUERY_ENCODE_SET, AWS_URI_ENCODE_SET, CONTENT_MD5, V2_SUB_RESOURCES, X_AMZ_CONTENT_SHA_256,
    X_AMZ_DATE, X_AMZ_SECURITY_TOKEN,
};
use crate::{Credential, SignerType};
use async_trait::async_trait;
use credgate_core::hash::{base64_hmac_sha1, hex_hmac_sha256, hex_sha256, hmac_sha256};
use credgate_core::time::{format_date, format_http_date, format_iso8601, now, DateTime};
use credgate_core::{Error, Result, SignRequest, SigningRequest};
use http::request::Parts;
use http::header::HeaderName;
use http::{header, HeaderValue};
use log::debug;
use percent_encoding::{percent_decode_str, utf8_percent_encode};
use std::fmt::Write;

/// RequestSigner applies a delegated [`Credential`] to an outbound request.
///
/// The credential's [`SignerType`] picks the scheme:
///
/// - [Signature Version 4](https://docs.aws.amazon.com/general/latest/gr/signature-version-4.html)
///   for `Default`, `V4` and `V4Streaming`
/// - [Signature Version 2](https://docs.aws.amazon.com/AmazonS3/latest/userguide/RESTAuthentication.html)
///   for `V2`
/// - nothing at all for `Anonymous`
#[derive(Debug)]
pub struct RequestSigner {
    service: String,
    region: String,

    time: Option<DateTime>,
}

impl RequestSigner {
    /// Create a new signer for the given service and region.
    pub fn new(service: &str, region: &str) -> Self {
        Self {
            service: service.into(),
            region: region.into(),

            time: None,
        }
    }

    /// Specify the signing time.
    ///
    /// # Note
    ///
    /// We should always take current time to sign requests.
    /// Only use this function for testing.
    #[cfg(test)]
    pub fn with_time(mut self, time: DateTime) -> Self {
        self.time = Some(time);
        self
    }
}

#[async_trait]
impl SignRequest for RequestSigner {
    type Credential = Credential;

    async fn sign_request(
        &self,
        req: &mut Parts,
        credential: Option<&Self::Credential>,
    ) -> Result<()> {
        let Some(cred) = credential else {
            return Ok(());
        };

        let now = self.time.unwrap_or_else(now);
        match cred.signer_type {
            SignerType::Anonymous => {
                debug!("signer type is anonymous, request left unsigned");
                Ok(())
            }
            SignerType::V2 => {
                let mut signed_req = SigningRequest::build(req)?;
                sign_v2(&mut signed_req, cred, now)?;
                signed_req.apply(req)
            }
            SignerType::Default | SignerType::V4 | SignerType::V4Streaming => {
                let mut signed_req = SigningRequest::build(req)?;
                sign_v4(&mut signed_req, cred, now, &self.service, &self.region)?;
                signed_req.apply(req)
            }
        }
    }
}

fn sign_v4(
    signed_req: &mut SigningRequest,
    cred: &Credential,
    now: DateTime,
    service: &str,
    region: &str,
) -> Result<()> {
    canonicalize_header(signed_req, cred, now)?;

    // build canonical request and string to sign.
    let creq = canonical_request_string(signed_req)?;
    let encoded_req = hex_sha256(creq.as_bytes());

    // Scope: "20220313/<region>/<service>/aws4_request"
    let scope = format!("{}/{}/{}/aws4_request", format_date(now), region, service);
    debug!("calculated scope: {scope}");

    // StringToSign:
    //
    // AWS4-HMAC-SHA256
    // 20220313T072004Z
    // 20220313/<region>/<service>/aws4_request
    // <hashed_canonical_request>
    let string_to_sign = {
        let mut f = String::new();
        writeln!(f, "AWS4-HMAC-SHA256")?;
        writeln!(f, "{}", format_iso8601(now))?;
        writeln!(f, "{}", &scope)?;
        write!(f, "{}", &encoded_req)?;
        f
    };
    debug!("calculated string to sign: {string_to_sign}");

    let signing_key = generate_signing_key(&cred.secret_access_key, now, region, service);
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    let mut authorization = HeaderValue::from_str(&format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        cred.access_key_id,
        scope,
        signed_req.header_name_to_vec_sorted().join(";"),
        signature
    ))?;
    authorization.set_sensitive(true);

    signed_req
        .headers
        .insert(header::AUTHORIZATION, authorization);

    Ok(())
}

fn canonical_request_string(ctx: &SigningRequest) -> Result<String> {
    // 256 is specially chosen to avoid reallocation for most requests.
    let mut f = String::with_capacity(256);

    // Insert method
    writeln!(f, "{}", ctx.method)?;
    // Insert encoded path
    let path = percent_decode_str(&ctx.path)
        .decode_utf8()
        .map_err(|e| Error::request_invalid("failed to decode path").with_source(e))?;
    writeln!(f, "{}", utf8_percent_encode(&path, &AWS_URI_ENCODE_SET))?;
    // Insert query
    writeln!(f, "{}", canonical_query(&ctx.query))?;
    // Insert signed headers
    let signed_headers = ctx.header_name_to_vec_sorted();
    for header in signed_headers.iter() {
        let value = ctx.header_value_joined(*header)?;
        writeln!(f, "{header}:{value}")?;
    }
    writeln!(f)?;
    writeln!(f, "{}", signed_headers.join(";"))?;

    match ctx.headers.get(X_AMZ_CONTENT_SHA_256) {
        Some(v) => write!(f, "{}", v.to_str()?)?,
        None => write!(f, "UNSIGNED-PAYLOAD")?,
    }

    Ok(f)
}

fn canonicalize_header(ctx: &mut SigningRequest, cred: &Credential, now: DateTime) -> Result<()> {
    // Header names and values need to be normalized according to Step 4 of https://docs.aws.amazon.com/general/latest/gr/sigv4-create-canonical-request.html
    for (_, value) in ctx.headers.iter_mut() {
        SigningRequest::header_value_normalize(value)
    }

    // Insert HOST header if not present.
    if ctx.headers.get(header::HOST).is_none() {
        ctx.headers
            .insert(header::HOST, ctx.authority.as_str().parse()?);
    }

    // Insert DATE header if not present.
    if ctx.headers.get(X_AMZ_DATE).is_none() {
        ctx.headers
            .insert(X_AMZ_DATE, HeaderValue::try_from(format_iso8601(now))?);
    }

    // Insert X_AMZ_CONTENT_SHA_256 header if not present.
    if ctx.headers.get(X_AMZ_CONTENT_SHA_256).is_none() {
        ctx.headers.insert(
            X_AMZ_CONTENT_SHA_256,
            HeaderValue::from_static("UNSIGNED-PAYLOAD"),
        );
    }

    // Insert X_AMZ_SECURITY_TOKEN header if security token exists.
    if let Some(token) = &cred.session_token {
        let mut value = HeaderValue::from_str(token)?;
        // Set token value sensitive to valid leaking.
        value.set_sensitive(true);

        ctx.headers.insert(X_AMZ_SECURITY_TOKEN, value);
    }

    Ok(())
}

/// Encode then sort the query pairs, leaving the request's own query alone.
fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs = query
        .iter()
        .map(|(k, v)| {
            (
                utf8_percent_encode(k, &AWS_QUERY_ENCODE_SET).to_string(),
                utf8_percent_encode(v, &AWS_QUERY_ENCODE_SET).to_string(),
            )
        })
        .collect::<Vec<_>>();
    pairs.sort();

    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn generate_signing_key(secret: &str, time: DateTime, region: &str, service: &str) -> Vec<u8> {
    // Sign secret
    let secret = format!("AWS4{secret}");
    // Sign date
    let sign_date = hmac_sha256(secret.as_bytes(), format_date(time).as_bytes());
    // Sign region
    let sign_region = hmac_sha256(sign_date.as_slice(), region.as_bytes());
    // Sign service
    let sign_service = hmac_sha256(sign_region.as_slice(), service.as_bytes());
    // Sign request
    hmac_sha256(sign_service.as_slice(), "aws4_request".as_bytes())
}

fn sign_v2(ctx: &mut SigningRequest, cred: &Credential, now: DateTime) -> Result<()> {
    if let Some(token) = &cred.session_token {
        let mut value = HeaderValue::from_str(token)?;
        value.set_sensitive(true);
        ctx.headers.insert(X_AMZ_SECURITY_TOKEN, value);
    }

    // Date is replaced by x-amz-date in the string to sign when present.
    let date = if ctx.headers.contains_key(X_AMZ_DATE) {
        String::new()
    } else {
        if !ctx.headers.contains_key(header::DATE) {
            ctx.headers
                .insert(header::DATE, HeaderValue::try_from(format_http_date(now))?);
        }
        ctx.header_get_or_default(&header::DATE)?.to_string()
    };

    // StringToSign:
    //
    // GET
    // <content-md5>
    // <content-type>
    // Tue, 01 Mar 2022 08:12:34 GMT
    // x-amz-meta-a:1
    // /bucket/object?acl
    let string_to_sign = {
        let mut f = String::new();
        writeln!(f, "{}", ctx.method)?;
        writeln!(
            f,
            "{}",
            ctx.header_get_or_default(&HeaderName::from_static(CONTENT_MD5))?
        )?;
        writeln!(f, "{}", ctx.header_get_or_default(&header::CONTENT_TYPE)?)?;
        writeln!(f, "{date}")?;
        let amz_headers = ctx.header_to_vec_with_prefix("x-amz-")?;
        if !amz_headers.is_empty() {
            writeln!(f, "{}", SigningRequest::header_to_string(amz_headers, ":", "\n"))?;
        }
        write!(f, "{}", canonicalized_resource_v2(ctx))?;
        f
    };
    debug!("calculated string to sign: {string_to_sign}");

    let signature = base64_hmac_sha1(cred.secret_access_key.as_bytes(), string_to_sign.as_bytes());

    let mut authorization =
        HeaderValue::from_str(&format!("AWS {}:{}", cred.access_key_id, signature))?;
    authorization.set_sensitive(true);
    ctx.headers.insert(header::AUTHORIZATION, authorization);

    Ok(())
}

fn canonicalized_resource_v2(ctx: &SigningRequest) -> String {
    let mut sub_resources = ctx
        .query
        .iter()
        .filter(|(k, _)| V2_SUB_RESOURCES.contains(&k.as_str()))
        .collect::<Vec<_>>();
    sub_resources.sort();

    let mut s = ctx.path.clone();
    for (idx, (k, v)) in sub_resources.into_iter().enumerate() {
        s.push(if idx == 0 { '?' } else { '&' });
        s.push_str(k);
        if !v.is_empty() {
            s.push('=');
            s.push_str(v);
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use anyhow::Result;
    use aws_credential_types::Credentials;
    use aws_sigv4::http_request::PayloadChecksumKind;
    use aws_sigv4::http_request::PercentEncodingMode;
    use aws_sigv4::http_request::SignableBody;
    use aws_sigv4::http_request::SignableRequest;
    use aws_sigv4::http_request::SigningSettings;
    use aws_sigv4::sign::v4;
    use chrono::TimeZone;
    use http::Request;
    use pretty_assertions::assert_eq;

    /// (name, request_builder)
    type TestCase = (&'static str, fn() -> Request<&'static str>);

    fn test_cases() -> Vec<TestCase> {
        vec![
            ("get_request", test_get_request),
            ("get_request_with_query", test_get_request_with_query),
            (
                "put_request_with_body_digest",
                test_put_request_with_body_digest,
            ),
            (
                "get_request_with_repeated_header",
                test_get_request_with_repeated_header,
            ),
        ]
    }

    fn test_get_request_with_repeated_header() -> Request<&'static str> {
        let mut req = Request::new("");
        *req.method_mut() = http::Method::GET;
        *req.uri_mut() = "http://127.0.0.1:8787/api/v1/clusters"
            .parse()
            .expect("url must be valid");

        req.headers_mut()
            .append("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        req.headers_mut()
            .append("x-forwarded-for", HeaderValue::from_static("10.0.0.2"));

        req
    }

    fn test_get_request() -> Request<&'static str> {
        let mut req = Request::new("");
        *req.method_mut() = http::Method::GET;
        *req.uri_mut() = "http://127.0.0.1:8787/api/v1/clusters"
            .parse()
            .expect("url must be valid");

        req
    }

    fn test_get_request_with_query() -> Request<&'static str> {
        let mut req = Request::new("");
        *req.method_mut() = http::Method::GET;
        *req.uri_mut() = "http://127.0.0.1:8787/api/v1/clusters?limit=10&offset=0&filter=name/a"
            .parse()
            .expect("url must be valid");

        req
    }

    fn test_put_request_with_body_digest() -> Request<&'static str> {
        let content = r#"{"name":"cluster-1"}"#;
        let mut req = Request::new(content);
        *req.method_mut() = http::Method::PUT;
        *req.uri_mut() = "http://127.0.0.1:8787/api/v1/clusters"
            .parse()
            .expect("url must be valid");

        req.headers_mut().insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&content.len().to_string()).expect("must be valid"),
        );
        req.headers_mut().insert(
            X_AMZ_CONTENT_SHA_256,
            HeaderValue::from_str(&hex_sha256(content.as_bytes())).expect("must be valid"),
        );

        req
    }

    #[track_caller]
    fn compare_request(name: &str, l: &Request<&str>, r: &Request<&str>) {
        fn format_headers(req: &Request<&str>) -> Vec<String> {
            let mut hs = req
                .headers()
                .iter()
                .map(|(k, v)| format!("{}:{}", k, v.to_str().expect("must be valid")))
                .collect::<Vec<_>>();

            // Insert host if original request doesn't have it.
            if !hs.contains(&format!("host:{}", req.uri().authority().unwrap())) {
                hs.push(format!("host:{}", req.uri().authority().unwrap()))
            }

            hs.sort();
            hs
        }

        assert_eq!(
            format_headers(l),
            format_headers(r),
            "{name} header mismatch"
        );

        fn format_query(req: &Request<&str>) -> Vec<String> {
            let query = req.uri().query().unwrap_or_default();
            let mut query = form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| format!("{}={}", &k, &v))
                .collect::<Vec<_>>();
            query.sort();
            query
        }

        assert_eq!(format_query(l), format_query(r), "{name} query mismatch");
    }

    async fn calculate(
        req_fn: fn() -> Request<&'static str>,
        session_token: Option<&str>,
    ) -> Result<()> {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut req = req_fn();
        let name = format!(
            "{} {} {:?} token={}",
            req.method(),
            req.uri().path(),
            req.uri().query(),
            session_token.is_some(),
        );
        let now = now();

        let mut ss = SigningSettings::default();
        ss.percent_encoding_mode = PercentEncodingMode::Double;
        ss.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;
        let id = Credentials::new(
            "access_key_id",
            "secret_access_key",
            session_token.map(|v| v.to_string()),
            None,
            "hardcoded-credentials",
        )
        .into();
        let sp = v4::SigningParams::builder()
            .identity(&id)
            .region("test")
            .name("s3")
            .time(SystemTime::from(now))
            .settings(ss)
            .build()
            .expect("signing params must be valid");

        let mut body = SignableBody::UnsignedPayload;
        if req.headers().get(X_AMZ_CONTENT_SHA_256).is_some() {
            body = SignableBody::Bytes(req.body().as_bytes());
        }

        let output = aws_sigv4::http_request::sign(
            SignableRequest::new(
                req.method().as_str(),
                req.uri().to_string(),
                req.headers()
                    .iter()
                    .map(|(k, v)| (k.as_str(), std::str::from_utf8(v.as_bytes()).unwrap())),
                body,
            )
            .unwrap(),
            &sp.into(),
        )?;
        let (aws_sig, _) = output.into_parts();
        aws_sig.apply_to_request_http1x(&mut req);
        let expected_req = req;

        let req = req_fn();
        let (mut parts, body) = req.into_parts();

        let cred = Credential {
            access_key_id: "access_key_id".to_string(),
            secret_access_key: "secret_access_key".to_string(),
            session_token: session_token.map(|v| v.to_string()),
            signer_type: SignerType::Default,
        };

        let signer = RequestSigner::new("s3", "test").with_time(now);
        signer
            .sign_request(&mut parts, Some(&cred))
            .await
            .expect("must apply success");

        let actual_req = Request::from_parts(parts, body);

        compare_request(&name, &expected_req, &actual_req);

        Ok(())
    }

    #[tokio::test]
    async fn test_v4_matches_aws_sigv4() -> Result<()> {
        for (name, req) in test_cases() {
            calculate(req, None)
                .await
                .unwrap_or_else(|err| panic!("calculate {name} should pass: {err:?}"));
            calculate(req, Some("security_token"))
                .await
                .unwrap_or_else(|err| panic!("calculate {name} with token should pass: {err:?}"));
        }
        Ok(())
    }

    fn fixed_time() -> DateTime {
        chrono::Utc
            .with_ymd_and_hms(2022, 3, 1, 8, 12, 34)
            .unwrap()
    }

    fn v2_credential(session_token: Option<&str>) -> Credential {
        Credential {
            access_key_id: "fakeAccessKeyID".to_string(),
            secret_access_key: "fakeSecretAccessKey".to_string(),
            session_token: session_token.map(|v| v.to_string()),
            signer_type: SignerType::V2,
        }
    }

    #[tokio::test]
    async fn test_v2_with_sub_resource() -> Result<()> {
        let (mut parts, _) = Request::builder()
            .method(http::Method::GET)
            .uri("http://127.0.0.1:9000/bucket/object?acl&prefix=a")
            .header(header::CONTENT_TYPE, "text/plain")
            .header("x-amz-meta-b", "2")
            .header("x-amz-meta-a", "1")
            .body(())?
            .into_parts();

        RequestSigner::new("s3", "us-east-1")
            .with_time(fixed_time())
            .sign_request(&mut parts, Some(&v2_credential(None)))
            .await?;

        assert_eq!(
            parts.headers[header::AUTHORIZATION],
            "AWS fakeAccessKeyID:aQLvhpKy9vmNS0ihvcnEfK+x9AA="
        );
        assert_eq!(parts.headers[header::DATE], "Tue, 01 Mar 2022 08:12:34 GMT");
        assert_eq!(
            parts.uri.to_string(),
            "http://127.0.0.1:9000/bucket/object?acl&prefix=a"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_v4_keeps_query_as_sent() -> Result<()> {
        let (mut parts, _) = Request::builder()
            .method(http::Method::GET)
            .uri("http://127.0.0.1:8787/tenants?sort=name&sort=date&q=a+b&empty=")
            .body(())?
            .into_parts();

        let cred = Credential {
            signer_type: SignerType::V4,
            ..v2_credential(None)
        };
        RequestSigner::new("s3", "us-east-1")
            .with_time(fixed_time())
            .sign_request(&mut parts, Some(&cred))
            .await?;

        assert!(parts.headers.contains_key(header::AUTHORIZATION));
        assert_eq!(
            parts.uri.query(),
            Some("sort=name&sort=date&q=a+b&empty=")
        );
        Ok(())
    }

    #[test]
    fn test_canonical_query() {
        let query = vec![
            ("sort".to_string(), "name".to_string()),
            ("sort".to_string(), "date".to_string()),
            ("q".to_string(), "a b".to_string()),
            ("empty".to_string(), String::new()),
        ];

        assert_eq!(
            canonical_query(&query),
            "empty=&q=a%20b&sort=date&sort=name"
        );
    }

    #[tokio::test]
    async fn test_v2_with_content_md5() -> Result<()> {
        let (mut parts, _) = Request::builder()
            .method(http::Method::PUT)
            .uri("http://127.0.0.1:9000/bucket/object")
            .header(CONTENT_MD5, "1B2M2Y8AsgTpgAmY7PhCfg==")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(())?
            .into_parts();

        RequestSigner::new("s3", "us-east-1")
            .with_time(fixed_time())
            .sign_request(&mut parts, Some(&v2_credential(None)))
            .await?;

        assert_eq!(
            parts.headers[header::AUTHORIZATION],
            "AWS fakeAccessKeyID:zOUyg+P2jTurVxHUKYIJSdTCLLo="
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_v2_with_repeated_amz_header() -> Result<()> {
        let (mut parts, _) = Request::builder()
            .method(http::Method::GET)
            .uri("http://127.0.0.1:9000/bucket/object")
            .header("x-amz-meta-a", "1")
            .header("x-amz-meta-a", "3")
            .body(())?
            .into_parts();

        RequestSigner::new("s3", "us-east-1")
            .with_time(fixed_time())
            .sign_request(&mut parts, Some(&v2_credential(None)))
            .await?;

        assert_eq!(
            parts.headers[header::AUTHORIZATION],
            "AWS fakeAccessKeyID:29nclVLLRjIKreO4tnJb807YztI="
        );
        assert_eq!(parts.headers.get_all("x-amz-meta-a").iter().count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_v2_with_session_token() -> Result<()> {
        let (mut parts, _) = Request::builder()
            .method(http::Method::PUT)
            .uri("http://127.0.0.1:9000/bucket/object")
            .body(())?
            .into_parts();

        RequestSigner::new("s3", "us-east-1")
            .with_time(fixed_time())
            .sign_request(&mut parts, Some(&v2_credential(Some("fakeSessionToken"))))
            .await?;

        assert_eq!(
            parts.headers[header::AUTHORIZATION],
            "AWS fakeAccessKeyID:WeiJPcF66bVwsvRC2FOpXwnXWtc="
        );
        assert_eq!(parts.headers[X_AMZ_SECURITY_TOKEN], "fakeSessionToken");
        Ok(())
    }

    #[tokio::test]
    async fn test_anonymous_is_left_unsigned() -> Result<()> {
        let (mut parts, _) = Request::builder()
            .method(http::Method::GET)
            .uri("http://127.0.0.1:9000/bucket/object")
            .body(())?
            .into_parts();

        let cred = Credential {
            signer_type: SignerType::Anonymous,
            ..v2_credential(None)
        };
        RequestSigner::new("s3", "us-east-1")
            .sign_request(&mut parts, Some(&cred))
            .await?;

        assert!(parts.headers.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_no_credential_is_left_unsigned() -> Result<()> {
        let (mut parts, _) = Request::builder()
            .method(http::Method::GET)
            .uri("http://127.0.0.1:9000/bucket/object")
            .body(())?
            .into_parts();

        RequestSigner::new("s3", "us-east-1")
            .sign_request(&mut parts, None)
            .await?;

        assert!(parts.headers.is_empty());
        Ok(())
    }
}
