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

//! Reqwest-based transport for credgate.
//!
//! `ReqwestHttpSend` implements [`HttpSend`] on top of a pooled
//! [`reqwest::Client`]. The client is the only state shared between gateway
//! invocations and is safe for concurrent use.
//!
//! ## Process-wide client
//!
//! A process normally owns exactly one client. Install it once at start up
//! with [`init_shared_client`] and hand out [`ReqwestHttpSend::shared`]
//! everywhere else:
//!
//! ```no_run
//! use credgate_core::Context;
//! use credgate_http_send_reqwest::{init_shared_client, ReqwestHttpSend};
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! let client = reqwest::Client::builder()
//!     .pool_max_idle_per_host(32)
//!     .connect_timeout(Duration::from_secs(5))
//!     .build()?;
//! init_shared_client(client)?;
//!
//! let ctx = Context::new().with_http_send(ReqwestHttpSend::shared());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use credgate_core::{Error, HttpSend, Result};
use http_body_util::BodyExt;
use log::debug;
use once_cell::sync::OnceCell;
use reqwest::{Client, Request};

static SHARED_CLIENT: OnceCell<Client> = OnceCell::new();

/// Install the process-wide client.
///
/// Must be called at most once, before the first [`ReqwestHttpSend::shared`].
pub fn init_shared_client(client: Client) -> Result<()> {
    SHARED_CLIENT
        .set(client)
        .map_err(|_| Error::config_invalid("shared http client is already initialized"))
}

/// HttpSend implementation backed by reqwest.
#[derive(Debug, Default, Clone)]
pub struct ReqwestHttpSend {
    client: Client,
}

impl ReqwestHttpSend {
    /// Create a new ReqwestHttpSend with a reqwest::Client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Use the process-wide client.
    ///
    /// Falls back to a default client (and installs it) if
    /// [`init_shared_client`] was never called.
    pub fn shared() -> Self {
        Self {
            client: SHARED_CLIENT.get_or_init(Client::new).clone(),
        }
    }
}

#[async_trait]
impl HttpSend for ReqwestHttpSend {
    async fn http_send(&self, req: http::Request<Bytes>) -> Result<http::Response<Bytes>> {
        let req = Request::try_from(req).map_err(|e| {
            Error::request_invalid("failed to convert request for reqwest").with_source(e)
        })?;
        debug!("sending {} {}", req.method(), req.url());

        let resp: http::Response<_> = self
            .client
            .execute(req)
            .await
            .map_err(|e| Error::transport_failure(e.to_string()).with_source(e))?
            .into();

        let (parts, body) = resp.into_parts();
        let bs = BodyExt::collect(body)
            .await
            .map(|buf| buf.to_bytes())
            .map_err(|e| {
                Error::transport_failure("failed to read response body").with_source(e)
            })?;
        Ok(http::Response::from_parts(parts, bs))
    }
}
