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

//! credgate forwards bearer-authenticated requests to an internal storage
//! control plane.
//!
//! Each inbound request carries `Authorization: Bearer <token>`. The token is
//! a signed JWT holding temporary storage credentials delegated to the
//! caller. The gateway verifies it, signs an equivalent request with those
//! credentials and sends it upstream through the [`HttpSend`] in its
//! [`Context`].
//!
//! Upstream status and body are passed back untouched. Anything that stops
//! the round trip, from a missing header to a refused connection, yields the
//! same opaque `500` with an empty body.
//!
//! ## Example
//!
//! ```no_run
//! use credgate::Gateway;
//! use credgate_core::{Context, OsEnv};
//! use credgate_http_send_reqwest::ReqwestHttpSend;
//!
//! # fn main() -> credgate_core::Result<()> {
//! let ctx = Context::new()
//!     .with_env(OsEnv)
//!     .with_http_send(ReqwestHttpSend::shared());
//! let gateway = Gateway::from_env(ctx)?;
//! # let _ = gateway;
//! # Ok(())
//! # }
//! ```
//!
//! [`HttpSend`]: credgate_core::HttpSend
//! [`Context`]: credgate_core::Context

#![warn(missing_docs)]

mod claims;
pub use claims::{Claims, ClaimsCodec};

mod config;
pub use config::{Config, UpstreamAuth};

mod credential;
pub use credential::{extract, DelegatedCredentials};

mod forward;
pub use forward::{forward, Forwarder};

mod gateway;
pub use gateway::{Gateway, Outcome, FAILURE_STATUS};

pub use credgate_aws_sign::SignerType;
