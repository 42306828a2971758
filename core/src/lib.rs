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

//! Core components for the credgate forwarding gateway.
//!
//! This crate holds the pieces every other credgate crate builds on: the
//! error taxonomy, the transport seam and the signing traits.
//!
//! ## Overview
//!
//! - **Context**: A container that holds implementations for HTTP sending and environment access
//! - **HttpSend**: The capability that turns a request into a response or an error
//! - **SignRequest**: Applies delegated credentials to an outbound request
//! - **Error**: Keeps token rejections apart from transport failures for logging
//!
//! ## Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use credgate_core::{Context, HttpSend, Result};
//!
//! #[derive(Debug)]
//! struct AlwaysOk;
//!
//! #[async_trait]
//! impl HttpSend for AlwaysOk {
//!     async fn http_send(&self, _: http::Request<Bytes>) -> Result<http::Response<Bytes>> {
//!         Ok(http::Response::new(Bytes::from_static(b"OK")))
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let ctx = Context::new().with_http_send(AlwaysOk);
//! let resp = ctx.http_send(http::Request::new(Bytes::new())).await?;
//! assert_eq!(resp.body().as_ref(), b"OK");
//! # Ok(())
//! # }
//! ```
//!
//! ## Utilities
//!
//! - [`hash`]: Cryptographic hashing utilities
//! - [`time`]: Time manipulation utilities
//! - [`utils`]: Redaction and header helpers

// Make sure all our public APIs have docs.
#![warn(missing_docs)]

pub mod hash;
pub mod time;
pub mod utils;

mod context;
pub use context::Context;
pub use context::Env;
pub use context::HttpSend;
pub use context::NoopEnv;
pub use context::NoopHttpSend;
pub use context::OsEnv;
pub use context::StaticEnv;

mod error;
pub use error::{Error, ErrorKind, Result};

mod api;
pub use api::{SignRequest, SigningCredential};
mod request;
pub use request::SigningRequest;
