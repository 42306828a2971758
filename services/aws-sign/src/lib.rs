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

//! Signing outbound requests with delegated storage credentials.
//!
//! ```no_run
//! use credgate_aws_sign::{Credential, RequestSigner, SignerType};
//! use credgate_core::SignRequest;
//!
//! # async fn example() -> credgate_core::Result<()> {
//! let cred = Credential {
//!     access_key_id: "access_key_id".to_string(),
//!     secret_access_key: "secret_access_key".to_string(),
//!     session_token: None,
//!     signer_type: SignerType::V4,
//! };
//!
//! let (mut parts, body) = http::Request::get("http://127.0.0.1:8787/api/v1/clusters")
//!     .body(())?
//!     .into_parts();
//! RequestSigner::new("s3", "us-east-1")
//!     .sign_request(&mut parts, Some(&cred))
//!     .await?;
//! let _req = http::Request::from_parts(parts, body);
//! # Ok(())
//! # }
//! ```

mod constants;
pub use constants::X_AMZ_CONTENT_SHA_256;

mod credential;
pub use credential::{Credential, SignerType};

mod sign_request;
pub use sign_request::RequestSigner;
