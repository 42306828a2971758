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

use credgate_core::{Error, Result, SigningCredential};
use log::debug;

use crate::Claims;

/// Credentials delegated to the gateway by a verified token.
pub type DelegatedCredentials = credgate_aws_sign::Credential;

/// Project verified claims into the credentials used to reach upstream.
///
/// Claims without an access key id or secret access key carry no identity
/// and are refused.
pub fn extract(claims: Claims) -> Result<DelegatedCredentials> {
    let cred = DelegatedCredentials {
        access_key_id: claims.access_key_id,
        secret_access_key: claims.secret_access_key,
        session_token: Some(claims.session_token).filter(|v| !v.is_empty()),
        signer_type: claims.signer_type,
    };

    if !cred.is_valid() {
        return Err(Error::missing_credentials(
            "token carries no access key id or secret access key",
        ));
    }

    debug!("extracted delegated credential: {cred:?}");
    Ok(cred)
}
