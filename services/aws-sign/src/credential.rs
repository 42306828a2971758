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

use credgate_core::utils::Redact;
use credgate_core::{Error, SigningCredential};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};

/// SignerType selects how a credential is applied to a request.
///
/// Encoded as a number on the wire, using the same ordering as the storage
/// SDK that issued the credential.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SignerType {
    /// No preference expressed, signed as V4.
    #[default]
    Default,
    /// AWS Signature Version 4.
    V4,
    /// AWS Signature Version 2.
    V2,
    /// Streaming V4, signed with plain V4 header auth since bodies are buffered.
    V4Streaming,
    /// Send the request unsigned.
    Anonymous,
}

impl TryFrom<u8> for SignerType {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(SignerType::Default),
            1 => Ok(SignerType::V4),
            2 => Ok(SignerType::V2),
            3 => Ok(SignerType::V4Streaming),
            4 => Ok(SignerType::Anonymous),
            v => Err(Error::invalid_token(format!("unknown signer type {v}"))),
        }
    }
}

impl From<SignerType> for u8 {
    fn from(v: SignerType) -> Self {
        match v {
            SignerType::Default => 0,
            SignerType::V4 => 1,
            SignerType::V2 => 2,
            SignerType::V4Streaming => 3,
            SignerType::Anonymous => 4,
        }
    }
}

/// Credential delegated to the gateway for a single request.
#[derive(Default, Clone)]
pub struct Credential {
    /// Access key id for storage services.
    pub access_key_id: String,
    /// Secret access key for storage services.
    pub secret_access_key: String,
    /// Session token for temporary credentials.
    pub session_token: Option<String>,
    /// How the credential must be applied.
    pub signer_type: SignerType,
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &Redact::from(&self.access_key_id))
            .field("secret_access_key", &Redact::from(&self.secret_access_key))
            .field("session_token", &Redact::from(&self.session_token))
            .field("signer_type", &self.signer_type)
            .finish()
    }
}

impl SigningCredential for Credential {
    fn is_valid(&self) -> bool {
        !self.access_key_id.is_empty() && !self.secret_access_key.is_empty()
    }
}
