use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use snafu::{ResultExt, Snafu};

use crate::crypto::{Crypto, CryptoError};

/// Verifier length in random bytes used when nothing else is requested.
pub const DEFAULT_VERIFIER_LENGTH: usize = 43;

#[derive(Debug, Snafu)]
pub enum CodeVerifierError {
    #[snafu(display(
        "CodeVerifierError: {length} random bytes do not encode into a verifier of 43 to 128 characters"
    ))]
    InvalidLength { length: usize },

    #[snafu(display("CodeVerifierError: Could not draw random bytes"))]
    Random { source: CryptoError },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CodeVerifier {
    code_verifier: String,
}

impl CodeVerifier {
    /// Draws `length` random bytes and base64 url encodes them.
    ///
    /// see: https://datatracker.ietf.org/doc/html/rfc7636
    pub(crate) fn generate(crypto: &dyn Crypto, length: usize) -> Result<Self, CodeVerifierError> {
        // 32 bytes encode to 43 characters, 96 bytes to 128 (no padding).
        if !(32..=96).contains(&length) {
            return InvalidLengthSnafu { length }.fail();
        }

        let bytes = crypto.random_bytes(length).context(RandomSnafu {})?;
        Ok(Self {
            code_verifier: URL_SAFE_NO_PAD.encode(bytes),
        })
    }

    pub(crate) fn from_stored(code_verifier: String) -> Self {
        Self { code_verifier }
    }

    pub(crate) fn to_code_challenge(&self, crypto: &dyn Crypto) -> CodeChallenge {
        let digest = crypto.sha256(self.code_verifier.as_bytes());

        CodeChallenge {
            code_challenge: URL_SAFE_NO_PAD.encode(digest),
            code_challenge_method: CodeChallengeMethod::S256,
        }
    }

    pub fn code_verifier(&self) -> &str {
        self.code_verifier.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    S256,
}

impl CodeChallengeMethod {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::S256 => "S256",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeChallenge {
    code_challenge: String,
    code_challenge_method: CodeChallengeMethod,
}

impl CodeChallenge {
    pub fn code_challenge(&self) -> &str {
        self.code_challenge.as_str()
    }

    pub fn code_challenge_method(&self) -> CodeChallengeMethod {
        self.code_challenge_method
    }
}

/// Verifier and challenge created together for one sign-in flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: CodeVerifier,
    pub challenge: CodeChallenge,
}
