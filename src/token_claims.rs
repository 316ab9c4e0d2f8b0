use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Claims the identity provider embeds into its access tokens.
///
/// All of them are optional. Bearer values are opaque to us, and a value which is not a JWT is
/// still a usable token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccessTokenClaims {
    pub user_id: Option<String>,

    /// Session id.
    pub sid: Option<String>,

    pub client_id: Option<String>,

    /// Comma separated.
    pub scope: Option<String>,

    /// Id of the user impersonating `user_id`.
    pub imp_id: Option<String>,

    /// Session id of the impersonating user. Present on impersonated sessions only.
    pub imp_sid: Option<String>,

    /// Satisfied PBA policies.
    #[serde(default)]
    pub pba: Vec<String>,

    /// Expiry as seconds since the unix epoch.
    pub exp: Option<i64>,
}

impl AccessTokenClaims {
    /// Decode the claims of `token` without verifying its signature.
    ///
    /// We cannot verify signatures on the client. The claims are only used to enrich the token
    /// record, never to make a trust decision.
    pub fn decode_unverified(token: &str) -> Option<Self> {
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        match jsonwebtoken::decode::<AccessTokenClaims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(&[]),
            &validation,
        ) {
            Ok(data) => Some(data.claims),
            Err(err) => {
                tracing::trace!(?err, "Access token is not a decodable JWT.");
                None
            }
        }
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.exp
            .and_then(|exp| OffsetDateTime::from_unix_timestamp(exp).ok())
    }
}
