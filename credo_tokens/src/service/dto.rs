//! DTOs for interacting with OAuth2 token endpoints

use credo_clock::DurationSecs;
use serde::{Deserialize, Serialize, Serializer};

use crate::{
    AccessToken, AuthorizationCodeRef, DeviceIdRef, RefreshToken, RefreshTokenRef, Scope,
    TokenType,
};

/// A grant sent to the token endpoint
pub trait GrantPayload: Serialize {
    /// The grant type or flow to be performed
    fn grant_type(&self) -> &str;
}

/// Exchanges an authorization code from an interactive login
#[derive(Debug)]
pub struct AuthorizationCodeGrant<'a> {
    /// The code returned to the redirect URI
    pub code: &'a AuthorizationCodeRef,

    /// The redirect URI used when authorizing, sent back for verification
    pub redirect_uri: &'a str,
}

impl Serialize for AuthorizationCodeGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("AuthorizationCodeGrant", 3)?;
        ser.serialize_field("grant_type", self.grant_type())?;
        ser.serialize_field("code", self.code)?;
        ser.serialize_field("redirect_uri", self.redirect_uri)?;
        ser.end()
    }
}

impl GrantPayload for AuthorizationCodeGrant<'_> {
    fn grant_type(&self) -> &str {
        "authorization_code"
    }
}

/// Renews a user session with its refresh token
#[derive(Debug)]
pub struct RefreshTokenGrant<'a> {
    /// The refresh token
    pub refresh_token: &'a RefreshTokenRef,
}

impl Serialize for RefreshTokenGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("RefreshTokenGrant", 2)?;
        ser.serialize_field("grant_type", self.grant_type())?;
        ser.serialize_field("refresh_token", self.refresh_token)?;
        ser.end()
    }
}

impl GrantPayload for RefreshTokenGrant<'_> {
    fn grant_type(&self) -> &str {
        "refresh_token"
    }
}

/// Obtains an anonymous session for an installed client
#[derive(Debug)]
pub struct InstalledClientGrant<'a> {
    /// The authority-specific grant identifier
    pub grant_type: &'a str,

    /// The installation's device identifier
    pub device_id: &'a DeviceIdRef,
}

impl Serialize for InstalledClientGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("InstalledClientGrant", 2)?;
        ser.serialize_field("grant_type", self.grant_type)?;
        ser.serialize_field("device_id", self.device_id)?;
        ser.end()
    }
}

impl GrantPayload for InstalledClientGrant<'_> {
    fn grant_type(&self) -> &str {
        self.grant_type
    }
}

/// A request to revoke a token
#[derive(Debug, Serialize)]
pub struct RevocationRequest<'a> {
    /// The secret to revoke
    pub token: &'a str,

    /// Whether `token` is an access or refresh token
    pub token_type_hint: &'a str,
}

fn bearer() -> TokenType {
    TokenType::from_static("bearer")
}

#[derive(Debug, Deserialize, Serialize)]
pub(super) struct TokenResponse {
    pub access_token: AccessToken,
    #[serde(default = "bearer")]
    pub token_type: TokenType,
    pub expires_in: DurationSecs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AuthorizationCode, DeviceId};

    #[test]
    fn grants_serialize_with_their_grant_type() {
        let code = AuthorizationCode::from_static("c0de");
        let grant = AuthorizationCodeGrant {
            code: &code,
            redirect_uri: "app://callback",
        };
        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "grant_type": "authorization_code",
                "code": "c0de",
                "redirect_uri": "app://callback",
            })
        );

        let device = DeviceId::from_static("device-1");
        let grant = InstalledClientGrant {
            grant_type: "https://oauth.reddit.com/grants/installed_client",
            device_id: &device,
        };
        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(
            json["grant_type"],
            "https://oauth.reddit.com/grants/installed_client"
        );
        assert_eq!(json["device_id"], "device-1");
    }

    #[test]
    fn refresh_response_without_refresh_token_parses() {
        let body =
            r#"{"access_token":"def","token_type":"bearer","expires_in":3600,"scope":"read"}"#;
        let resp: TokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.access_token.as_str(), "def");
        assert_eq!(resp.expires_in, DurationSecs(3600));
        assert!(resp.refresh_token.is_none());
    }

    #[test]
    fn missing_token_type_defaults_to_bearer() {
        let body = r#"{"access_token":"def","expires_in":60}"#;
        let resp: TokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.token_type.as_str(), "bearer");
        assert!(resp.scope.is_none());
    }
}
