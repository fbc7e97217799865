//! Shared access signature tokens.
//!
//! Both DPS and the hub authenticate devices with a token of the form
//! `SharedAccessSignature sr=<resource>&sig=<signature>&se=<expiry>[&skn=<key name>]`,
//! where the signature is an HMAC-SHA256 over the URL-encoded resource URI and
//! the expiry, keyed with the base64-decoded symmetric key.

use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use url::form_urlencoded;

use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "SharedAccessSignature ";

/// Key decoding accepts unpadded input and non-zero trailing bits, as device
/// keys are often pasted by hand.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// A signed (or parsed) shared access signature.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedAccessSignature {
    resource: String,
    signature: String,
    expiry: i64,
    key_name: Option<String>,
}

impl SharedAccessSignature {
    /// Sign `resource` with a base64-encoded symmetric key, valid until `expires_at`.
    pub fn sign(
        resource: &str,
        key: &SecretString,
        key_name: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, Error> {
        let key_bytes = LENIENT
            .decode(key.expose_secret().trim())
            .map_err(|e| Error::InvalidKey(format!("symmetric key is not valid base64: {e}")))?;

        let expiry = expires_at.timestamp();
        let to_sign = format!("{}\n{expiry}", encode(resource));

        let mut mac = HmacSha256::new_from_slice(&key_bytes)
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        mac.update(to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        Ok(Self {
            resource: resource.to_owned(),
            signature,
            expiry,
            key_name: key_name.map(str::to_owned),
        })
    }

    /// Parse a token string produced by [`to_token`](Self::to_token) or by the
    /// management plane.
    pub fn parse(token: &str) -> Result<Self, Error> {
        let query = token
            .trim()
            .strip_prefix(PREFIX)
            .ok_or_else(|| Error::MalformedToken("missing SharedAccessSignature prefix".into()))?;

        let mut resource = None;
        let mut signature = None;
        let mut expiry = None;
        let mut key_name = None;

        for (k, v) in form_urlencoded::parse(query.as_bytes()) {
            match k.as_ref() {
                "sr" => resource = Some(v.into_owned()),
                "sig" => signature = Some(v.into_owned()),
                "se" => {
                    expiry = Some(v.parse::<i64>().map_err(|_| {
                        Error::MalformedToken(format!("expiry '{v}' is not a unix timestamp"))
                    })?);
                }
                "skn" => key_name = Some(v.into_owned()),
                _ => {}
            }
        }

        Ok(Self {
            resource: resource.ok_or_else(|| Error::MalformedToken("missing 'sr'".into()))?,
            signature: signature.ok_or_else(|| Error::MalformedToken("missing 'sig'".into()))?,
            expiry: expiry.ok_or_else(|| Error::MalformedToken("missing 'se'".into()))?,
            key_name,
        })
    }

    /// Decoded resource URI the token grants access to.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Policy / key name, if the token carries one.
    pub fn key_name(&self) -> Option<&str> {
        self.key_name.as_deref()
    }

    /// Expiry as a UTC timestamp.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expiry, 0).single()
    }

    /// Whether the token has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now.timestamp()
    }

    /// Hub host name the resource is scoped to (the part before the first `/`).
    pub fn hub_host(&self) -> &str {
        self.resource
            .split('/')
            .next()
            .unwrap_or(self.resource.as_str())
    }

    /// Render the token as an `Authorization` header value.
    pub fn to_token(&self) -> SecretString {
        let mut token = format!(
            "{PREFIX}sr={}&sig={}&se={}",
            encode(&self.resource),
            encode(&self.signature),
            self.expiry
        );
        if let Some(ref name) = self.key_name {
            token.push_str("&skn=");
            token.push_str(&encode(name));
        }
        SecretString::from(token)
    }
}

impl fmt::Debug for SharedAccessSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedAccessSignature")
            .field("resource", &self.resource)
            .field("signature", &"[REDACTED]")
            .field("expiry", &self.expiry)
            .field("key_name", &self.key_name)
            .finish()
    }
}

/// Resource URI for a DPS registration.
pub fn dps_resource(scope_id: &str, device_id: &str) -> String {
    format!("{scope_id}/registrations/{device_id}")
}

/// Resource URI for a device identity on a hub.
pub fn device_resource(hub_host: &str, device_id: &str) -> String {
    format!("{hub_host}/devices/{device_id}")
}

fn encode(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // "secret-key-material" base64-encoded
    const KEY: &str = "c2VjcmV0LWtleS1tYXRlcmlhbA==";

    fn expiry() -> DateTime<Utc> {
        Utc.timestamp_opt(1_900_000_000, 0).single().unwrap()
    }

    #[test]
    fn token_layout_encodes_resource_and_expiry() {
        let key = SecretString::from(KEY.to_string());
        let sas = SharedAccessSignature::sign(
            &dps_resource("0ne000ABCDE", "dev1"),
            &key,
            Some("registration"),
            expiry(),
        )
        .unwrap();

        let token = sas.to_token();
        let token = token.expose_secret();
        assert!(token.starts_with("SharedAccessSignature sr=0ne000ABCDE%2Fregistrations%2Fdev1&sig="));
        assert!(token.contains("&se=1900000000"));
        assert!(token.ends_with("&skn=registration"));
    }

    #[test]
    fn signing_is_deterministic_and_key_sensitive() {
        let a = SharedAccessSignature::sign(
            "hub-a.example.net/devices/dev1",
            &SecretString::from(KEY.to_string()),
            None,
            expiry(),
        )
        .unwrap();
        let b = SharedAccessSignature::sign(
            "hub-a.example.net/devices/dev1",
            &SecretString::from(KEY.to_string()),
            None,
            expiry(),
        )
        .unwrap();
        let other = SharedAccessSignature::sign(
            "hub-a.example.net/devices/dev1",
            &SecretString::from("b3RoZXIta2V5".to_string()),
            None,
            expiry(),
        )
        .unwrap();

        assert_eq!(a, b);
        assert_ne!(a.signature, other.signature);
    }

    #[test]
    fn parse_recovers_fields_of_signed_token() {
        let sas = SharedAccessSignature::sign(
            "hub-a.example.net/devices/dev1",
            &SecretString::from(KEY.to_string()),
            None,
            expiry(),
        )
        .unwrap();

        let parsed = SharedAccessSignature::parse(sas.to_token().expose_secret()).unwrap();
        assert_eq!(parsed, sas);
        assert_eq!(parsed.hub_host(), "hub-a.example.net");
        assert_eq!(parsed.expires_at(), Some(expiry()));
        assert!(parsed.key_name().is_none());
    }

    #[test]
    fn parse_service_token_with_policy_name() {
        let token = "SharedAccessSignature sr=iotc-1234.azure-devices.net&sig=abc%2Bdef%3D&se=1700000000&skn=service";
        let sas = SharedAccessSignature::parse(token).unwrap();
        assert_eq!(sas.hub_host(), "iotc-1234.azure-devices.net");
        assert_eq!(sas.key_name(), Some("service"));
        assert_eq!(sas.signature, "abc+def=");
        assert!(sas.is_expired_at(Utc.timestamp_opt(1_700_000_001, 0).single().unwrap()));
    }

    #[test]
    fn invalid_base64_key_is_rejected() {
        let result = SharedAccessSignature::sign(
            "hub/devices/dev1",
            &SecretString::from("not base64 !!".to_string()),
            None,
            expiry(),
        );
        assert!(matches!(result, Err(Error::InvalidKey(_))));
    }

    #[test]
    fn short_unpadded_key_is_accepted() {
        let short = SharedAccessSignature::sign(
            &dps_resource("S1", "dev1"),
            &SecretString::from("K1".to_string()),
            Some("registration"),
            expiry(),
        )
        .unwrap();
        let padded = SharedAccessSignature::sign(
            &dps_resource("S1", "dev1"),
            &SecretString::from("K1==".to_string()),
            Some("registration"),
            expiry(),
        )
        .unwrap();

        assert_eq!(short, padded);
    }

    #[test]
    fn parse_rejects_missing_prefix_and_fields() {
        assert!(matches!(
            SharedAccessSignature::parse("sr=a&sig=b&se=1"),
            Err(Error::MalformedToken(_))
        ));
        assert!(matches!(
            SharedAccessSignature::parse("SharedAccessSignature sr=a&se=1"),
            Err(Error::MalformedToken(_))
        ));
        assert!(matches!(
            SharedAccessSignature::parse("SharedAccessSignature sr=a&sig=b&se=soon"),
            Err(Error::MalformedToken(_))
        ));
    }

    #[test]
    fn debug_redacts_signature() {
        let sas = SharedAccessSignature::parse(
            "SharedAccessSignature sr=hub&sig=topsecret&se=1700000000",
        )
        .unwrap();
        let dbg = format!("{sas:?}");
        assert!(!dbg.contains("topsecret"));
    }
}
