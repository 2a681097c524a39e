//! Destination records and validation

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Registry-assigned destination identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(Uuid);

impl DestinationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DestinationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DestinationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidDestination(format!("bad destination id {s:?}: {e}")))
    }
}

/// Egress protocol of a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Rtmp,
    Hls,
    /// WHIP ingest endpoint
    Webrtc,
}

impl Protocol {
    /// URL schemes accepted for this protocol
    pub fn schemes(&self) -> &'static [&'static str] {
        match self {
            Protocol::Rtmp => &["rtmp", "rtmps"],
            Protocol::Hls | Protocol::Webrtc => &["http", "https"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Rtmp => "rtmp",
            Protocol::Hls => "hls",
            Protocol::Webrtc => "webrtc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rtmp" => Ok(Protocol::Rtmp),
            "hls" => Ok(Protocol::Hls),
            "webrtc" => Ok(Protocol::Webrtc),
            other => Err(Error::InvalidDestination(format!(
                "unknown protocol {other:?}, expected one of rtmp, hls, webrtc"
            ))),
        }
    }
}

/// A configured egress target
///
/// Records are immutable: the registry replaces the whole record on update,
/// and live sessions keep the version they were started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub id: DestinationId,
    pub name: String,
    pub protocol: Protocol,
    pub url: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_key_override: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Destination {
    /// URL the egress connection should publish to
    ///
    /// A stream key override becomes the last path segment.
    pub fn target_url(&self) -> Url {
        let mut url = self.url.clone();
        if let Some(key) = &self.stream_key_override {
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.pop_if_empty().push(key);
            }
        }
        url
    }
}

/// Input for [`DestinationRegistry::add`](super::DestinationRegistry::add)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDestination {
    pub name: String,
    pub protocol: Protocol,
    pub url: String,
    #[serde(default)]
    pub stream_key_override: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl NewDestination {
    pub fn new(name: impl Into<String>, protocol: Protocol, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protocol,
            url: url.into(),
            stream_key_override: None,
            enabled: true,
        }
    }

    pub fn stream_key_override(mut self, key: impl Into<String>) -> Self {
        self.stream_key_override = Some(key.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Validate and turn into a registry record
    pub(crate) fn into_destination(self) -> Result<Destination> {
        let name = validate_name(&self.name)?;
        let url = validate_url(self.protocol, &self.url)?;
        let stream_key_override = validate_override(self.stream_key_override)?;
        let now = Utc::now();

        Ok(Destination {
            id: DestinationId::new(),
            name,
            protocol: self.protocol,
            url,
            stream_key_override,
            enabled: self.enabled,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationUpdate {
    pub name: Option<String>,
    pub protocol: Option<Protocol>,
    pub url: Option<String>,
    /// `Some(None)` clears the override
    #[serde(default, with = "double_option")]
    pub stream_key_override: Option<Option<String>>,
    pub enabled: Option<bool>,
}

impl DestinationUpdate {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn stream_key_override(mut self, key: Option<String>) -> Self {
        self.stream_key_override = Some(key);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Apply on top of `current`, re-validating the result
    pub(crate) fn apply(self, current: &Destination) -> Result<Destination> {
        let name = match self.name {
            Some(name) => validate_name(&name)?,
            None => current.name.clone(),
        };
        let protocol = self.protocol.unwrap_or(current.protocol);
        // Protocol changes must still agree with the (possibly unchanged) URL
        let url = match &self.url {
            Some(url) => validate_url(protocol, url)?,
            None => validate_url(protocol, current.url.as_str())?,
        };
        let stream_key_override = match self.stream_key_override {
            Some(value) => validate_override(value)?,
            None => current.stream_key_override.clone(),
        };

        Ok(Destination {
            id: current.id,
            name,
            protocol,
            url,
            stream_key_override,
            enabled: self.enabled.unwrap_or(current.enabled),
            created_at: current.created_at,
            updated_at: Utc::now(),
        })
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidDestination("name must not be empty".into()));
    }
    Ok(name.to_string())
}

fn validate_url(protocol: Protocol, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::InvalidDestination(format!("invalid url {raw:?}: {e}")))?;

    if !protocol.schemes().contains(&url.scheme()) {
        return Err(Error::InvalidDestination(format!(
            "url scheme {:?} does not match protocol {}, expected one of: {}",
            url.scheme(),
            protocol,
            protocol.schemes().join(", ")
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::InvalidDestination(format!("url {raw:?} has no host")));
    }

    Ok(url)
}

fn validate_override(value: Option<String>) -> Result<Option<String>> {
    match value {
        None => Ok(None),
        Some(key) => {
            let key = key.trim();
            if key.is_empty() || key.contains('/') {
                return Err(Error::InvalidDestination(format!(
                    "stream key override {key:?} must be non-empty and contain no '/'"
                )));
            }
            Ok(Some(key.to_string()))
        }
    }
}

/// Distinguishes an absent field from an explicit `null`
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtmp(url: &str) -> NewDestination {
        NewDestination::new("YouTube", Protocol::Rtmp, url)
    }

    #[test]
    fn test_valid_destinations() {
        let d = rtmp("rtmp://a.rtmp.youtube.com/live2")
            .into_destination()
            .unwrap();
        assert_eq!(d.name, "YouTube");
        assert!(d.enabled);
        assert_eq!(d.created_at, d.updated_at);

        assert!(rtmp("rtmps://live-api-s.facebook.com:443/rtmp/")
            .into_destination()
            .is_ok());
        assert!(
            NewDestination::new("CDN", Protocol::Hls, "https://cdn.example.com/ingest")
                .into_destination()
                .is_ok()
        );
        assert!(
            NewDestination::new("WHIP", Protocol::Webrtc, "https://whip.example.com/endpoint")
                .into_destination()
                .is_ok()
        );
    }

    #[test]
    fn test_invalid_destinations() {
        let cases = [
            NewDestination::new("  ", Protocol::Rtmp, "rtmp://host/live"),
            NewDestination::new("x", Protocol::Rtmp, "not a url"),
            NewDestination::new("x", Protocol::Rtmp, "http://host/live"),
            NewDestination::new("x", Protocol::Hls, "rtmp://host/live"),
            NewDestination::new("x", Protocol::Webrtc, "rtmp://host/live"),
            NewDestination::new("x", Protocol::Rtmp, "rtmp:///live"),
            rtmp("rtmp://host/live").stream_key_override(""),
            rtmp("rtmp://host/live").stream_key_override("a/b"),
        ];

        for case in cases {
            let label = format!("{case:?}");
            assert!(
                matches!(case.into_destination(), Err(Error::InvalidDestination(_))),
                "accepted {label}"
            );
        }
    }

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("RTMP".parse::<Protocol>().unwrap(), Protocol::Rtmp);
        assert_eq!("hls".parse::<Protocol>().unwrap(), Protocol::Hls);
        assert_eq!("webrtc".parse::<Protocol>().unwrap(), Protocol::Webrtc);
        assert!("srt".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_target_url_with_override() {
        let d = rtmp("rtmp://a.rtmp.youtube.com/live2")
            .stream_key_override("abcd-1234")
            .into_destination()
            .unwrap();
        assert_eq!(
            d.target_url().as_str(),
            "rtmp://a.rtmp.youtube.com/live2/abcd-1234"
        );

        // Trailing slash does not produce an empty segment
        let d = rtmp("rtmp://live.twitch.tv/app/")
            .stream_key_override("live_1")
            .into_destination()
            .unwrap();
        assert_eq!(d.target_url().as_str(), "rtmp://live.twitch.tv/app/live_1");

        let d = rtmp("rtmp://host/live/key").into_destination().unwrap();
        assert_eq!(d.target_url().as_str(), "rtmp://host/live/key");
    }

    #[test]
    fn test_update_revalidates() {
        let d = rtmp("rtmp://host/live").into_destination().unwrap();

        let renamed = DestinationUpdate::default()
            .name("Twitch")
            .apply(&d)
            .unwrap();
        assert_eq!(renamed.id, d.id);
        assert_eq!(renamed.name, "Twitch");
        assert_eq!(renamed.url, d.url);
        assert!(renamed.updated_at >= d.updated_at);

        // Switching protocol without a matching URL is rejected
        let err = DestinationUpdate::default()
            .protocol(Protocol::Hls)
            .apply(&d)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDestination(_)));

        let hls = DestinationUpdate::default()
            .protocol(Protocol::Hls)
            .url("https://cdn.example.com/in")
            .apply(&d)
            .unwrap();
        assert_eq!(hls.protocol, Protocol::Hls);
    }

    #[test]
    fn test_update_clears_override() {
        let d = rtmp("rtmp://host/live")
            .stream_key_override("k")
            .into_destination()
            .unwrap();

        let unchanged = DestinationUpdate::default().apply(&d).unwrap();
        assert_eq!(unchanged.stream_key_override.as_deref(), Some("k"));

        let cleared = DestinationUpdate::default()
            .stream_key_override(None)
            .apply(&d)
            .unwrap();
        assert!(cleared.stream_key_override.is_none());
    }

    #[test]
    fn test_json_shape() {
        let d = rtmp("rtmp://host/live").into_destination().unwrap();
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["protocol"], "rtmp");
        assert_eq!(json["url"], "rtmp://host/live");
        assert_eq!(json["enabled"], true);
        assert!(json.get("createdAt").is_some());
        assert!(json.get("streamKeyOverride").is_none());

        let input: NewDestination = serde_json::from_str(
            r#"{"name":"FB","protocol":"rtmp","url":"rtmps://fb.example/rtmp","streamKeyOverride":"abc"}"#,
        )
        .unwrap();
        assert!(input.enabled);
        assert_eq!(input.stream_key_override.as_deref(), Some("abc"));

        let patch: DestinationUpdate =
            serde_json::from_str(r#"{"streamKeyOverride":null}"#).unwrap();
        assert_eq!(patch.stream_key_override, Some(None));
    }
}
