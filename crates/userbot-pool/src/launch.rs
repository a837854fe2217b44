//! Mini-app launch parameter parsing
//!
//! A web-view URL carries its launch data in the fragment:
//!
//! ```text
//! https://app.example/#tgWebAppData=query_id%3DAAE...%26user%3D%257B...%257D%26hash%3D...
//! ```
//!
//! Decoding the `tgWebAppData` pair once yields the raw, still-signed init-data
//! string (`query_id=...&user=...&hash=...`). That string is forwarded
//! verbatim to the auth endpoint; the `user` field inside it is decoded again
//! and parsed as JSON for the caller's convenience.

use serde::{Deserialize, Serialize};
use url::{Url, form_urlencoded};

use crate::error::{Error, Result};

const LAUNCH_DATA_MARKER: &str = "tgWebAppData=";
const INIT_DATA_PREFIX: &str = "query_id";
const USER_FIELD: &str = "user";

/// Profile of the user the mini-app was launched for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_premium: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allows_write_to_pm: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Fields the platform adds later.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Raw init-data plus the decoded user profile.
#[derive(Debug, Clone)]
pub struct LaunchParams {
    pub init_data: String,
    pub user: UserProfile,
}

/// Extract launch parameters from a web-view redirect URL.
pub fn parse_launch_params(redirect_url: &str) -> Result<LaunchParams> {
    let url = Url::parse(redirect_url)
        .map_err(|e| Error::LaunchParams(format!("invalid web view URL: {e}")))?;

    let launch_data = url
        .fragment()
        .and_then(|fragment| fragment.strip_prefix(LAUNCH_DATA_MARKER))
        .ok_or(Error::NoInitData)?;

    // The encoded init-data has no literal '=', so it decodes as a bare key.
    let init_data = form_urlencoded::parse(launch_data.as_bytes())
        .map(|(key, _)| key)
        .find(|key| key.starts_with(INIT_DATA_PREFIX))
        .ok_or(Error::NoInitData)?
        .into_owned();

    let user_json = form_urlencoded::parse(init_data.as_bytes())
        .find(|(key, _)| key == USER_FIELD)
        .map(|(_, value)| value.into_owned())
        .ok_or(Error::NoUserData)?;

    let user: UserProfile = serde_json::from_str(&user_json)
        .map_err(|e| Error::LaunchParams(format!("user data is not valid JSON: {e}")))?;

    Ok(LaunchParams { init_data, user })
}
