//! Join-link parsing and access validation.
//!
//! A join link looks like `https://host/meetings/<meetingId>?token=..&email=..&expires=..`.
//! The token has exactly three `_`-delimited segments:
//! `<meetingId>_<issuedAtMs>_<signature>`.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::AccessError;

/// Shape check only: one `@`, no whitespace, a dotted domain.
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("invalid email regex"));

/// Raw parameters carried by a join link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinParams {
    pub meeting_id: String,
    pub token: Option<String>,
    pub email: Option<String>,
    pub expires_at_ms: Option<String>,
}

impl JoinParams {
    pub fn from_url(link: &str) -> Result<Self, AccessError> {
        let url = reqwest::Url::parse(link)
            .map_err(|e| AccessError::TokenInvalid(format!("malformed join link: {e}")))?;

        let meeting_id = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string)
            .ok_or_else(|| AccessError::TokenInvalid("join link has no meeting id".to_string()))?;

        let mut params = JoinParams {
            meeting_id,
            ..Default::default()
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "token" => params.token = Some(value.into_owned()),
                "email" => params.email = Some(value.into_owned()),
                "expires" => params.expires_at_ms = Some(value.into_owned()),
                other => debug!("Ignoring join link parameter '{}'", other),
            }
        }
        Ok(params)
    }
}

/// A structurally valid join credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinToken {
    pub raw: String,
    pub meeting_id: String,
    pub issued_at_ms: i64,
    pub expires_at_ms: i64,
    pub email: String,
}

impl JoinToken {
    /// Decomposes the link parameters. Any missing or malformed piece is
    /// `TokenInvalid`; expiry is not checked here.
    pub fn parse(params: &JoinParams) -> Result<Self, AccessError> {
        let invalid = |reason: &str| AccessError::TokenInvalid(reason.to_string());

        let raw = params
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| invalid("missing token"))?;

        let segments: Vec<&str> = raw.split('_').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("token must have exactly three non-empty segments"));
        }

        let issued_at_ms = segments[1]
            .parse::<i64>()
            .map_err(|_| invalid("token issue time is not a timestamp"))?;

        let email = params
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| invalid("missing email"))?;
        if !EMAIL_RE.is_match(email) {
            return Err(invalid("email is not valid"));
        }

        let expires_at_ms = params
            .expires_at_ms
            .as_deref()
            .ok_or_else(|| invalid("missing expiry"))?
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid("expiry is not a timestamp"))?;

        Ok(Self {
            raw: raw.to_string(),
            meeting_id: segments[0].to_string(),
            issued_at_ms,
            expires_at_ms,
            email: email.to_string(),
        })
    }

    /// Valid iff `issued_at <= now <= expires_at`; both bounds inclusive.
    pub fn check_window(&self, now_ms: i64) -> Result<(), AccessError> {
        if now_ms < self.issued_at_ms {
            return Err(AccessError::TokenInvalid(
                "token is not valid yet".to_string(),
            ));
        }
        if now_ms > self.expires_at_ms {
            return Err(AccessError::TokenExpired {
                expires_at_ms: self.expires_at_ms,
                now_ms,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed(JoinToken),
    Denied(String),
    Expired,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }
}

/// Decides whether the link may be used to join `meeting_id` at `now_ms`.
pub fn validate_access(params: &JoinParams, meeting_id: &str, now_ms: i64) -> AccessDecision {
    let token = match JoinToken::parse(params) {
        Ok(token) => token,
        Err(e) => {
            warn!("Join link rejected: {}", e);
            return AccessDecision::Denied(e.to_string());
        }
    };

    if params.meeting_id != meeting_id || token.meeting_id != meeting_id {
        warn!(
            "Join link for meeting {} used for meeting {}",
            token.meeting_id, meeting_id
        );
        return AccessDecision::Denied("token does not belong to this meeting".to_string());
    }

    match token.check_window(now_ms) {
        Ok(()) => AccessDecision::Allowed(token),
        Err(AccessError::TokenExpired { .. }) => AccessDecision::Expired,
        Err(e) => AccessDecision::Denied(e.to_string()),
    }
}
