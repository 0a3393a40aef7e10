// 🔑 Session - explicit authenticated session passed to the API client
// The role is informational; the server is the only trust boundary.

use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub role: Option<String>,
    pub username: Option<String>,
}

impl Session {
    /// Session from a bare access token (e.g. `BACKOFFICE_TOKEN`)
    pub fn from_token(token: impl Into<String>) -> Self {
        Session {
            access_token: token.into(),
            refresh_token: None,
            role: None,
            username: None,
        }
    }

    /// Token to send, or None when blank
    pub fn bearer(&self) -> Option<&str> {
        let token = self.access_token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }
}

impl From<LoginResponse> for Session {
    fn from(response: LoginResponse) -> Self {
        Session {
            access_token: response.token.access,
            refresh_token: response.token.refresh,
            role: response.role,
            username: response.username,
        }
    }
}

// Tokens stay out of logs
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("role", &self.role)
            .field("username", &self.username)
            .finish()
    }
}

// ============================================================================
// LOGIN PAYLOADS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoginType {
    Admin,
    Staff,
}

impl std::str::FromStr for LoginType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(LoginType::Admin),
            "staff" => Ok(LoginType::Staff),
            other => Err(format!("unknown login type '{}' (expected admin or staff)", other)),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub login_type: LoginType,
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff_unique_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: TokenPair,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}
