use std::fmt;
use std::time;

use serde::{Deserialize, Serialize};

#[derive(Clone, Deserialize, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Credentials {
    /// Sent as `Authorization: Token <token>`.
    Token { token: String },
    /// HTTP basic auth.
    Basic { username: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token { .. } => f.debug_struct("Token").field("token", &"<redacted>").finish(),
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Parameters {
    pub base_url: String,
    pub credentials: Option<Credentials>,

    pub connect_timeout: time::Duration,
    pub read_timeout: time::Duration,
    pub pool_idle_timeout: time::Duration,
}
