// src/rtmp/auth.rs - Adobe-style digest authentication for connect
//
// First connect:  app?authmod=adobe&user=<user>
// Server answers: _error "... ?reason=needauth&user=..&salt=..&challenge=..&opaque=.."
// Second connect: app?authmod=adobe&user=..&challenge=..&response=..[&opaque=..]

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::Rng;

/// Publisher credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Query appended to `app` and `tcUrl` on the first connect.
    pub fn initial_query(&self) -> String {
        format!("?authmod=adobe&user={}", self.user)
    }

    /// Query answering `challenge`, with a fresh client challenge.
    pub fn response_query(&self, challenge: &AuthChallenge) -> String {
        let client_challenge = format!("{:08x}", rand::thread_rng().gen::<u32>());
        self.response_query_with(challenge, &client_challenge)
    }

    fn response_query_with(&self, challenge: &AuthChallenge, client_challenge: &str) -> String {
        let hash1 = md5_base64(&format!("{}{}{}", self.user, challenge.salt, self.password));
        let second = match &challenge.opaque {
            Some(opaque) => opaque.as_str(),
            None => challenge.challenge.as_str(),
        };
        let response = md5_base64(&format!("{}{}{}", hash1, second, client_challenge));

        let mut query = format!(
            "?authmod=adobe&user={}&challenge={}&response={}",
            self.user, client_challenge, response
        );
        if let Some(opaque) = &challenge.opaque {
            query.push_str("&opaque=");
            query.push_str(opaque);
        }
        query
    }
}

/// Parameters of a server authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub salt: String,
    pub challenge: String,
    pub opaque: Option<String>,
}

impl AuthChallenge {
    /// Extracts salt/challenge/opaque from an `_error` description.
    pub fn parse(description: &str) -> Option<Self> {
        let query = description
            .rsplit_once('?')
            .map_or(description, |(_, q)| q);
        let field = |key: &str| {
            query
                .split('&')
                .find_map(|kv| kv.trim().strip_prefix(key))
                .map(str::to_string)
        };
        Some(Self {
            salt: field("salt=")?,
            challenge: field("challenge=")?,
            opaque: field("opaque="),
        })
    }
}

fn md5_base64(input: &str) -> String {
    STANDARD.encode(md5::compute(input.as_bytes()).0)
}
