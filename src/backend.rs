//! Client for pachd's access-control operations and classification of its
//! responses.
//!
//! Pachd's error vocabulary is an external, semi-stable contract: a small
//! closed set of phrases distinguishes "auth is off" from "your token is
//! stale" from genuine failures. [`classify`] is the single place that
//! contract is encoded; nothing else in the crate matches on error strings.
use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;

use crate::process::CommandSpec;
use crate::process::ProcessRunner;
use crate::secrets::Token;

/// Phrase pachd uses when the auth service was never activated.
const NOT_ACTIVATED: &str = "the auth service is not activated";

/// Phrase pachd uses when a call needed a token but none was sent.
const NO_TOKEN: &str = "no authentication token";

/// Phrase pachd uses when the supplied token is stale or mangled.
const BAD_TOKEN: &str = "auth token is corrupted or has expired";

lazy_static! {
    /// Token line in `pachctl auth get-auth-token` output.
    static ref TOKEN_LINE: Regex =
        Regex::new(r"(?m)^  Token: ([0-9a-f]+)$").expect("invalid token line regex");

    /// Identity sentence in `pachctl auth whoami` output.
    static ref WHOAMI_LINE: Regex =
        Regex::new(r#"You are "([^"]+)""#).expect("invalid whoami regex");
}

/// Raw response from a pachd access-control operation.
///
/// The command ran; whether it succeeded is decided by [`classify`], since
/// pachctl reports auth-state conditions on stderr rather than exit codes we
/// can rely on across versions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PachResponse {
    /// Captured standard output.
    pub stdout: String,

    /// Captured standard error.
    pub stderr: String,
}

/// Classification of a pachd access-control response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthProbe {
    /// The call succeeded; auth is active and the token (if any) valid.
    Active,

    /// Auth was never activated on this cluster; a valid state, not an error.
    NotActivated,

    /// The call needed a token and none was configured.
    MissingToken,

    /// The configured token is stale or corrupted.
    BadToken,

    /// Anything outside the known vocabulary. Fail closed.
    Unexpected(String),
}

/// Classify a pachd response by its error channel.
///
/// Predicates are ordered: the not-activated phrase wins over the token
/// phrases, which win over the catch-all.
pub fn classify(response: &PachResponse) -> AuthProbe {
    let stderr = response.stderr.trim();
    if stderr.is_empty() {
        return AuthProbe::Active;
    }
    if stderr.contains(NOT_ACTIVATED) {
        return AuthProbe::NotActivated;
    }
    if stderr.contains(NO_TOKEN) {
        return AuthProbe::MissingToken;
    }
    if stderr.contains(BAD_TOKEN) {
        return AuthProbe::BadToken;
    }
    AuthProbe::Unexpected(stderr.to_string())
}

/// Extract the bearer token from `get-auth-token` output.
pub fn parse_token(stdout: &str) -> Option<Token> {
    TOKEN_LINE
        .captures(stdout)
        .map(|captures| Token::new(&captures[1]))
}

/// Extract the canonical username from `whoami` output.
pub fn parse_username(stdout: &str) -> Option<String> {
    WHOAMI_LINE
        .captures(stdout)
        .map(|captures| captures[1].to_string())
}

/// Access-control operations offered by pachd.
#[async_trait::async_trait]
pub trait PachClient: Send + Sync {
    /// Ask pachd who the given token belongs to.
    async fn whoami(&self, token: Option<&Token>) -> Result<PachResponse>;

    /// Mint an admin-scoped bearer token.
    async fn get_auth_token(&self) -> Result<PachResponse>;

    /// Exchange a one-time password for a user-scoped bearer token.
    async fn authenticate_otp(&self, code: &str) -> Result<PachResponse>;

    /// Exchange a federated-identity (GitHub) token for a user-scoped
    /// bearer token.
    async fn authenticate_id_token(&self, id_token: &str) -> Result<PachResponse>;
}

/// [`PachClient`] backed by the pachctl CLI.
pub struct CliPachClient {
    runner: std::sync::Arc<dyn ProcessRunner>,
    tls_certs_path: Option<String>,
}

impl CliPachClient {
    /// Drive pachctl through the given process runner.
    pub fn new(runner: std::sync::Arc<dyn ProcessRunner>) -> CliPachClient {
        CliPachClient {
            runner,
            tls_certs_path: None,
        }
    }

    /// Trust the given root certs bundle when talking to pachd over TLS.
    pub fn with_tls_certs_path(mut self, path: Option<String>) -> CliPachClient {
        self.tls_certs_path = path;
        self
    }

    fn spec(&self, token: Option<&Token>) -> CommandSpec {
        let mut spec = CommandSpec::new("pachctl").arg("auth");
        if let Some(token) = token {
            spec = spec.env("PACH_TOKEN", token.expose());
        }
        if let Some(path) = &self.tls_certs_path {
            spec = spec.env("PACH_CA_CERTS", path.clone());
        }
        spec
    }

    async fn run(&self, spec: CommandSpec) -> Result<PachResponse> {
        let output = self.runner.run(spec).await?;
        Ok(PachResponse {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[async_trait::async_trait]
impl PachClient for CliPachClient {
    async fn whoami(&self, token: Option<&Token>) -> Result<PachResponse> {
        self.run(self.spec(token).arg("whoami")).await
    }

    async fn get_auth_token(&self) -> Result<PachResponse> {
        self.run(self.spec(None).arg("get-auth-token")).await
    }

    async fn authenticate_otp(&self, code: &str) -> Result<PachResponse> {
        self.run(
            self.spec(None)
                .arg("login")
                .arg("--one-time-password")
                .stdin(code.as_bytes().to_vec()),
        )
        .await
    }

    async fn authenticate_id_token(&self, id_token: &str) -> Result<PachResponse> {
        self.run(
            self.spec(None)
                .arg("login")
                .arg("--id-token")
                .stdin(id_token.as_bytes().to_vec()),
        )
        .await
    }
}

#[cfg(test)]
pub mod fixtures {
    //! Canned pachd responses for tests.
    use std::sync::Mutex;

    use anyhow::Result;

    use super::PachClient;
    use super::PachResponse;
    use crate::secrets::Token;

    /// Record of the exchange calls a test exercised.
    #[derive(Clone, Debug, Eq, PartialEq)]
    pub enum ExchangeCall {
        Otp(String),
        IdToken(String),
    }

    /// A pachd double replaying canned responses.
    pub struct FakePach {
        /// Response for `whoami` keyed by the token sent (None = no token).
        pub whoami: Box<dyn Fn(Option<&str>) -> PachResponse + Send + Sync>,
        /// Response for `get-auth-token`.
        pub auth_token: PachResponse,
        /// Response for either exchange call.
        pub exchange: PachResponse,
        /// Exchange calls recorded in order.
        pub calls: Mutex<Vec<ExchangeCall>>,
    }

    impl FakePach {
        /// A double whose every call answers with the same response.
        pub fn uniform(response: PachResponse) -> FakePach {
            let whoami = response.clone();
            FakePach {
                whoami: Box::new(move |_| whoami.clone()),
                auth_token: response.clone(),
                exchange: response,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    /// A response with the given stdout and empty stderr.
    pub fn ok(stdout: &str) -> PachResponse {
        PachResponse {
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    /// A response with the given stderr and empty stdout.
    pub fn err(stderr: &str) -> PachResponse {
        PachResponse {
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[async_trait::async_trait]
    impl PachClient for std::sync::Arc<FakePach> {
        async fn whoami(&self, token: Option<&Token>) -> Result<PachResponse> {
            self.as_ref().whoami(token).await
        }

        async fn get_auth_token(&self) -> Result<PachResponse> {
            self.as_ref().get_auth_token().await
        }

        async fn authenticate_otp(&self, code: &str) -> Result<PachResponse> {
            self.as_ref().authenticate_otp(code).await
        }

        async fn authenticate_id_token(&self, id_token: &str) -> Result<PachResponse> {
            self.as_ref().authenticate_id_token(id_token).await
        }
    }

    #[async_trait::async_trait]
    impl PachClient for FakePach {
        async fn whoami(&self, token: Option<&Token>) -> Result<PachResponse> {
            Ok((self.whoami)(token.map(Token::expose)))
        }

        async fn get_auth_token(&self) -> Result<PachResponse> {
            Ok(self.auth_token.clone())
        }

        async fn authenticate_otp(&self, code: &str) -> Result<PachResponse> {
            self.calls
                .lock()
                .expect("calls lock poisoned")
                .push(ExchangeCall::Otp(code.to_string()));
            Ok(self.exchange.clone())
        }

        async fn authenticate_id_token(&self, id_token: &str) -> Result<PachResponse> {
            self.calls
                .lock()
                .expect("calls lock poisoned")
                .push(ExchangeCall::IdToken(id_token.to_string()));
            Ok(self.exchange.clone())
        }
    }
}
