//! Runtime login gating for the hub.
//!
//! Every login attempt re-derives the backend auth state: operators can
//! activate or deactivate pachd auth underneath a long-lived hub process, so
//! nothing here is cached between calls. The [`Authenticator`] holds no
//! mutable state and is safe to invoke from any number of concurrent logins.
use slog::error;
use slog::Logger;

use crate::backend::classify;
use crate::backend::parse_token;
use crate::backend::parse_username;
use crate::backend::AuthProbe;
use crate::backend::PachClient;
use crate::secrets::Token;

/// Environment variable carrying the per-user pachd token into a spawned
/// notebook session. This is the only channel the credential travels by.
pub const SESSION_TOKEN_ENV: &str = "PACH_PYTHON_AUTH_TOKEN";

/// Passwords with this prefix go through the one-time-password exchange.
const OTP_PREFIX: &str = "otp/";

/// Static page shown at the login surface while the deployment needs an
/// operator to intervene.
const MISCONFIGURATION_HTML: &str = r#"
<h1>Misconfiguration</h1>
<div>There is a misconfiguration with your JupyterHub deployment.</div>
<div>See the logs for the hub pod for details.</div>
<div>In most cases, manually reconfiguring or redeploying JupyterHub fixes the issue.</div>
"#;

/// Backend access-control state, derived fresh for every call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthState {
    /// Pachd auth is not activated; logins use the global password.
    Disabled,

    /// Pachd auth is active; logins exchange credentials with pachd.
    Enabled,

    /// The hub's deploy-time configuration no longer matches pachd.
    /// All logins fail until an operator reconfigures or redeploys.
    Misconfigured(String),
}

/// Immutable configuration handed to the authenticator at construction.
///
/// Secrets live here and nowhere else; there is no ambient or global
/// storage to leak them through.
pub struct AuthenticatorConfig {
    /// Bootstrap token minted at deploy time, absent when pachd auth was
    /// disabled at deploy time.
    pub pach_auth_token: Option<Token>,

    /// Shared password accepted for every user while pachd auth is disabled.
    pub global_password: Option<Token>,
}

/// A user authenticated for this session.
#[derive(Clone, Debug)]
pub struct SessionCredential {
    /// Name the session runs as.
    pub name: String,

    /// User-scoped pachd token, absent for global-password logins.
    pub token: Option<Token>,
}

/// Gate for hub logins backed by pachd's access-control subsystem.
pub struct Authenticator {
    config: AuthenticatorConfig,
    client: Box<dyn PachClient>,
    logger: Logger,
}

impl Authenticator {
    /// Build an authenticator over the given pachd client.
    pub fn new(
        config: AuthenticatorConfig,
        client: Box<dyn PachClient>,
        logger: Logger,
    ) -> Authenticator {
        Authenticator {
            config,
            client,
            logger,
        }
    }

    /// Derive the current backend auth state.
    ///
    /// Transport failures and unknown pachd errors both degrade the request
    /// to [`AuthState::Misconfigured`]: the hub keeps serving, the login
    /// fails, and the reason lands in the hub log for the operator.
    pub async fn probe(&self) -> AuthState {
        let response = match self.client.whoami(self.config.pach_auth_token.as_ref()).await {
            Ok(response) => response,
            Err(error) => {
                error!(
                    self.logger, "auth state probe failed";
                    "error" => error.to_string()
                );
                return AuthState::Misconfigured(error.to_string());
            }
        };
        match classify(&response) {
            AuthProbe::Active => AuthState::Enabled,
            AuthProbe::NotActivated => AuthState::Disabled,
            AuthProbe::MissingToken => {
                error!(
                    self.logger,
                    "JupyterHub is configured to not use Pachyderm auth, even though it \
                     is enabled. Please manually reconfigure, or redeploy JupyterHub."
                );
                AuthState::Misconfigured(response.stderr.trim().to_string())
            }
            AuthProbe::BadToken => {
                error!(
                    self.logger,
                    "JupyterHub is configured with a bad Pachyderm auth token. Please \
                     manually reconfigure, or redeploy JupyterHub."
                );
                AuthState::Misconfigured(response.stderr.trim().to_string())
            }
            AuthProbe::Unexpected(text) => {
                error!(self.logger, "unexpected pachd response during auth probe"; "error" => text.as_str());
                AuthState::Misconfigured(text)
            }
        }
    }

    /// Authenticate a login attempt.
    ///
    /// `None` means the attempt was rejected; no detail about which part was
    /// wrong leaves this function, to avoid username enumeration.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Option<SessionCredential> {
        match self.probe().await {
            AuthState::Misconfigured(_) => None,
            AuthState::Disabled => self.authenticate_global(username, password),
            AuthState::Enabled => self.authenticate_pachd(password).await,
        }
    }

    /// Static HTML for the login surface, when the normal form should be
    /// replaced. `None` keeps the default login form.
    pub async fn custom_login_html(&self) -> Option<String> {
        match self.probe().await {
            AuthState::Misconfigured(_) => Some(MISCONFIGURATION_HTML.to_string()),
            _ => None,
        }
    }

    /// Environment variables to inject into a spawned session.
    ///
    /// Sessions without a stored token (global-password logins) spawn with
    /// no credential injected; that is not an error.
    pub fn pre_spawn_env(credential: &SessionCredential) -> Vec<(String, String)> {
        match &credential.token {
            Some(token) => vec![(SESSION_TOKEN_ENV.to_string(), token.expose().to_string())],
            None => Vec::new(),
        }
    }

    /// Global-password flow: the supplied username is taken as-is.
    fn authenticate_global(&self, username: &str, password: &str) -> Option<SessionCredential> {
        let expected = self.config.global_password.as_ref()?;
        if !expected.matches(password) {
            return None;
        }
        Some(SessionCredential {
            name: username.to_string(),
            token: None,
        })
    }

    /// Pachd-backed flow: exchange the password for a user token, then ask
    /// pachd who that token belongs to. The login-form username is never
    /// trusted to name the session.
    async fn authenticate_pachd(&self, password: &str) -> Option<SessionCredential> {
        let exchange = if password.starts_with(OTP_PREFIX) {
            self.client.authenticate_otp(password).await
        } else {
            self.client.authenticate_id_token(password).await
        };
        let response = match exchange {
            Ok(response) => response,
            Err(error) => {
                error!(self.logger, "auth failed"; "error" => error.to_string());
                return None;
            }
        };
        let token = match classify(&response) {
            AuthProbe::Active => parse_token(&response.stdout),
            _ => {
                error!(self.logger, "auth failed"; "error" => response.stderr.trim());
                return None;
            }
        };
        let token = match token {
            Some(token) => token,
            None => {
                error!(self.logger, "auth failed"; "error" => "no token in pachd exchange response");
                return None;
            }
        };

        let whoami = match self.client.whoami(Some(&token)).await {
            Ok(whoami) => whoami,
            Err(error) => {
                error!(self.logger, "auth failed"; "error" => error.to_string());
                return None;
            }
        };
        let name = match classify(&whoami) {
            AuthProbe::Active => parse_username(&whoami.stdout),
            _ => {
                error!(self.logger, "auth failed"; "error" => whoami.stderr.trim());
                return None;
            }
        };
        match name {
            Some(name) => Some(SessionCredential {
                name,
                token: Some(token),
            }),
            None => {
                error!(self.logger, "auth failed"; "error" => "no identity in pachd whoami response");
                None
            }
        }
    }
}
