//! Secret generation and the redacting [`Token`] wrapper.
use rand::rngs::OsRng;
use rand::RngCore;

/// Number of random bytes behind every minted secret.
const SECRET_BYTES: usize = 32;

/// An opaque bearer token or shared secret.
///
/// The wrapper exists to keep secrets out of logs and error messages:
/// `Display` and `Debug` both redact. Code that must write the actual value
/// (config render, environment injection, operator notes) goes through
/// [`Token::expose`].
#[derive(Clone, Eq, PartialEq)]
pub struct Token(String);

impl Token {
    /// Wrap an existing secret string.
    pub fn new<S: Into<String>>(secret: S) -> Token {
        Token(secret.into())
    }

    /// Access the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Compare the secret against a candidate without short-circuiting.
    ///
    /// Always scans the full candidate so rejection time does not depend on
    /// the position of the first differing byte.
    pub fn matches(&self, candidate: &str) -> bool {
        let secret = self.0.as_bytes();
        let candidate = candidate.as_bytes();
        let mut diff = secret.len() ^ candidate.len();
        for (index, byte) in candidate.iter().enumerate() {
            let expected = secret.get(index % secret.len().max(1)).copied().unwrap_or(0);
            diff |= usize::from(expected ^ byte);
        }
        diff == 0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.0.get(..6) {
            Some(prefix) => write!(f, "{}[redacted]", prefix),
            None => write!(f, "[redacted]"),
        }
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Token([redacted])")
    }
}

/// Mint a fresh 32-byte secret, hex encoded.
pub fn mint() -> Token {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let mut encoded = String::with_capacity(SECRET_BYTES * 2);
    for byte in bytes {
        encoded.push_str(&format!("{:02x}", byte));
    }
    Token(encoded)
}

/// The secrets minted once per deploy run.
///
/// All three are generated even when Pachyderm auth is enabled: the global
/// password is simply never handed out in that case.
pub struct DeploySecrets {
    /// Shared login password used only while Pachyderm auth is disabled.
    pub global_password: Token,

    /// Key used by the hub to encrypt persisted auth state.
    pub crypt_key: Token,

    /// Secret shared between the hub and the configurable proxy.
    pub proxy_secret_token: Token,
}

impl DeploySecrets {
    /// Mint the full set of per-run secrets.
    pub fn mint() -> DeploySecrets {
        DeploySecrets {
            global_password: mint(),
            crypt_key: mint(),
            proxy_secret_token: mint(),
        }
    }
}
