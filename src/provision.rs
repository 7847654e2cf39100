//! Deploy-time resolution of the admin identity and bootstrap token.
use anyhow::Result;

use crate::backend::classify;
use crate::backend::parse_token;
use crate::backend::parse_username;
use crate::backend::AuthProbe;
use crate::backend::PachClient;
use crate::error::Error;
use crate::secrets::Token;

/// The admin the hub will act as while auth is enabled.
#[derive(Clone, Debug)]
pub struct AdminIdentity {
    /// Canonical username pachd reports for the admin.
    pub username: String,

    /// Admin-scoped bearer token minted for the hub.
    pub token: Token,
}

/// Determine whether pachd auth is enabled and, if so, mint the hub's
/// bootstrap credential.
///
/// `Ok(None)` means auth is not activated: a valid deployment state, not a
/// failure. Any pachd error outside the known vocabulary aborts the deploy.
pub async fn provision(client: &dyn PachClient) -> Result<Option<AdminIdentity>> {
    let whoami = client.whoami(None).await?;
    let username = match classify(&whoami) {
        AuthProbe::NotActivated => return Ok(None),
        // Auth is enabled: a response that does not carry the identity (or
        // the token below) is protocol drift. Abort loudly instead of
        // deploying a hub that treats an auth-enabled cluster as open.
        AuthProbe::Active => parse_username(&whoami.stdout).ok_or_else(|| {
            Error::UnexpectedBackendError(
                "pachd reported auth enabled but its whoami output carried no identity"
                    .to_string(),
            )
        })?,
        AuthProbe::MissingToken | AuthProbe::BadToken | AuthProbe::Unexpected(_) => {
            anyhow::bail!(Error::UnexpectedBackendError(whoami.stderr.trim().to_string()));
        }
    };

    let response = client.get_auth_token().await?;
    let token = match classify(&response) {
        AuthProbe::NotActivated => return Ok(None),
        AuthProbe::Active => parse_token(&response.stdout).ok_or_else(|| {
            Error::UnexpectedBackendError(
                "pachd reported auth enabled but minted no token".to_string(),
            )
        })?,
        AuthProbe::MissingToken | AuthProbe::BadToken | AuthProbe::Unexpected(_) => {
            anyhow::bail!(Error::UnexpectedBackendError(
                response.stderr.trim().to_string()
            ));
        }
    };

    Ok(Some(AdminIdentity { username, token }))
}
