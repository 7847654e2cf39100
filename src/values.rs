//! Rendering of the Helm values document consumed by the JupyterHub chart.
//!
//! Key names and nesting are a compatibility surface shared with the
//! unmodified chart and the hub-side authenticator; they are reproduced
//! exactly and must not be renamed.
use anyhow::Result;
use serde::Serialize;

use crate::provision::AdminIdentity;
use crate::secrets::DeploySecrets;

/// Release pins for the images and chart this tool deploys.
#[derive(Clone, Debug)]
pub struct VersionInfo {
    /// Hub image (name, tag).
    pub hub_image: (String, String),

    /// Single-user notebook image (name, tag).
    pub user_image: (String, String),

    /// JupyterHub Helm chart version to install.
    pub chart_version: String,
}

impl VersionInfo {
    /// The pins this release of pachhub deploys.
    pub fn current() -> VersionInfo {
        VersionInfo {
            hub_image: (
                "pachyderm/jupyterhub-pachyderm-hub".to_string(),
                "0.8.2".to_string(),
            ),
            user_image: (
                "pachyderm/jupyterhub-pachyderm-user".to_string(),
                "0.8.2".to_string(),
            ),
            chart_version: "0.8.2".to_string(),
        }
    }
}

/// TLS termination parameters for the hub's public endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TlsParams {
    /// Hostname on the Let's Encrypt certificate.
    pub host: String,

    /// Contact email registered with Let's Encrypt.
    pub contact_email: String,
}

/// Everything the values document is a function of.
pub struct RenderInputs<'a> {
    /// Release pins.
    pub versions: &'a VersionInfo,

    /// Admin identity, present iff pachd auth is enabled.
    pub admin: Option<&'a AdminIdentity>,

    /// Per-run secrets.
    pub secrets: &'a DeploySecrets,

    /// Contents of the pachd root certs bundle, if TLS to pachd is used.
    pub pach_tls_certs: Option<&'a str>,

    /// Hub-side TLS parameters, if requested.
    pub tls: Option<&'a TlsParams>,
}

#[derive(Serialize)]
struct Values {
    hub: Hub,
    singleuser: SingleUser,
    auth: Auth,
    proxy: Proxy,
}

#[derive(Serialize)]
struct Hub {
    image: Image,
    #[serde(rename = "cookieSecret")]
    cookie_secret: String,
}

#[derive(Serialize)]
struct SingleUser {
    image: Image,
}

#[derive(Serialize)]
struct Image {
    name: String,
    tag: String,
}

#[derive(Serialize)]
struct Auth {
    #[serde(rename = "type")]
    auth_type: String,
    custom: CustomAuth,
    #[serde(skip_serializing_if = "Option::is_none")]
    admin: Option<Admin>,
}

#[derive(Serialize)]
struct CustomAuth {
    #[serde(rename = "className")]
    class_name: String,
    config: CustomAuthConfig,
}

#[derive(Serialize)]
struct CustomAuthConfig {
    pach_auth_token: String,
    pach_tls_certs: String,
    global_password: String,
}

#[derive(Serialize)]
struct Admin {
    users: Vec<String>,
}

#[derive(Serialize)]
struct Proxy {
    #[serde(rename = "secretToken")]
    secret_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    https: Option<Https>,
}

#[derive(Serialize)]
struct Https {
    hosts: Vec<String>,
    letsencrypt: LetsEncrypt,
}

#[derive(Serialize)]
struct LetsEncrypt {
    #[serde(rename = "contactEmail")]
    contact_email: String,
}

/// Render the values document.
///
/// Pure and deterministic: identical inputs produce a byte-identical
/// document. Secrets are minted fresh each run by the caller, so documents
/// are only stable within a single render, by design.
pub fn render(inputs: &RenderInputs) -> Result<String> {
    let values = Values {
        hub: Hub {
            image: Image {
                name: inputs.versions.hub_image.0.clone(),
                tag: inputs.versions.hub_image.1.clone(),
            },
            cookie_secret: inputs.secrets.crypt_key.expose().to_string(),
        },
        singleuser: SingleUser {
            image: Image {
                name: inputs.versions.user_image.0.clone(),
                tag: inputs.versions.user_image.1.clone(),
            },
        },
        auth: Auth {
            auth_type: "custom".to_string(),
            custom: CustomAuth {
                class_name: "pachyderm_authenticator.PachydermAuthenticator".to_string(),
                config: CustomAuthConfig {
                    pach_auth_token: inputs
                        .admin
                        .map(|admin| admin.token.expose().to_string())
                        .unwrap_or_default(),
                    pach_tls_certs: inputs.pach_tls_certs.unwrap_or("").to_string(),
                    global_password: inputs.secrets.global_password.expose().to_string(),
                },
            },
            admin: inputs.admin.map(|admin| Admin {
                users: vec![admin.username.clone()],
            }),
        },
        proxy: Proxy {
            secret_token: inputs.secrets.proxy_secret_token.expose().to_string(),
            https: inputs.tls.map(|tls| Https {
                hosts: vec![tls.host.clone()],
                letsencrypt: LetsEncrypt {
                    contact_email: tls.contact_email.clone(),
                },
            }),
        },
    };
    let document = serde_yaml::to_string(&values)?;
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::render;
    use super::RenderInputs;
    use super::TlsParams;
    use super::VersionInfo;
    use crate::provision::AdminIdentity;
    use crate::secrets::DeploySecrets;
    use crate::secrets::Token;

    fn secrets() -> DeploySecrets {
        DeploySecrets {
            global_password: Token::new("pass-secret"),
            crypt_key: Token::new("crypt-secret"),
            proxy_secret_token: Token::new("proxy-secret"),
        }
    }

    fn inputs<'a>(
        versions: &'a VersionInfo,
        secrets: &'a DeploySecrets,
        admin: Option<&'a AdminIdentity>,
        tls: Option<&'a TlsParams>,
    ) -> RenderInputs<'a> {
        RenderInputs {
            versions,
            admin,
            secrets,
            pach_tls_certs: None,
            tls,
        }
    }

    #[test]
    fn render_is_deterministic() {
        let versions = VersionInfo::current();
        let secrets = secrets();
        let first = render(&inputs(&versions, &secrets, None, None)).expect("render");
        let second = render(&inputs(&versions, &secrets, None, None)).expect("render");
        assert_eq!(first, second);
    }

    #[test]
    fn varying_one_secret_changes_only_that_field() {
        let versions = VersionInfo::current();
        let base = secrets();
        let mut changed = secrets();
        changed.proxy_secret_token = Token::new("other-proxy-secret");
        let first = render(&inputs(&versions, &base, None, None)).expect("render");
        let second = render(&inputs(&versions, &changed, None, None)).expect("render");
        let diff: Vec<(&str, &str)> = first
            .lines()
            .zip(second.lines())
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(diff, vec![("  secretToken: proxy-secret", "  secretToken: other-proxy-secret")]);
    }

    #[test]
    fn compatibility_surface_keys_are_exact() {
        let versions = VersionInfo::current();
        let secrets = secrets();
        let admin = AdminIdentity {
            username: "pach:root".to_string(),
            token: Token::new("admintoken"),
        };
        let tls = TlsParams {
            host: "hub.example.com".to_string(),
            contact_email: "ops@example.com".to_string(),
        };
        let document =
            render(&inputs(&versions, &secrets, Some(&admin), Some(&tls))).expect("render");
        for key in [
            "hub:",
            "cookieSecret: crypt-secret",
            "singleuser:",
            "image:",
            "type: custom",
            "className: pachyderm_authenticator.PachydermAuthenticator",
            "pach_auth_token: admintoken",
            "pach_tls_certs: ''",
            "global_password: pass-secret",
            "users:",
            "- pach:root",
            "secretToken: proxy-secret",
            "https:",
            "hosts:",
            "- hub.example.com",
            "letsencrypt:",
            "contactEmail: ops@example.com",
        ] {
            assert!(document.contains(key), "missing '{}' in:\n{}", key, document);
        }
    }

    #[test]
    fn optional_blocks_absent_without_admin_or_tls() {
        let versions = VersionInfo::current();
        let secrets = secrets();
        let document = render(&inputs(&versions, &secrets, None, None)).expect("render");
        assert!(!document.contains("admin:"));
        assert!(!document.contains("https:"));
        assert!(document.contains("pach_auth_token: ''"));
    }
}
