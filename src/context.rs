//! Resolution and cross-checking of the active pachctl and kubectl contexts.
//!
//! Deploying against one cluster while authenticated to another is the most
//! dangerous mistake this tool can prevent, so both CLIs are asked what they
//! are pointed at and the answers must match exactly.
use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::error::Error;
use crate::process::CommandSpec;
use crate::process::ProcessRunner;

/// Namespace assumed when a context leaves it unset.
pub const DEFAULT_NAMESPACE: &str = "default";

lazy_static! {
    /// Active row of `kubectl config get-contexts <name>`: marker, name,
    /// cluster, authinfo and an optional namespace column, with variable
    /// whitespace between columns.
    static ref KUBE_CONTEXT_ROW: Regex =
        Regex::new(r"(?m)^\* +[^ ]+ +([^ ]+) +([^ ]+) +([^ \n]*)$").expect("invalid kube context regex");
}

/// The cluster/identity/namespace tuple a CLI is currently pointed at.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterContext {
    /// Name of the cluster the context points at.
    pub cluster: String,

    /// Identity the context authenticates as.
    pub auth_info: String,

    /// Namespace operations are scoped to.
    pub namespace: String,
}

/// Shape of a `pachctl config get context <name>` record.
#[derive(Debug, Deserialize)]
struct PachContextRecord {
    #[serde(default)]
    cluster_name: Option<String>,
    #[serde(default)]
    auth_info: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

/// Resolve both CLI contexts and fail unless they agree field by field.
pub async fn resolve(runner: &dyn ProcessRunner) -> Result<ClusterContext> {
    let pach = pach_context(runner).await?;
    let kube = kube_context(runner).await?;

    for (field, pach_value, kube_value) in [
        ("cluster name", &pach.cluster, &kube.cluster),
        ("auth info", &pach.auth_info, &kube.auth_info),
        ("namespace", &pach.namespace, &kube.namespace),
    ] {
        if pach_value != kube_value {
            anyhow::bail!(Error::context_mismatch(field, pach_value, kube_value));
        }
    }
    Ok(pach)
}

/// Fetch and parse the active pachctl context.
pub async fn pach_context(runner: &dyn ProcessRunner) -> Result<ClusterContext> {
    let name = runner
        .run(
            CommandSpec::new("pachctl")
                .arg("config")
                .arg("get")
                .arg("active-context"),
        )
        .await?;
    if !name.success() {
        anyhow::bail!(Error::context_parse("pach", name.stderr.trim()));
    }
    let name = name.stdout.trim().to_string();

    let record = runner
        .run(
            CommandSpec::new("pachctl")
                .arg("config")
                .arg("get")
                .arg("context")
                .arg(&name),
        )
        .await?;
    if !record.success() {
        anyhow::bail!(Error::context_parse("pach", record.stderr.trim()));
    }
    parse_pach_context(&record.stdout)
}

/// Parse the JSON context record printed by pachctl.
fn parse_pach_context(payload: &str) -> Result<ClusterContext> {
    let record: PachContextRecord = serde_json::from_str(payload)
        .map_err(|error| Error::context_parse("pach", error.to_string()))?;
    let cluster = record
        .cluster_name
        .ok_or_else(|| Error::context_parse("pach", "context record has no cluster_name"))?;
    let auth_info = record
        .auth_info
        .ok_or_else(|| Error::context_parse("pach", "context record has no auth_info"))?;
    let namespace = match record.namespace {
        Some(namespace) if !namespace.is_empty() => namespace,
        _ => DEFAULT_NAMESPACE.to_string(),
    };
    Ok(ClusterContext {
        cluster,
        auth_info,
        namespace,
    })
}

/// Fetch and parse the current kubectl context.
pub async fn kube_context(runner: &dyn ProcessRunner) -> Result<ClusterContext> {
    let name = runner
        .run(
            CommandSpec::new("kubectl")
                .arg("config")
                .arg("current-context"),
        )
        .await?;
    if !name.success() {
        anyhow::bail!(Error::context_parse("kube", name.stderr.trim()));
    }
    let name = name.stdout.trim().to_string();

    let listing = runner
        .run(
            CommandSpec::new("kubectl")
                .arg("config")
                .arg("get-contexts")
                .arg(&name),
        )
        .await?;
    if !listing.success() {
        anyhow::bail!(Error::context_parse("kube", listing.stderr.trim()));
    }
    parse_kube_context(&listing.stdout)
}

/// Extract the active row from the tabular `kubectl config get-contexts`
/// output. kubectl has no structured-output mode for this listing, so the
/// column parse is load-bearing.
fn parse_kube_context(listing: &str) -> Result<ClusterContext> {
    let captures = KUBE_CONTEXT_ROW
        .captures(listing)
        .ok_or_else(|| Error::context_parse("kube", "no active context row in listing"))?;
    let cluster = captures[1].to_string();
    let auth_info = captures[2].to_string();
    let namespace = match &captures[3] {
        "" => DEFAULT_NAMESPACE.to_string(),
        namespace => namespace.to_string(),
    };
    Ok(ClusterContext {
        cluster,
        auth_info,
        namespace,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_kube_context;
    use super::parse_pach_context;
    use super::resolve;
    use super::ClusterContext;
    use crate::error::Error;
    use crate::process::fixtures::ScriptedRunner;

    const KUBE_LISTING: &str = "CURRENT   NAME      CLUSTER   AUTHINFO     NAMESPACE\n\
        *         prod      prod      admin@prod   hub\n";
    const KUBE_LISTING_NO_NAMESPACE: &str = "CURRENT   NAME   CLUSTER   AUTHINFO     NAMESPACE\n\
        *         prod   prod      admin@prod   \n";

    #[test]
    fn pach_context_parses_record() {
        let payload = r#"{"cluster_name": "prod", "auth_info": "admin@prod", "namespace": "hub"}"#;
        let context = parse_pach_context(payload).expect("context to parse");
        assert_eq!(
            context,
            ClusterContext {
                cluster: "prod".to_string(),
                auth_info: "admin@prod".to_string(),
                namespace: "hub".to_string(),
            }
        );
    }

    #[test]
    fn pach_context_defaults_namespace() {
        let payload = r#"{"cluster_name": "prod", "auth_info": "admin@prod", "namespace": ""}"#;
        let context = parse_pach_context(payload).expect("context to parse");
        assert_eq!(context.namespace, "default");
    }

    #[test]
    fn pach_context_missing_key_is_parse_error() {
        let payload = r#"{"auth_info": "admin@prod"}"#;
        let error = parse_pach_context(payload).expect_err("parse to fail");
        let error = error.downcast_ref::<Error>().expect("typed error");
        assert!(matches!(error, Error::ContextParseError { .. }));
    }

    #[test]
    fn kube_context_parses_active_row() {
        let context = parse_kube_context(KUBE_LISTING).expect("context to parse");
        assert_eq!(context.cluster, "prod");
        assert_eq!(context.auth_info, "admin@prod");
        assert_eq!(context.namespace, "hub");
    }

    #[test]
    fn kube_context_defaults_missing_namespace() {
        let context = parse_kube_context(KUBE_LISTING_NO_NAMESPACE).expect("context to parse");
        assert_eq!(context.namespace, "default");
    }

    #[test]
    fn kube_context_ignores_inactive_rows() {
        let listing = "CURRENT   NAME      CLUSTER   AUTHINFO      NAMESPACE\n\
            \x20         staging   staging   dev@staging   \n";
        let error = parse_kube_context(listing).expect_err("parse to fail");
        let error = error.downcast_ref::<Error>().expect("typed error");
        assert!(matches!(error, Error::ContextParseError { .. }));
    }

    fn scripted(pach_record: &str, kube_listing: &str) -> ScriptedRunner {
        ScriptedRunner::default()
            .with_output("pachctl config get active-context", 0, "prod-ctx\n", "")
            .with_output("pachctl config get context prod-ctx", 0, pach_record, "")
            .with_output("kubectl config current-context", 0, "prod\n", "")
            .with_output("kubectl config get-contexts prod", 0, kube_listing, "")
    }

    #[tokio::test]
    async fn resolve_accepts_matching_contexts_with_defaulted_namespace() {
        let runner = scripted(
            r#"{"cluster_name": "prod", "auth_info": "admin@prod", "namespace": ""}"#,
            KUBE_LISTING_NO_NAMESPACE,
        );
        let context = resolve(&runner).await.expect("contexts to match");
        assert_eq!(context.namespace, "default");
    }

    #[tokio::test]
    async fn resolve_rejects_cluster_mismatch() {
        let runner = scripted(
            r#"{"cluster_name": "staging", "auth_info": "admin@prod", "namespace": "hub"}"#,
            KUBE_LISTING,
        );
        let error = resolve(&runner).await.expect_err("contexts to mismatch");
        let error = error.downcast_ref::<Error>().expect("typed error");
        match error {
            Error::ContextMismatch { field, pach, kube } => {
                assert_eq!(field, "cluster name");
                assert_eq!(pach, "staging");
                assert_eq!(kube, "prod");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
