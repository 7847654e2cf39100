//! The deploy pipeline: verify, provision, render, install, clean up.
//!
//! Each step gates the next; the first failure aborts the run and the
//! secret-bearing values file is removed on every exit path unless debug
//! mode asked to keep it.
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use rand::Rng;
use slog::debug;
use slog::info;
use slog::Logger;

use crate::backend::CliPachClient;
use crate::context;
use crate::error::Error;
use crate::process::CommandSpec;
use crate::process::ProcessRunner;
use crate::provision;
use crate::secrets::DeploySecrets;
use crate::values;
use crate::values::RenderInputs;
use crate::values::TlsParams;
use crate::values::VersionInfo;

/// Helm release name for the hub.
const RELEASE: &str = "jupyterhub";

/// Helm chart installed for the hub.
const CHART: &str = "jupyterhub/jupyterhub";

/// Helm repository the chart is pulled from.
const CHART_REPO: &str = "https://jupyterhub.github.io/helm-chart/";

/// Options accepted by the deploy pipeline.
pub struct DeployOptions {
    /// Keep the values file and echo extra detail.
    pub debug: bool,

    /// Ask helm to simulate the install instead of mutating the cluster.
    pub dry_run: bool,

    /// TLS termination for the hub's public endpoint.
    pub tls: Option<TlsParams>,

    /// Path to a root certs bundle for pachd TLS.
    pub pach_tls_certs_path: Option<String>,
}

/// Outcome of a successful deploy, for callers that want to inspect it.
#[derive(Debug)]
pub struct DeployReport {
    /// Whether pachd auth was enabled at deploy time.
    pub auth_enabled: bool,

    /// Helm output captured during a dry run.
    pub dry_run_output: Option<String>,

    /// Where the values file was kept, if debug asked for it.
    pub kept_values_path: Option<PathBuf>,
}

/// Run the full deploy pipeline.
pub async fn deploy(
    logger: &Logger,
    runner: Arc<dyn ProcessRunner>,
    options: DeployOptions,
) -> Result<DeployReport> {
    println!("===> checking dependencies");
    check_dependencies(runner.as_ref()).await?;

    println!("===> configuring the jupyterhub chart repository");
    configure_chart_repo(runner.as_ref()).await?;

    println!("===> comparing pachyderm/kubernetes contexts");
    let cluster = context::resolve(runner.as_ref()).await?;
    if options.debug {
        println!("cluster: {}", cluster.cluster);
        println!("auth info: {}", cluster.auth_info);
        println!("namespace: {}", cluster.namespace);
    }
    debug!(
        logger, "resolved matching contexts";
        "cluster" => cluster.cluster.as_str(),
        "auth_info" => cluster.auth_info.as_str(),
        "namespace" => cluster.namespace.as_str()
    );

    println!("===> checking pachyderm auth");
    let pach = CliPachClient::new(Arc::clone(&runner))
        .with_tls_certs_path(options.pach_tls_certs_path.clone());
    let admin = provision::provision(&pach).await?;
    info!(
        logger, "provisioned deploy credentials";
        "auth_enabled" => admin.is_some()
    );

    let pach_tls_certs = match &options.pach_tls_certs_path {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("unable to read pach TLS certs at {}", path))?,
        ),
        None => None,
    };

    println!("===> generating config");
    let secrets = DeploySecrets::mint();
    let versions = VersionInfo::current();
    let document = values::render(&RenderInputs {
        versions: &versions,
        admin: admin.as_ref(),
        secrets: &secrets,
        pach_tls_certs: pach_tls_certs.as_deref(),
        tls: options.tls.as_ref(),
    })?;
    let values_file = ValuesFile::write(&document)?;

    println!("===> installing jupyterhub");
    let install = install(
        runner.as_ref(),
        &versions,
        values_file.path(),
        options.dry_run,
    )
    .await;
    let dry_run_output = match install {
        Ok(output) => output,
        Err(error) => {
            // The guard removes the values file on this path too, unless
            // debug asked to keep it for inspection.
            if options.debug {
                let path = values_file.keep();
                eprintln!(
                    "debug: the generated config was kept at {} and contains \
                     sensitive data; delete it once done",
                    path.display(),
                );
            }
            return Err(error);
        }
    };
    if let Some(output) = &dry_run_output {
        print!("{}", output);
    }

    let kept_values_path = if options.debug {
        Some(values_file.keep())
    } else {
        values_file.shred()?;
        None
    };

    println!("===> notes");
    match &admin {
        None => println!(
            "- Since Pachyderm auth doesn't appear to be enabled, JupyterHub will \
             expect the following global password for users: {}",
            secrets.global_password.expose(),
        ),
        Some(admin) => println!(
            "- Pachyderm auth is enabled; '{}' is the designated JupyterHub admin",
            admin.username,
        ),
    }
    if let Some(path) = &kept_values_path {
        println!(
            "- Since debug is enabled, the config was not deleted. Because it contains \
             sensitive data that can compromise your JupyterHub cluster, you should \
             delete it. It's located locally at: {}",
            path.display(),
        );
    }

    Ok(DeployReport {
        auth_enabled: admin.is_some(),
        dry_run_output,
        kept_values_path,
    })
}

/// Verify the external CLIs are installed by asking each for its version.
async fn check_dependencies(runner: &dyn ProcessRunner) -> Result<()> {
    for (program, args) in [
        ("kubectl", vec!["version"]),
        ("pachctl", vec!["version"]),
        ("helm", vec!["version"]),
    ] {
        let mut spec = CommandSpec::new(program);
        for arg in args {
            spec = spec.arg(arg);
        }
        let output = runner.run(spec).await?;
        if !output.success() {
            anyhow::bail!(Error::dependency_missing(program));
        }
    }
    Ok(())
}

/// Add and refresh the helm repository serving the jupyterhub chart.
///
/// Both operations are idempotent so re-running a deploy is safe.
async fn configure_chart_repo(runner: &dyn ProcessRunner) -> Result<()> {
    let add = runner
        .run(
            CommandSpec::new("helm")
                .arg("repo")
                .arg("add")
                .arg("jupyterhub")
                .arg(CHART_REPO),
        )
        .await?;
    if !add.success() {
        anyhow::bail!(Error::DeployFailed(add.code));
    }
    let update = runner
        .run(CommandSpec::new("helm").arg("repo").arg("update"))
        .await?;
    if !update.success() {
        anyhow::bail!(Error::DeployFailed(update.code));
    }
    Ok(())
}

/// Install or upgrade the hub release against the written values file.
///
/// Returns captured helm output when dry-run was requested.
async fn install(
    runner: &dyn ProcessRunner,
    versions: &VersionInfo,
    values_path: &Path,
    dry_run: bool,
) -> Result<Option<String>> {
    let mut spec = CommandSpec::new("helm")
        .arg("upgrade")
        .arg("--install")
        .arg(RELEASE)
        .arg(CHART)
        .arg(format!("--version={}", versions.chart_version))
        .arg(format!("--values={}", values_path.display()));
    if dry_run {
        spec = spec.arg("--dry-run");
    }
    let output = runner.run(spec).await?;
    if !output.success() {
        eprintln!("{}", output.stderr);
        anyhow::bail!(Error::DeployFailed(output.code));
    }
    match dry_run {
        true => Ok(Some(output.stdout)),
        false => Ok(None),
    }
}

/// Scoped owner of the secret-bearing values file.
///
/// The file is created with owner-only permissions and removed when the
/// guard drops, so every exit path out of the pipeline cleans up. Debug
/// mode disarms the guard through [`ValuesFile::keep`].
struct ValuesFile {
    path: PathBuf,
    armed: bool,
}

impl ValuesFile {
    /// Write the document to a fresh file under the system temp directory.
    ///
    /// The file is created owner-only from the start; it never exists with
    /// wider permissions.
    fn write(document: &str) -> Result<ValuesFile> {
        use std::io::Write;

        let path = std::env::temp_dir().join(format!("pachhub-values-{}.yaml", random_suffix(8)));
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&path)
            .with_context(|| format!("unable to create values file at {}", path.display()))?;
        file.write_all(document.as_bytes())
            .with_context(|| format!("unable to write values file at {}", path.display()))?;
        Ok(ValuesFile { path, armed: true })
    }

    /// Path the values document was written to.
    fn path(&self) -> &Path {
        &self.path
    }

    /// Disarm the guard and hand the file over to the operator.
    fn keep(mut self) -> PathBuf {
        self.armed = false;
        self.path.clone()
    }

    /// Overwrite the file with zeros, then remove it.
    fn shred(mut self) -> Result<()> {
        self.armed = false;
        let length = std::fs::metadata(&self.path).map(|meta| meta.len()).unwrap_or(0);
        let _ = std::fs::write(&self.path, vec![0u8; length as usize]);
        std::fs::remove_file(&self.path)
            .with_context(|| format!("unable to remove values file at {}", self.path.display()))
    }
}

impl Drop for ValuesFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn random_suffix(len: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
