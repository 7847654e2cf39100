//! Deploy and gate access to JupyterHub on a Pachyderm cluster.
//!
//! The binary drives the deploy pipeline; the library additionally exposes
//! the runtime [`auth::Authenticator`] for the hub-side login adapter.
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

pub mod auth;
pub mod backend;
pub mod context;
pub mod deploy;
pub mod error;
pub mod logging;
pub mod process;
pub mod provision;
pub mod secrets;
pub mod values;

pub use self::error::Error;

use self::deploy::DeployOptions;
use self::process::SystemRunner;
use self::values::TlsParams;

/// Set up JupyterHub on a kubernetes cluster that has Pachyderm running on it.
#[derive(Debug, Parser)]
#[command(name = "pachhub", about, version)]
pub struct Cli {
    /// Keep the generated config for inspection and echo extra detail.
    #[arg(long)]
    pub debug: bool,

    /// Ask helm to simulate the install instead of mutating the cluster.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Enable TLS on JupyterHub via Let's Encrypt for this hostname.
    /// Requires --tls-email.
    #[arg(long = "tls-host")]
    pub tls_host: Option<String>,

    /// Contact email for the Let's Encrypt certificate.
    /// Requires --tls-host.
    #[arg(long = "tls-email")]
    pub tls_email: Option<String>,

    /// Path to a root certs file for Pachyderm TLS.
    #[arg(long = "pach-tls-certs-path")]
    pub pach_tls_certs_path: Option<String>,

    /// Logging configuration.
    #[command(flatten)]
    pub log: logging::LogOpt,
}

/// Initialise the pachhub process and run the deploy pipeline.
///
/// Returns the process exit code; errors are printed here, exactly once.
pub async fn run() -> Result<i32> {
    let cli = Cli::parse();

    // TLS host and email only make sense together.
    match (&cli.tls_host, &cli.tls_email) {
        (Some(_), None) => {
            eprintln!("TLS host specified, but no email");
            return Ok(1);
        }
        (None, Some(_)) => {
            eprintln!("TLS email specified, but no host");
            return Ok(1);
        }
        _ => (),
    }
    let tls = cli.tls_host.clone().zip(cli.tls_email.clone()).map(
        |(host, contact_email)| TlsParams {
            host,
            contact_email,
        },
    );

    let logger = logging::configure(&cli.log, cli.debug)?;
    let options = DeployOptions {
        debug: cli.debug,
        dry_run: cli.dry_run,
        tls,
        pach_tls_certs_path: cli.pach_tls_certs_path.clone(),
    };
    let runner = Arc::new(SystemRunner);
    match deploy::deploy(&logger, runner, options).await {
        Ok(_) => Ok(0),
        Err(error) => {
            if cli.debug {
                eprintln!("{:?}", error);
            } else {
                eprintln!("{:#}", error);
            }
            let code = error
                .downcast_ref::<Error>()
                .map(Error::exit_code)
                .unwrap_or(1);
            Ok(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use clap::Parser;

    use super::Cli;

    #[test]
    fn clap_integrity_check() {
        let command = Cli::command();
        command.debug_assert();
    }

    #[test]
    fn tls_flags_parse() {
        let cli = Cli::parse_from([
            "pachhub",
            "--tls-host",
            "hub.example.com",
            "--tls-email",
            "ops@example.com",
            "--dry-run",
        ]);
        assert_eq!(cli.tls_host.as_deref(), Some("hub.example.com"));
        assert_eq!(cli.tls_email.as_deref(), Some("ops@example.com"));
        assert!(cli.dry_run);
        assert!(!cli.debug);
    }
}
