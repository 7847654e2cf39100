//! Typed errors surfaced by pachhub operations.
//!
//! Errors are propagated through `anyhow` chains and downcast at the process
//! boundary to pick the exit code reported to the operator.

/// Errors that abort a deploy or reject a login, with stable exit codes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required external CLI could not be executed at all.
    #[error("required dependency '{0}' is not installed or not on the PATH")]
    DependencyMissing(String),

    /// A context source returned output we could not make sense of.
    #[error("could not parse {source_name} context info: {reason}")]
    ContextParseError { source_name: String, reason: String },

    /// The pachctl and kubectl contexts point at different things.
    #[error(
        "the active pach context's {field} ('{pach}') is not the same as \
         the current kubernetes context's {field} ('{kube}')"
    )]
    ContextMismatch {
        field: String,
        pach: String,
        kube: String,
    },

    /// Pachd returned an error outside its known vocabulary.
    #[error("unexpected response from pachd: {0}")]
    UnexpectedBackendError(String),

    /// The helm install/upgrade step failed.
    #[error("helm failed to deploy JupyterHub (exit code {0})")]
    DeployFailed(i32),
}

impl Error {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::DependencyMissing(_) => 2,
            Error::ContextParseError { .. } => 2,
            Error::ContextMismatch { .. } => 2,
            Error::UnexpectedBackendError(_) => 4,
            Error::DeployFailed(_) => 5,
        }
    }

    /// Context output did not match the shape we expect.
    pub fn context_parse<S1, S2>(source_name: S1, reason: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Error::ContextParseError {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// The two context sources disagree on a field.
    pub fn context_mismatch<F, P, K>(field: F, pach: P, kube: K) -> Self
    where
        F: Into<String>,
        P: Into<String>,
        K: Into<String>,
    {
        Error::ContextMismatch {
            field: field.into(),
            pach: pach.into(),
            kube: kube.into(),
        }
    }

    /// Could not execute a required external command.
    pub fn dependency_missing<P: Into<String>>(program: P) -> Self {
        Error::DependencyMissing(program.into())
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(Error::dependency_missing("helm").exit_code(), 2);
        assert_eq!(Error::context_parse("pach", "no such key").exit_code(), 2);
        assert_eq!(
            Error::context_mismatch("cluster_name", "prod", "staging").exit_code(),
            2
        );
        assert_eq!(
            Error::UnexpectedBackendError("rpc error".to_string()).exit_code(),
            4
        );
        assert_eq!(Error::DeployFailed(1).exit_code(), 5);
    }

    #[test]
    fn mismatch_message_names_the_field() {
        let error = Error::context_mismatch("namespace", "default", "hub");
        let message = error.to_string();
        assert!(message.contains("namespace"));
        assert!(message.contains("'default'"));
        assert!(message.contains("'hub'"));
    }
}
