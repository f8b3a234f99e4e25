use thiserror::Error;

/// Domain error kinds. Everything else (I/O, network, object-store transport
/// failures) propagates as an opaque `anyhow::Error` instead of a variant
/// here — only template/argument defects get a tagged type the driver can
/// distinguish from infrastructure failures.
#[derive(Debug, Error)]
pub enum CfnPlusError {
    #[error("{0}")]
    InvalidTemplate(String),

    #[error("{0}")]
    InvalidArgument(String),
}

impl CfnPlusError {
    pub fn invalid_template(msg: impl Into<String>) -> anyhow::Error {
        CfnPlusError::InvalidTemplate(msg.into()).into()
    }

    pub fn invalid_argument(msg: impl Into<String>) -> anyhow::Error {
        CfnPlusError::InvalidArgument(msg.into()).into()
    }
}

/// True if the error (or one of its causes) is a domain `CfnPlusError`
/// rather than an infrastructure failure. Used by the transactional driver
/// to decide whether undo is still warranted — currently both kinds trigger
/// undo, but this lets callers branch on it separately if they need to.
pub fn is_domain_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<CfnPlusError>().is_some()
}

/// Prefix an `InvalidTemplate` error's message with the template's basename,
/// per the error handling design. Leaves other error kinds untouched.
pub fn with_template_basename(err: anyhow::Error, template_path: Option<&str>) -> anyhow::Error {
    let Some(path) = template_path else { return err };
    let basename = std::path::Path::new(path)
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());

    match err.downcast::<CfnPlusError>() {
        Ok(CfnPlusError::InvalidTemplate(msg)) => {
            CfnPlusError::InvalidTemplate(format!("{}: {}", basename, msg)).into()
        }
        Ok(other) => other.into(),
        Err(err) => err,
    }
}
