use reconkit_core::Error;

/// Translate a kube-rs error into the reconkit taxonomy.
pub fn map_kube_error(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ae) => map_status(ae.code, &ae.reason, ae.message),
        kube::Error::SerdeError(e) => Error::Codec(e),
        other => Error::Transport(other.to_string()),
    }
}

/// Classify an API server `Status` response by HTTP code and reason.
pub fn map_status(code: u16, reason: &str, message: String) -> Error {
    match code {
        404 => Error::NotFound(message),
        409 if reason == "AlreadyExists" => Error::AlreadyExists(message),
        409 => Error::Conflict(message),
        400 | 422 => Error::Invalid(message),
        401 | 403 => Error::Configuration(format!("{} {}: {}", code, reason, message)),
        408 | 429 | 500..=599 => Error::Transport(format!("{} {}: {}", code, reason, message)),
        _ => Error::Invalid(format!("{} {}: {}", code, reason, message)),
    }
}
