//! Key and channel names for per-request correlation state

/// Providers that have not answered request `request_id` yet
pub fn pending_providers(request_id: &str) -> String {
    format!("pending-providers:{request_id}")
}

/// Serialized proposals collected for `request_id`, in arrival order
pub fn routes(request_id: &str) -> String {
    format!("routes:{request_id}")
}

/// Status notifications for `request_id`
pub fn status_channel(request_id: &str) -> String {
    format!("routes-status:{request_id}")
}

/// Set once the completion notification for `request_id` has been claimed
pub fn completed_marker(request_id: &str) -> String {
    format!("routes-completed:{request_id}")
}

/// Set once `source` has contributed its proposals to `request_id`
pub fn appended_marker(request_id: &str, source: &str) -> String {
    format!("routes-appended:{request_id}:{source}")
}
