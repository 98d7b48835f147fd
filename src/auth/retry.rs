use reqwest::StatusCode;

/// Request-scoped metadata carried across the transparent-refresh cycle.
///
/// The retried-once flag lives on the request, not on the manager, so
/// concurrent requests are each retried independently and at most once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub retried: bool,
}

/// Decide whether an authorization failure should trigger a
/// refresh-and-resubmit cycle for this request.
pub fn should_retry(status: StatusCode, meta: RequestMeta) -> bool {
    status == StatusCode::UNAUTHORIZED && !meta.retried
}
