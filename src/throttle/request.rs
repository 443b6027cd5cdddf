//! Normalized view of an incoming request.

/// A client request as seen by the throttle processor.
///
/// Verb and path are lower-cased on construction so that endpoint matching
/// and counter keys are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientRequest {
    /// Caller identity; empty when the caller could not be identified
    pub client_id: String,
    /// Lower-cased HTTP verb
    pub http_verb: String,
    /// Lower-cased request path
    pub path: String,
}

impl ClientRequest {
    pub fn new(client_id: impl Into<String>, http_verb: &str, path: &str) -> Self {
        Self {
            client_id: client_id.into(),
            http_verb: http_verb.to_lowercase(),
            path: path.to_lowercase(),
        }
    }

    /// The `verb:path` string endpoint patterns are matched against.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.http_verb, self.path).to_lowercase()
    }
}
