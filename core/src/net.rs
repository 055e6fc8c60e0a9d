//! Scoped network capability.
//!
//! Hosts are matched by literal equality against the allowlist before any
//! connection is opened. Requests are synchronous with fixed connect/read
//! timeouts; the calling snippet blocks until completion.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::capability::CapabilityState;
use crate::capability::RevocationGuard;
use crate::capability::SandboxContext;
use crate::error::Result;
use crate::error::SecurityErr;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct Network {
    allowed_hosts: HashSet<String>,
    ctx: Arc<SandboxContext>,
    state: Arc<CapabilityState>,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("allowed_hosts", &self.allowed_hosts)
            .finish_non_exhaustive()
    }
}

/// Grant a network capability for the duration of `f`; revoked on every
/// exit path.
pub fn request_network<R>(
    ctx: &Arc<SandboxContext>,
    hosts: impl IntoIterator<Item = String>,
    f: impl FnOnce(&Network) -> Result<R>,
) -> Result<R> {
    ctx.check_effects_allowed()?;
    let network = Network::new(hosts.into_iter().collect(), ctx.clone());
    let _guard = RevocationGuard::new(network.capability_state());
    f(&network)
}

impl Network {
    pub(crate) fn new(allowed_hosts: HashSet<String>, ctx: Arc<SandboxContext>) -> Self {
        Self {
            allowed_hosts,
            ctx,
            state: CapabilityState::new(),
        }
    }

    pub(crate) fn capability_state(&self) -> Arc<CapabilityState> {
        self.state.clone()
    }

    /// Synchronous GET; returns the response body as text.
    pub fn http_get(&self, url: &str) -> Result<String> {
        let url = self.check_url(url)?;
        let response = client()?.get(url).send()?;
        Ok(response.text()?)
    }

    /// Synchronous POST; returns the response body as text.
    pub fn http_post(&self, url: &str, body: &str, content_type: &str) -> Result<String> {
        let url = self.check_url(url)?;
        let response = client()?
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body.to_string())
            .send()?;
        Ok(response.text()?)
    }

    /// Extract the host and reject it before any connection is attempted.
    fn check_url(&self, url: &str) -> Result<reqwest::Url> {
        self.ctx.check_effects_allowed()?;
        self.state.check_live()?;
        let parsed = reqwest::Url::parse(url).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid URL: {e}"))
        })?;
        let host = parsed.host_str().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "URL has no host")
        })?;
        if !self.allowed_hosts.contains(host) {
            return Err(SecurityErr::HostNotAllowed {
                host: host.to_string(),
            }
            .into());
        }
        Ok(parsed)
    }
}

fn client() -> Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(READ_TIMEOUT)
        .build()?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::Config;
    use crate::error::SafeExecErr;

    fn context() -> Arc<SandboxContext> {
        SandboxContext::new(&Config {
            record_dir: None,
            strict_mode: false,
            classified_paths: Vec::new(),
            chat: None,
            quiet: false,
            wrap_code: true,
            sessions_enabled: true,
        })
    }

    #[test]
    fn disallowed_host_is_rejected_without_connecting() {
        let ctx = context();
        let err = request_network(&ctx, vec!["api.example.com".to_string()], |net| {
            net.http_get("https://evil.example.org/data")
        })
        .unwrap_err();
        assert!(matches!(
            err,
            SafeExecErr::Security(SecurityErr::HostNotAllowed { .. })
        ));
    }

    #[test]
    fn host_match_is_literal_not_suffix() {
        let ctx = context();
        let err = request_network(&ctx, vec!["example.com".to_string()], |net| {
            net.http_get("https://notexample.com/")
        })
        .unwrap_err();
        assert!(matches!(err, SafeExecErr::Security(_)));

        let err = request_network(&ctx, vec!["example.com".to_string()], |net| {
            net.http_get("https://sub.example.com/")
        })
        .unwrap_err();
        assert!(matches!(err, SafeExecErr::Security(_)));
    }

    #[test]
    fn invalid_url_is_a_runtime_error() {
        let ctx = context();
        let err = request_network(&ctx, vec!["example.com".to_string()], |net| {
            net.http_get("not a url")
        })
        .unwrap_err();
        assert!(matches!(err, SafeExecErr::Io(_)));
    }

    #[test]
    fn leaked_network_capability_is_revoked() {
        let ctx = context();
        let leaked =
            request_network(&ctx, vec!["example.com".to_string()], |net| Ok(net.clone()))
                .unwrap();
        let err = leaked.http_get("https://example.com/").unwrap_err();
        assert!(matches!(
            err,
            SafeExecErr::Security(SecurityErr::Revoked)
        ));
    }
}
