//! Capability plumbing shared by the filesystem, process and network
//! surfaces: the per-session sandbox context, the revocation shell that
//! bounds a capability's lifetime to its granting scope, and the purity
//! guard used by classified transforms.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::config::ChatEndpoint;
use crate::config::Config;
use crate::error::Result;
use crate::error::SecurityErr;

/// The frozen slice of configuration every capability consults, plus the
/// purity flag flipped for the duration of a classified transform. One
/// context per interpreter session.
#[derive(Debug)]
pub struct SandboxContext {
    pub strict_mode: bool,
    /// Absolute, normalized.
    pub classified_paths: Vec<PathBuf>,
    pub chat: Option<ChatEndpoint>,
    pure_depth: AtomicUsize,
}

impl SandboxContext {
    pub fn new(config: &Config) -> Arc<Self> {
        Arc::new(Self {
            strict_mode: config.strict_mode,
            classified_paths: config.classified_paths.clone(),
            chat: config.chat.clone(),
            pure_depth: AtomicUsize::new(0),
        })
    }

    /// Every side-effecting primitive calls this first. Inside a classified
    /// transform the ambient capabilities are considered revoked.
    pub fn check_effects_allowed(&self) -> Result<()> {
        if self.pure_depth.load(Ordering::SeqCst) > 0 {
            return Err(SecurityErr::PureContext.into());
        }
        Ok(())
    }

    /// Enter a pure region. Effects are re-enabled when the guard drops;
    /// nesting is counted so chained transforms compose.
    pub fn enter_pure_region(self: &Arc<Self>) -> PureRegionGuard {
        self.pure_depth.fetch_add(1, Ordering::SeqCst);
        PureRegionGuard { ctx: self.clone() }
    }
}

pub struct PureRegionGuard {
    ctx: Arc<SandboxContext>,
}

impl Drop for PureRegionGuard {
    fn drop(&mut self) {
        self.ctx.pure_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Revocation shell: capability values cross into the interpreter as
/// clonable handles, so their lifetime cannot be bounded by a borrow.
/// Instead the granting combinator revokes this shared state on every exit
/// path and every primitive checks it before acting. A leaked handle keeps
/// existing but no operation through it can succeed.
#[derive(Debug, Default)]
pub struct CapabilityState {
    revoked: AtomicBool,
}

impl CapabilityState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn check_live(&self) -> Result<()> {
        if self.revoked.load(Ordering::SeqCst) {
            return Err(SecurityErr::Revoked.into());
        }
        Ok(())
    }

    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }
}

/// Revokes the wrapped capability state on drop, covering early returns and
/// unwinding callbacks alike.
pub struct RevocationGuard {
    state: Arc<CapabilityState>,
}

impl RevocationGuard {
    pub fn new(state: Arc<CapabilityState>) -> Self {
        Self { state }
    }
}

impl Drop for RevocationGuard {
    fn drop(&mut self) {
        self.state.revoke();
    }
}
