//! Named interpreter sessions and the manager that owns them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::error::SafeExecErr;
use crate::interpreter::ExecutionResult;
use crate::interpreter::InterpreterSession;

/// One live interpreter addressable by id. Execution is serialized: a
/// second `execute` against the same session blocks until the first
/// returns.
pub struct Session {
    id: String,
    interpreter: Mutex<InterpreterSession>,
}

impl Session {
    fn new(config: &Config) -> Result<Self> {
        // 128-bit random ids: unguessable enough that clients cannot hijack
        // each other's sessions by collision.
        let id = Uuid::new_v4().simple().to_string();
        Ok(Self {
            id,
            interpreter: Mutex::new(InterpreterSession::new(config)?),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn execute(&self, code: &str) -> ExecutionResult {
        lock_ignore_poison(&self.interpreter).execute(code)
    }
}

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Creates, tracks and disposes sessions. Sessions share nothing with each
/// other; the manager only maps ids to instances.
pub struct SessionManager {
    config: Config,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a fresh session and return its id.
    pub fn create(&self) -> Result<String> {
        let session = Arc::new(Session::new(&self.config)?);
        let id = session.id().to_string();
        lock_ignore_poison(&self.sessions).insert(id.clone(), session);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        lock_ignore_poison(&self.sessions).get(id).cloned()
    }

    /// Remove and destroy a session. Returns whether it existed.
    pub fn delete(&self, id: &str) -> bool {
        lock_ignore_poison(&self.sessions).remove(id).is_some()
    }

    /// Delegate to a named session; unknown ids are a domain error carrying
    /// the missing id.
    pub fn execute_in(&self, id: &str, code: &str) -> Result<ExecutionResult> {
        let session = self
            .get(id)
            .ok_or_else(|| SafeExecErr::SessionNotFound(id.to_string()))?;
        Ok(session.execute(code))
    }

    /// Run `code` in a one-shot session that never enters the map.
    pub fn execute_stateless(&self, code: &str) -> Result<ExecutionResult> {
        let session = Session::new(&self.config)?;
        Ok(session.execute(code))
    }

    /// Snapshot of live session ids, sorted for deterministic output.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock_ignore_poison(&self.sessions).keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn config() -> Config {
        Config {
            record_dir: None,
            strict_mode: false,
            classified_paths: Vec::new(),
            chat: None,
            quiet: false,
            wrap_code: true,
            sessions_enabled: true,
        }
    }

    #[test]
    fn create_execute_delete_lifecycle() {
        let manager = SessionManager::new(config());
        let id = manager.create().unwrap();
        assert_eq!(manager.list(), vec![id.clone()]);

        let result = manager.execute_in(&id, "2 + 3").unwrap();
        assert!(result.success);
        assert!(result.output.contains('5'));

        assert!(manager.delete(&id));
        assert!(!manager.delete(&id));
        assert!(manager.list().is_empty());
    }

    #[test]
    fn unknown_session_is_a_domain_error() {
        let manager = SessionManager::new(config());
        let err = manager.execute_in("missing-id", "1").unwrap_err();
        match err {
            SafeExecErr::SessionNotFound(id) => assert_eq!(id, "missing-id"),
            other => panic!("expected SessionNotFound, got {other}"),
        }
    }

    #[test]
    fn sessions_are_independent() {
        let manager = SessionManager::new(config());
        let a = manager.create().unwrap();
        let b = manager.create().unwrap();

        manager.execute_in(&a, "let x = 1;").unwrap();
        let result = manager.execute_in(&b, "x").unwrap();
        // `x` only exists in session a.
        assert!(!result.success);
    }

    #[test]
    fn session_ids_are_unique() {
        let manager = SessionManager::new(config());
        let a = manager.create().unwrap();
        let b = manager.create().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn stateless_execution_leaves_no_session_behind() {
        let manager = SessionManager::new(config());
        let result = manager.execute_stateless("1 + 1").unwrap();
        assert!(result.success);
        assert!(result.output.contains('2'));
        assert!(manager.list().is_empty());
    }
}
