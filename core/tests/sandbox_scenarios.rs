//! End-to-end scenarios against the sandbox engine: validation, session
//! state, classified segregation, capability revocation and chat gating,
//! driven through the same entry points the broker uses.

#![allow(clippy::unwrap_used)]

use std::path::PathBuf;

use safeexec_core::Config;
use safeexec_core::SessionManager;

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

fn config_with_classified(paths: Vec<PathBuf>) -> Config {
    Config {
        classified_paths: paths,
        ..config()
    }
}

#[test]
fn stateless_arithmetic_produces_the_value() {
    let manager = SessionManager::new(config());
    let result = manager.execute_stateless("1 + 1").unwrap();
    assert!(result.success, "error: {:?}", result.error);
    assert!(result.output.contains('2'));
}

#[test]
fn stateless_forbidden_import_is_rejected_with_rule_id() {
    let manager = SessionManager::new(config());
    let result = manager.execute_stateless("import \"fs\" as host_fs;").unwrap();
    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.starts_with("Code validation failed"), "{error}");
    assert!(error.contains("file-io-"), "{error}");
}

#[test]
fn session_state_survives_across_calls() {
    let manager = SessionManager::new(config());
    let id = manager.create().unwrap();

    let first = manager.execute_in(&id, "let x = 42;").unwrap();
    assert!(first.success, "error: {:?}", first.error);

    let second = manager.execute_in(&id, "x * 2").unwrap();
    assert!(second.success, "error: {:?}", second.error);
    assert!(second.output.contains("84"));
}

#[test]
fn classified_read_is_denied_and_content_never_leaks() {
    let dir = tempfile::TempDir::new().unwrap();
    let secrets = dir.path().join("secrets");
    std::fs::create_dir(&secrets).unwrap();
    std::fs::write(secrets.join("x.txt"), "TOPSECRET-VALUE").unwrap();

    let manager = SessionManager::new(config_with_classified(vec![secrets]));
    let code = format!(
        r#"request_filesystem("{root}", |fs| fs.access("secrets/x.txt").read())"#,
        root = dir.path().display()
    );
    let result = manager.execute_stateless(&code).unwrap();
    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("classified"), "{error}");
    assert!(!error.contains("TOPSECRET-VALUE"));
    assert!(!result.output.contains("TOPSECRET-VALUE"));
}

#[test]
fn classified_write_then_read_round_trips_under_the_wrapper() {
    let dir = tempfile::TempDir::new().unwrap();
    let secrets = dir.path().join("secrets");
    std::fs::create_dir(&secrets).unwrap();

    let manager = SessionManager::new(config_with_classified(vec![secrets.clone()]));
    let code = format!(
        r#"
request_filesystem("{root}", |fs| {{
    let entry = fs.access("secrets/token.txt");
    entry.write_classified(classify("tok-123"));
    entry.read_classified().map(|v| v.len)
}})
"#,
        root = dir.path().display()
    );
    let result = manager.execute_stateless(&code).unwrap();
    assert!(result.success, "error: {:?}", result.error);
    // The classified value is only ever displayed opaquely.
    assert!(result.output.contains("Classified(***)"));
    assert!(!result.output.contains("tok-123"));
    // The write really happened.
    assert_eq!(
        std::fs::read_to_string(secrets.join("token.txt")).unwrap(),
        "tok-123"
    );
}

#[test]
fn chat_without_endpoint_reports_not_configured() {
    let manager = SessionManager::new(config());
    let result = manager.execute_stateless(r#"chat("hello")"#).unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("not configured"));
}

#[test]
fn no_sessions_exist_before_any_are_created() {
    let manager = SessionManager::new(config());
    assert!(manager.list().is_empty());
}

#[test]
fn leaked_capability_is_dead_outside_its_scope() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), "data").unwrap();

    let manager = SessionManager::new(config());
    let code = format!(
        r#"
let leaked = ();
request_filesystem("{root}", |fs| {{ leaked = fs; true }});
leaked.access("a.txt")
"#,
        root = dir.path().display()
    );
    let result = manager.execute_stateless(&code).unwrap();
    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.starts_with("SecurityException:"), "{error}");
    assert!(error.contains("outside its granting scope"), "{error}");
}

#[test]
fn exec_runs_inside_granted_scope() {
    let manager = SessionManager::new(config());
    let result = manager
        .execute_stateless(
            r#"request_exec_permission(["echo"], |perm| perm.exec("echo", ["from-sandbox"], 5000).stdout)"#,
        )
        .unwrap();
    assert!(result.success, "error: {:?}", result.error);
    assert!(result.output.contains("from-sandbox"));
}

#[test]
fn strict_mode_blocks_file_commands_from_scripts() {
    let strict_config = Config {
        strict_mode: true,
        ..config()
    };
    let manager = SessionManager::new(strict_config);
    let result = manager
        .execute_stateless(
            r#"request_exec_permission(["cat"], |perm| perm.exec("cat", ["/etc/hostname"], 5000))"#,
        )
        .unwrap();
    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.starts_with("SecurityException:"), "{error}");
    assert!(error.contains("strict mode"), "{error}");
}

#[test]
fn disallowed_host_is_denied_from_scripts() {
    let manager = SessionManager::new(config());
    let result = manager
        .execute_stateless(
            r#"request_network(["api.example.com"], |net| net.http_get("https://other.example.com/"))"#,
        )
        .unwrap();
    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("allowlist"), "{error}");
}

#[test]
fn grep_is_reachable_from_scripts() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("log.txt"), "ok\nerror: boom\nok").unwrap();

    let manager = SessionManager::new(config());
    let code = format!(
        r#"
request_filesystem("{root}", |fs| {{
    let hits = fs.grep("log.txt", "^error:");
    for hit in hits {{
        print(`${{hit.line_number}}: ${{hit.line}}`);
    }}
    hits.len()
}})
"#,
        root = dir.path().display()
    );
    let result = manager.execute_stateless(&code).unwrap();
    assert!(result.success, "error: {:?}", result.error);
    assert!(result.output.contains("2: error: boom"));
    assert!(result.output.contains('1'));
}
