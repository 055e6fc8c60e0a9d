//! One embedded interpreter instance plus its captured output.
//!
//! Each session owns a locked-down Rhai engine and a persistent scope.
//! `execute` runs the validator first, evaluates the snippet with all
//! script output redirected into the session buffer, and post-scans the
//! captured output for compiler-diagnostic markers.

use std::sync::Arc;
use std::sync::Mutex;

use rhai::Dynamic;
use rhai::Engine;
use rhai::EvalAltResult;
use rhai::Module;
use rhai::Scope;
use rhai::module_resolvers::DummyModuleResolver;

use crate::capability::SandboxContext;
use crate::config::Config;
use crate::error::Result;
use crate::surface::install_surface;
use crate::validator;

/// Lines starting with this prefix in the captured output are diagnostics
/// from the embedded compiler; their presence fails the execution even when
/// evaluation returned normally.
pub const COMPILER_DIAGNOSTIC_PREFIX: &str = "-- [E";

/// Engine limits. Generous for legitimate snippets, bounded against
/// runaways.
const MAX_OPERATIONS: u64 = 10_000_000;
const MAX_CALL_LEVELS: usize = 64;
const MAX_STRING_SIZE: usize = 4 * 1024 * 1024;
const MAX_ARRAY_SIZE: usize = 1_000_000;

/// Helpers layered over the registered surface, evaluated once per session.
const PREAMBLE: &str = r#"
// Run a command and return captured stdout with the default timeout.
fn exec_output(perm, command, args) {
    perm.exec(command, args, 10000).stdout
}
"#;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// Buffer shared between the engine's print/debug hooks and the session.
#[derive(Debug, Clone, Default)]
pub(crate) struct OutputBuffer(Arc<Mutex<String>>);

impl OutputBuffer {
    fn push_line(&self, line: &str) {
        let mut buf = lock_ignore_poison(&self.0);
        buf.push_str(line);
        buf.push('\n');
    }

    fn take(&self) -> String {
        std::mem::take(&mut lock_ignore_poison(&self.0))
    }
}

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct InterpreterSession {
    engine: Engine,
    scope: Scope<'static>,
    buffer: OutputBuffer,
    wrap_code: bool,
}

impl InterpreterSession {
    /// Build a session bound to `config`: locked-down engine, capability
    /// surface registered against a fresh [`SandboxContext`], preamble
    /// evaluated into the global namespace.
    pub fn new(config: &Config) -> Result<Self> {
        let ctx = SandboxContext::new(config);
        let buffer = OutputBuffer::default();
        let mut engine = Engine::new();

        // No module resolution and no in-language eval: the only reachable
        // side effects are the registered surface.
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");
        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_call_levels(MAX_CALL_LEVELS);
        engine.set_max_string_size(MAX_STRING_SIZE);
        engine.set_max_array_size(MAX_ARRAY_SIZE);

        let print_buffer = buffer.clone();
        engine.on_print(move |text| print_buffer.push_line(text));
        let debug_buffer = buffer.clone();
        engine.on_debug(move |text, _source, _pos| debug_buffer.push_line(text));

        install_surface(&mut engine, ctx);

        let preamble = engine
            .compile(PREAMBLE)
            .map_err(|e| std::io::Error::other(format!("preamble failed to compile: {e}")))?;
        let module = Module::eval_ast_as_new(Scope::new(), &preamble, &engine)
            .map_err(|e| std::io::Error::other(format!("preamble failed to evaluate: {e}")))?;
        engine.register_global_module(module.into());

        Ok(Self {
            engine,
            scope: Scope::new(),
            buffer,
            wrap_code: config.wrap_code,
        })
    }

    /// Validate and run one snippet, capturing output on every exit path.
    pub fn execute(&mut self, code: &str) -> ExecutionResult {
        let violations = validator::validate(code);
        if !violations.is_empty() {
            return ExecutionResult::failure(validator::format_report(&violations));
        }

        // Drop anything a previous call left behind.
        let _ = self.buffer.take();

        let error = if self.wrap_code {
            // Expression evaluation with the persistent scope: free-floating
            // expressions are normalized and a non-unit result value is
            // echoed into the output.
            match self
                .engine
                .eval_with_scope::<Dynamic>(&mut self.scope, code)
            {
                Ok(value) => {
                    if !value.is_unit() {
                        self.buffer.push_line(&display_value(&value));
                    }
                    None
                }
                Err(e) => Some(format_eval_error(&e)),
            }
        } else {
            self.engine
                .run_with_scope(&mut self.scope, code)
                .err()
                .map(|e| format_eval_error(&e))
        };

        let output = self.buffer.take();
        match error {
            Some(error) => ExecutionResult {
                success: false,
                output,
                error: Some(error),
            },
            None => {
                let has_diagnostics = output
                    .lines()
                    .any(|line| line.starts_with(COMPILER_DIAGNOSTIC_PREFIX));
                ExecutionResult {
                    success: !has_diagnostics,
                    output,
                    error: None,
                }
            }
        }
    }
}

/// Echo text for a snippet's result value. Classified values stay opaque
/// regardless of how they reach the output.
fn display_value(value: &Dynamic) -> String {
    if value.is::<crate::classified::Classified<Dynamic>>() {
        return "Classified(***)".to_string();
    }
    value.to_string()
}

/// Render an evaluation error as `<ExceptionKind>: <message>`. Sandbox
/// denials already carry their kind; engine-native errors get one derived
/// from the failure class.
fn format_eval_error(err: &EvalAltResult) -> String {
    // Unwrap nested function-call frames to reach the root cause.
    let mut current = err;
    while let EvalAltResult::ErrorInFunctionCall(_, _, inner, _) = current {
        current = inner.as_ref();
    }
    match current {
        EvalAltResult::ErrorRuntime(token, _) => {
            let msg = token.to_string();
            if msg.starts_with("SecurityException:") || msg.starts_with("RuntimeException:") {
                msg
            } else {
                format!("RuntimeException: {msg}")
            }
        }
        EvalAltResult::ErrorParsing(..) => format!("CompileException: {current}"),
        other => format!("ScriptException: {other}"),
    }
}
