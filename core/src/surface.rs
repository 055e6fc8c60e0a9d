//! Registration of the capability surface into the script engine.
//!
//! Everything a snippet can reach lives here: the three `request_*`
//! combinators, the handle/permission/network methods, the classified
//! wrapper and the chat primitive. Each registered function converts
//! sandbox errors into script exceptions via [`script_err`] so denials
//! surface inside the snippet instead of crashing the broker.

use std::sync::Arc;

use rhai::Array;
use rhai::Blob;
use rhai::Dynamic;
use rhai::Engine;
use rhai::EvalAltResult;
use rhai::FnPtr;
use rhai::NativeCallContext;
use rhai::Position;

use crate::capability::RevocationGuard;
use crate::capability::SandboxContext;
use crate::chat;
use crate::classified::Classified;
use crate::error::SafeExecErr;
use crate::exec::ProcessPermission;
use crate::exec::ProcessResult;
use crate::filesystem::FileEntry;
use crate::filesystem::FileSystem;
use crate::filesystem::GrepMatch;

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

fn script_err(err: SafeExecErr) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        err.script_message().into(),
        Position::NONE,
    ))
}

fn script_err_msg(msg: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        format!("RuntimeException: {}", msg.into()).into(),
        Position::NONE,
    ))
}

fn strings_of(values: &Array) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Register the complete capability surface against one session context.
pub(crate) fn install_surface(engine: &mut Engine, ctx: Arc<SandboxContext>) {
    engine.register_type_with_name::<FileSystem>("FileSystem");
    engine.register_type_with_name::<FileEntry>("FileEntry");
    engine.register_type_with_name::<ProcessPermission>("ProcessPermission");
    engine.register_type_with_name::<ProcessResult>("ProcessResult");
    engine.register_type_with_name::<crate::net::Network>("Network");
    engine.register_type_with_name::<GrepMatch>("GrepMatch");
    engine.register_type_with_name::<Classified<Dynamic>>("Classified");

    register_combinators(engine, &ctx);
    register_filesystem(engine);
    register_process(engine);
    register_network(engine);
    register_classified(engine, &ctx);
    register_chat(engine, &ctx);
}

fn register_combinators(engine: &mut Engine, ctx: &Arc<SandboxContext>) {
    let request_ctx = ctx.clone();
    engine.register_fn(
        "request_filesystem",
        move |call_ctx: NativeCallContext,
              root: &str,
              callback: FnPtr|
              -> ScriptResult<Dynamic> {
            request_ctx.check_effects_allowed().map_err(script_err)?;
            let fs = FileSystem::new(root, None, request_ctx.clone());
            let _guard = RevocationGuard::new(fs.capability_state());
            callback.call_within_context(&call_ctx, (fs,))
        },
    );

    let request_ctx = ctx.clone();
    engine.register_fn(
        "request_exec_permission",
        move |call_ctx: NativeCallContext,
              commands: Array,
              callback: FnPtr|
              -> ScriptResult<Dynamic> {
            request_ctx.check_effects_allowed().map_err(script_err)?;
            let permission = ProcessPermission::new(
                strings_of(&commands).into_iter().collect(),
                request_ctx.clone(),
            );
            let _guard = RevocationGuard::new(permission.capability_state());
            callback.call_within_context(&call_ctx, (permission,))
        },
    );

    let request_ctx = ctx.clone();
    engine.register_fn(
        "request_network",
        move |call_ctx: NativeCallContext,
              hosts: Array,
              callback: FnPtr|
              -> ScriptResult<Dynamic> {
            request_ctx.check_effects_allowed().map_err(script_err)?;
            let network = crate::net::Network::new(
                strings_of(&hosts).into_iter().collect(),
                request_ctx.clone(),
            );
            let _guard = RevocationGuard::new(network.capability_state());
            callback.call_within_context(&call_ctx, (network,))
        },
    );
}

fn register_filesystem(engine: &mut Engine) {
    engine.register_fn("access", |fs: &mut FileSystem, path: &str| {
        fs.access(path).map_err(script_err)
    });
    engine.register_fn("root", |fs: &mut FileSystem| {
        fs.root().display().to_string()
    });
    engine.register_fn(
        "grep",
        |fs: &mut FileSystem, path: &str, pattern: &str| -> ScriptResult<Array> {
            let matches = fs.grep(path, pattern).map_err(script_err)?;
            Ok(matches.into_iter().map(Dynamic::from).collect())
        },
    );
    engine.register_fn(
        "grep_recursive",
        |fs: &mut FileSystem, dir: &str, pattern: &str, glob: &str| -> ScriptResult<Array> {
            let matches = fs.grep_recursive(dir, pattern, glob).map_err(script_err)?;
            Ok(matches.into_iter().map(Dynamic::from).collect())
        },
    );
    engine.register_fn(
        "find",
        |fs: &mut FileSystem, dir: &str, glob: &str| -> ScriptResult<Array> {
            let found = fs.find(dir, glob).map_err(script_err)?;
            Ok(found
                .into_iter()
                .map(|p| Dynamic::from(p.to_string_lossy().into_owned()))
                .collect())
        },
    );

    engine.register_fn("exists", |entry: &mut FileEntry| {
        entry.exists().map_err(script_err)
    });
    engine.register_fn("is_directory", |entry: &mut FileEntry| {
        entry.is_directory().map_err(script_err)
    });
    engine.register_fn("size", |entry: &mut FileEntry| -> ScriptResult<i64> {
        entry.size().map(|n| n as i64).map_err(script_err)
    });
    engine.register_fn("name", |entry: &mut FileEntry| entry.name());
    engine.register_fn("path", |entry: &mut FileEntry| {
        entry.path().display().to_string()
    });
    engine.register_fn("is_classified", |entry: &mut FileEntry| {
        entry.is_classified()
    });
    engine.register_fn("read", |entry: &mut FileEntry| {
        entry.read().map_err(script_err)
    });
    engine.register_fn("read_bytes", |entry: &mut FileEntry| -> ScriptResult<Blob> {
        entry.read_bytes().map_err(script_err)
    });
    engine.register_fn(
        "read_lines",
        |entry: &mut FileEntry| -> ScriptResult<Array> {
            let lines = entry.read_lines().map_err(script_err)?;
            Ok(lines.into_iter().map(Dynamic::from).collect())
        },
    );
    engine.register_fn("write", |entry: &mut FileEntry, contents: &str| {
        entry.write(contents).map_err(script_err)
    });
    engine.register_fn("append", |entry: &mut FileEntry, contents: &str| {
        entry.append(contents).map_err(script_err)
    });
    engine.register_fn("delete", |entry: &mut FileEntry| {
        entry.delete().map_err(script_err)
    });
    engine.register_fn("children", |entry: &mut FileEntry| -> ScriptResult<Array> {
        let children = entry.children().map_err(script_err)?;
        Ok(children.into_iter().map(Dynamic::from).collect())
    });
    engine.register_fn("walk", |entry: &mut FileEntry| -> ScriptResult<Array> {
        let entries = entry.walk().map_err(script_err)?;
        Ok(entries.into_iter().map(Dynamic::from).collect())
    });
    engine.register_fn(
        "read_classified",
        |entry: &mut FileEntry| -> ScriptResult<Classified<Dynamic>> {
            let secret = entry.read_classified().map_err(script_err)?;
            Ok(secret.map(Dynamic::from))
        },
    );
    engine.register_fn(
        "write_classified",
        |entry: &mut FileEntry, value: Classified<Dynamic>| -> ScriptResult<()> {
            let text = value
                .into_inner()
                .into_string()
                .map_err(|t| script_err_msg(format!("classified value is not text: {t}")))?;
            entry
                .write_classified(&Classified::new(text))
                .map_err(script_err)
        },
    );
    engine.register_fn("to_string", |entry: &mut FileEntry| {
        entry.path().display().to_string()
    });

    engine.register_get("path", |m: &mut GrepMatch| {
        m.path.to_string_lossy().into_owned()
    });
    engine.register_get("line_number", |m: &mut GrepMatch| m.line_number as i64);
    engine.register_get("line", |m: &mut GrepMatch| m.line.clone());
    engine.register_fn("to_string", |m: &mut GrepMatch| {
        format!("{}:{}: {}", m.path.display(), m.line_number, m.line)
    });
}

fn register_process(engine: &mut Engine) {
    engine.register_fn(
        "exec",
        |perm: &mut ProcessPermission,
         command: &str,
         args: Array,
         timeout_ms: i64|
         -> ScriptResult<ProcessResult> {
            perm.exec(command, &strings_of(&args), None, timeout_ms.max(0) as u64)
                .map_err(script_err)
        },
    );
    engine.register_fn(
        "exec",
        |perm: &mut ProcessPermission,
         command: &str,
         args: Array,
         working_dir: &str,
         timeout_ms: i64|
         -> ScriptResult<ProcessResult> {
            perm.exec(
                command,
                &strings_of(&args),
                Some(std::path::Path::new(working_dir)),
                timeout_ms.max(0) as u64,
            )
            .map_err(script_err)
        },
    );

    engine.register_get("exit_code", |r: &mut ProcessResult| r.exit_code as i64);
    engine.register_get("stdout", |r: &mut ProcessResult| r.stdout.clone());
    engine.register_get("stderr", |r: &mut ProcessResult| r.stderr.clone());
    engine.register_fn("to_string", |r: &mut ProcessResult| {
        format!("exit {}: {}", r.exit_code, r.stdout)
    });
}

fn register_network(engine: &mut Engine) {
    engine.register_fn("http_get", |net: &mut crate::net::Network, url: &str| {
        net.http_get(url).map_err(script_err)
    });
    engine.register_fn(
        "http_post",
        |net: &mut crate::net::Network, url: &str, body: &str, content_type: &str| {
            net.http_post(url, body, content_type).map_err(script_err)
        },
    );
}

fn register_classified(engine: &mut Engine, ctx: &Arc<SandboxContext>) {
    engine.register_fn("classify", |value: Dynamic| Classified::new(value));

    let map_ctx = ctx.clone();
    engine.register_fn(
        "map",
        move |call_ctx: NativeCallContext,
              secret: &mut Classified<Dynamic>,
              transform: FnPtr|
              -> ScriptResult<Classified<Dynamic>> {
            let value = secret.inner().clone();
            // Effects are revoked for the duration of the transform: any
            // capability call inside it fails with a security error.
            let _guard = map_ctx.enter_pure_region();
            let out: Dynamic = transform.call_within_context(&call_ctx, (value,))?;
            Ok(Classified::new(out))
        },
    );

    let flat_map_ctx = ctx.clone();
    engine.register_fn(
        "flat_map",
        move |call_ctx: NativeCallContext,
              secret: &mut Classified<Dynamic>,
              transform: FnPtr|
              -> ScriptResult<Classified<Dynamic>> {
            let value = secret.inner().clone();
            let _guard = flat_map_ctx.enter_pure_region();
            let out: Dynamic = transform.call_within_context(&call_ctx, (value,))?;
            out.try_cast::<Classified<Dynamic>>().ok_or_else(|| {
                script_err_msg("flat_map transform must return a classified value")
            })
        },
    );

    engine.register_fn("to_string", |secret: &mut Classified<Dynamic>| {
        secret.to_string()
    });
    engine.register_fn("to_debug", |secret: &mut Classified<Dynamic>| {
        secret.to_string()
    });
}

fn register_chat(engine: &mut Engine, ctx: &Arc<SandboxContext>) {
    let chat_ctx = ctx.clone();
    engine.register_fn("chat", move |text: &str| -> ScriptResult<String> {
        chat::chat(&chat_ctx, text).map_err(script_err)
    });

    let chat_ctx = ctx.clone();
    engine.register_fn(
        "chat",
        move |secret: Classified<Dynamic>| -> ScriptResult<Classified<Dynamic>> {
            let text = secret
                .into_inner()
                .into_string()
                .map_err(|t| script_err_msg(format!("classified value is not text: {t}")))?;
            let reply = chat::chat_classified(&chat_ctx, Classified::new(text))
                .map_err(script_err)?;
            Ok(reply.map(Dynamic::from))
        },
    );
}
