//! Static pre-execution validator.
//!
//! Snippets are screened against a fixed table of forbidden-API patterns
//! before they ever reach the interpreter. The validator is a
//! defense-in-depth layer in front of the capability checks, not the sole
//! guard: it never fails, and an empty violation list means acceptance.

use std::sync::LazyLock;

use regex_lite::Regex;

/// One rule of the fixed table.
struct Rule {
    id: &'static str,
    description: &'static str,
    pattern: Regex,
    /// Directive rules match against the original text because their payload
    /// is syntactically a comment; blanking comments would hide it.
    on_original: bool,
}

struct RuleDef(&'static str, &'static str, &'static str, bool);

/// `(id, regex, description, runs-on-original-text)`, grouped by concern.
/// Most rules run on the stripped view so that pattern text inside string
/// literals or comments is not flagged.
#[rustfmt::skip]
const RULE_DEFS: &[RuleDef] = &[
    // file I/O bypass
    // The module-name payload of an `import` is a string literal, which
    // stripping blanks, so the rule keys on the keyword alone. Every host
    // module reachable through `import` is off limits, file access being
    // the canonical risk.
    RuleDef("file-io-import", r"\bimport\b",
        "import of a host module", false),
    RuleDef("file-io-std", r"\bstd\s*::\s*fs\b",
        "host filesystem namespace reference", false),
    RuleDef("file-io-open", r"\b(File|OpenOptions)\s*::\s*(open|create|new)\b",
        "direct file handle construction", false),
    // process bypass
    RuleDef("proc-std", r"\bstd\s*::\s*process\b",
        "host process namespace reference", false),
    RuleDef("proc-command", r"\bCommand\s*::\s*new\b",
        "direct process command construction", false),
    // network bypass
    RuleDef("net-std", r"\bstd\s*::\s*net\b",
        "host network namespace reference", false),
    RuleDef("net-socket", r"\b(TcpStream|TcpListener|UdpSocket)\b",
        "direct socket construction", false),
    // unchecked casts
    RuleDef("cast-transmute", r"\btransmute\b",
        "unchecked memory reinterpretation", false),
    RuleDef("cast-raw-pointer", r"\bas\s+\*\s*(const|mut)\b",
        "raw pointer cast", false),
    // capability-capture escapes
    RuleDef("escape-shared", r"\bshared\s*\(",
        "promotion of a value to a shared reference", false),
    RuleDef("escape-curry", r"\.curry\s*\(",
        "capture of values into a function pointer", false),
    // reflection / dynamic evaluation
    RuleDef("reflect-eval", r"\beval\s*\(",
        "dynamic evaluation of source text", false),
    RuleDef("reflect-fn-ptr", r#"\bFn\s*\("#,
        "function pointer lookup by name", false),
    // host runtime internals
    RuleDef("runtime-unsafe", r"\bunsafe\b",
        "host unsafe block", false),
    RuleDef("runtime-libc", r"\b(libc|syscall)\b",
        "host C runtime reference", false),
    // system control
    RuleDef("sys-exit", r"\b(exit|abort)\s*\(",
        "process termination", false),
    RuleDef("sys-env", r"\bstd\s*::\s*env\b|\bset_var\s*\(",
        "host environment access", false),
    RuleDef("sys-thread", r"\bstd\s*::\s*thread\b|\bthread\s*::\s*spawn\b|\bspawn_thread\b",
        "thread spawning", false),
    // build/tool directives (comment-shaped payloads)
    RuleDef("directive-shebang", r"^#!",
        "interpreter directive line", true),
    RuleDef("directive-tool", r"^\s*//>",
        "tool directive comment", true),
    // dynamic module loading
    RuleDef("load-module", r"\b(load_module|dlopen|load_library)\s*\(",
        "dynamic module loading", false),
    // interpreter internals
    RuleDef("interp-engine", r"\b(Engine|AST)\s*::",
        "interpreter internals access", false),
];

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    RULE_DEFS
        .iter()
        .filter_map(|&RuleDef(id, pattern, description, on_original)| {
            match Regex::new(pattern) {
                Ok(pattern) => Some(Rule {
                    id,
                    description,
                    pattern,
                    on_original,
                }),
                Err(e) => {
                    tracing::error!("validator rule {id} failed to compile: {e}");
                    None
                }
            }
        })
        .collect()
});

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub rule_id: &'static str,
    pub description: &'static str,
    /// 1-based line number in the submitted code.
    pub line_number: usize,
    /// The original line, untouched by stripping.
    pub snippet: String,
}

/// Screen `code` against the rule table. An empty result means acceptance;
/// the function itself never fails.
pub fn validate(code: &str) -> Vec<Violation> {
    let stripped = strip_literals_and_comments(code);
    let original_lines: Vec<&str> = code.lines().collect();
    let stripped_lines: Vec<&str> = stripped.lines().collect();

    let mut violations = Vec::new();
    for rule in RULES.iter() {
        let haystack = if rule.on_original {
            &original_lines
        } else {
            &stripped_lines
        };
        for (idx, line) in haystack.iter().enumerate() {
            if rule.pattern.is_match(line) {
                violations.push(Violation {
                    rule_id: rule.id,
                    description: rule.description,
                    line_number: idx + 1,
                    snippet: original_lines.get(idx).copied().unwrap_or("").to_string(),
                });
            }
        }
    }
    violations
}

/// Render a violation list as the failed-execution report. The first line
/// carries the count; each violation follows with its original snippet.
pub fn format_report(violations: &[Violation]) -> String {
    let mut report = format!(
        "Code validation failed: {} violation(s) found\n",
        violations.len()
    );
    for v in violations {
        report.push_str(&format!(
            "\n[{}] Line {}: {}\n    {}\n",
            v.rule_id, v.line_number, v.description, v.snippet
        ));
    }
    report
}

/// Replace string literals and comments with spaces, preserving newlines so
/// line numbers stay correct. Handles `"…"` strings (escape sequences
/// consumed in pairs), backtick multi-line strings, `'c'` character
/// literals, `//` line comments (up to but not including the newline) and
/// nestable `/* … */` block comments.
pub fn strip_literals_and_comments(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '`' => {
                let quote = c;
                out.push(' ');
                i += 1;
                while i < chars.len() {
                    let d = chars[i];
                    if d == '\\' && quote == '"' {
                        // Consume the escape pair so `\"` cannot end the
                        // literal early.
                        out.push(' ');
                        i += 1;
                        if i < chars.len() {
                            blank(&mut out, chars[i]);
                            i += 1;
                        }
                    } else if d == quote {
                        out.push(' ');
                        i += 1;
                        break;
                    } else {
                        blank(&mut out, d);
                        i += 1;
                    }
                }
            }
            '\'' => {
                out.push(' ');
                i += 1;
                while i < chars.len() {
                    let d = chars[i];
                    if d == '\\' {
                        out.push(' ');
                        i += 1;
                        if i < chars.len() {
                            blank(&mut out, chars[i]);
                            i += 1;
                        }
                    } else if d == '\'' {
                        out.push(' ');
                        i += 1;
                        break;
                    } else if d == '\n' {
                        // Unterminated char literal; stop at the line end so
                        // line accounting is unaffected.
                        break;
                    } else {
                        blank(&mut out, d);
                        i += 1;
                    }
                }
            }
            '/' if i + 1 < chars.len() && chars[i + 1] == '/' => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(' ');
                    i += 1;
                }
            }
            '/' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                let mut depth = 1;
                out.push_str("  ");
                i += 2;
                while i < chars.len() && depth > 0 {
                    if chars[i] == '/' && i + 1 < chars.len() && chars[i + 1] == '*' {
                        depth += 1;
                        out.push_str("  ");
                        i += 2;
                    } else if chars[i] == '*' && i + 1 < chars.len() && chars[i + 1] == '/' {
                        depth -= 1;
                        out.push_str("  ");
                        i += 2;
                    } else {
                        blank(&mut out, chars[i]);
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    out
}

fn blank(out: &mut String, c: char) {
    if c == '\n' {
        out.push('\n');
    } else {
        out.push(' ');
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    fn newline_count(s: &str) -> usize {
        s.matches('\n').count()
    }

    #[test]
    fn empty_code_is_accepted() {
        assert!(validate("").is_empty());
    }

    #[test]
    fn plain_arithmetic_is_accepted() {
        assert!(validate("let x = 1 + 1;\nprint(x);").is_empty());
    }

    #[test]
    fn file_io_import_is_rejected() {
        let violations = validate("import \"fs\" as fs;");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule_id, "file-io-import");
        assert_eq!(violations[0].line_number, 1);
    }

    #[test]
    fn import_inside_line_comment_is_accepted() {
        assert!(validate("// import \"fs\" would not work here\n1 + 1").is_empty());
    }

    #[test]
    fn import_inside_string_literal_is_accepted() {
        assert!(validate(r#"let doc = "import \"fs\" is rejected";"#).is_empty());
        assert!(validate("let doc = `import \"fs\" spans\nlines`;").is_empty());
    }

    #[test]
    fn host_namespace_references_are_rejected() {
        assert_eq!(validate("std::fs::read(\"x\")")[0].rule_id, "file-io-std");
        assert_eq!(
            validate("std::process::Command")[0].rule_id,
            "proc-std"
        );
        assert_eq!(validate("TcpStream.connect()")[0].rule_id, "net-socket");
    }

    #[test]
    fn thread_spawn_is_rejected_as_sys_thread() {
        let violations = validate("thread::spawn(|| 1)");
        assert!(violations.iter().any(|v| v.rule_id == "sys-thread"));
    }

    #[test]
    fn forbidden_token_inside_string_is_accepted() {
        assert!(validate(r#"let doc = "call std::fs to read files";"#).is_empty());
    }

    #[test]
    fn forbidden_token_inside_line_comment_is_accepted() {
        assert!(validate("// std::process is unavailable here\n1 + 1").is_empty());
    }

    #[test]
    fn forbidden_token_inside_block_comment_is_accepted() {
        assert!(validate("/* eval( ) would be bad */ 1 + 1").is_empty());
    }

    #[test]
    fn directive_rule_fires_even_inside_comment_syntax() {
        let violations = validate("//> directive payload\n1 + 1");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule_id, "directive-tool");
    }

    #[test]
    fn shebang_is_rejected() {
        let violations = validate("#!/usr/bin/env something\n1 + 1");
        assert_eq!(violations[0].rule_id, "directive-shebang");
    }

    #[test]
    fn eval_call_is_rejected() {
        assert_eq!(validate("eval(\"1+1\")")[0].rule_id, "reflect-eval");
    }

    #[test]
    fn violations_ordered_by_rule_index_then_line() {
        let code = "eval(\"a\")\nstd::fs::read(\"b\")\neval(\"c\")";
        let ids: Vec<(&str, usize)> = validate(code)
            .iter()
            .map(|v| (v.rule_id, v.line_number))
            .collect();
        // file-io-std precedes reflect-eval in the table.
        assert_eq!(
            ids,
            vec![("file-io-std", 2), ("reflect-eval", 1), ("reflect-eval", 3)]
        );
    }

    #[test]
    fn report_opens_with_count_and_lists_each_violation() {
        let violations = validate("eval(\"x\")");
        let report = format_report(&violations);
        assert!(report.starts_with("Code validation failed: 1 violation(s) found"));
        assert!(report.contains("[reflect-eval] Line 1: dynamic evaluation of source text"));
        assert!(report.contains("eval(\"x\")"));
    }

    #[test]
    fn stripping_preserves_newline_counts() {
        let samples = [
            "",
            "let x = 1;\nlet y = 2;",
            "let s = \"multi\nline? no\";\n// comment\n/* block\ncomment */\nlet t = 'c';",
            "`backtick\nstring\nspans lines`",
            "/* outer /* nested\n */ still a comment */ code()",
            "let broken = \"unterminated\n",
        ];
        for sample in samples {
            let stripped = strip_literals_and_comments(sample);
            assert_eq!(
                newline_count(&stripped),
                newline_count(sample),
                "newline count changed for {sample:?}"
            );
        }
    }

    #[test]
    fn escaped_quote_does_not_terminate_string_early() {
        let stripped = strip_literals_and_comments(r#"let s = "a\"b"; eval(x)"#);
        // The eval call sits outside the literal and must survive stripping.
        assert!(stripped.contains("eval"));
        let violations = validate(r#"let s = "a\"b"; eval(x)"#);
        assert_eq!(violations[0].rule_id, "reflect-eval");
    }

    #[test]
    fn line_numbers_survive_multiline_strings() {
        let code = "let s = `line one\nline two`;\neval(s)";
        let violations = validate(code);
        assert_eq!(violations[0].line_number, 3);
    }
}
