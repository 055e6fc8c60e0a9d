//! Broker configuration: a frozen value assembled from CLI overrides merged
//! over an optional JSON config file (CLI wins on conflict).

use std::path::Path;
use std::path::PathBuf;

use path_absolutize::Absolutize;
use serde::Deserialize;

/// Application configuration, immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory for audit records. `None` disables the recorder.
    pub record_dir: Option<PathBuf>,

    /// When `true`, process capabilities additionally block the fixed set of
    /// file-operation commands so file access is forced through the
    /// filesystem capability.
    pub strict_mode: bool,

    /// Paths only reachable through `read_classified`/`write_classified`.
    /// Always stored in absolute, normalized form.
    pub classified_paths: Vec<PathBuf>,

    /// Remote chat endpoint. `None` when unconfigured or only partially
    /// configured.
    pub chat: Option<ChatEndpoint>,

    /// Suppress the startup banner.
    pub quiet: bool,

    /// When `true`, snippets are evaluated as expressions and a non-unit
    /// result value is echoed into the captured output.
    pub wrap_code: bool,

    /// When `false`, the session tools are hidden from the tool catalog.
    pub sessions_enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEndpoint {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// CLI-sourced overrides. Every field beats the corresponding config-file
/// value when present.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub record_dir: Option<PathBuf>,
    pub strict_mode: Option<bool>,
    pub classified_paths: Option<Vec<PathBuf>>,
    pub quiet: Option<bool>,
    pub wrap_code: Option<bool>,
    pub sessions_enabled: Option<bool>,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
}

/// On-disk JSON shape. Unknown fields are ignored by design so that config
/// files can be shared with newer/older builds.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    record: Option<PathBuf>,
    strict: Option<bool>,
    classified_paths: Option<Vec<PathBuf>>,
    quiet: Option<bool>,
    wrap: Option<bool>,
    sessions: Option<bool>,
    llm_base_url: Option<String>,
    llm_api_key: Option<String>,
    llm_model: Option<String>,
}

impl Config {
    /// Build the frozen configuration. `config_path` is the optional JSON
    /// file; `overrides` carry the CLI flags.
    pub fn load(
        config_path: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> std::io::Result<Config> {
        let file = match config_path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                serde_json::from_str::<ConfigFile>(&contents)
                    .map_err(|e| std::io::Error::other(format!("invalid config file: {e}")))?
            }
            None => ConfigFile::default(),
        };
        Ok(Self::merge(file, overrides))
    }

    fn merge(file: ConfigFile, overrides: ConfigOverrides) -> Config {
        let classified_paths = overrides
            .classified_paths
            .or(file.classified_paths)
            .unwrap_or_default()
            .iter()
            .map(|p| normalize_path(p))
            .collect();

        let chat = resolve_chat_endpoint(
            overrides.llm_base_url.or(file.llm_base_url),
            overrides.llm_api_key.or(file.llm_api_key),
            overrides.llm_model.or(file.llm_model),
        );

        Config {
            record_dir: overrides.record_dir.or(file.record),
            strict_mode: overrides.strict_mode.or(file.strict).unwrap_or(false),
            classified_paths,
            chat,
            quiet: overrides.quiet.or(file.quiet).unwrap_or(false),
            wrap_code: overrides.wrap_code.or(file.wrap).unwrap_or(true),
            sessions_enabled: overrides.sessions_enabled.or(file.sessions).unwrap_or(true),
        }
    }
}

/// A chat endpoint is only usable when all three of base URL, key and model
/// are present. A partial configuration is reported and disabled, never
/// silently accepted.
fn resolve_chat_endpoint(
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
) -> Option<ChatEndpoint> {
    match (base_url, api_key, model) {
        (Some(base_url), Some(api_key), Some(model)) => Some(ChatEndpoint {
            base_url,
            api_key,
            model,
        }),
        (None, None, None) => None,
        (base_url, api_key, model) => {
            let missing: Vec<&str> = [
                base_url.is_none().then_some("llm_base_url"),
                api_key.is_none().then_some("llm_api_key"),
                model.is_none().then_some("llm_model"),
            ]
            .into_iter()
            .flatten()
            .collect();
            tracing::warn!(
                "partial chat configuration (missing: {}); chat is disabled",
                missing.join(", ")
            );
            None
        }
    }
}

/// Lexically absolutize and normalize a path. No filesystem access: `..` and
/// `.` components are resolved against the path itself (or the current
/// directory for relative inputs).
pub fn normalize_path(path: &Path) -> PathBuf {
    match path.absolutize() {
        Ok(p) => p.into_owned(),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_without_file_or_overrides() {
        let config = Config::merge(ConfigFile::default(), ConfigOverrides::default());
        assert_eq!(config.record_dir, None);
        assert!(!config.strict_mode);
        assert!(config.classified_paths.is_empty());
        assert_eq!(config.chat, None);
        assert!(!config.quiet);
        assert!(config.wrap_code);
        assert!(config.sessions_enabled);
    }

    #[test]
    fn cli_wins_over_file() {
        let file: ConfigFile = serde_json::from_str(
            r#"{"strict": false, "record": "/tmp/from-file", "quiet": true}"#,
        )
        .unwrap();
        let overrides = ConfigOverrides {
            strict_mode: Some(true),
            record_dir: Some(PathBuf::from("/tmp/from-cli")),
            ..Default::default()
        };
        let config = Config::merge(file, overrides);
        assert!(config.strict_mode);
        assert_eq!(config.record_dir, Some(PathBuf::from("/tmp/from-cli")));
        // Untouched file values still apply.
        assert!(config.quiet);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let file: ConfigFile =
            serde_json::from_str(r#"{"strict": true, "future_knob": 17}"#).unwrap();
        let config = Config::merge(file, ConfigOverrides::default());
        assert!(config.strict_mode);
    }

    #[test]
    fn classified_paths_are_normalized() {
        let overrides = ConfigOverrides {
            classified_paths: Some(vec![PathBuf::from("/secrets/../secrets/keys/")]),
            ..Default::default()
        };
        let config = Config::merge(ConfigFile::default(), overrides);
        assert_eq!(config.classified_paths, vec![PathBuf::from("/secrets/keys")]);
    }

    #[test]
    fn full_chat_endpoint_is_kept() {
        let overrides = ConfigOverrides {
            llm_base_url: Some("https://llm.example.com/v1".to_string()),
            llm_api_key: Some("sk-test".to_string()),
            llm_model: Some("gpt-test".to_string()),
            ..Default::default()
        };
        let config = Config::merge(ConfigFile::default(), overrides);
        assert!(config.chat.is_some());
    }

    #[test]
    fn partial_chat_endpoint_is_disabled() {
        let overrides = ConfigOverrides {
            llm_base_url: Some("https://llm.example.com/v1".to_string()),
            llm_model: Some("gpt-test".to_string()),
            ..Default::default()
        };
        let config = Config::merge(ConfigFile::default(), overrides);
        assert_eq!(config.chat, None);
    }

    #[test]
    fn chat_endpoint_merges_across_sources() {
        let file: ConfigFile = serde_json::from_str(
            r#"{"llm_base_url": "https://file.example.com", "llm_model": "m"}"#,
        )
        .unwrap();
        let overrides = ConfigOverrides {
            llm_api_key: Some("sk-cli".to_string()),
            ..Default::default()
        };
        let config = Config::merge(file, overrides);
        let chat = config.chat.unwrap();
        assert_eq!(chat.base_url, "https://file.example.com");
        assert_eq!(chat.api_key, "sk-cli");
    }
}
