use std::path::PathBuf;

use clap::Parser;
use safeexec_core::ConfigOverrides;

#[derive(Parser, Debug)]
#[command(version, about = "Sandboxed code-execution broker speaking MCP on stdin/stdout")]
pub struct Cli {
    /// Directory for audit records (one .code and one .result per
    /// execution). Recording is disabled when omitted.
    #[arg(long = "record", value_name = "DIR")]
    pub record: Option<PathBuf>,

    /// Block file-operation commands in process capabilities, forcing file
    /// access through the filesystem capability.
    #[arg(long = "strict", default_value_t = false)]
    pub strict: bool,

    /// Comma-separated list of classified paths; only classified
    /// read/write operations may touch them.
    #[arg(long = "classified-paths", value_name = "PATHS", value_delimiter = ',', num_args = 1..)]
    pub classified_paths: Vec<PathBuf>,

    /// Suppress the startup banner.
    #[arg(long = "quiet", default_value_t = false)]
    pub quiet: bool,

    /// Do not echo snippet result values into the captured output.
    #[arg(long = "no-wrap", default_value_t = false)]
    pub no_wrap: bool,

    /// Disable the session tools; only stateless execution remains.
    #[arg(long = "no-session", default_value_t = false)]
    pub no_session: bool,

    /// JSON configuration file. CLI flags win on conflict.
    #[arg(long = "config", value_name = "JSON_FILE")]
    pub config: Option<PathBuf>,

    /// Base URL of the chat endpoint.
    #[arg(long = "llm-base-url", value_name = "URL")]
    pub llm_base_url: Option<String>,

    /// Credential for the chat endpoint.
    #[arg(long = "llm-api-key", value_name = "KEY")]
    pub llm_api_key: Option<String>,

    /// Model identifier for the chat endpoint.
    #[arg(long = "llm-model", value_name = "NAME")]
    pub llm_model: Option<String>,
}

impl Cli {
    /// Convert the parsed flags into config overrides. Absent flags stay
    /// `None` so they never shadow config-file values.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            record_dir: self.record.clone(),
            strict_mode: self.strict.then_some(true),
            classified_paths: (!self.classified_paths.is_empty())
                .then(|| self.classified_paths.clone()),
            quiet: self.quiet.then_some(true),
            wrap_code: self.no_wrap.then_some(false),
            sessions_enabled: self.no_session.then_some(false),
            llm_base_url: self.llm_base_url.clone(),
            llm_api_key: self.llm_api_key.clone(),
            llm_model: self.llm_model.clone(),
        }
    }
}
