use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use reqwest::Url;
use std::path::PathBuf;

/// Largest accepted token safety margin (30 days)
pub const MAX_TOKEN_SAFETY_MARGIN_SECS: u64 = 30 * 24 * 60 * 60;

/// Bookshelf - search books and keep track of what you have read
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the bookshelf API
    #[arg(short = 'u', long, env = "BOOKSHELF_API_URL", default_value = "http://localhost:8080", global = true)]
    pub api_url: String,

    /// File holding the session token
    #[arg(short = 's', long, env = "BOOKSHELF_SESSION_FILE", global = true)]
    pub session_file: Option<String>,

    /// Seconds before token expiry at which it is treated as expired
    #[arg(long, env = "TOKEN_SAFETY_MARGIN", default_value = "7200", global = true)]
    pub token_safety_margin: u64,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10", global = true)]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30", global = true)]
    pub http_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in with email and password
    Login {
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Create an account
    Register {
        #[arg(short, long)]
        email: Option<String>,
    },

    /// End the session
    Logout,

    /// Show the logged-in user
    Whoami,

    /// Search the book catalog
    Search {
        /// Search terms
        #[arg(required = true)]
        query: Vec<String>,

        /// Page number, starting at 1
        #[arg(short, long, default_value = "1")]
        page: u32,

        /// Results per page
        #[arg(long, default_value = "10")]
        size: u32,
    },

    /// Show details of a catalog book
    Show { id: String },

    /// Add a catalog book to the reading list
    Add { id: String },

    /// List books on the reading list
    ReadList {
        /// Page number, starting at 1
        #[arg(short, long, default_value = "1")]
        page: u32,

        /// Entries per page
        #[arg(long, default_value = "5")]
        size: u32,

        /// Print the whole list instead of one page
        #[arg(short, long, conflicts_with = "page")]
        all: bool,
    },

    /// Remove an entry from the reading list
    Remove { id: i64 },
}

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub api_url: Url,

    // Session
    pub session_file: PathBuf,
    pub token_safety_margin: u64,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let command = args.command.clone();
        Ok((Self::from_args(args)?, command))
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let api_url = Url::parse(args.api_url.trim())
            .with_context(|| format!("Invalid BOOKSHELF_API_URL: {}", args.api_url))?;

        let session_file = args
            .session_file
            .map(|s| expand_tilde(&s))
            .or_else(default_session_file)
            .context("Cannot determine session file location (use -s or set BOOKSHELF_SESSION_FILE)")?;

        Ok(Config {
            api_url,
            session_file,
            token_safety_margin: args.token_safety_margin,
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.http_timeout,
            log_level: args.log_level,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.api_url.scheme(), "http" | "https") {
            anyhow::bail!(
                "BOOKSHELF_API_URL must be an http(s) URL, got: {}",
                self.api_url
            );
        }

        if self.http_connect_timeout == 0 || self.http_request_timeout == 0 {
            anyhow::bail!("HTTP timeouts must be greater than zero");
        }

        self.safety_margin()?;

        Ok(())
    }

    /// Token safety margin as a duration, bounded to a sane range
    pub fn safety_margin(&self) -> Result<chrono::Duration> {
        if self.token_safety_margin > MAX_TOKEN_SAFETY_MARGIN_SECS {
            anyhow::bail!(
                "TOKEN_SAFETY_MARGIN must be at most {} seconds, got: {}",
                MAX_TOKEN_SAFETY_MARGIN_SECS,
                self.token_safety_margin
            );
        }

        i64::try_from(self.token_safety_margin)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .context("TOKEN_SAFETY_MARGIN is out of range")
    }
}

/// Default session file in the user's config directory
fn default_session_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bookshelf").join("session.json"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// === Interactive Prompts ===

/// Ask for whatever credentials were not given on the command line
pub fn prompt_credentials(email: Option<String>, registering: bool) -> Result<(String, String)> {
    let email = match email {
        Some(email) => email,
        None => Input::new()
            .with_prompt("Email")
            .interact_text()
            .context("Failed to read email")?,
    };

    let mut prompt = Password::new().with_prompt("Password");
    if registering {
        prompt = prompt.with_confirmation("Repeat password", "Passwords do not match");
    }
    let password = prompt.interact().context("Failed to read password")?;

    Ok((email, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        // Just "~" without slash should not expand
        let path = expand_tilde("~");
        assert_eq!(path, PathBuf::from("~"));
    }

    #[test]
    fn test_parse_search_command() {
        let args = parse(&["bookshelf", "search", "dune", "messiah", "--page", "2"]);
        assert_eq!(
            args.command,
            Command::Search {
                query: vec!["dune".to_string(), "messiah".to_string()],
                page: 2,
                size: 10,
            }
        );
    }

    #[test]
    fn test_parse_global_options_after_subcommand() {
        let args = parse(&[
            "bookshelf",
            "read-list",
            "--api-url",
            "https://books.example.com",
            "--session-file",
            "/tmp/session.json",
        ]);
        assert_eq!(
            args.command,
            Command::ReadList {
                page: 1,
                size: 5,
                all: false
            }
        );

        let config = Config::from_args(args).unwrap();
        assert_eq!(config.api_url.as_str(), "https://books.example.com/");
        assert_eq!(config.session_file, PathBuf::from("/tmp/session.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_read_list_all() {
        let args = parse(&["bookshelf", "read-list", "--all"]);
        assert_eq!(
            args.command,
            Command::ReadList {
                page: 1,
                size: 5,
                all: true
            }
        );
        assert!(CliArgs::try_parse_from(["bookshelf", "read-list", "--all", "--page", "2"]).is_err());
    }

    #[test]
    fn test_parse_remove_requires_numeric_id() {
        assert!(CliArgs::try_parse_from(["bookshelf", "remove", "abc"]).is_err());
        let args = parse(&["bookshelf", "remove", "12"]);
        assert_eq!(args.command, Command::Remove { id: 12 });
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let args = parse(&[
            "bookshelf",
            "whoami",
            "--api-url",
            "ftp://books.example.com",
            "--session-file",
            "/tmp/s.json",
        ]);
        let config = Config::from_args(args).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let args = parse(&[
            "bookshelf",
            "whoami",
            "--http-timeout",
            "0",
            "--session-file",
            "/tmp/s.json",
        ]);
        let config = Config::from_args(args).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_safety_margin() {
        let args = parse(&[
            "bookshelf",
            "whoami",
            "--token-safety-margin",
            "10000000000000000",
            "-s",
            "/tmp/s.json",
        ]);
        let config = Config::from_args(args).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("TOKEN_SAFETY_MARGIN"));
        assert!(config.safety_margin().is_err());

        let args = parse(&["bookshelf", "whoami", "--token-safety-margin", "18446744073709551615", "-s", "/tmp/s.json"]);
        assert!(Config::from_args(args).unwrap().validate().is_err());
    }

    #[test]
    fn test_safety_margin_default_and_bound() {
        let config = Config::from_args(parse(&["bookshelf", "whoami", "-s", "/tmp/s.json"])).unwrap();
        assert_eq!(config.safety_margin().unwrap(), chrono::Duration::hours(2));

        let bound = MAX_TOKEN_SAFETY_MARGIN_SECS.to_string();
        let args = parse(&["bookshelf", "whoami", "--token-safety-margin", &bound, "-s", "/tmp/s.json"]);
        let config = Config::from_args(args).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.safety_margin().unwrap(), chrono::Duration::days(30));
    }

    #[test]
    fn test_invalid_url_fails_to_load() {
        let args = parse(&["bookshelf", "whoami", "--api-url", "not a url", "-s", "/tmp/s.json"]);
        assert!(Config::from_args(args).is_err());
    }
}
