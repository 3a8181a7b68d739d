//! Service configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 4030
//! merchant_id = "tech_store_merchant"
//! reservation_hold_secs = 86400
//! trusted_merchants = ["tech_store_merchant"]
//! otp_code = "$AP2_OTP_CODE"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to configuration file (default: `config.toml`)
//! - `HOST` — Override server bind address
//! - `PORT` — Override server port

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `4030`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// The merchant identity this deployment signs carts as.
    #[serde(default = "default_merchant_id")]
    pub merchant_id: String,

    /// How long signed carts hold inventory, in seconds.
    #[serde(default = "default_hold_secs")]
    pub reservation_hold_secs: u64,

    /// Merchants the risk scorer treats as established.
    #[serde(default = "default_trusted_merchants")]
    pub trusted_merchants: Vec<String>,

    /// The OTP code the demo policy expects. Supports `$VAR` expansion.
    #[serde(default = "default_otp_code")]
    pub otp_code: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            merchant_id: default_merchant_id(),
            reservation_hold_secs: default_hold_secs(),
            trusted_merchants: default_trusted_merchants(),
            otp_code: default_otp_code(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    4030
}

fn default_merchant_id() -> String {
    "tech_store_merchant".to_owned()
}

fn default_hold_secs() -> u64 {
    86_400
}

fn default_trusted_merchants() -> Vec<String> {
    vec!["tech_store_merchant".to_owned()]
}

fn default_otp_code() -> String {
    "123".to_owned()
}

impl ServiceConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `config.toml` in the current directory.
    ///
    /// After loading, `$VAR` / `${VAR}` references in string values are
    /// expanded from the process environment, and `HOST` / `PORT` env vars
    /// override the file values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file is not an error: defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };

        let expanded = expand_env_vars(&content);
        let mut config: Self = toml::from_str(&expanded)?;

        if let Ok(host) = std::env::var("HOST") {
            if let Ok(addr) = host.parse() {
                config.host = addr;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        Ok(config)
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            let braced = chars.peek() == Some(&'{');
            if braced {
                chars.next();
            }

            let mut var_name = String::new();
            while let Some(&c) = chars.peek() {
                if braced {
                    if c == '}' {
                        chars.next();
                        break;
                    }
                } else if !c.is_ascii_alphanumeric() && c != '_' {
                    break;
                }
                var_name.push(c);
                chars.next();
            }

            if var_name.is_empty() {
                result.push('$');
                if braced {
                    result.push('{');
                }
            } else if let Ok(val) = std::env::var(&var_name) {
                result.push_str(&val);
            } else {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&var_name);
                if braced {
                    result.push('}');
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 4030);
        assert_eq!(config.merchant_id, "tech_store_merchant");
        assert_eq!(config.otp_code, "123");
    }

    #[test]
    fn test_file_values_override_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            port = 9000
            merchant_id = "generic_merchant"
            reservation_hold_secs = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.merchant_id, "generic_merchant");
        assert_eq!(config.reservation_hold_secs, 600);
    }

    #[test]
    fn test_env_expansion_leaves_unresolved() {
        let expanded = expand_env_vars("otp_code = \"$AP2_SURELY_UNSET_VAR\"");
        assert_eq!(expanded, "otp_code = \"$AP2_SURELY_UNSET_VAR\"");
    }

    #[test]
    fn test_env_expansion_braced() {
        // SAFETY: no other test in this crate reads or writes this variable.
        unsafe { std::env::set_var("AP2_TEST_EXPANSION", "42") };
        assert_eq!(expand_env_vars("x = ${AP2_TEST_EXPANSION}"), "x = 42");
        assert_eq!(expand_env_vars("x = $AP2_TEST_EXPANSION"), "x = 42");
    }
}
