//! `stampede init` command implementation.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use stampede::TestConfig;

/// Execute the `init` command.
///
/// Writes `.stampede/loadtest.toml` in the current directory. When a URL is
/// given it becomes the default target, so `stampede run` works without
/// arguments.
pub fn execute_init(url: Option<String>, force: bool) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let path = write_config(&cwd, url.as_deref(), force)?;

    eprintln!("Created {}", path.display());
    eprintln!();
    eprintln!("Next steps:");
    eprintln!("  1. Edit the file to tune timeouts and monitoring");
    if url.is_some() {
        eprintln!("  2. Run: stampede run");
    } else {
        eprintln!("  2. Run: stampede run <URL>");
    }

    Ok(())
}

fn write_config(base_dir: &Path, url: Option<&str>, force: bool) -> Result<std::path::PathBuf> {
    let config_dir = base_dir.join(".stampede");
    let config_path = config_dir.join("loadtest.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}\nUse --force to overwrite.",
            config_path.display()
        );
    }

    let content = match url {
        Some(url) => generate_template_with_target(url)?,
        None => generate_default_template(),
    };

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, content)?;
    Ok(config_path)
}

/// Generate the default TOML template with every setting at its default.
fn generate_default_template() -> String {
    format!(
        r#"# Load test configuration for stampede
#
# Every key is optional. Command-line flags override these values.

# Default target, used when `stampede run` is given no URL.
# [target]
# url = "http://localhost:8080/health"
# concurrency = 10
# duration = 30
# enableMonitoring = true
{SETTINGS_TEMPLATE}"#
    )
}

/// `url = "..."` line with TOML string escaping applied.
#[derive(Serialize)]
struct UrlLine<'a> {
    url: &'a str,
}

/// Generate a template with a `[target]` table for `url`.
///
/// The URL is validated first and written as an escaped TOML string.
fn generate_template_with_target(url: &str) -> Result<String> {
    TestConfig::new(url).validate()?;
    let url_line = toml::to_string(&UrlLine { url })?;

    Ok(format!(
        r#"# Load test configuration for stampede
#
# Every key is optional. Command-line flags override these values.

[target]
{url_line}# Number of requests kept in flight
concurrency = 10
# Test duration in seconds
duration = 30
# Show live throughput and host resource usage
enableMonitoring = true
{SETTINGS_TEMPLATE}"#
    ))
}

const SETTINGS_TEMPLATE: &str = r#"
[settings]
# Per-request timeout in milliseconds
request_timeout_ms = 5000

# TCP/TLS connect timeout in milliseconds
connect_timeout_ms = 10000

# HTTP method used for every request
method = "GET"

[monitor]
# Interval between live snapshots in milliseconds
sample_period_ms = 1000

# How live requests-per-second is computed:
#   { mode = "instantaneous" }
#   { mode = "trailing_window", window_ms = 5000 }
#   { mode = "cumulative" }
rate = { mode = "trailing_window", window_ms = 5000 }
"#;
