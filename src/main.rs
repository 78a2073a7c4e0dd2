//! # Host Override
//!
//! Checks a hostname override setup and previews what it does to URLs.
//!
//! Loads the settings and the override file exactly as an embedding
//! application would at startup, exiting with status 1 if either is
//! malformed, then prints one JSON line per URL argument describing where
//! the request would be sent.
//!
//! ## Usage
//!
//! ```bash
//! # Validate dns.cfg in the current directory
//! host-override
//!
//! # Preview rewrites
//! host-override -o /etc/host-override/dns.cfg http://example.com/path?x=1
//!
//! # Increase verbosity
//! host-override -vv -s host-override.yaml https://api.example.com/
//! ```

use clap::Parser;
use host_override::config::Settings;
use host_override::logging;
use host_override::overrides::OverrideTable;
use host_override::rewriter::RequestRewriter;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

/// Validates hostname overrides and previews request rewrites.
#[derive(Parser, Debug)]
#[command(name = "host-override")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML settings file
    #[arg(short, long, env = "HOST_OVERRIDE_SETTINGS")]
    settings: Option<PathBuf>,

    /// Path to the override file (overrides the settings file)
    #[arg(short, long, env = "HOST_OVERRIDE_FILE")]
    overrides: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace, -vvvv trace+deps)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,

    /// URLs to preview
    urls: Vec<String>,
}

impl Args {
    /// Converts verbosity count to a log level.
    fn log_level(&self) -> Option<&'static str> {
        if self.quiet {
            return Some("error");
        }
        match self.verbose {
            0 => None,
            1 => Some("info"),
            2 => Some("debug"),
            _ => Some("trace"),
        }
    }

    fn trace_deps(&self) -> bool {
        self.verbose >= 4
    }
}

fn main() {
    let args = Args::parse();

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load settings: {}", e);
            std::process::exit(1);
        }
    };

    let _log_guard = match logging::init_logging(&settings.logging, args.log_level(), args.trace_deps()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    let overrides_path = args
        .overrides
        .clone()
        .unwrap_or_else(|| settings.interception.overrides_file.clone());

    let rewriter = if settings.interception.enabled {
        match OverrideTable::load(&overrides_path) {
            Ok(table) => RequestRewriter::new(Arc::new(table), true),
            Err(e) => {
                error!(path = %overrides_path.display(), error = %e, "Invalid override file");
                eprintln!("{}: {}", overrides_path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        info!("Interception disabled; requests are passed through unchanged");
        RequestRewriter::disabled()
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        overrides = rewriter.table().len(),
        enabled = rewriter.is_enabled(),
        "Override table ready"
    );

    let mut failed = false;
    for raw in &args.urls {
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(e) => {
                eprintln!("{}: invalid URL: {}", raw, e);
                failed = true;
                continue;
            }
        };

        let rewrite = rewriter.rewrite(&url);
        let line = serde_json::json!({
            "url": url.as_str(),
            "effectiveUrl": rewrite.url.as_str(),
            "hostHeader": rewrite.host_header,
        });
        println!("{}", line);
    }

    if failed {
        std::process::exit(2);
    }
}

/// Loads settings from the given path, a default location, or defaults.
fn load_settings(args: &Args) -> host_override::Result<Settings> {
    if let Some(path) = &args.settings {
        return Settings::load(path);
    }

    let defaults = ["./host-override.yaml", "./host-override.yml", "/etc/host-override/settings.yaml"];
    for path in defaults {
        let p = PathBuf::from(path);
        if p.exists() {
            return Settings::load(p);
        }
    }

    Ok(Settings::default())
}
