//! Tracing subscriber setup from the `logging` config section.

use ivr_pilot_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Filter directives used when `RUST_LOG` is not set.
pub fn default_directives(logging: &LoggingConfig, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        logging.level.as_deref().unwrap_or("info")
    };

    let mut directives = vec![level.to_string()];
    directives.extend(logging.filters.iter().cloned());
    directives.join(",")
}

pub fn init(logging: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(logging, verbose)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let json = logging.format.eq_ignore_ascii_case("json");
    let stdout = logging.output.eq_ignore_ascii_case("stdout");

    let result = match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).try_init(),
        (true, false) => builder.json().with_writer(std::io::stderr).try_init(),
        (false, true) => builder.with_writer(std::io::stdout).try_init(),
        (false, false) => builder.with_writer(std::io::stderr).try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialise logging: {e}"))
}
