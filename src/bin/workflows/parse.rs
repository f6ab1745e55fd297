use anyhow::{Context, Result};

use halow_kernel_builder::kconfig::{single_line, validate_option_name};

/// Parse `NAME=VALUE`. The value is kept literally, so string options are
/// written with their quotes: `CONFIG_SYSTEM_TRUSTED_KEYS=""`.
pub(crate) fn parse_assignment(arg: &str) -> Result<(String, String)> {
    let (name, value) = arg
        .split_once('=')
        .with_context(|| format!("expected NAME=VALUE, got '{arg}'"))?;
    let name = name.trim();
    validate_option_name(name)?;
    single_line(value).with_context(|| format!("value for '{name}'"))?;
    Ok((name.to_string(), value.to_string()))
}
