use camino::Utf8Path;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use config::{Config, Environment, File};
use secrecy::SecretString;
use std::fs::read_to_string;
use tap::Tap;
use tracing::{debug, info};

pub const ENV_PREFIX: &str = "GHWATCH";

/// Loads settings from the optional TOML file at `path`, overlaid with
/// `GHWATCH_*` environment variables, and reads the configured secret files.
///
/// # Errors
///
/// The file or environment does not deserialize, or a configured secret file
/// cannot be read.
#[tracing::instrument]
pub fn new_config(path: Option<&Utf8Path>) -> Result<Application> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        info!(%path, "Reading config file");
        builder = builder.add_source(File::with_name(path.as_str()));
    } else {
        info!("No config file specified, using defaults and environment");
    }

    let s = builder
        .add_source(Environment::with_prefix(ENV_PREFIX))
        .build()?;

    // Environment overrides the file, the file overrides the defaults
    let base: ghwatch_cfg::Config = s.try_deserialize()?;
    debug!(backend = ?base.backend, address = %base.address, "Loaded config");

    let webhook_secret = read_secret(base.webhook_secret_file.as_deref(), "webhook secret")?;
    let slack_webhook_url =
        read_secret(base.slack_webhook_url_file.as_deref(), "Slack webhook URL")?;

    Ok(Application {
        base,
        webhook_secret,
        slack_webhook_url,
    })
}

#[tracing::instrument]
pub fn new_config_with_secrets(
    base: ghwatch_cfg::Config,
    webhook_secret: Option<SecretString>,
    slack_webhook_url: Option<SecretString>,
) -> Application {
    Application {
        base,
        webhook_secret,
        slack_webhook_url,
    }
}

/// Reads a secret from `path`, trimming surrounding whitespace. An empty file
/// counts as no secret.
fn read_secret(path: Option<&Utf8Path>, what: &str) -> Result<Option<SecretString>> {
    let Some(path) = path else {
        debug!(what, "Secret file not configured");
        return Ok(None);
    };
    debug!(%path, what, "Reading secret");
    let secret = read_to_string(path)
        .wrap_err_with(|| format!("failed to read {what} from {path}"))?
        .trim()
        .to_owned()
        .tap(|secret| debug!(length = secret.len(), "Read secret"));
    info!(%path, what, "Read secret");
    Ok((!secret.is_empty()).then(|| secret.into()))
}

#[derive(Clone, Debug)]
pub struct Application {
    pub base: ghwatch_cfg::Config,
    pub webhook_secret: Option<SecretString>,
    pub slack_webhook_url: Option<SecretString>,
}
