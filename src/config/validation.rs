use crate::config::types::{
    BackoffConfig, Config, HarvestConfig, OutputConfig, RetryConfig, SourceConfig,
    UserAgentConfig,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvest_config(&config.harvest)?;
    validate_retry_config(&config.retry)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_sources(&config.sources)?;
    Ok(())
}

/// Validates run-wide harvest settings
fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    if config.checkpoint_dir.is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint_dir cannot be empty".to_string(),
        ));
    }

    if config.flush_every_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "flush_every_pages must be >= 1, got {}",
            config.flush_every_pages
        )));
    }

    Ok(())
}

/// Validates the retry budget and backoff curves
pub(crate) fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_retries < 1 || config.max_retries > 20 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be between 1 and 20, got {}",
            config.max_retries
        )));
    }

    if config.parse_error_limit < 1 {
        return Err(ConfigError::Validation(format!(
            "parse_error_limit must be >= 1, got {}",
            config.parse_error_limit
        )));
    }

    for (name, backoff) in [
        ("network", &config.network),
        ("rate-limit", &config.rate_limit),
        ("connection", &config.connection),
        ("low-items", &config.low_items),
    ] {
        validate_backoff(name, backoff)?;
    }

    Ok(())
}

fn validate_backoff(name: &str, backoff: &BackoffConfig) -> Result<(), ConfigError> {
    if backoff.base_ms > backoff.max_ms {
        return Err(ConfigError::Validation(format!(
            "{} backoff base_ms ({}) must not exceed max_ms ({})",
            name, backoff.base_ms, backoff.max_ms
        )));
    }
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    if let Some(contact_url) = &config.contact_url {
        Url::parse(contact_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;
    }

    if let Some(email) = &config.contact_email {
        validate_email(email)?;
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.documents_dir.is_empty() {
        return Err(ConfigError::Validation(
            "documents_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the source list
fn validate_sources(sources: &[SourceConfig]) -> Result<(), ConfigError> {
    if sources.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[source]] must be configured".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for source in sources {
        if !seen.insert(source.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate source id '{}'",
                source.id
            )));
        }
        validate_source(source)?;
    }

    Ok(())
}

/// Validates one source entry
pub(crate) fn validate_source(source: &SourceConfig) -> Result<(), ConfigError> {
    // The id ends up in checkpoint file names and document paths
    if source.id.is_empty()
        || !source
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "source id must be non-empty and contain only [A-Za-z0-9_-], got '{}'",
            source.id
        )));
    }

    let url = Url::parse(&source.base_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid base_url '{}': {}", source.base_url, e))
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "base_url '{}' must use HTTP or HTTPS",
            source.base_url
        )));
    }

    if source.workers < 1 || source.workers > 100 {
        return Err(ConfigError::Validation(format!(
            "{}: workers must be between 1 and 100, got {}",
            source.id, source.workers
        )));
    }

    if source.items_per_page < 1 {
        return Err(ConfigError::Validation(format!(
            "{}: items_per_page must be >= 1",
            source.id
        )));
    }

    if source.min_items > source.items_per_page as usize {
        return Err(ConfigError::Validation(format!(
            "{}: min_items ({}) cannot exceed items_per_page ({})",
            source.id, source.min_items, source.items_per_page
        )));
    }

    if source.delay_min_ms > source.delay_max_ms {
        return Err(ConfigError::Validation(format!(
            "{}: delay_min_ms ({}) must not exceed delay_max_ms ({})",
            source.id, source.delay_min_ms, source.delay_max_ms
        )));
    }

    if source.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "{}: request_timeout_secs must be >= 1",
            source.id
        )));
    }

    if matches!(source.max_pages, Some(0)) {
        return Err(ConfigError::Validation(format!(
            "{}: max_pages must be >= 1 when set",
            source.id
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
