//! AWS Environment
//!
//! Resolves the target account and region from the environment or the AWS
//! CLI configuration, the same places the CDK toolkit looks.

use std::path::PathBuf;

/// Profile used when `AWS_PROFILE` is not set
const DEFAULT_PROFILE: &str = "default";

/// Get the AWS CLI config file path
pub fn get_aws_config_path() -> Option<PathBuf> {
    // Check AWS_CONFIG_FILE environment variable first
    if let Ok(path) = std::env::var("AWS_CONFIG_FILE") {
        return Some(PathBuf::from(path));
    }

    dirs::home_dir().map(|p| p.join(".aws").join("config"))
}

/// Validate an AWS account id: exactly 12 digits
pub fn validate_account_id(account: &str) -> bool {
    account.len() == 12 && account.chars().all(|c| c.is_ascii_digit())
}

/// Validate the shape of a region id, e.g. `eu-central-1` or `us-gov-west-1`
pub fn validate_region(region: &str) -> bool {
    let parts: Vec<&str> = region.split('-').collect();
    if parts.len() < 3 {
        return false;
    }

    let Some((number, words)) = parts.split_last() else {
        return false;
    };

    !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
        && words
            .iter()
            .all(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_lowercase()))
}

/// Read the default account from the environment
pub fn get_default_account() -> Option<String> {
    for var in ["CDK_DEFAULT_ACCOUNT", "AWS_ACCOUNT_ID"] {
        if let Ok(account) = std::env::var(var) {
            if validate_account_id(&account) {
                return Some(account);
            }
            tracing::warn!("Invalid account id format in {}", var);
        }
    }
    None
}

/// Read the default region from the environment, then from the active
/// profile in the AWS CLI config
pub fn get_default_region() -> Option<String> {
    for var in ["CDK_DEFAULT_REGION", "AWS_REGION", "AWS_DEFAULT_REGION"] {
        if let Ok(region) = std::env::var(var) {
            if validate_region(&region) {
                return Some(region);
            }
            tracing::warn!("Invalid region format in {}", var);
        }
    }

    let profile = std::env::var("AWS_PROFILE").unwrap_or_else(|_| DEFAULT_PROFILE.to_string());
    let config_path = get_aws_config_path()?;
    let content = std::fs::read_to_string(&config_path).ok()?;

    let region = parse_profile_region(&content, &profile)?;
    if validate_region(&region) {
        Some(region)
    } else {
        tracing::warn!("Invalid region format in profile {}", profile);
        None
    }
}

/// Find `region = ...` in the section of `profile` of an AWS CLI config file.
///
/// The default profile's section is `[default]`, every other profile is
/// `[profile <name>]`.
pub fn parse_profile_region(content: &str, profile: &str) -> Option<String> {
    let header = if profile == DEFAULT_PROFILE {
        format!("[{}]", DEFAULT_PROFILE)
    } else {
        format!("[profile {}]", profile)
    };

    let mut in_section = false;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            in_section = line == header;
        } else if in_section {
            if let Some((key, value)) = line.split_once('=') {
                if key.trim() == "region" {
                    return Some(value.trim().to_string());
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_account_id() {
        assert!(validate_account_id("111122223333"));
        assert!(!validate_account_id("11112222333"));
        assert!(!validate_account_id("11112222333a"));
    }

    #[test]
    fn test_validate_region() {
        assert!(validate_region("eu-central-1"));
        assert!(validate_region("us-gov-west-1"));
        assert!(!validate_region("eu-central"));
        assert!(!validate_region("EU-central-1"));
        assert!(!validate_region("eu--1"));
    }

    #[test]
    fn test_parse_profile_region() {
        let content = "\
[default]
output = json
region = eu-central-1

# work account
[profile work]
region=us-east-2
";
        assert_eq!(
            parse_profile_region(content, "default").as_deref(),
            Some("eu-central-1")
        );
        assert_eq!(
            parse_profile_region(content, "work").as_deref(),
            Some("us-east-2")
        );
        assert_eq!(parse_profile_region(content, "missing"), None);
    }
}
