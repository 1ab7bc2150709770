//! Configuration loading and validation.

use std::time::Duration;

use driftless::config::{AtlasConfig, ConfigError};
use driftless::test_support::EnvGuard;
use driftless::AtlasClient;
use rstest::*;

#[fixture]
fn valid_config() -> AtlasConfig {
    AtlasConfig {
        base_url: String::from("https://cloud.mongodb.com"),
        access_token: String::from("atlas-token-example"),
        items_per_page: 100,
        request_timeout_secs: 30,
        delete_on_create_timeout: true,
    }
}

#[rstest]
fn missing_token_names_env_var_and_key(valid_config: AtlasConfig) {
    let cfg = AtlasConfig {
        access_token: String::from("  "),
        ..valid_config
    };

    let error = cfg.validate().expect_err("token is required");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error}");
    };
    assert!(
        message.contains("MONGODB_ATLAS_ACCESS_TOKEN"),
        "error should mention env var: {message}"
    );
    assert!(
        message.contains("driftless.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains("access_token"),
        "error should mention TOML key: {message}"
    );
}

#[rstest]
#[case::bad_scheme(|cfg: &mut AtlasConfig| cfg.base_url = String::from("ftp://cloud.mongodb.com"), "MONGODB_ATLAS_BASE_URL")]
#[case::not_a_url(|cfg: &mut AtlasConfig| cfg.base_url = String::from("cloud.mongodb.com"), "MONGODB_ATLAS_BASE_URL")]
#[case::zero_page(|cfg: &mut AtlasConfig| cfg.items_per_page = 0, "MONGODB_ATLAS_ITEMS_PER_PAGE")]
#[case::huge_page(|cfg: &mut AtlasConfig| cfg.items_per_page = 501, "MONGODB_ATLAS_ITEMS_PER_PAGE")]
#[case::zero_timeout(|cfg: &mut AtlasConfig| cfg.request_timeout_secs = 0, "MONGODB_ATLAS_REQUEST_TIMEOUT_SECS")]
fn out_of_range_values_are_invalid(
    valid_config: AtlasConfig,
    #[case] mutate: fn(&mut AtlasConfig),
    #[case] env_var: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("validation should fail");

    assert!(matches!(error, ConfigError::Invalid(_)), "{error}");
    assert!(error.to_string().contains(env_var), "{error}");
}

#[rstest]
fn derived_settings_follow_fields(valid_config: AtlasConfig) {
    let cfg = AtlasConfig {
        request_timeout_secs: 12,
        delete_on_create_timeout: false,
        ..valid_config
    };

    assert_eq!(cfg.request_timeout(), Duration::from_secs(12));
    assert!(!cfg.cleanup_policy().delete_on_create_timeout);
    assert!(AtlasClient::from_config(&cfg).is_ok());
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let _guard = EnvGuard::apply(&[
        ("MONGODB_ATLAS_ACCESS_TOKEN", Some("from-env")),
        ("MONGODB_ATLAS_ITEMS_PER_PAGE", Some("250")),
        ("MONGODB_ATLAS_DELETE_ON_CREATE_TIMEOUT", Some("false")),
        ("MONGODB_ATLAS_BASE_URL", None),
        ("MONGODB_ATLAS_REQUEST_TIMEOUT_SECS", None),
        ("DRIFTLESS_CONFIG_PATH", None),
    ])
    .await;

    let cfg = AtlasConfig::load_without_cli_args().expect("config should load");

    assert_eq!(cfg.access_token, "from-env");
    assert_eq!(cfg.items_per_page, 250);
    assert!(!cfg.delete_on_create_timeout);
    assert_eq!(cfg.base_url, "https://cloud.mongodb.com");
    assert_eq!(cfg.request_timeout_secs, 30);
    cfg.validate().expect("loaded config should validate");
}
