use std::fs;
use std::time::Duration;

use opwatch_engine::{ClientSettings, SettingsError};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[test]
fn defaults_poll_every_two_seconds() {
    let settings = ClientSettings::default();
    assert_eq!(settings.poll_interval, Duration::from_secs(2));
    assert_eq!(settings.connect_timeout, Duration::from_secs(10));
    assert!(settings.refresh_partial_results);
    settings.validate().unwrap();
}

#[test]
fn missing_fields_fall_back_to_defaults() {
    let settings = ClientSettings::from_ron_str(
        r#"(base_url: Some("https://rfp.example.com/api"), poll_interval_ms: Some(500))"#,
    )
    .unwrap();

    assert_eq!(settings.base_url, "https://rfp.example.com/api");
    assert_eq!(settings.poll_interval, Duration::from_millis(500));
    assert_eq!(
        settings.request_timeout,
        ClientSettings::default().request_timeout
    );
}

#[test]
fn zero_poll_interval_is_rejected() {
    let err = ClientSettings::from_ron_str("(poll_interval_ms: Some(0))").unwrap_err();
    assert!(matches!(err, SettingsError::Invalid(_)));
}

#[test]
fn unknown_fields_and_bad_urls_are_reported() {
    assert!(matches!(
        ClientSettings::from_ron_str("(poll_every: Some(3))"),
        Err(SettingsError::Parse(_))
    ));
    assert!(matches!(
        ClientSettings::from_ron_str(r#"(base_url: Some("not a url"))"#),
        Err(SettingsError::Invalid(_))
    ));
}

#[test]
fn load_reads_file_and_tolerates_absence() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("client.ron");

    assert_eq!(ClientSettings::load(&path).unwrap(), ClientSettings::default());

    fs::write(&path, "(refresh_partial_results: Some(false))").unwrap();
    let settings = ClientSettings::load(&path).unwrap();
    assert!(!settings.refresh_partial_results);
}
