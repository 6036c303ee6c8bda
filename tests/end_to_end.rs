use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use rstest::rstest;
use tempfile::TempDir;

use epg_timeshift::cache::{OutputFlags, fingerprint};
use epg_timeshift::config::Config;
use epg_timeshift::errors::Stage;
use epg_timeshift::models::SourceRole;
use epg_timeshift::pipeline::Pipeline;
use epg_timeshift::timeshift::TimeshiftPolicy;
use epg_timeshift::utils::DecompressionService;
use epg_timeshift::validation::DocumentValidator;

const GUIDE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE tv SYSTEM "xmltv.dtd">
<tv generator-info-name="test">
  <channel id="C1">
    <display-name>Channel One</display-name>
  </channel>
  <programme start="20250101060000 +0000" stop="20250101070000 +0000" channel="C1">
    <title lang="en">Morning News</title>
    <desc>Headlines &amp; weather</desc>
  </programme>
</tv>
"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write_source(&self, name: &str, xml: &str) -> String {
        let path = self.path(name);
        std::fs::write(&path, DecompressionService::compress_gzip(xml.as_bytes()).unwrap()).unwrap();
        file_url(&path)
    }

    fn config(&self, url: String) -> Config {
        let mut config = Config::with_source_url(url);
        config.source.retry_attempts = 1;
        config.output.directory = self.path("out");
        config.processing.cache_dir = self.path("cache");
        config
    }
}

fn file_url(path: &Path) -> String {
    url::Url::from_file_path(path).unwrap().to_string()
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

fn published_start_stop(config: &Config) -> (String, String) {
    let bytes = std::fs::read(config.output.artifact_path(true)).unwrap();
    let validated = DocumentValidator::validate_bytes(&bytes).unwrap();
    let programme = &validated.document.programmes[0];
    (
        programme.start.to_rfc3339(),
        programme.stop.unwrap().to_rfc3339(),
    )
}

#[tokio::test]
async fn default_offset_shifts_every_programme() {
    let fixture = Fixture::new();
    let url = fixture.write_source("guide.xml.gz", GUIDE);
    let config = fixture.config(url);

    let pipeline = Pipeline::new(config.clone(), Vec::new()).unwrap();
    let result = pipeline.run(now()).await.unwrap();

    assert_eq!(result.source_role, SourceRole::Primary);
    assert_eq!(
        published_start_stop(&config),
        (
            "2025-01-01T06:00:30+00:00".to_string(),
            "2025-01-01T07:00:30+00:00".to_string()
        )
    );
}

#[tokio::test]
async fn per_channel_offset_overrides_default() {
    let fixture = Fixture::new();
    let url = fixture.write_source("guide.xml.gz", GUIDE);
    let mut config = fixture.config(url);
    config.timeshift.per_channel.insert("C1".into(), 120);

    Pipeline::new(config.clone(), Vec::new())
        .unwrap()
        .run(now())
        .await
        .unwrap();

    assert_eq!(published_start_stop(&config).0, "2025-01-01T06:02:00+00:00");
}

#[tokio::test]
async fn active_force_offset_wins_over_everything() {
    let fixture = Fixture::new();
    let url = fixture.write_source("guide.xml.gz", GUIDE);
    let mut config = fixture.config(url);
    let now = now();
    config.timeshift.per_channel.insert("C1".into(), 120);
    config.timeshift.force_offset = Some(3600);
    config.timeshift.force_offset_expiry = Some((now + TimeDelta::hours(1)).to_rfc3339());

    let result = Pipeline::new(config.clone(), Vec::new())
        .unwrap()
        .run(now)
        .await
        .unwrap();

    assert!(result.metrics.forced_offset_active);
    assert_eq!(published_start_stop(&config).0, "2025-01-01T07:00:00+00:00");
}

#[tokio::test]
async fn falls_back_to_backup_source() {
    let fixture = Fixture::new();
    let backup = fixture.write_source("backup.xml.gz", GUIDE);
    let mut config = fixture.config(file_url(&fixture.path("missing.xml.gz")));
    config.source.backup_urls = vec![backup];

    let result = Pipeline::new(config.clone(), Vec::new())
        .unwrap()
        .run(now())
        .await
        .unwrap();

    assert_eq!(result.source_role, SourceRole::Backup(1));
    assert_eq!(result.fetch_failures.len(), 1);
    assert_eq!(result.fetch_failures[0].role, SourceRole::Primary);
    assert!(config.output.artifact_path(true).exists());
}

#[tokio::test]
async fn failed_fetch_keeps_previous_artifact() {
    let fixture = Fixture::new();
    let url = fixture.write_source("guide.xml.gz", GUIDE);
    let config = fixture.config(url);
    Pipeline::new(config.clone(), Vec::new())
        .unwrap()
        .run(now())
        .await
        .unwrap();
    let artifact_path = config.output.artifact_path(true);
    let before = std::fs::read(&artifact_path).unwrap();

    std::fs::remove_file(fixture.path("guide.xml.gz")).unwrap();
    let failure = Pipeline::new(config.clone(), Vec::new())
        .unwrap()
        .run(now())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Fetch);
    assert_eq!(failure.error.kind(), "source_unavailable");
    assert_eq!(std::fs::read(&artifact_path).unwrap(), before);
}

#[tokio::test]
async fn malformed_source_keeps_previous_artifact() {
    let fixture = Fixture::new();
    let url = fixture.write_source("guide.xml.gz", GUIDE);
    let config = fixture.config(url);
    Pipeline::new(config.clone(), Vec::new())
        .unwrap()
        .run(now())
        .await
        .unwrap();
    let artifact_path = config.output.artifact_path(true);
    let before = std::fs::read(&artifact_path).unwrap();

    fixture.write_source("guide.xml.gz", "<tv><channel id=\"C1\">");
    let failure = Pipeline::new(config.clone(), Vec::new())
        .unwrap()
        .run(now())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Validate);
    assert_eq!(failure.error.kind(), "malformed_document");
    assert_eq!(std::fs::read(&artifact_path).unwrap(), before);
}

#[tokio::test]
async fn repeated_run_is_served_from_cache() {
    let fixture = Fixture::new();
    let url = fixture.write_source("guide.xml.gz", GUIDE);
    let config = fixture.config(url);
    let pipeline = Pipeline::new(config.clone(), Vec::new()).unwrap();

    let first = pipeline.run(now()).await.unwrap();
    let second = pipeline.run(now()).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(second.metrics.cache_hits, 1);
    assert_eq!(first.artifact.sha256, second.artifact.sha256);

    let metrics: serde_json::Value =
        serde_json::from_slice(&std::fs::read(config.output.metrics_path()).unwrap()).unwrap();
    assert_eq!(metrics["cache_hit"], true);
}

#[rstest]
#[case(30, 45)]
#[case(0, -30)]
fn different_offsets_fingerprint_differently(#[case] a: i64, #[case] b: i64) {
    let raw = DecompressionService::compress_gzip(GUIDE.as_bytes()).unwrap();
    let flags = OutputFlags {
        compress: true,
        include_metadata: false,
    };
    let first = fingerprint(&raw, &TimeshiftPolicy::uniform(a), flags);
    let second = fingerprint(&raw, &TimeshiftPolicy::uniform(b), flags);
    assert_ne!(first, second);
    assert_eq!(first, fingerprint(&raw, &TimeshiftPolicy::uniform(a), flags));
}

#[tokio::test]
async fn unmentioned_content_survives_the_shift() {
    let fixture = Fixture::new();
    let url = fixture.write_source("guide.xml.gz", GUIDE);
    let config = fixture.config(url);

    Pipeline::new(config.clone(), Vec::new())
        .unwrap()
        .run(now())
        .await
        .unwrap();

    let bytes = std::fs::read(config.output.artifact_path(true)).unwrap();
    let xml = String::from_utf8(DecompressionService::decompress(&bytes).unwrap()).unwrap();
    assert!(xml.contains("generator-info-name=\"test\""));
    assert!(xml.contains("<title lang=\"en\">Morning News</title>"));
    assert!(xml.contains("Headlines &amp; weather"));
    assert!(xml.contains("<display-name>Channel One</display-name>"));
}
