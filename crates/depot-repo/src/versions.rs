//! The version-index metadata document and its merge rules.
//!
//! The artifact-level `maven-metadata.xml` lists every deployed version of a
//! coordinate; the version-level variant carries the timestamp and build
//! number of the newest snapshot. Install and deploy regenerate the index by
//! merging the new versions into whatever copy already exists, so the result
//! is the union regardless of deploy order.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use quick_xml::events::Event;
use quick_xml::Reader;

use depot_core::artifact::Artifact;
use depot_core::metadata::{MergeableMetadata, Metadata, Nature};
use depot_core::version::Version;
use depot_util::errors::{DepotError, DepotResult};

/// Kind string of the version-index document.
pub const VERSIONS_METADATA_KIND: &str = "maven-metadata.xml";

/// Parsed artifact-level version index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionsDocument {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub latest: Option<String>,
    pub release: Option<String>,
    pub versions: Vec<String>,
    pub last_updated: Option<String>,
}

/// Parsed version-level snapshot record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDocument {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
    pub timestamp: Option<String>,
    pub build_number: Option<u32>,
    pub last_updated: Option<String>,
}

impl SnapshotDocument {
    /// The timestamped version for a base snapshot version.
    ///
    /// `1.0-SNAPSHOT` with timestamp `20240101.101010` and build `7` becomes
    /// `1.0-20240101.101010-7`.
    pub fn timestamped_version(&self) -> Option<String> {
        let version = self.version.as_deref()?;
        let base = version.strip_suffix("-SNAPSHOT")?;
        let ts = self.timestamp.as_deref()?;
        let bn = self.build_number?;
        Some(format!("{base}-{ts}-{bn}"))
    }
}

/// Parse an artifact-level version index.
pub fn parse_versions(xml: &str) -> DepotResult<VersionsDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut doc = VersionsDocument::default();
    let mut path: Vec<String> = Vec::new();
    let mut text_buf = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
                text_buf.clear();
            }
            Ok(Event::Text(ref e)) => {
                text_buf = e.unescape().unwrap_or_default().to_string();
            }
            Ok(Event::End(_)) => {
                let ctx = path.join(">");
                match ctx.as_str() {
                    "metadata>groupId" => doc.group_id = Some(text_buf.clone()),
                    "metadata>artifactId" => doc.artifact_id = Some(text_buf.clone()),
                    "metadata>versioning>latest" => doc.latest = Some(text_buf.clone()),
                    "metadata>versioning>release" => doc.release = Some(text_buf.clone()),
                    "metadata>versioning>versions>version" => {
                        doc.versions.push(text_buf.clone());
                    }
                    "metadata>versioning>lastUpdated" => {
                        doc.last_updated = Some(text_buf.clone());
                    }
                    _ => {}
                }
                path.pop();
                text_buf.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DepotError::Invalid {
                    message: format!("failed to parse version index: {e}"),
                });
            }
            _ => {}
        }
    }

    Ok(doc)
}

/// Parse a version-level snapshot record.
pub fn parse_snapshot(xml: &str) -> DepotResult<SnapshotDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut doc = SnapshotDocument::default();
    let mut path: Vec<String> = Vec::new();
    let mut text_buf = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
                text_buf.clear();
            }
            Ok(Event::Text(ref e)) => {
                text_buf = e.unescape().unwrap_or_default().to_string();
            }
            Ok(Event::End(_)) => {
                let ctx = path.join(">");
                match ctx.as_str() {
                    "metadata>groupId" => doc.group_id = Some(text_buf.clone()),
                    "metadata>artifactId" => doc.artifact_id = Some(text_buf.clone()),
                    "metadata>version" => doc.version = Some(text_buf.clone()),
                    "metadata>versioning>snapshot>timestamp" => {
                        doc.timestamp = Some(text_buf.clone());
                    }
                    "metadata>versioning>snapshot>buildNumber" => {
                        doc.build_number = text_buf.parse().ok();
                    }
                    "metadata>versioning>lastUpdated" => {
                        doc.last_updated = Some(text_buf.clone());
                    }
                    _ => {}
                }
                path.pop();
                text_buf.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DepotError::Invalid {
                    message: format!("failed to parse snapshot record: {e}"),
                });
            }
            _ => {}
        }
    }

    Ok(doc)
}

/// Render an artifact-level version index.
pub fn render_versions(doc: &VersionsDocument) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata>\n");
    if let Some(group_id) = &doc.group_id {
        out.push_str(&format!("  <groupId>{}</groupId>\n", escape(group_id)));
    }
    if let Some(artifact_id) = &doc.artifact_id {
        out.push_str(&format!("  <artifactId>{}</artifactId>\n", escape(artifact_id)));
    }
    out.push_str("  <versioning>\n");
    if let Some(latest) = &doc.latest {
        out.push_str(&format!("    <latest>{}</latest>\n", escape(latest)));
    }
    if let Some(release) = &doc.release {
        out.push_str(&format!("    <release>{}</release>\n", escape(release)));
    }
    out.push_str("    <versions>\n");
    for version in &doc.versions {
        out.push_str(&format!("      <version>{}</version>\n", escape(version)));
    }
    out.push_str("    </versions>\n");
    if let Some(last_updated) = &doc.last_updated {
        out.push_str(&format!(
            "    <lastUpdated>{}</lastUpdated>\n",
            escape(last_updated)
        ));
    }
    out.push_str("  </versioning>\n</metadata>\n");
    out
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// The version index as installable/deployable metadata.
///
/// Merging unions the version sets and recomputes `latest` and `release`, so
/// it is associative and commutative over the versions contributed.
pub struct VersionsMetadata {
    info: Metadata,
    versions: Vec<String>,
    merged: bool,
}

impl VersionsMetadata {
    pub fn new(group_id: &str, artifact_id: &str, versions: Vec<String>) -> Self {
        Self {
            info: Metadata::new(
                group_id,
                artifact_id,
                "",
                VERSIONS_METADATA_KIND,
                Nature::ReleaseOrSnapshot,
            ),
            versions,
            merged: false,
        }
    }
}

impl MergeableMetadata for VersionsMetadata {
    fn metadata(&self) -> &Metadata {
        &self.info
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.info
    }

    fn merge(&mut self, current: Option<&Path>, into: &Path) -> DepotResult<()> {
        let mut doc = match current {
            Some(path) if path.is_file() => {
                let xml = std::fs::read_to_string(path).map_err(DepotError::io)?;
                parse_versions(&xml)?
            }
            _ => VersionsDocument::default(),
        };
        doc.group_id = Some(self.info.group_id.clone());
        doc.artifact_id = Some(self.info.artifact_id.clone());

        for version in &self.versions {
            if !doc.versions.iter().any(|v| v == version) {
                doc.versions.push(version.clone());
            }
        }
        doc.latest = doc
            .versions
            .iter()
            .max_by_key(|v| Version::parse(v))
            .cloned();
        doc.release = doc
            .versions
            .iter()
            .filter(|v| !depot_core::artifact::is_snapshot_version(v))
            .max_by_key(|v| Version::parse(v))
            .cloned();
        doc.last_updated = Some(utc_timestamp(SystemTime::now()));

        if let Some(parent) = into.parent() {
            depot_util::fs::ensure_dir(parent).map_err(DepotError::io)?;
        }
        std::fs::write(into, render_versions(&doc)).map_err(DepotError::io)?;
        self.info.file = Some(into.to_path_buf());
        self.merged = true;
        Ok(())
    }

    fn is_merged(&self) -> bool {
        self.merged
    }
}

/// `20240101101010` for the given instant, UTC.
fn utc_timestamp(now: SystemTime) -> String {
    let secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    let rem = secs % 86_400;
    format!(
        "{year:04}{month:02}{day:02}{:02}{:02}{:02}",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

/// Gregorian date from days since the epoch.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// Produce version indices for deployed artifacts.
#[derive(Debug, Default)]
pub struct VersionsMetadataGenerator;

impl crate::generator::MetadataGenerator for VersionsMetadataGenerator {
    fn finish(&mut self, artifacts: &[Artifact]) -> Vec<Box<dyn MergeableMetadata>> {
        let mut by_coordinate: Vec<((String, String), Vec<String>)> = Vec::new();
        for artifact in artifacts {
            let key = (
                artifact.group_id().to_string(),
                artifact.artifact_id().to_string(),
            );
            let version = artifact.base_version();
            match by_coordinate.iter_mut().find(|(k, _)| *k == key) {
                Some((_, versions)) => {
                    if !versions.contains(&version) {
                        versions.push(version);
                    }
                }
                None => by_coordinate.push((key, vec![version])),
            }
        }
        by_coordinate
            .into_iter()
            .map(|((group_id, artifact_id), versions)| {
                Box::new(VersionsMetadata::new(&group_id, &artifact_id, versions))
                    as Box<dyn MergeableMetadata>
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::MetadataGenerator;
    use tempfile::TempDir;

    #[test]
    fn parse_version_index() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>org.example</groupId>
  <artifactId>lib</artifactId>
  <versioning>
    <latest>2.0</latest>
    <release>2.0</release>
    <versions>
      <version>1.0</version>
      <version>1.5</version>
      <version>2.0</version>
    </versions>
    <lastUpdated>20240101120000</lastUpdated>
  </versioning>
</metadata>"#;
        let doc = parse_versions(xml).unwrap();
        assert_eq!(doc.group_id.as_deref(), Some("org.example"));
        assert_eq!(doc.latest.as_deref(), Some("2.0"));
        assert_eq!(doc.versions, vec!["1.0", "1.5", "2.0"]);
    }

    #[test]
    fn parse_snapshot_record() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>g</groupId>
  <artifactId>a</artifactId>
  <version>1.0-SNAPSHOT</version>
  <versioning>
    <snapshot>
      <timestamp>20240101.101010</timestamp>
      <buildNumber>7</buildNumber>
    </snapshot>
    <lastUpdated>20240101101010</lastUpdated>
  </versioning>
</metadata>"#;
        let doc = parse_snapshot(xml).unwrap();
        assert_eq!(doc.timestamp.as_deref(), Some("20240101.101010"));
        assert_eq!(doc.build_number, Some(7));
        assert_eq!(doc.timestamped_version().unwrap(), "1.0-20240101.101010-7");
    }

    #[test]
    fn timestamped_version_requires_snapshot() {
        let doc = SnapshotDocument {
            version: Some("1.0".to_string()),
            timestamp: Some("20240101.101010".to_string()),
            build_number: Some(1),
            ..Default::default()
        };
        assert!(doc.timestamped_version().is_none());
    }

    #[test]
    fn render_parses_back() {
        let doc = VersionsDocument {
            group_id: Some("g".to_string()),
            artifact_id: Some("a".to_string()),
            latest: Some("2.0".to_string()),
            release: Some("2.0".to_string()),
            versions: vec!["1.0".to_string(), "2.0".to_string()],
            last_updated: Some("20240101120000".to_string()),
        };
        let reparsed = parse_versions(&render_versions(&doc)).unwrap();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn merge_starts_fresh_without_current() {
        let tmp = TempDir::new().unwrap();
        let into = tmp.path().join("maven-metadata.xml");
        let mut meta = VersionsMetadata::new("g", "a", vec!["1.0".to_string()]);
        meta.merge(None, &into).unwrap();
        assert!(meta.is_merged());

        let doc = parse_versions(&std::fs::read_to_string(&into).unwrap()).unwrap();
        assert_eq!(doc.versions, vec!["1.0"]);
        assert_eq!(doc.latest.as_deref(), Some("1.0"));
        assert_eq!(doc.release.as_deref(), Some("1.0"));
    }

    #[test]
    fn merge_unions_versions() {
        let tmp = TempDir::new().unwrap();
        let into = tmp.path().join("maven-metadata.xml");

        let mut first = VersionsMetadata::new("g", "a", vec!["1.0".to_string()]);
        first.merge(None, &into).unwrap();

        let mut second =
            VersionsMetadata::new("g", "a", vec!["2.0".to_string(), "1.0".to_string()]);
        second.merge(Some(&into), &into).unwrap();

        let doc = parse_versions(&std::fs::read_to_string(&into).unwrap()).unwrap();
        assert_eq!(doc.versions, vec!["1.0", "2.0"]);
        assert_eq!(doc.latest.as_deref(), Some("2.0"));

        // Re-merging the same versions changes nothing: union semantics.
        let mut again = VersionsMetadata::new("g", "a", vec!["2.0".to_string()]);
        again.merge(Some(&into), &into).unwrap();
        let doc = parse_versions(&std::fs::read_to_string(&into).unwrap()).unwrap();
        assert_eq!(doc.versions, vec!["1.0", "2.0"]);
    }

    #[test]
    fn merge_order_does_not_matter() {
        let tmp = TempDir::new().unwrap();
        let forward = tmp.path().join("forward.xml");
        let backward = tmp.path().join("backward.xml");

        let mut a1 = VersionsMetadata::new("g", "a", vec!["1.0".to_string()]);
        let mut a2 = VersionsMetadata::new("g", "a", vec!["2.0".to_string()]);
        a1.merge(None, &forward).unwrap();
        a2.merge(Some(&forward), &forward).unwrap();

        let mut b2 = VersionsMetadata::new("g", "a", vec!["2.0".to_string()]);
        let mut b1 = VersionsMetadata::new("g", "a", vec!["1.0".to_string()]);
        b2.merge(None, &backward).unwrap();
        b1.merge(Some(&backward), &backward).unwrap();

        let forward_doc = parse_versions(&std::fs::read_to_string(&forward).unwrap()).unwrap();
        let backward_doc = parse_versions(&std::fs::read_to_string(&backward).unwrap()).unwrap();

        let mut fv = forward_doc.versions.clone();
        let mut bv = backward_doc.versions.clone();
        fv.sort();
        bv.sort();
        assert_eq!(fv, bv);
        assert_eq!(forward_doc.latest, backward_doc.latest);
    }

    #[test]
    fn release_excludes_snapshots() {
        let tmp = TempDir::new().unwrap();
        let into = tmp.path().join("maven-metadata.xml");
        let mut meta = VersionsMetadata::new(
            "g",
            "a",
            vec!["1.0".to_string(), "2.0-SNAPSHOT".to_string()],
        );
        meta.merge(None, &into).unwrap();

        let doc = parse_versions(&std::fs::read_to_string(&into).unwrap()).unwrap();
        assert_eq!(doc.latest.as_deref(), Some("2.0-SNAPSHOT"));
        assert_eq!(doc.release.as_deref(), Some("1.0"));
    }

    #[test]
    fn civil_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
        let stamp = utc_timestamp(UNIX_EPOCH + std::time::Duration::from_secs(1_704_103_810));
        assert_eq!(stamp, "20240101101010");
    }

    #[test]
    fn generator_groups_by_coordinate() {
        let mut generator = VersionsMetadataGenerator;
        let artifacts = vec![
            Artifact::new("g", "a", "jar", "1.0"),
            Artifact::new("g", "a", "pom", "1.0"),
            Artifact::new("g", "b", "jar", "3.0-20240101.101010-7"),
        ];
        let produced = generator.finish(&artifacts);
        assert_eq!(produced.len(), 2);
        assert_eq!(produced[0].metadata().artifact_id, "a");
        assert_eq!(produced[1].metadata().artifact_id, "b");
    }
}
