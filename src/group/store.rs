//! GroupStore - durable CRUD for analysis groups scoped to a project
//!
//! One `config.json` per group namespace. Bad records never fail a listing:
//! they are logged and reported in [`LoadReport::skipped`].

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{disambiguate_slug, slugify, AnalysisGroup, GroupRecord, GROUP_SCHEMA_VERSION};
use crate::error::{AnalysisError, Result};
use crate::project::{Project, GROUP_CONFIG_FILE};

/// A record that could not be loaded
#[derive(Debug)]
pub struct SkippedRecord {
    pub path: PathBuf,
    pub error: AnalysisError,
}

/// Outcome of scanning the group namespace
#[derive(Debug, Default)]
pub struct LoadReport {
    pub groups: Vec<AnalysisGroup>,
    pub skipped: Vec<SkippedRecord>,
}

/// Group configuration store for one project
#[derive(Debug, Clone)]
pub struct GroupStore {
    project: Project,
}

impl GroupStore {
    pub fn new(project: Project) -> Self {
        Self { project }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// All successfully parsed groups, sorted by name
    pub fn list(&self) -> Result<Vec<AnalysisGroup>> {
        Ok(self.load_all()?.groups)
    }

    /// Scan every group directory, keeping per-record failures
    pub fn load_all(&self) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        let root = self.project.bulk_analysis_dir();
        if !root.is_dir() {
            return Ok(report);
        }

        for dir in self.group_dirs()? {
            let config_path = dir.join(GROUP_CONFIG_FILE);
            if !config_path.is_file() {
                continue;
            }
            match load_record(&config_path, &dir) {
                Ok(group) => report.groups.push(group),
                Err(error) => {
                    warn!(path = %config_path.display(), code = error.code(), "Skipping group record: {}", error);
                    report.skipped.push(SkippedRecord {
                        path: config_path,
                        error,
                    });
                }
            }
        }

        report
            .groups
            .sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.slug.cmp(&b.slug)));
        debug!(
            loaded = report.groups.len(),
            skipped = report.skipped.len(),
            "Loaded analysis groups"
        );
        Ok(report)
    }

    /// Load one group by slug
    pub fn load(&self, slug: &str) -> Result<AnalysisGroup> {
        let dir = self.project.group_dir(slug);
        let path = dir.join(GROUP_CONFIG_FILE);
        if !path.is_file() {
            return Err(AnalysisError::GroupNotFound {
                group: slug.to_string(),
            });
        }
        load_record(&path, &dir)
    }

    /// Find a group by identifier
    pub fn find(&self, group_id: Uuid) -> Result<AnalysisGroup> {
        self.list()?
            .into_iter()
            .find(|g| g.group_id == group_id)
            .ok_or_else(|| AnalysisError::GroupNotFound {
                group: group_id.to_string(),
            })
    }

    /// Persist a group, assigning a unique slug on first save
    pub fn save(&self, group: &AnalysisGroup) -> Result<AnalysisGroup> {
        let mut group = group.clone();

        let slug = match group.slug.take() {
            Some(slug) => {
                validate_slug(&slug)?;
                self.ensure_slug_owned(&slug, group.group_id)?;
                self.ensure_slug_unchanged(&slug, group.group_id)?;
                slug
            }
            None => {
                let taken = self.taken_slugs()?;
                disambiguate_slug(&slugify(&group.name), taken.iter().map(String::as_str))
            }
        };
        group.slug = Some(slug.clone());
        group.normalize_selections();
        group.updated_at = Utc::now();

        let dir = self.project.group_dir(&slug);
        fs::create_dir_all(&dir)?;
        let record = GroupRecord::from(&group);
        let json = serde_json::to_string_pretty(&record)?;
        write_atomic(&dir.join(GROUP_CONFIG_FILE), json.as_bytes())?;

        info!(group = %slug, id = %group.group_id, "Saved analysis group");
        Ok(group)
    }

    /// Remove the group's entire namespace (idempotent)
    pub fn delete(&self, group: &AnalysisGroup) -> Result<()> {
        let Some(slug) = group.slug.as_deref() else {
            return Ok(());
        };
        validate_slug(slug)?;
        let dir = self.project.group_dir(slug);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(group = %slug, "Deleted analysis group namespace");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn group_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(self.project.bulk_analysis_dir())? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Directory names already in use, including ones with unreadable records
    fn taken_slugs(&self) -> Result<Vec<String>> {
        if !self.project.bulk_analysis_dir().is_dir() {
            return Ok(Vec::new());
        }
        Ok(self
            .group_dirs()?
            .iter()
            .filter_map(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }

    fn ensure_slug_owned(&self, slug: &str, group_id: Uuid) -> Result<()> {
        let path = self.project.group_config_path(slug);
        if !path.is_file() {
            return Ok(());
        }
        match load_record(&path, &self.project.group_dir(slug)) {
            Ok(existing) if existing.group_id != group_id => Err(AnalysisError::InvalidConfig {
                message: format!("slug '{}' already belongs to group '{}'", slug, existing.name),
            }),
            _ => Ok(()),
        }
    }
}

impl GroupStore {
    /// An assigned slug is the group's namespace key and never moves
    fn ensure_slug_unchanged(&self, slug: &str, group_id: Uuid) -> Result<()> {
        if !self.project.bulk_analysis_dir().is_dir() {
            return Ok(());
        }
        let recorded = self
            .load_all()?
            .groups
            .into_iter()
            .find(|g| g.group_id == group_id && g.slug.as_deref() != Some(slug));
        match recorded.and_then(|g| g.slug) {
            Some(existing) => Err(AnalysisError::InvalidConfig {
                message: format!(
                    "group is stored under slug '{}'; slugs cannot change (got '{}')",
                    existing, slug
                ),
            }),
            None => Ok(()),
        }
    }
}

fn load_record(path: &Path, dir: &Path) -> Result<AnalysisGroup> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path)?;

    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| AnalysisError::MalformedRecord {
            path: display.clone(),
            details: e.to_string(),
        })?;

    let version = value
        .get("version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| AnalysisError::MalformedRecord {
            path: display.clone(),
            details: "missing numeric 'version' field".to_string(),
        })?;
    if version != u64::from(GROUP_SCHEMA_VERSION) {
        return Err(AnalysisError::UnsupportedFormat {
            path: display,
            expected: GROUP_SCHEMA_VERSION,
            found: u32::try_from(version).unwrap_or(u32::MAX),
        });
    }

    let record: GroupRecord =
        serde_json::from_value(value).map_err(|e| AnalysisError::MalformedRecord {
            path: display.clone(),
            details: e.to_string(),
        })?;
    let mut group = AnalysisGroup::try_from(record)?;

    // The directory name is the namespace key
    let dir_slug = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if group.slug.as_deref() != Some(dir_slug.as_str()) {
        if let Some(recorded) = group.slug.as_deref() {
            warn!(recorded, directory = %dir_slug, "Group slug differs from its directory; using directory");
        }
        group.slug = Some(dir_slug);
    }

    Ok(group)
}

fn validate_slug(slug: &str) -> Result<()> {
    let valid = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !slug.starts_with('-');
    if valid {
        Ok(())
    } else {
        Err(AnalysisError::InvalidConfig {
            message: format!("'{}' is not a valid group slug", slug),
        })
    }
}

/// Write to a temp sibling, then rename into place
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, Uuid::new_v4().simple()));
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{MapInputs, OperationMode, ReduceInputs};
    use tempfile::TempDir;

    fn store() -> (TempDir, GroupStore) {
        let tmp = TempDir::new().unwrap();
        let store = GroupStore::new(Project::new(tmp.path()));
        (tmp, store)
    }

    fn group(name: &str) -> AnalysisGroup {
        AnalysisGroup::new(
            name,
            "mock",
            "mock-model",
            OperationMode::Map(MapInputs::default()),
        )
    }

    #[test]
    fn test_list_empty_project() {
        let (_tmp, store) = store();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_save_assigns_unique_slugs() {
        let (_tmp, store) = store();
        let a = store.save(&group("Timeline")).unwrap();
        let b = store.save(&group("Timeline")).unwrap();
        let c = store.save(&group("timeline!")).unwrap();

        assert_eq!(a.slug.as_deref(), Some("timeline"));
        assert_eq!(b.slug.as_deref(), Some("timeline-2"));
        assert_eq!(c.slug.as_deref(), Some("timeline-3"));
        assert_eq!(store.list().unwrap().len(), 3);
    }

    #[test]
    fn test_slug_is_immutable_across_renames() {
        let (_tmp, store) = store();
        let mut saved = store.save(&group("Timeline")).unwrap();
        saved.name = "Chronology".into();
        let resaved = store.save(&saved).unwrap();

        assert_eq!(resaved.slug.as_deref(), Some("timeline"));
        assert!(resaved.updated_at >= saved.updated_at);
        let loaded = store.load("timeline").unwrap();
        assert_eq!(loaded.name, "Chronology");
    }

    #[test]
    fn test_save_normalizes_selection() {
        let (_tmp, store) = store();
        let g = AnalysisGroup::new(
            "Records",
            "mock",
            "m",
            OperationMode::Map(MapInputs {
                files: vec!["b.md".into(), " /a.md ".into(), "b.md".into()],
                directories: vec!["records/".into()],
            }),
        );
        let saved = store.save(&g).unwrap();
        match saved.operation {
            OperationMode::Map(inputs) => {
                assert_eq!(inputs.files, vec!["a.md", "b.md"]);
                assert_eq!(inputs.directories, vec!["records"]);
            }
            OperationMode::Reduce(_) => panic!("expected map"),
        }
    }

    #[test]
    fn test_unsupported_version_is_skipped_not_fatal() {
        let (_tmp, store) = store();
        store.save(&group("Good")).unwrap();

        let bad_dir = store.project().group_dir("old");
        fs::create_dir_all(&bad_dir).unwrap();
        fs::write(
            bad_dir.join(GROUP_CONFIG_FILE),
            r#"{"version": 1, "name": "Old"}"#,
        )
        .unwrap();

        let broken_dir = store.project().group_dir("broken");
        fs::create_dir_all(&broken_dir).unwrap();
        fs::write(broken_dir.join(GROUP_CONFIG_FILE), "{not json").unwrap();

        let report = store.load_all().unwrap();
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.skipped.len(), 2);
        let codes: Vec<_> = report.skipped.iter().map(|s| s.error.code()).collect();
        assert!(codes.contains(&"BULK-001"));
        assert!(codes.contains(&"BULK-002"));
    }

    #[test]
    fn test_unreadable_dirs_still_reserve_slug() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.project().group_dir("notes")).unwrap();
        let saved = store.save(&group("Notes")).unwrap();
        assert_eq!(saved.slug.as_deref(), Some("notes-2"));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_tmp, store) = store();
        let saved = store.save(&group("Timeline")).unwrap();
        let outputs = store.project().group_outputs_dir("timeline");
        fs::create_dir_all(&outputs).unwrap();
        fs::write(outputs.join("a_analysis.md"), "x").unwrap();

        store.delete(&saved).unwrap();
        assert!(!store.project().group_dir("timeline").exists());
        store.delete(&saved).unwrap();
    }

    #[test]
    fn test_assigned_slug_cannot_be_reassigned() {
        let (_tmp, store) = store();
        let mut saved = store.save(&group("Timeline")).unwrap();
        saved.slug = Some("renamed".into());

        let err = store.save(&saved).unwrap_err();
        assert_eq!(err.code(), "BULK-033");
        assert!(err.to_string().contains("timeline"));
        assert!(!store.project().group_dir("renamed").exists());

        let groups = store.list().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].slug.as_deref(), Some("timeline"));
    }

    #[test]
    fn test_foreign_slug_rejected() {
        let (_tmp, store) = store();
        store.save(&group("Timeline")).unwrap();
        let mut other = group("Other");
        other.slug = Some("timeline".into());
        let err = store.save(&other).unwrap_err();
        assert_eq!(err.code(), "BULK-033");
    }

    #[test]
    fn test_find_by_id_and_combined_roundtrip() {
        let (_tmp, store) = store();
        let combined = AnalysisGroup::new(
            "Summary",
            "mock",
            "m",
            OperationMode::Reduce(ReduceInputs {
                map_groups: vec!["timeline".into()],
                use_reasoning: true,
                ..Default::default()
            }),
        );
        let saved = store.save(&combined).unwrap();
        let found = store.find(saved.group_id).unwrap();
        assert_eq!(found.operation, saved.operation);
    }
}
