//! Skill-package loading (§6.6), the filesystem side of `get_skill_package`.
//!
//! Resolution is: skill id → [`SkillDefinition`] → [`SkillPackageLocation`]
//! (a directory) → a fixed read of that directory. Any missing piece along
//! the way collapses to `{package: null}` rather than an error — a skill
//! package that doesn't exist yet is an expected, not exceptional, shape.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::collaborators::traits::SkillPackages;

/// Non-recursive cap on how many files are read out of `scripts/` and
/// `references/` each.
const MAX_SUBDIR_ENTRIES: usize = 20;

const TOP_LEVEL_FILES: &[&str] = &["SKILL.md", "REFERENCE.md", "manifest.json"];

#[derive(Debug, Clone, Serialize)]
pub struct PackageFile {
    pub path: String,
    pub content: String,
    pub encoding: &'static str,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FileInventory {
    pub has_skill_md: bool,
    pub has_scripts: bool,
    pub has_references: bool,
    pub script_files: Vec<String>,
    pub reference_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillPackage {
    pub skill_id: String,
    pub version: &'static str,
    pub files: Vec<PackageFile>,
    pub file_inventory: FileInventory,
}

/// Load the skill package for `skill_id`, or `None` on any missing piece
/// (no definition, no package, no directory on disk).
pub async fn load_skill_package(
    skill_packages: &dyn SkillPackages,
    skill_id: &str,
) -> anyhow::Result<Option<SkillPackage>> {
    let Some(definition) = skill_packages.find_definition_by_skill_id(skill_id).await? else {
        return Ok(None);
    };
    let Some(location) = skill_packages
        .find_package_by_definition(&definition.package_definition_id)
        .await?
    else {
        return Ok(None);
    };
    if !location.directory.is_dir() {
        return Ok(None);
    }

    Ok(Some(read_package_directory(skill_id, &location.directory)))
}

fn read_package_directory(skill_id: &str, directory: &Path) -> SkillPackage {
    let mut files = Vec::new();
    let mut inventory = FileInventory::default();

    for name in TOP_LEVEL_FILES {
        let path = directory.join(name);
        if let Ok(content) = std::fs::read_to_string(&path) {
            if *name == "SKILL.md" {
                inventory.has_skill_md = true;
            }
            files.push(PackageFile {
                path: (*name).to_string(),
                content,
                encoding: "utf-8",
            });
        }
    }

    let scripts = read_subdirectory(directory, "scripts");
    if !scripts.is_empty() {
        inventory.has_scripts = true;
        inventory.script_files = scripts.iter().map(|f| f.path.clone()).collect();
    }
    files.extend(scripts);

    let references = read_subdirectory(directory, "references");
    if !references.is_empty() {
        inventory.has_references = true;
        inventory.reference_files = references.iter().map(|f| f.path.clone()).collect();
    }
    files.extend(references);

    SkillPackage {
        skill_id: skill_id.to_string(),
        version: "current",
        files,
        file_inventory: inventory,
    }
}

fn read_subdirectory(root: &Path, name: &str) -> Vec<PackageFile> {
    let dir = root.join(name);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };

    let mut names: Vec<_> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names.truncate(MAX_SUBDIR_ENTRIES);

    names
        .into_iter()
        .filter_map(|file_name| {
            let content = std::fs::read_to_string(dir.join(&file_name)).ok()?;
            Some(PackageFile {
                path: format!("{name}/{file_name}"),
                content,
                encoding: "utf-8",
            })
        })
        .collect()
}

/// `{package: ...}` or `{package: null}` as sent in the RPC `result` field.
#[must_use]
pub fn to_response(package: Option<SkillPackage>) -> Value {
    serde_json::json!({ "package": package })
}
