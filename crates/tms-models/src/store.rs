//! On-disk layout of an export.
//!
//! ```text
//! <dir>/main.json                      Root
//! <dir>/<test case id>/testcase.json   TestCase
//! <dir>/<shared step id>/sharedstep.json SharedStep
//! <dir>/<entity id>/<file name>        attachments of that entity
//! ```

use crate::error::{ModelError, Result};
use crate::root::Root;
use crate::test_case::{SharedStep, TestCase};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// File name of the export index.
pub const ROOT_FILE: &str = "main.json";
/// File name of a test case inside its directory.
pub const TEST_CASE_FILE: &str = "testcase.json";
/// File name of a shared step inside its directory.
pub const SHARED_STEP_FILE: &str = "sharedstep.json";

const RESERVED_NAMES: [&str; 3] = [ROOT_FILE, TEST_CASE_FILE, SHARED_STEP_FILE];

/// Writes an export directory.
pub struct ExportWriter {
    dir: PathBuf,
    used_names: Mutex<HashMap<Uuid, HashSet<String>>>,
}

impl ExportWriter {
    /// Creates the export directory (and parents) if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            used_names: Mutex::new(HashMap::new()),
        })
    }

    /// Root directory of the export.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `main.json`.
    pub fn write_root(&self, root: &Root) -> Result<PathBuf> {
        let path = self.dir.join(ROOT_FILE);
        write_json(&path, root)?;
        Ok(path)
    }

    /// Writes a test case into its own directory.
    pub fn write_test_case(&self, test_case: &TestCase) -> Result<PathBuf> {
        let path = self.entity_dir(test_case.id)?.join(TEST_CASE_FILE);
        write_json(&path, test_case)?;
        debug!(id = %test_case.id, name = %test_case.name, "Wrote test case");
        Ok(path)
    }

    /// Writes a shared step into its own directory.
    pub fn write_shared_step(&self, shared_step: &SharedStep) -> Result<PathBuf> {
        let path = self.entity_dir(shared_step.id)?.join(SHARED_STEP_FILE);
        write_json(&path, shared_step)?;
        debug!(id = %shared_step.id, name = %shared_step.name, "Wrote shared step");
        Ok(path)
    }

    /// Stores an attachment blob for an entity and returns the file name it was
    /// stored under, which may differ from `file_name` after sanitizing or
    /// de-duplication.
    pub fn write_attachment(&self, entity_id: Uuid, file_name: &str, data: &[u8]) -> Result<String> {
        let name = self.reserve_name(entity_id, file_name)?;
        let path = self.entity_dir(entity_id)?.join(&name);
        std::fs::write(&path, data)?;
        debug!(entity = %entity_id, file = %name, bytes = data.len(), "Wrote attachment");
        Ok(name)
    }

    /// Copies an attachment stored for one entity into another entity.
    pub fn copy_attachment(&self, from: Uuid, to: Uuid, file_name: &str) -> Result<String> {
        let source = self.dir.join(from.to_string()).join(file_name);
        if !source.is_file() {
            return Err(ModelError::EntityNotFound(source));
        }
        let name = self.reserve_name(to, file_name)?;
        std::fs::copy(&source, self.entity_dir(to)?.join(&name))?;
        Ok(name)
    }

    fn entity_dir(&self, id: Uuid) -> Result<PathBuf> {
        let dir = self.dir.join(id.to_string());
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn reserve_name(&self, entity_id: Uuid, file_name: &str) -> Result<String> {
        let clean = sanitize_file_name(file_name)?;
        let mut used = self.used_names.lock();
        let names = used.entry(entity_id).or_default();

        let (stem, ext) = split_extension(&clean);
        let mut candidate = clean.clone();
        let mut n = 1;
        while names.contains(&candidate) || RESERVED_NAMES.contains(&candidate.as_str()) {
            candidate = format!("{stem} ({n}){ext}");
            n += 1;
        }
        names.insert(candidate.clone());
        Ok(candidate)
    }
}

/// Reads an export directory.
pub struct ExportReader {
    dir: PathBuf,
}

impl ExportReader {
    /// Opens an export directory; fails when `main.json` is missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.join(ROOT_FILE).is_file() {
            return Err(ModelError::RootNotFound(dir));
        }
        Ok(Self { dir })
    }

    /// Root directory of the export.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn read_root(&self) -> Result<Root> {
        read_json(&self.dir.join(ROOT_FILE))
    }

    pub fn read_test_case(&self, id: Uuid) -> Result<TestCase> {
        read_json(&self.dir.join(id.to_string()).join(TEST_CASE_FILE))
    }

    pub fn read_shared_step(&self, id: Uuid) -> Result<SharedStep> {
        read_json(&self.dir.join(id.to_string()).join(SHARED_STEP_FILE))
    }

    /// Path of an entity's attachment; the file may not exist.
    pub fn attachment_path(&self, entity_id: Uuid, file_name: &str) -> PathBuf {
        self.dir.join(entity_id.to_string()).join(file_name)
    }

    pub fn read_attachment(&self, entity_id: Uuid, file_name: &str) -> Result<Vec<u8>> {
        let path = self.attachment_path(entity_id, file_name);
        if !path.is_file() {
            return Err(ModelError::EntityNotFound(path));
        }
        Ok(std::fs::read(path)?)
    }
}

/// Makes a vendor-supplied file name safe to store.
pub fn sanitize_file_name(name: &str) -> Result<String> {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_end_matches(['.', ' ']).to_string();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_' || c == '.') {
        return Err(ModelError::InvalidAttachmentName(name.to_string()));
    }
    Ok(cleaned)
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value).map_err(|source| ModelError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, data)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ModelError::EntityNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&data).map_err(|source| ModelError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::Section;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a/b:c.png").unwrap(), "a_b_c.png");
        assert_eq!(sanitize_file_name(" report.pdf. ").unwrap(), "report.pdf");
        assert!(sanitize_file_name("///").is_err());
        assert!(sanitize_file_name("").is_err());
    }

    #[test]
    fn test_attachment_names_deduplicated_per_entity() {
        let tmp = TempDir::new().unwrap();
        let writer = ExportWriter::create(tmp.path()).unwrap();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);

        assert_eq!(writer.write_attachment(a, "shot.png", b"1").unwrap(), "shot.png");
        assert_eq!(writer.write_attachment(a, "shot.png", b"2").unwrap(), "shot (1).png");
        assert_eq!(writer.write_attachment(a, "shot.png", b"3").unwrap(), "shot (2).png");
        assert_eq!(writer.write_attachment(b, "shot.png", b"4").unwrap(), "shot.png");
        assert_eq!(writer.write_attachment(a, "testcase.json", b"5").unwrap(), "testcase (1).json");
    }

    #[test]
    fn test_write_and_read_back() {
        let tmp = TempDir::new().unwrap();
        let writer = ExportWriter::create(tmp.path().join("out")).unwrap();

        let section = Section::new(Uuid::from_u128(10), "Smoke");
        let mut case = TestCase::new(Uuid::from_u128(11), "Login", section.id);
        let stored = writer.write_attachment(case.id, "log.txt", b"hello").unwrap();
        case.attachments.push(stored);
        writer.write_test_case(&case).unwrap();

        let mut root = Root::new("Shop");
        root.sections.push(section);
        root.test_cases.push(case.id);
        writer.write_root(&root).unwrap();

        let reader = ExportReader::open(writer.dir()).unwrap();
        assert_eq!(reader.read_root().unwrap(), root);
        assert_eq!(reader.read_test_case(case.id).unwrap(), case);
        assert_eq!(reader.read_attachment(case.id, "log.txt").unwrap(), b"hello");
        assert!(matches!(
            reader.read_shared_step(Uuid::from_u128(99)),
            Err(ModelError::EntityNotFound(_))
        ));
    }

    #[test]
    fn test_copy_attachment_between_entities() {
        let tmp = TempDir::new().unwrap();
        let writer = ExportWriter::create(tmp.path()).unwrap();
        let from = Uuid::from_u128(1);
        let to = Uuid::from_u128(2);
        writer.write_attachment(from, "img.png", b"png").unwrap();
        writer.write_attachment(to, "img.png", b"other").unwrap();

        let copied = writer.copy_attachment(from, to, "img.png").unwrap();
        assert_eq!(copied, "img (1).png");
        assert_eq!(std::fs::read(tmp.path().join(to.to_string()).join(&copied)).unwrap(), b"png");
    }

    #[test]
    fn test_open_without_root_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            ExportReader::open(tmp.path()),
            Err(ModelError::RootNotFound(_))
        ));
    }
}
