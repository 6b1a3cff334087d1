use std::collections::BTreeMap;
use std::fs;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use tracing::warn;

use crate::config::ResolvedConfig;
use crate::domain::{ArtifactKind, CaseId, Disease, FileId};
use crate::error::AsepmError;

/// A raw file materialized from the remote store, recognized by its
/// `<data root>/<file id>/` directory naming convention.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub file_id: FileId,
    pub path: Utf8PathBuf,
    pub size: u64,
    pub mtime: SystemTime,
    /// Contents of the sidecar `.md5` file, when one exists.
    pub stored_md5: Option<String>,
    pub md5_mtime: Option<SystemTime>,
    /// ".partial" naming convention: the transfer never finished.
    pub is_partial: bool,
}

/// An artifact produced by a pipeline step, recognized by its
/// `<file id><kind tag>` filename inside a per-case derived-files directory.
#[derive(Debug, Clone)]
pub struct DerivedFile {
    pub case_id: CaseId,
    pub kind: ArtifactKind,
    pub derived_from: FileId,
    pub path: Utf8PathBuf,
    pub mtime: SystemTime,
}

#[derive(Debug, Clone)]
pub struct ExpressionFile {
    pub path: Utf8PathBuf,
    pub mtime: SystemTime,
}

#[derive(Debug, Default)]
pub struct StoreScan {
    pub downloaded: BTreeMap<FileId, DownloadedFile>,
    pub derived: BTreeMap<CaseId, Vec<DerivedFile>>,
}

/// Walk every configured data directory once, collecting downloaded payloads
/// and derived artifacts. Unrecognized entries are warned about and skipped;
/// only I/O failures on entries we need to read are errors.
pub fn scan_file_store(config: &ResolvedConfig) -> Result<StoreScan, AsepmError> {
    let mut scan = StoreScan::default();

    for data_directory in &config.data_directories {
        if !data_directory.as_std_path().is_dir() {
            warn!("data directory {data_directory} does not exist; skipping");
            continue;
        }

        for entry in read_dir_sorted(data_directory)? {
            let name = entry
                .file_name()
                .ok_or_else(|| AsepmError::Filesystem(format!("unnamed entry in {data_directory}")))?;

            if name == config.derived_files_subdir {
                scan_derived_tree(&entry, &mut scan.derived)?;
            } else if let Ok(file_id) = name.parse::<FileId>() {
                if let Some(file) = scan_download_directory(&entry, file_id)? {
                    scan.downloaded.insert(file.file_id.clone(), file);
                }
            }
            // Anything else in a data root is not ours to interpret.
        }
    }

    for files in scan.derived.values_mut() {
        files.sort_by(|a, b| a.path.cmp(&b.path));
    }

    Ok(scan)
}

fn scan_download_directory(
    dir: &Utf8Path,
    file_id: FileId,
) -> Result<Option<DownloadedFile>, AsepmError> {
    if !dir.as_std_path().is_dir() {
        return Ok(None);
    }

    // The payload is whatever single data file the fetch tool left behind;
    // `.md5` sidecars belong to it rather than standing alone.
    for path in read_dir_sorted(dir)? {
        if path.as_str().ends_with(".md5") || !path.as_std_path().is_file() {
            continue;
        }

        let meta = fs::metadata(path.as_std_path())
            .map_err(|err| AsepmError::Filesystem(format!("stat {path}: {err}")))?;
        let mtime = meta
            .modified()
            .map_err(|err| AsepmError::Filesystem(format!("mtime {path}: {err}")))?;

        let md5_path = Utf8PathBuf::from(format!("{path}.md5"));
        let (stored_md5, md5_mtime) = match fs::read_to_string(md5_path.as_std_path()) {
            Ok(content) => {
                let digest = content.split_whitespace().next().unwrap_or("").to_string();
                let md5_meta = fs::metadata(md5_path.as_std_path())
                    .map_err(|err| AsepmError::Filesystem(format!("stat {md5_path}: {err}")))?;
                let md5_mtime = md5_meta
                    .modified()
                    .map_err(|err| AsepmError::Filesystem(format!("mtime {md5_path}: {err}")))?;
                ((!digest.is_empty()).then_some(digest), Some(md5_mtime))
            }
            Err(_) => (None, None),
        };

        let is_partial = path.as_str().ends_with(".partial");

        return Ok(Some(DownloadedFile {
            file_id,
            size: meta.len(),
            mtime,
            stored_md5,
            md5_mtime,
            is_partial,
            path,
        }));
    }

    Ok(None)
}

fn scan_derived_tree(
    root: &Utf8Path,
    derived: &mut BTreeMap<CaseId, Vec<DerivedFile>>,
) -> Result<(), AsepmError> {
    for case_dir in read_dir_sorted(root)? {
        if !case_dir.as_std_path().is_dir() {
            continue;
        }
        let Some(name) = case_dir.file_name() else {
            continue;
        };
        let Ok(case_id) = name.parse::<CaseId>() else {
            warn!("derived files directory {case_dir} is not named by a case id; skipping");
            continue;
        };

        for path in read_dir_sorted(&case_dir)? {
            if !path.as_std_path().is_file() {
                continue;
            }
            let Some(filename) = path.file_name() else {
                continue;
            };
            let Some((derived_from, kind)) = ArtifactKind::recognize(filename) else {
                warn!("unrecognized file {path} in derived files directory; skipping");
                continue;
            };

            let mtime = fs::metadata(path.as_std_path())
                .and_then(|meta| meta.modified())
                .map_err(|err| AsepmError::Filesystem(format!("stat {path}: {err}")))?;

            derived.entry(case_id.clone()).or_default().push(DerivedFile {
                case_id: case_id.clone(),
                kind,
                derived_from,
                path,
                mtime,
            });
        }
    }
    Ok(())
}

/// Scan the per-disease expression directory for `expression_<disease>`
/// files. Files naming an unknown disease are warned about and skipped.
pub fn scan_expression_files(
    directory: &Utf8Path,
    known_diseases: &[Disease],
) -> Result<BTreeMap<Disease, ExpressionFile>, AsepmError> {
    let mut files = BTreeMap::new();
    if !directory.as_std_path().is_dir() {
        return Ok(files);
    }

    let pattern = Regex::new(r"^expression_([a-z0-9-]+)$").expect("static regex");

    for path in read_dir_sorted(directory)? {
        let Some(filename) = path.file_name() else {
            continue;
        };
        let Some(captures) = pattern.captures(filename) else {
            continue;
        };
        let Ok(disease) = captures[1].parse::<Disease>() else {
            continue;
        };
        if !known_diseases.contains(&disease) {
            warn!("expression file {path} does not correspond to a known disease");
            continue;
        }

        let mtime = fs::metadata(path.as_std_path())
            .and_then(|meta| meta.modified())
            .map_err(|err| AsepmError::Filesystem(format!("stat {path}: {err}")))?;

        files.insert(disease, ExpressionFile { path, mtime });
    }

    Ok(files)
}

pub(crate) fn read_dir_sorted(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, AsepmError> {
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| AsepmError::Filesystem(format!("read dir {dir}: {err}")))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| AsepmError::Filesystem(format!("read dir {dir}: {err}")))?;
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .map_err(|path| AsepmError::Filesystem(format!("non-utf8 path {}", path.display())))?;
        paths.push(path);
    }
    // Deterministic order keeps reruns byte-identical.
    paths.sort();
    Ok(paths)
}
