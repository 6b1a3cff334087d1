#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use ase_pipeline_manager::config::{Config, ConfigLoader, ResolvedConfig};
use ase_pipeline_manager::domain::{Case, CaseId};
use ase_pipeline_manager::manifest;

/// A throwaway file store with one data directory and everything a run
/// needs rooted inside the temp directory.
pub struct Fixture {
    _temp: TempDir,
    pub root: Utf8PathBuf,
    pub data: Utf8PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let data = root.join("data");
        fs::create_dir(data.as_std_path()).unwrap();
        Self {
            _temp: temp,
            root,
            data,
        }
    }

    pub fn raw_config(&self) -> Config {
        Config {
            data_directories: vec![self.data.to_string()],
            binary_directory: Some("/usr/pipeline/bin".to_string()),
            index_directory: Some("/usr/pipeline/index".to_string()),
            cases_file: Some(self.root.join("cases.tsv").to_string()),
            maf_manifest: Some(self.root.join("maf_manifest.json").to_string()),
            expression_files_directory: Some(self.root.join("expression").to_string()),
            access_token_file: Some(self.root.join("gdc-token.txt").to_string()),
            local_script: Some(self.root.join("next_steps.sh").to_string()),
            linux_script: Some(self.root.join("next_steps_linux.sh").to_string()),
            download_script: Some(self.root.join("downloads.sh").to_string()),
            ..Config::default()
        }
    }

    pub fn config(&self) -> ResolvedConfig {
        ConfigLoader::resolve_config(self.raw_config(), self.root.join("asepm.json")).unwrap()
    }

    pub fn config_with(&self, adjust: impl FnOnce(&mut Config)) -> ResolvedConfig {
        let mut raw = self.raw_config();
        adjust(&mut raw);
        ConfigLoader::resolve_config(raw, self.root.join("asepm.json")).unwrap()
    }

    /// Materialize `<data>/<file id>/<filename>` with the given content.
    pub fn add_download(&self, file_id: &str, filename: &str, content: &[u8]) -> Utf8PathBuf {
        let dir = self.data.join(file_id);
        fs::create_dir_all(dir.as_std_path()).unwrap();
        let path = dir.join(filename);
        fs::write(path.as_std_path(), content).unwrap();
        path
    }

    /// Write the `.md5` sidecar next to an already materialized payload.
    pub fn add_md5(&self, file_id: &str, filename: &str, digest: &str) {
        let path = self.data.join(file_id).join(format!("{filename}.md5"));
        fs::write(path.as_std_path(), digest).unwrap();
    }

    /// Materialize a derived artifact for a case.
    pub fn add_derived(&self, case_id: &str, filename: &str) -> Utf8PathBuf {
        let dir = self.data.join("derived_files").join(case_id);
        fs::create_dir_all(dir.as_std_path()).unwrap();
        let path = dir.join(filename);
        fs::write(path.as_std_path(), b"derived").unwrap();
        path
    }

    pub fn add_expression_file(&self, disease: &str) -> Utf8PathBuf {
        let dir = self.root.join("expression");
        fs::create_dir_all(dir.as_std_path()).unwrap();
        let path = dir.join(format!("expression_{disease}"));
        fs::write(path.as_std_path(), b"distribution").unwrap();
        path
    }

    pub fn write_maf_manifest(&self, json: &str) {
        fs::write(self.root.join("maf_manifest.json").as_std_path(), json).unwrap();
    }

    pub fn write_cases(&self, cases: &BTreeMap<CaseId, Case>) {
        manifest::save_cases(cases, &self.root.join("cases.tsv")).unwrap();
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.root.join(name).as_std_path()).unwrap()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.root.join(name).as_std_path().exists()
    }
}
