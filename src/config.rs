use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::AsepmError;

pub const DEFAULT_CONFIG_FILENAME: &str = "asepm.json";

/// Raw on-disk configuration. Optional fields fall back to the defaults in
/// [`ConfigLoader::resolve_config`].
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub data_directories: Vec<String>,
    #[serde(default)]
    pub binary_directory: Option<String>,
    #[serde(default)]
    pub cluster_binary_directory: Option<String>,
    #[serde(default)]
    pub index_directory: Option<String>,
    #[serde(default)]
    pub cluster_index_directory: Option<String>,
    #[serde(default)]
    pub derived_files_directory: Option<String>,
    #[serde(default)]
    pub expression_files_directory: Option<String>,
    #[serde(default)]
    pub cases_file: Option<String>,
    #[serde(default)]
    pub maf_manifest: Option<String>,
    #[serde(default)]
    pub access_token_file: Option<String>,
    #[serde(default)]
    pub cluster_scheduler: Option<String>,
    #[serde(default)]
    pub completed_vcfs_directory: Option<String>,
    #[serde(default)]
    pub local_script: Option<String>,
    #[serde(default)]
    pub cluster_script: Option<String>,
    #[serde(default)]
    pub linux_script: Option<String>,
    #[serde(default)]
    pub burst_script: Option<String>,
    #[serde(default)]
    pub download_script: Option<String>,
}

/// Fully validated run configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Path the configuration itself was loaded from; emitted commands pass
    /// it back to the pipeline binaries.
    pub config_path: Utf8PathBuf,
    pub data_directories: Vec<Utf8PathBuf>,
    pub binary_directory: Utf8PathBuf,
    pub cluster_binary_directory: Utf8PathBuf,
    pub index_directory: Utf8PathBuf,
    pub cluster_index_directory: Utf8PathBuf,
    /// Name of the per-data-root subdirectory holding derived artifacts.
    pub derived_files_subdir: String,
    pub expression_files_directory: Utf8PathBuf,
    pub cases_file: Utf8PathBuf,
    pub maf_manifest: Utf8PathBuf,
    pub access_token_file: Utf8PathBuf,
    /// Cluster job scheduler name; `None` suppresses the cluster script.
    pub cluster_scheduler: Option<String>,
    /// Staging directory for externally completed VCFs; `None` skips the
    /// relocation pass.
    pub completed_vcfs_directory: Option<Utf8PathBuf>,
    pub local_script: Utf8PathBuf,
    pub cluster_script: Option<Utf8PathBuf>,
    pub linux_script: Utf8PathBuf,
    pub burst_script: Option<Utf8PathBuf>,
    pub download_script: Utf8PathBuf,
}

impl ResolvedConfig {
    /// Path of a pipeline tool in the local binary directory.
    pub fn tool(&self, name: &str) -> Utf8PathBuf {
        self.binary_directory.join(name)
    }

    /// Path of a pipeline tool in the cluster binary directory.
    pub fn cluster_tool(&self, name: &str) -> Utf8PathBuf {
        self.cluster_binary_directory.join(name)
    }

    pub fn derived_files_root(&self, data_directory: &Utf8Path) -> Utf8PathBuf {
        data_directory.join(&self.derived_files_subdir)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, AsepmError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILENAME),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Err(AsepmError::MissingConfig(config_path));
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| AsepmError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| AsepmError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config, config_path)
    }

    pub fn resolve_config(
        config: Config,
        config_path: Utf8PathBuf,
    ) -> Result<ResolvedConfig, AsepmError> {
        if config.data_directories.is_empty() {
            return Err(AsepmError::NoDataDirectories);
        }

        let data_directories = config
            .data_directories
            .into_iter()
            .map(Utf8PathBuf::from)
            .collect::<Vec<_>>();
        let first_root = data_directories[0].clone();

        let path_or = |value: Option<String>, default: Utf8PathBuf| {
            value.map(Utf8PathBuf::from).unwrap_or(default)
        };
        let non_empty = |value: Option<String>| {
            value.filter(|name| !name.is_empty()).map(Utf8PathBuf::from)
        };

        let binary_directory = path_or(config.binary_directory, Utf8PathBuf::from("bin"));
        let cluster_binary_directory = path_or(
            config.cluster_binary_directory,
            binary_directory.clone(),
        );
        let index_directory = path_or(config.index_directory, Utf8PathBuf::from("index"));
        let cluster_index_directory =
            path_or(config.cluster_index_directory, index_directory.clone());

        Ok(ResolvedConfig {
            config_path,
            binary_directory,
            cluster_binary_directory,
            index_directory,
            cluster_index_directory,
            derived_files_subdir: config
                .derived_files_directory
                .unwrap_or_else(|| "derived_files".to_string()),
            expression_files_directory: path_or(
                config.expression_files_directory,
                first_root.join("expression"),
            ),
            cases_file: path_or(config.cases_file, first_root.join("cases.tsv")),
            maf_manifest: path_or(config.maf_manifest, first_root.join("maf_manifest.json")),
            access_token_file: path_or(
                config.access_token_file,
                Utf8PathBuf::from("gdc-token.txt"),
            ),
            cluster_scheduler: config.cluster_scheduler.filter(|name| !name.is_empty()),
            completed_vcfs_directory: non_empty(config.completed_vcfs_directory),
            local_script: path_or(config.local_script, Utf8PathBuf::from("next_steps.sh")),
            cluster_script: non_empty(config.cluster_script),
            linux_script: path_or(
                config.linux_script,
                Utf8PathBuf::from("next_steps_linux.sh"),
            ),
            burst_script: non_empty(config.burst_script),
            download_script: path_or(config.download_script, Utf8PathBuf::from("downloads.sh")),
            data_directories,
        })
    }
}
