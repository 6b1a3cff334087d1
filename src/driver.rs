//! One run of the manager: snapshot the file store, classify every stage's
//! work, and emit the scripts that move the pipeline forward.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};

use chrono::Utc;
use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::domain::FileId;
use crate::error::AsepmError;
use crate::manifest;
use crate::scripts::ScriptSet;
use crate::snapshot::Snapshot;
use crate::stages::all_stages;
use crate::store;
use crate::util::size_to_units;

#[derive(Debug, Default)]
pub struct RunOptions {
    /// Check inter-stage consistency and refuse to generate scripts when
    /// violations exist.
    pub check_dependencies: bool,
}

#[derive(Debug)]
pub struct StageReport {
    pub name: &'static str,
    pub done: usize,
    pub scheduled: usize,
    pub blocked: usize,
    /// Downloads this stage requested that no earlier stage already had.
    pub new_downloads: usize,
}

#[derive(Debug)]
pub struct RunSummary {
    pub stages: Vec<StageReport>,
    pub download_count: usize,
    pub download_bytes: u64,
    pub elapsed: chrono::Duration,
}

impl RunSummary {
    pub fn progress_table(&self) -> String {
        let width = self
            .stages
            .iter()
            .map(|stage| stage.name.len())
            .max()
            .unwrap_or(0)
            .max("Stage Name".len());

        let mut out = String::new();
        let header = format!(
            "{:<width$}  {:>6}  {:>9}  {:>7}  {:>9}",
            "Stage Name", "Done", "Scheduled", "Blocked", "Downloads"
        );
        let _ = writeln!(out, "{header}");
        let _ = writeln!(out, "{}", "-".repeat(header.len()));
        for stage in &self.stages {
            let _ = writeln!(
                out,
                "{:<width$}  {:>6}  {:>9}  {:>7}  {:>9}",
                stage.name, stage.done, stage.scheduled, stage.blocked, stage.new_downloads
            );
        }
        out
    }

    pub fn closing_line(&self) -> String {
        format!(
            "Downloading {} file(s), {}B total. Run took {}s.",
            self.download_count,
            size_to_units(self.download_bytes),
            self.elapsed.num_seconds()
        )
    }
}

pub fn run(config: &ResolvedConfig, options: &RunOptions) -> Result<RunSummary, AsepmError> {
    let started = Utc::now();

    // Old scripts first: a failed run must never leave last run's commands
    // lying around looking current.
    ScriptSet::delete_stale(config)?;

    let world = Snapshot::build(config)?;

    // Rewrite the case list with the locations discovered during the scan,
    // so downstream tools read paths instead of re-walking the store.
    if let Some(cases) = &world.cases {
        manifest::save_cases(cases, &config.cases_file)?;
    }

    let stages = all_stages();

    if options.check_dependencies {
        let mut failed = 0usize;
        for stage in &stages {
            if stage.needs_cases() && world.cases.is_none() {
                continue;
            }
            info!("checking dependencies for {}", stage.name());
            if !stage.check_consistency(&world) {
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(AsepmError::DependencyViolations(failed));
        }
    }

    let mut scripts = ScriptSet::open(config)?;
    relocate_completed_vcfs(&world, &mut scripts)?;

    let mut all_downloads: BTreeSet<FileId> = BTreeSet::new();
    let mut reports = Vec::with_capacity(stages.len());

    for stage in &stages {
        if stage.needs_cases() && world.cases.is_none() {
            reports.push(StageReport {
                name: stage.name(),
                done: 0,
                scheduled: 0,
                blocked: 1,
                new_downloads: 0,
            });
            continue;
        }

        let outcome = stage.evaluate(&world, &mut scripts)?;
        let mut fresh = 0usize;
        for file_id in outcome.downloads {
            if all_downloads.insert(file_id) {
                fresh += 1;
            }
        }
        reports.push(StageReport {
            name: stage.name(),
            done: outcome.done,
            scheduled: outcome.scheduled,
            blocked: outcome.blocked,
            new_downloads: fresh,
        });
    }

    scripts.finish()?;

    let download_bytes = write_download_script(&world, &all_downloads)?;

    Ok(RunSummary {
        stages: reports,
        download_count: all_downloads.len(),
        download_bytes,
        elapsed: Utc::now() - started,
    })
}

/// Queue `mv` commands that move finished VCFs out of the cloud-burst
/// staging directory into each case's derived-files directory. The staging
/// directory must live next to a data directory; anything else would mean
/// guessing which store the files belong to.
fn relocate_completed_vcfs(
    world: &Snapshot,
    scripts: &mut ScriptSet,
) -> Result<usize, AsepmError> {
    let Some(staging) = &world.config.completed_vcfs_directory else {
        return Ok(0);
    };
    if !staging.as_std_path().is_dir() {
        return Ok(0);
    }

    let entries = store::read_dir_sorted(staging)?;
    if entries.is_empty() {
        return Ok(0);
    }

    let staging_parent = staging.parent().unwrap_or(staging.as_path());
    let data_root = world
        .config
        .data_directories
        .iter()
        .find(|dir| dir.starts_with(staging_parent))
        .ok_or_else(|| AsepmError::UnresolvedStagingRoot(staging.clone()))?;

    let mut moved = 0usize;
    for path in entries {
        let Some(file_id) = path
            .file_name()
            .and_then(|name| name.strip_suffix(".vcf"))
            .and_then(|stem| stem.parse::<FileId>().ok())
        else {
            warn!("found non-VCF file {path} in the completed VCFs directory; ignoring");
            continue;
        };
        let Some(case_id) = world.file_to_case.get(&file_id) else {
            warn!("completed VCF {path} does not belong to any known case; ignoring");
            continue;
        };

        let destination = world
            .config
            .derived_files_root(data_root)
            .join(case_id.as_str());
        scripts.local_line(&format!("mkdir -p {destination}"))?;
        scripts.local_line(&format!("mv {path} {destination}/"))?;
        moved += 1;
    }

    if moved > 0 {
        info!("queued {moved} completed VCF(s) for relocation");
    }
    Ok(moved)
}

/// Write one `gdc-client` invocation per wanted file. No file is written
/// when there is nothing to download. Returns the total payload size, as
/// far as the catalog knows it.
fn write_download_script(
    world: &Snapshot,
    downloads: &BTreeSet<FileId>,
) -> Result<u64, AsepmError> {
    if downloads.is_empty() {
        return Ok(0);
    }

    let path = &world.config.download_script;
    let script_write = |err: std::io::Error| AsepmError::ScriptWrite {
        path: path.clone(),
        message: err.to_string(),
    };

    let file = File::create(path.as_std_path()).map_err(script_write)?;
    let mut writer = BufWriter::new(file);
    let mut bytes = 0u64;
    let fetch_tool = world.config.tool("gdc-client");
    for file_id in downloads {
        writeln!(
            writer,
            "{fetch_tool} download --token-file {} {file_id}",
            world.config.access_token_file
        )
        .map_err(script_write)?;
        bytes += world
            .catalog_sizes
            .get(file_id)
            .copied()
            .or_else(|| {
                world
                    .maf_manifest
                    .as_ref()
                    .and_then(|manifest| manifest.get(file_id))
                    .map(|entry| entry.size)
            })
            .unwrap_or(0);
    }
    writer.flush().map_err(script_write)?;
    Ok(bytes)
}
