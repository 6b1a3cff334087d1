use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::domain::{ArtifactKind, AssayRole, Case, CaseId, Disease, FileId};
use crate::error::AsepmError;
use crate::manifest::{self, MafEntry};
use crate::store::{self, DerivedFile, DownloadedFile, ExpressionFile};
use crate::util::size_to_units;

/// The immutable state of the world for one scheduler run: everything the
/// stages need to classify work, built once and discarded at exit.
///
/// `maf_manifest` and `cases` are `None` early in the pipeline's life, before
/// the stages that generate them have run; stages that need cases are
/// short-circuited by the driver in that state.
#[derive(Debug)]
pub struct Snapshot {
    pub config: ResolvedConfig,
    pub downloaded: BTreeMap<FileId, DownloadedFile>,
    pub derived: BTreeMap<CaseId, Vec<DerivedFile>>,
    pub maf_manifest: Option<BTreeMap<FileId, MafEntry>>,
    pub cases: Option<BTreeMap<CaseId, Case>>,
    pub diseases: Vec<Disease>,
    pub expression_files: BTreeMap<Disease, ExpressionFile>,
    /// Reverse index from any role-slot file id to its owning case.
    pub file_to_case: BTreeMap<FileId, CaseId>,
    /// Expected byte sizes from the remote catalog, per role-slot file id.
    pub catalog_sizes: BTreeMap<FileId, u64>,
}

impl Snapshot {
    pub fn build(config: &ResolvedConfig) -> Result<Self, AsepmError> {
        let scan = store::scan_file_store(config)?;
        let maf_manifest = manifest::load_maf_manifest(&config.maf_manifest)?;
        let cases = manifest::load_cases(&config.cases_file)?;

        let mut snapshot = Snapshot {
            config: config.clone(),
            downloaded: scan.downloaded,
            derived: scan.derived,
            maf_manifest,
            cases,
            diseases: Vec::new(),
            expression_files: BTreeMap::new(),
            file_to_case: BTreeMap::new(),
            catalog_sizes: BTreeMap::new(),
        };

        if snapshot.cases.is_some() {
            snapshot.index_cases();
            snapshot.report_unknown_derived_directories();
            snapshot.attach_file_locations();
            snapshot.report_download_tally();
        }

        snapshot.expression_files =
            store::scan_expression_files(&config.expression_files_directory, &snapshot.diseases)?;

        Ok(snapshot)
    }

    /// Downloaded, transfer complete, and checksum-verified when the case
    /// list names an expected checksum.
    pub fn file_downloaded_and_verified(
        &self,
        file_id: &FileId,
        expected_md5: Option<&str>,
    ) -> bool {
        let Some(file) = self.downloaded.get(file_id) else {
            return false;
        };
        if file.is_partial {
            return false;
        }
        match expected_md5 {
            None => true,
            Some(expected) => file.stored_md5.as_deref() == Some(expected),
        }
    }

    pub fn contains_derived(
        &self,
        case_id: &CaseId,
        derived_from: &FileId,
        kind: ArtifactKind,
    ) -> bool {
        self.derived_file(case_id, derived_from, kind).is_some()
    }

    pub fn derived_file(
        &self,
        case_id: &CaseId,
        derived_from: &FileId,
        kind: ArtifactKind,
    ) -> Option<&DerivedFile> {
        self.derived.get(case_id)?.iter().find(|file| {
            file.kind == kind && file.derived_from == *derived_from
        })
    }

    pub fn derived_of_kind<'a>(
        &'a self,
        case_id: &CaseId,
        kind: ArtifactKind,
    ) -> impl Iterator<Item = &'a DerivedFile> {
        self.derived
            .get(case_id)
            .into_iter()
            .flatten()
            .filter(move |file| file.kind == kind)
    }

    fn index_cases(&mut self) {
        let Some(cases) = &self.cases else { return };

        let mut diseases = Vec::new();
        let mut file_to_case = BTreeMap::new();
        let mut catalog_sizes = BTreeMap::new();
        for case in cases.values() {
            if !diseases.contains(&case.disease) {
                diseases.push(case.disease.clone());
            }
            for role in AssayRole::ALL {
                if let Some(file_id) = &case.slot(role).file_id {
                    file_to_case.insert(file_id.clone(), case.id.clone());
                    catalog_sizes.insert(file_id.clone(), case.slot(role).size);
                }
            }
        }
        diseases.sort();
        self.diseases = diseases;
        self.file_to_case = file_to_case;
        self.catalog_sizes = catalog_sizes;
    }

    /// A derived-files directory whose name is not a known case id is
    /// suspicious but not fatal; report it (naming the owning case when the
    /// embedded source file id resolves) and keep going.
    fn report_unknown_derived_directories(&self) {
        let Some(cases) = &self.cases else { return };

        for (case_id, files) in &self.derived {
            if cases.contains_key(case_id) {
                continue;
            }
            for file in files {
                match self.file_to_case.get(&file.derived_from) {
                    Some(owner) => warn!(
                        "derived files directory for unknown case {case_id} contains {} \
                         (derived from a file id associated with case {owner})",
                        file.path
                    ),
                    None => warn!(
                        "derived files directory for unknown case {case_id} contains {}",
                        file.path
                    ),
                }
            }
        }
    }

    /// Resolve local paths onto the case records: role-slot payloads from the
    /// download scan, MAF location, and one path per derived-artifact kind.
    fn attach_file_locations(&mut self) {
        let Some(mut cases) = self.cases.take() else {
            return;
        };

        for case in cases.values_mut() {
            for role in AssayRole::ALL {
                let slot = case.slot_mut(role);
                slot.local_path = slot
                    .file_id
                    .as_ref()
                    .and_then(|id| self.downloaded.get(id))
                    .filter(|file| !file.is_partial)
                    .map(|file| file.path.clone());
            }

            case.maf_path = case
                .maf_file_id
                .as_ref()
                .and_then(|id| self.downloaded.get(id))
                .filter(|file| !file.is_partial)
                .map(|file| file.path.clone());

            case.derived.clear();
            if let Some(files) = self.derived.get(&case.id) {
                for file in files {
                    case.derived
                        .entry(file.kind)
                        .or_insert_with(|| file.path.clone());
                }
            }
        }

        self.cases = Some(cases);
    }

    fn report_download_tally(&self) {
        let Some(cases) = &self.cases else { return };

        let mut parts = Vec::new();
        for role in AssayRole::ALL {
            let mut count = 0usize;
            let mut bytes = 0u64;
            for case in cases.values() {
                if let Some(file) = case
                    .slot(role)
                    .file_id
                    .as_ref()
                    .and_then(|id| self.downloaded.get(id))
                {
                    count += 1;
                    bytes += file.size;
                }
            }
            parts.push(format!("{count} ({}B) {role}", size_to_units(bytes)));
        }
        info!("downloaded: {}", parts.join(", "));
    }
}
