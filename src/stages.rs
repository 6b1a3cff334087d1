use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::domain::{ArtifactKind, AssayRole, Case, CaseId, Disease, FileId};
use crate::error::AsepmError;
use crate::scripts::{ScriptSet, MAX_IDS_PER_LINE};
use crate::snapshot::Snapshot;
use crate::store::DownloadedFile;

/// What one stage found in the snapshot: counters per classification plus
/// the downloads it wants. The driver merges `downloads` into the global
/// deduplicated set.
#[derive(Debug, Default)]
pub struct StageOutcome {
    pub downloads: Vec<FileId>,
    pub done: usize,
    pub scheduled: usize,
    pub blocked: usize,
}

impl StageOutcome {
    fn request_download(&mut self, file_id: &FileId) {
        if !self.downloads.contains(file_id) {
            self.downloads.push(file_id.clone());
        }
    }
}

/// One pipeline step. A stage inspects the snapshot, classifies each of its
/// units of work as done / scheduled / blocked, and appends commands for the
/// scheduled ones to the relevant output streams. Stages hold no per-run
/// state and never mutate the snapshot.
pub trait ProcessingStage {
    fn name(&self) -> &'static str;

    /// Whether this stage is meaningful before a case list exists.
    fn needs_cases(&self) -> bool;

    fn evaluate(
        &self,
        world: &Snapshot,
        scripts: &mut ScriptSet,
    ) -> Result<StageOutcome, AsepmError>;

    /// Verifier hook: report (never correct) consistency violations among
    /// this stage's existing artifacts. Returns false when any were found.
    fn check_consistency(&self, world: &Snapshot) -> bool {
        let _ = world;
        true
    }
}

/// The pipeline's stages in topological order. A closed, fixed list: there
/// is no runtime stage discovery.
pub fn all_stages() -> Vec<Box<dyn ProcessingStage>> {
    vec![
        Box::new(MafConfigurationStage),
        Box::new(GenerateCasesStage),
        Box::new(AllcountStage),
        Box::new(DownloadStage),
        Box::new(Md5ComputationStage),
        Box::new(GermlineVariantCallingStage),
        Box::new(SelectVariantsStage),
        Box::new(ExpressionDistributionStage),
        Box::new(ExtractMafLinesStage),
        Box::new(RegionalExpressionStage),
        Box::new(ExtractReadsStage),
    ]
}

/// The driver skips case stages until the case list loads, so the empty
/// fallback only covers the verifier hooks.
fn cases(world: &Snapshot) -> &BTreeMap<CaseId, Case> {
    static EMPTY: BTreeMap<CaseId, Case> = BTreeMap::new();
    world.cases.as_ref().unwrap_or(&EMPTY)
}

/// Canonical derived-files directory for a case, anchored at the data root
/// the source payload lives under (`<root>/<file id>/<payload>`).
fn derived_dir(world: &Snapshot, source: &DownloadedFile, case_id: &CaseId) -> Utf8PathBuf {
    let data_root = source
        .path
        .parent()
        .and_then(|dir| dir.parent())
        .unwrap_or_else(|| source.path.as_path());
    world
        .config
        .derived_files_root(data_root)
        .join(case_id.as_str())
}

/// Shared verifier logic: every artifact kind here is unique per
/// (case, source file), and its source must still exist in the store.
fn artifacts_consistent(world: &Snapshot, kinds: &[ArtifactKind]) -> bool {
    let mut all_ok = true;

    for (case_id, files) in &world.derived {
        for &kind in kinds {
            let mut by_source: BTreeMap<&FileId, Vec<&Utf8PathBuf>> = BTreeMap::new();
            for file in files.iter().filter(|file| file.kind == kind) {
                by_source.entry(&file.derived_from).or_default().push(&file.path);
            }

            for (source, paths) in by_source {
                if paths.len() > 1 {
                    let listing = paths
                        .iter()
                        .map(|path| path.as_str())
                        .collect::<Vec<_>>()
                        .join(" ");
                    warn!("more than one {kind} file for case {case_id}: {listing}");
                    all_ok = false;
                }
                if !world.downloaded.contains_key(source) {
                    for path in &paths {
                        warn!(
                            "{kind} file {path} exists, but the file it was generated from \
                             ({source}) does not"
                        );
                    }
                    all_ok = false;
                }
            }
        }
    }

    all_ok
}

/// Generate the MAF manifest describing the raw annotation assets. The very
/// first stage; it has no prerequisites.
struct MafConfigurationStage;

impl ProcessingStage for MafConfigurationStage {
    fn name(&self) -> &'static str {
        "Generate MAF configuration"
    }

    fn needs_cases(&self) -> bool {
        false
    }

    fn evaluate(
        &self,
        world: &Snapshot,
        scripts: &mut ScriptSet,
    ) -> Result<StageOutcome, AsepmError> {
        let mut outcome = StageOutcome::default();

        if world.maf_manifest.is_some() {
            outcome.done = 1;
            return Ok(outcome);
        }

        scripts.local_line(&format!(
            "{} --configuration {}",
            world.config.tool("generate_maf_configuration"),
            world.config.config_path
        ))?;
        outcome.scheduled = 1;
        Ok(outcome)
    }
}

/// Generate the case list from the downloaded MAFs.
struct GenerateCasesStage;

impl ProcessingStage for GenerateCasesStage {
    fn name(&self) -> &'static str {
        "Generate cases"
    }

    fn needs_cases(&self) -> bool {
        false
    }

    fn evaluate(
        &self,
        world: &Snapshot,
        scripts: &mut ScriptSet,
    ) -> Result<StageOutcome, AsepmError> {
        let mut outcome = StageOutcome::default();

        if world.cases.is_some() {
            outcome.done = 1;
            return Ok(outcome);
        }

        let Some(manifest) = &world.maf_manifest else {
            outcome.blocked = 1;
            return Ok(outcome);
        };

        for file_id in manifest.keys() {
            if !world.downloaded.contains_key(file_id) {
                outcome.request_download(file_id);
            }
        }

        if outcome.downloads.is_empty() {
            scripts.local_line(&format!(
                "{} --configuration {}",
                world.config.tool("generate_cases"),
                world.config.config_path
            ))?;
            outcome.scheduled = 1;
        } else {
            outcome.blocked = 1;
        }
        Ok(outcome)
    }
}

/// Count reads covering each genome position, once per (case, BAM) for the
/// tumor RNA and both DNA roles.
struct AllcountStage;

const ALLCOUNT_ROLES: [(AssayRole, ArtifactKind); 3] = [
    (AssayRole::TumorRna, ArtifactKind::TumorRnaAllcount),
    (AssayRole::NormalDna, ArtifactKind::NormalDnaAllcount),
    (AssayRole::TumorDna, ArtifactKind::TumorDnaAllcount),
];

impl AllcountStage {
    fn handle_file(
        &self,
        world: &Snapshot,
        case: &Case,
        role: AssayRole,
        kind: ArtifactKind,
        scripts: &mut ScriptSet,
        outcome: &mut StageOutcome,
    ) -> Result<(), AsepmError> {
        let slot = case.slot(role);
        let Some(file_id) = &slot.file_id else {
            outcome.blocked += 1;
            return Ok(());
        };

        let Some(source) = world.downloaded.get(file_id) else {
            outcome.request_download(file_id);
            return Ok(());
        };

        if !world.file_downloaded_and_verified(file_id, slot.expected_md5.as_deref()) {
            outcome.blocked += 1;
            return Ok(());
        }

        if world.contains_derived(&case.id, file_id, kind) {
            outcome.done += 1;
            return Ok(());
        }

        let case_dir = derived_dir(world, source, &case.id);
        let output = case_dir.join(format!("{file_id}{}", kind.tag()));
        scripts.local_line(&format!("mkdir -p {case_dir}"))?;
        scripts.local_line(&format!(
            "{} {} -a {} - | gzip -9 > {output}",
            world.config.tool("count_reads_covering"),
            world.config.index_directory,
            source.path
        ))?;
        scripts.cluster_line(&format!(
            "{} {case_dir} {} {} {output}",
            world.config.cluster_tool("make_directory_and_count_reads_covering"),
            world.config.cluster_index_directory,
            source.path
        ))?;
        outcome.scheduled += 1;
        Ok(())
    }
}

impl ProcessingStage for AllcountStage {
    fn name(&self) -> &'static str {
        "Generate allcount files"
    }

    fn needs_cases(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        world: &Snapshot,
        scripts: &mut ScriptSet,
    ) -> Result<StageOutcome, AsepmError> {
        let mut outcome = StageOutcome::default();
        for case in cases(world).values() {
            for (role, kind) in ALLCOUNT_ROLES {
                self.handle_file(world, case, role, kind, scripts, &mut outcome)?;
            }
        }
        Ok(outcome)
    }

    fn check_consistency(&self, world: &Snapshot) -> bool {
        artifacts_consistent(
            world,
            &[
                ArtifactKind::TumorRnaAllcount,
                ArtifactKind::NormalDnaAllcount,
                ArtifactKind::TumorDnaAllcount,
            ],
        )
    }
}

/// Request every role-slot file the store does not have yet. This stage
/// only feeds the download queue; it never marks anything done.
struct DownloadStage;

impl ProcessingStage for DownloadStage {
    fn name(&self) -> &'static str {
        "Download"
    }

    fn needs_cases(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        world: &Snapshot,
        _scripts: &mut ScriptSet,
    ) -> Result<StageOutcome, AsepmError> {
        let mut outcome = StageOutcome::default();
        for case in cases(world).values() {
            for role in AssayRole::ALL {
                if let Some(file_id) = &case.slot(role).file_id {
                    if !world.downloaded.contains_key(file_id) {
                        outcome.request_download(file_id);
                    }
                }
            }
        }
        Ok(outcome)
    }
}

/// Compute checksums for downloaded payloads that do not have one stored
/// yet. A mismatch against the expected checksum is flagged but the file
/// still counts as done: it is on disk and a human has to decide.
struct Md5ComputationStage;

impl Md5ComputationStage {
    fn handle_file(
        &self,
        world: &Snapshot,
        file_id: &FileId,
        expected_md5: Option<&str>,
        scripts: &mut ScriptSet,
        outcome: &mut StageOutcome,
    ) -> Result<(), AsepmError> {
        let Some(expected) = expected_md5 else {
            outcome.blocked += 1;
            return Ok(());
        };
        let Some(file) = world.downloaded.get(file_id) else {
            outcome.blocked += 1;
            return Ok(());
        };

        if file.is_partial {
            let mtime: DateTime<Utc> = file.mtime.into();
            if mtime < Utc::now() - Duration::days(1) {
                warn!(
                    "partial download {} is more than a day old; it is probably abandoned \
                     and should be deleted",
                    file.path
                );
            }
            outcome.blocked += 1;
            return Ok(());
        }

        if let Some(stored) = &file.stored_md5 {
            outcome.done += 1;
            if stored != expected {
                warn!(
                    "MD5 checksum mismatch on file {}: {stored} != {expected}",
                    file.path
                );
            }
            return Ok(());
        }

        scripts.local_line(&format!(
            "{} {} > {}.md5",
            world.config.tool("compute_md5"),
            file.path,
            file.path
        ))?;
        scripts.cluster_line(&format!(
            "{} {} {}.md5",
            world.config.cluster_tool("compute_md5_into_file"),
            file.path,
            file.path
        ))?;
        outcome.scheduled += 1;
        Ok(())
    }
}

impl ProcessingStage for Md5ComputationStage {
    fn name(&self) -> &'static str {
        "MD5 computation"
    }

    fn needs_cases(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        world: &Snapshot,
        scripts: &mut ScriptSet,
    ) -> Result<StageOutcome, AsepmError> {
        let mut outcome = StageOutcome::default();
        for case in cases(world).values() {
            for role in AssayRole::ALL {
                let slot = case.slot(role);
                let Some(file_id) = &slot.file_id else {
                    continue;
                };
                self.handle_file(
                    world,
                    file_id,
                    slot.expected_md5.as_deref(),
                    scripts,
                    &mut outcome,
                )?;
            }
        }
        Ok(outcome)
    }

    /// A payload that is newer than its stored checksum means the checksum
    /// is stale.
    fn check_consistency(&self, world: &Snapshot) -> bool {
        let mut all_ok = true;
        for file in world.downloaded.values() {
            if file.stored_md5.is_none() {
                continue;
            }
            if let Some(md5_mtime) = file.md5_mtime {
                if md5_mtime < file.mtime {
                    warn!("downloaded file {} is newer than its md5 hash", file.path);
                    all_ok = false;
                }
            }
        }
        all_ok
    }
}

/// Call germline variants on the normal DNA. The cloud-burst script gets
/// every not-yet-done case because that target downloads its own input; the
/// remote-Linux script only gets cases whose BAM is already local and
/// verified. Both fragments use bare line feeds so the receiving shell
/// never sees a carriage return.
struct GermlineVariantCallingStage;

const VARIANT_CALL_PIPE: &str = "cat ~/genomes/hg38-100k-regions | parallel -k -j `cat ~/ncores` \
     \"freebayes --region {} --fasta-reference ~/genomes/hg38.fa";

const VARIANT_SORT_PIPE: &str =
    "~/freebayes/vcflib/bin/vcffirstheader | ~/freebayes/vcflib/bin/vcfstreamsort -w 1000 \
     | ~/freebayes/vcflib/bin/vcfuniq";

impl ProcessingStage for GermlineVariantCallingStage {
    fn name(&self) -> &'static str {
        "Germline variant calling"
    }

    fn needs_cases(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        world: &Snapshot,
        scripts: &mut ScriptSet,
    ) -> Result<StageOutcome, AsepmError> {
        let mut outcome = StageOutcome::default();
        let token = world
            .config
            .access_token_file
            .file_name()
            .unwrap_or("gdc-token.txt");

        for case in cases(world).values() {
            let slot = case.slot(AssayRole::NormalDna);
            let Some(file_id) = &slot.file_id else {
                outcome.blocked += 1;
                continue;
            };

            if world.contains_derived(&case.id, file_id, ArtifactKind::Vcf) {
                outcome.done += 1;
                continue;
            }

            scripts.burst_fragment(&format!(
                "date\n\
                 rm -rf /mnt/downloaded_files/*\n\
                 cd /mnt/downloaded_files\n\
                 ~/gdc-client download --token-file ~/{token} {file_id}\n\
                 cd ~\n\
                 rm -f ~/x\n\
                 ln -s /mnt/downloaded_files/{file_id} ~/x\n\
                 {VARIANT_CALL_PIPE} ~/x/*.bam\" | {VARIANT_SORT_PIPE} > ~/{file_id}.vcf\n\
                 if [ $? = 0 ]; then\n\
                 \x20   mv ~/{file_id}.vcf ~/completed_vcfs/\n\
                 else\n\
                 \x20   echo {file_id} >> variant_calling_errors\n\
                 fi\n\
                 rm -f ~/{file_id}.vcf\n\
                 rm -rf /mnt/downloaded_files/{file_id}\n\
                 rm -f ~/x\n"
            ))?;

            let verified = world.file_downloaded_and_verified(file_id, slot.expected_md5.as_deref());
            let source = match world.downloaded.get(file_id) {
                Some(source) if verified => source,
                _ => {
                    outcome.blocked += 1;
                    continue;
                }
            };
            let output_dir = derived_dir(world, source, &case.id);
            scripts.linux_fragment(&format!(
                "date\n\
                 {VARIANT_CALL_PIPE} {}\" | {VARIANT_SORT_PIPE} > {file_id}.vcf\n\
                 if [ $? = 0 ]; then\n\
                 \x20   mkdir -p {output_dir}\n\
                 \x20   cp {file_id}.vcf {output_dir}/\n\
                 else\n\
                 \x20   echo {file_id} >> variant_calling_errors\n\
                 fi\n\
                 rm -f {file_id}.vcf\n",
                source.path
            ))?;
            outcome.scheduled += 1;
        }
        Ok(outcome)
    }

    fn check_consistency(&self, world: &Snapshot) -> bool {
        artifacts_consistent(world, &[ArtifactKind::Vcf])
    }
}

/// Select the germline variants usable for ASE measurement, batched many
/// cases per command line.
struct SelectVariantsStage;

impl ProcessingStage for SelectVariantsStage {
    fn name(&self) -> &'static str {
        "Select germline variants"
    }

    fn needs_cases(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        world: &Snapshot,
        scripts: &mut ScriptSet,
    ) -> Result<StageOutcome, AsepmError> {
        let mut outcome = StageOutcome::default();
        let mut ready = Vec::new();

        for case in cases(world).values() {
            if case.derived_path(ArtifactKind::SelectedVariants).is_some() {
                outcome.done += 1;
            } else if case.derived_path(ArtifactKind::Vcf).is_none()
                || case.derived_path(ArtifactKind::TumorRnaAllcount).is_none()
                || case.derived_path(ArtifactKind::TumorDnaAllcount).is_none()
            {
                outcome.blocked += 1;
            } else {
                outcome.scheduled += 1;
                ready.push(case.id.clone());
            }
        }

        for chunk in ready.chunks(MAX_IDS_PER_LINE) {
            let ids = chunk
                .iter()
                .map(CaseId::as_str)
                .collect::<Vec<_>>()
                .join(" ");
            scripts.local_line(&format!(
                "{} {ids}",
                world.config.tool("select_germline_variants")
            ))?;
            scripts.cluster_line(&format!(
                "{} {ids}",
                world.config.cluster_tool("select_germline_variants")
            ))?;
        }
        Ok(outcome)
    }
}

/// Compute the per-disease mRNA expression distribution. The unit of work
/// is a disease: it needs the tumor RNA allcount of every case in the
/// cohort before it can run.
struct ExpressionDistributionStage;

impl ProcessingStage for ExpressionDistributionStage {
    fn name(&self) -> &'static str {
        "Per-disease expression distribution"
    }

    fn needs_cases(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        world: &Snapshot,
        scripts: &mut ScriptSet,
    ) -> Result<StageOutcome, AsepmError> {
        let mut outcome = StageOutcome::default();

        for disease in &world.diseases {
            if world.expression_files.contains_key(disease) {
                outcome.done += 1;
                continue;
            }

            let cohort_ready = cases(world)
                .values()
                .filter(|case| case.disease == *disease)
                .all(|case| match &case.slot(AssayRole::TumorRna).file_id {
                    Some(file_id) => {
                        world.contains_derived(&case.id, file_id, ArtifactKind::TumorRnaAllcount)
                    }
                    None => false,
                });

            if !cohort_ready {
                outcome.blocked += 1;
                continue;
            }

            let command = format!(
                "{} {} {} {disease}",
                world.config.tool("expression_distribution"),
                world.config.cases_file,
                world.config.expression_files_directory
            );
            scripts.local_line(&command)?;
            scripts.cluster_line(&format!(
                "{} {} {} {disease}",
                world.config.cluster_tool("expression_distribution"),
                world.config.cases_file,
                world.config.expression_files_directory
            ))?;
            outcome.scheduled += 1;
        }
        Ok(outcome)
    }
}

/// Extract each case's MAF lines from the bulk annotation files. One global
/// command covers every ready case.
struct ExtractMafLinesStage;

impl ProcessingStage for ExtractMafLinesStage {
    fn name(&self) -> &'static str {
        "Extract MAF lines"
    }

    fn needs_cases(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        world: &Snapshot,
        scripts: &mut ScriptSet,
    ) -> Result<StageOutcome, AsepmError> {
        let mut outcome = StageOutcome::default();

        for case in cases(world).values() {
            if case.maf_path.is_none() {
                if let Some(maf_id) = &case.maf_file_id {
                    if !world.downloaded.contains_key(maf_id) {
                        outcome.request_download(maf_id);
                    }
                }
                outcome.blocked += 1;
            } else if case.derived_path(ArtifactKind::ExtractedMafLines).is_some() {
                outcome.done += 1;
            } else {
                outcome.scheduled += 1;
            }
        }

        if outcome.scheduled > 0 {
            scripts.local_line(world.config.tool("extract_maf_lines").as_str())?;
            scripts.cluster_line(world.config.cluster_tool("extract_maf_lines").as_str())?;
        }
        Ok(outcome)
    }

    fn check_consistency(&self, world: &Snapshot) -> bool {
        let mut all_ok = true;
        for case in cases(world).values() {
            for file in world.derived_of_kind(&case.id, ArtifactKind::ExtractedMafLines) {
                let Some(maf) = case
                    .maf_file_id
                    .as_ref()
                    .and_then(|id| world.downloaded.get(id))
                else {
                    warn!(
                        "case {} has an extracted MAF lines file ({}), but the corresponding \
                         MAF does not exist",
                        case.id, file.path
                    );
                    all_ok = false;
                    continue;
                };

                if file.mtime < maf.mtime {
                    warn!(
                        "extracted MAF lines file {} is older than the MAF it is derived \
                         from ({})",
                        file.path, maf.path
                    );
                    all_ok = false;
                }
            }
        }
        all_ok
    }
}

/// Map expression to genome regions per case, batched per disease because
/// the command carries the cohort's distribution file.
struct RegionalExpressionStage;

impl RegionalExpressionStage {
    fn flush(
        &self,
        world: &Snapshot,
        expression_path: &Utf8PathBuf,
        ready: &[CaseId],
        scripts: &mut ScriptSet,
    ) -> Result<(), AsepmError> {
        let ids = ready.iter().map(CaseId::as_str).collect::<Vec<_>>().join(" ");
        scripts.local_line(&format!(
            "{} {expression_path} {ids}",
            world.config.tool("regional_expression")
        ))?;
        scripts.cluster_line(&format!(
            "{} {expression_path} {ids}",
            world.config.cluster_tool("regional_expression")
        ))?;
        Ok(())
    }
}

impl ProcessingStage for RegionalExpressionStage {
    fn name(&self) -> &'static str {
        "Regional expression"
    }

    fn needs_cases(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        world: &Snapshot,
        scripts: &mut ScriptSet,
    ) -> Result<StageOutcome, AsepmError> {
        let mut outcome = StageOutcome::default();
        let mut ready_by_disease: BTreeMap<&Disease, Vec<CaseId>> = BTreeMap::new();

        for case in cases(world).values() {
            if case.derived_path(ArtifactKind::RegionalExpression).is_some() {
                outcome.done += 1;
            } else if !world.expression_files.contains_key(&case.disease)
                || case.derived_path(ArtifactKind::TumorRnaAllcount).is_none()
            {
                outcome.blocked += 1;
            } else {
                outcome.scheduled += 1;
                let ready = ready_by_disease.entry(&case.disease).or_default();
                ready.push(case.id.clone());
                if ready.len() >= MAX_IDS_PER_LINE {
                    let expression = world.expression_files[&case.disease].path.clone();
                    self.flush(world, &expression, ready, scripts)?;
                    ready.clear();
                }
            }
        }

        for (disease, ready) in &ready_by_disease {
            if !ready.is_empty() {
                let expression = world.expression_files[*disease].path.clone();
                self.flush(world, &expression, ready, scripts)?;
            }
        }
        Ok(outcome)
    }

    fn check_consistency(&self, world: &Snapshot) -> bool {
        let mut all_ok = true;
        for case in cases(world).values() {
            for file in world.derived_of_kind(&case.id, ArtifactKind::RegionalExpression) {
                let Some(expression) = world.expression_files.get(&case.disease) else {
                    warn!(
                        "missing per-disease expression file for {} even though regional \
                         expression file {} exists",
                        case.disease, file.path
                    );
                    all_ok = false;
                    continue;
                };

                if expression.mtime > file.mtime {
                    warn!(
                        "regional expression file {} is older than the expression file it \
                         depends on ({})",
                        file.path, expression.path
                    );
                    all_ok = false;
                }

                let allcount = case
                    .slot(AssayRole::TumorRna)
                    .file_id
                    .as_ref()
                    .and_then(|id| {
                        world.derived_file(&case.id, id, ArtifactKind::TumorRnaAllcount)
                    });
                match allcount {
                    None => {
                        warn!(
                            "regional expression file {} exists, but the precursor tumor RNA \
                             allcount file does not",
                            file.path
                        );
                        all_ok = false;
                    }
                    Some(allcount) => {
                        if allcount.mtime > file.mtime {
                            warn!(
                                "regional expression file {} is older than its tumor RNA \
                                 allcount file {}",
                                file.path, allcount.path
                            );
                            all_ok = false;
                        }
                    }
                }
            }
        }
        all_ok
    }
}

/// Extract the reads overlapping selected variants from the tumor BAMs,
/// one unit for the DNA side and one for the RNA side of each case.
struct ExtractReadsStage;

impl ExtractReadsStage {
    fn handle_side(
        &self,
        world: &Snapshot,
        case: &Case,
        role: AssayRole,
        output: ArtifactKind,
        flag: &str,
        scripts: &mut ScriptSet,
        outcome: &mut StageOutcome,
    ) -> Result<(), AsepmError> {
        if case.derived_path(output).is_some() {
            outcome.done += 1;
            return Ok(());
        }

        let slot = case.slot(role);
        let source_ready = match &slot.file_id {
            Some(file_id) => {
                world.file_downloaded_and_verified(file_id, slot.expected_md5.as_deref())
            }
            None => false,
        };
        if !source_ready
            || case.derived_path(ArtifactKind::SelectedVariants).is_none()
            || case.derived_path(ArtifactKind::ExtractedMafLines).is_none()
        {
            outcome.blocked += 1;
            return Ok(());
        }

        scripts.local_line(&format!(
            "{} {} {flag}",
            world.config.tool("extract_reads"),
            case.id
        ))?;
        scripts.cluster_line(&format!(
            "{} {} {flag}",
            world.config.cluster_tool("extract_reads"),
            case.id
        ))?;
        outcome.scheduled += 1;
        Ok(())
    }
}

impl ProcessingStage for ExtractReadsStage {
    fn name(&self) -> &'static str {
        "Extract reads"
    }

    fn needs_cases(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        world: &Snapshot,
        scripts: &mut ScriptSet,
    ) -> Result<StageOutcome, AsepmError> {
        let mut outcome = StageOutcome::default();
        for case in cases(world).values() {
            self.handle_side(
                world,
                case,
                AssayRole::TumorDna,
                ArtifactKind::DnaReads,
                "-d",
                scripts,
                &mut outcome,
            )?;
            self.handle_side(
                world,
                case,
                AssayRole::TumorRna,
                ArtifactKind::RnaReads,
                "-r",
                scripts,
                &mut outcome,
            )?;
        }
        Ok(outcome)
    }
}
