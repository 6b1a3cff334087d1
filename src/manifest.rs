use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{ArtifactKind, AssayRole, Case, CaseId, FileId, RoleSlot};
use crate::error::AsepmError;

/// One required raw annotation asset from the MAF manifest.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MafEntry {
    pub file_id: FileId,
    pub md5: String,
    pub size: u64,
}

/// Load the MAF manifest. An absent file means the configuration-generation
/// stage has not run yet and is not an error; anything else is.
pub fn load_maf_manifest(
    path: &Utf8Path,
) -> Result<Option<BTreeMap<FileId, MafEntry>>, AsepmError> {
    let content = match fs::read_to_string(path.as_std_path()) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(AsepmError::Filesystem(format!("read {path}: {err}"))),
    };

    let entries: Vec<MafEntry> = serde_json::from_str(&content)
        .map_err(|err| AsepmError::Filesystem(format!("parse {path}: {err}")))?;

    Ok(Some(
        entries
            .into_iter()
            .map(|entry| (entry.file_id.clone(), entry))
            .collect(),
    ))
}

/// Flat row of the tab-separated case list. Path columns are filled in by
/// this program when it rewrites the list at end of run.
#[derive(Debug, Default, Deserialize, Serialize)]
struct CaseRecord {
    case_id: String,
    disease: String,
    #[serde(default)]
    normal_dna_file_id: String,
    #[serde(default)]
    normal_dna_md5: String,
    #[serde(default)]
    normal_dna_size: u64,
    #[serde(default)]
    tumor_dna_file_id: String,
    #[serde(default)]
    tumor_dna_md5: String,
    #[serde(default)]
    tumor_dna_size: u64,
    #[serde(default)]
    normal_rna_file_id: String,
    #[serde(default)]
    normal_rna_md5: String,
    #[serde(default)]
    normal_rna_size: u64,
    #[serde(default)]
    tumor_rna_file_id: String,
    #[serde(default)]
    tumor_rna_md5: String,
    #[serde(default)]
    tumor_rna_size: u64,
    #[serde(default)]
    methylation_file_id: String,
    #[serde(default)]
    methylation_md5: String,
    #[serde(default)]
    methylation_size: u64,
    #[serde(default)]
    copy_number_file_id: String,
    #[serde(default)]
    copy_number_md5: String,
    #[serde(default)]
    copy_number_size: u64,
    #[serde(default)]
    maf_file_id: String,
    #[serde(default)]
    normal_dna_path: String,
    #[serde(default)]
    tumor_dna_path: String,
    #[serde(default)]
    normal_rna_path: String,
    #[serde(default)]
    tumor_rna_path: String,
    #[serde(default)]
    methylation_path: String,
    #[serde(default)]
    copy_number_path: String,
    #[serde(default)]
    maf_path: String,
    #[serde(default)]
    tumor_rna_allcount_path: String,
    #[serde(default)]
    normal_dna_allcount_path: String,
    #[serde(default)]
    tumor_dna_allcount_path: String,
    #[serde(default)]
    vcf_path: String,
    #[serde(default)]
    selected_variants_path: String,
    #[serde(default)]
    extracted_maf_lines_path: String,
    #[serde(default)]
    regional_expression_path: String,
    #[serde(default)]
    dna_reads_path: String,
    #[serde(default)]
    rna_reads_path: String,
}

fn slot_columns(record: &CaseRecord, role: AssayRole) -> (&str, &str, u64, &str) {
    match role {
        AssayRole::NormalDna => (
            &record.normal_dna_file_id,
            &record.normal_dna_md5,
            record.normal_dna_size,
            &record.normal_dna_path,
        ),
        AssayRole::TumorDna => (
            &record.tumor_dna_file_id,
            &record.tumor_dna_md5,
            record.tumor_dna_size,
            &record.tumor_dna_path,
        ),
        AssayRole::NormalRna => (
            &record.normal_rna_file_id,
            &record.normal_rna_md5,
            record.normal_rna_size,
            &record.normal_rna_path,
        ),
        AssayRole::TumorRna => (
            &record.tumor_rna_file_id,
            &record.tumor_rna_md5,
            record.tumor_rna_size,
            &record.tumor_rna_path,
        ),
        AssayRole::Methylation => (
            &record.methylation_file_id,
            &record.methylation_md5,
            record.methylation_size,
            &record.methylation_path,
        ),
        AssayRole::CopyNumber => (
            &record.copy_number_file_id,
            &record.copy_number_md5,
            record.copy_number_size,
            &record.copy_number_path,
        ),
    }
}

fn record_to_case(record: CaseRecord) -> Result<Case, AsepmError> {
    let id: CaseId = record.case_id.parse()?;
    let disease = record.disease.parse()?;
    let mut case = Case::new(id, disease);

    for role in AssayRole::ALL {
        let (file_id, md5, size, path) = slot_columns(&record, role);
        if file_id.is_empty() {
            continue;
        }
        *case.slot_mut(role) = RoleSlot {
            file_id: Some(file_id.parse()?),
            expected_md5: (!md5.is_empty()).then(|| md5.to_string()),
            size,
            local_path: (!path.is_empty()).then(|| Utf8PathBuf::from(path)),
        };
    }

    if !record.maf_file_id.is_empty() {
        case.maf_file_id = Some(record.maf_file_id.parse()?);
    }
    if !record.maf_path.is_empty() {
        case.maf_path = Some(Utf8PathBuf::from(&record.maf_path));
    }

    let derived_columns = [
        (ArtifactKind::TumorRnaAllcount, &record.tumor_rna_allcount_path),
        (ArtifactKind::NormalDnaAllcount, &record.normal_dna_allcount_path),
        (ArtifactKind::TumorDnaAllcount, &record.tumor_dna_allcount_path),
        (ArtifactKind::Vcf, &record.vcf_path),
        (ArtifactKind::SelectedVariants, &record.selected_variants_path),
        (ArtifactKind::ExtractedMafLines, &record.extracted_maf_lines_path),
        (ArtifactKind::RegionalExpression, &record.regional_expression_path),
        (ArtifactKind::DnaReads, &record.dna_reads_path),
        (ArtifactKind::RnaReads, &record.rna_reads_path),
    ];
    for (kind, path) in derived_columns {
        if !path.is_empty() {
            case.derived.insert(kind, Utf8PathBuf::from(path));
        }
    }

    Ok(case)
}

fn case_to_record(case: &Case) -> CaseRecord {
    let slot_id = |role: AssayRole| {
        case.slot(role)
            .file_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default()
    };
    let slot_md5 = |role: AssayRole| case.slot(role).expected_md5.clone().unwrap_or_default();
    let slot_path = |role: AssayRole| {
        case.slot(role)
            .local_path
            .as_ref()
            .map(|path| path.to_string())
            .unwrap_or_default()
    };
    let derived = |kind: ArtifactKind| {
        case.derived_path(kind)
            .map(|path| path.to_string())
            .unwrap_or_default()
    };

    CaseRecord {
        case_id: case.id.to_string(),
        disease: case.disease.to_string(),
        normal_dna_file_id: slot_id(AssayRole::NormalDna),
        normal_dna_md5: slot_md5(AssayRole::NormalDna),
        normal_dna_size: case.slot(AssayRole::NormalDna).size,
        tumor_dna_file_id: slot_id(AssayRole::TumorDna),
        tumor_dna_md5: slot_md5(AssayRole::TumorDna),
        tumor_dna_size: case.slot(AssayRole::TumorDna).size,
        normal_rna_file_id: slot_id(AssayRole::NormalRna),
        normal_rna_md5: slot_md5(AssayRole::NormalRna),
        normal_rna_size: case.slot(AssayRole::NormalRna).size,
        tumor_rna_file_id: slot_id(AssayRole::TumorRna),
        tumor_rna_md5: slot_md5(AssayRole::TumorRna),
        tumor_rna_size: case.slot(AssayRole::TumorRna).size,
        methylation_file_id: slot_id(AssayRole::Methylation),
        methylation_md5: slot_md5(AssayRole::Methylation),
        methylation_size: case.slot(AssayRole::Methylation).size,
        copy_number_file_id: slot_id(AssayRole::CopyNumber),
        copy_number_md5: slot_md5(AssayRole::CopyNumber),
        copy_number_size: case.slot(AssayRole::CopyNumber).size,
        maf_file_id: case
            .maf_file_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default(),
        normal_dna_path: slot_path(AssayRole::NormalDna),
        tumor_dna_path: slot_path(AssayRole::TumorDna),
        normal_rna_path: slot_path(AssayRole::NormalRna),
        tumor_rna_path: slot_path(AssayRole::TumorRna),
        methylation_path: slot_path(AssayRole::Methylation),
        copy_number_path: slot_path(AssayRole::CopyNumber),
        maf_path: case
            .maf_path
            .as_ref()
            .map(|path| path.to_string())
            .unwrap_or_default(),
        tumor_rna_allcount_path: derived(ArtifactKind::TumorRnaAllcount),
        normal_dna_allcount_path: derived(ArtifactKind::NormalDnaAllcount),
        tumor_dna_allcount_path: derived(ArtifactKind::TumorDnaAllcount),
        vcf_path: derived(ArtifactKind::Vcf),
        selected_variants_path: derived(ArtifactKind::SelectedVariants),
        extracted_maf_lines_path: derived(ArtifactKind::ExtractedMafLines),
        regional_expression_path: derived(ArtifactKind::RegionalExpression),
        dna_reads_path: derived(ArtifactKind::DnaReads),
        rna_reads_path: derived(ArtifactKind::RnaReads),
    }
}

/// Load the case list. Like the MAF manifest, an absent file is a normal
/// early-pipeline state, not an error.
pub fn load_cases(path: &Utf8Path) -> Result<Option<BTreeMap<CaseId, Case>>, AsepmError> {
    if !path.as_std_path().exists() {
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path.as_std_path())
        .map_err(|err| AsepmError::Filesystem(format!("read {path}: {err}")))?;

    let mut cases = BTreeMap::new();
    for record in reader.deserialize::<CaseRecord>() {
        let record =
            record.map_err(|err| AsepmError::Filesystem(format!("parse {path}: {err}")))?;
        let case = record_to_case(record)?;
        cases.insert(case.id.clone(), case);
    }

    Ok(Some(cases))
}

/// Rewrite the case list with freshly resolved local paths. Written to a
/// sibling temp file first so a failed run never truncates the list.
pub fn save_cases(cases: &BTreeMap<CaseId, Case>, path: &Utf8Path) -> Result<(), AsepmError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(Vec::new());

    for case in cases.values() {
        writer
            .serialize(case_to_record(case))
            .map_err(|err| AsepmError::CasesRewrite {
                path: path.to_owned(),
                message: err.to_string(),
            })?;
    }

    let content = writer
        .into_inner()
        .map_err(|err| AsepmError::CasesRewrite {
            path: path.to_owned(),
            message: err.to_string(),
        })?;

    let tmp_path = path.with_extension("tsv.tmp");
    fs::write(tmp_path.as_std_path(), &content).map_err(|err| AsepmError::CasesRewrite {
        path: path.to_owned(),
        message: err.to_string(),
    })?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path()).map_err(|err| {
        AsepmError::CasesRewrite {
            path: path.to_owned(),
            message: err.to_string(),
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    fn sample_case() -> Case {
        let mut case = Case::new(
            "11111111-2222-3333-4444-555555555555".parse().unwrap(),
            "brca".parse().unwrap(),
        );
        *case.slot_mut(AssayRole::NormalDna) = RoleSlot {
            file_id: Some("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee".parse().unwrap()),
            expected_md5: Some("d41d8cd98f00b204e9800998ecf8427e".to_string()),
            size: 1024,
            local_path: None,
        };
        case.derived.insert(
            ArtifactKind::Vcf,
            Utf8PathBuf::from("/data/derived_files/case/x.vcf"),
        );
        case
    }

    #[test]
    fn case_list_roundtrip() {
        let temp = tempfile::tempdir().unwrap();
        let path =
            Utf8PathBuf::from_path_buf(temp.path().join("cases.tsv")).unwrap();

        let mut cases = BTreeMap::new();
        let case = sample_case();
        cases.insert(case.id.clone(), case);
        save_cases(&cases, &path).unwrap();

        let loaded = load_cases(&path).unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        let case = loaded.values().next().unwrap();
        assert_eq!(case.disease.as_str(), "brca");
        assert_eq!(case.slot(AssayRole::NormalDna).size, 1024);
        assert!(case.slot(AssayRole::TumorRna).is_empty());
        assert_eq!(
            case.derived_path(ArtifactKind::Vcf).unwrap().as_str(),
            "/data/derived_files/case/x.vcf"
        );
    }

    #[test]
    fn missing_inputs_are_not_errors() {
        let temp = tempfile::tempdir().unwrap();
        let cases_path =
            Utf8PathBuf::from_path_buf(temp.path().join("absent.tsv")).unwrap();
        let manifest_path =
            Utf8PathBuf::from_path_buf(temp.path().join("absent.json")).unwrap();

        assert!(load_cases(&cases_path).unwrap().is_none());
        assert!(load_maf_manifest(&manifest_path).unwrap().is_none());
    }

    #[test]
    fn maf_manifest_parses_entries() {
        let temp = tempfile::tempdir().unwrap();
        let path =
            Utf8PathBuf::from_path_buf(temp.path().join("maf_manifest.json")).unwrap();
        std::fs::write(
            path.as_std_path(),
            r#"[{"file_id": "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee", "md5": "abc", "size": 42}]"#,
        )
        .unwrap();

        let manifest = load_maf_manifest(&path).unwrap().unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.values().next().unwrap().size, 42);
    }
}
