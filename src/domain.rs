use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::AsepmError;

/// Remote-store file identifier (GDC UUID shape, lowercase).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(String);

impl FileId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileId {
    type Err = AsepmError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        if !is_uuid_shaped(&normalized) {
            return Err(AsepmError::InvalidFileId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseId(String);

impl CaseId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CaseId {
    type Err = AsepmError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        if !is_uuid_shaped(&normalized) {
            return Err(AsepmError::InvalidCaseId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

fn is_uuid_shaped(value: &str) -> bool {
    if value.len() != 36 {
        return false;
    }
    value.char_indices().all(|(i, ch)| match i {
        8 | 13 | 18 | 23 => ch == '-',
        _ => ch.is_ascii_hexdigit(),
    })
}

/// Disease/cohort label, e.g. "brca" or "lusc". Always lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Disease(String);

impl Disease {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Disease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Disease {
    type Err = AsepmError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-');
        if !is_valid {
            return Err(AsepmError::InvalidDisease(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// The fixed set of assay categories a case may carry raw data for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssayRole {
    NormalDna,
    TumorDna,
    NormalRna,
    TumorRna,
    Methylation,
    CopyNumber,
}

impl AssayRole {
    pub const ALL: [AssayRole; 6] = [
        AssayRole::NormalDna,
        AssayRole::TumorDna,
        AssayRole::NormalRna,
        AssayRole::TumorRna,
        AssayRole::Methylation,
        AssayRole::CopyNumber,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AssayRole::NormalDna => "normal DNA",
            AssayRole::TumorDna => "tumor DNA",
            AssayRole::NormalRna => "normal RNA",
            AssayRole::TumorRna => "tumor RNA",
            AssayRole::Methylation => "methylation",
            AssayRole::CopyNumber => "copy number",
        }
    }

    /// DNA and tumor RNA are expected for every case; the rest are optional.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            AssayRole::NormalDna | AssayRole::TumorDna | AssayRole::TumorRna
        )
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for AssayRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Closed enumeration of derived-artifact types. Every kind is unique per
/// (case, source file): a second artifact of the same kind is a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    TumorRnaAllcount,
    NormalDnaAllcount,
    TumorDnaAllcount,
    Vcf,
    SelectedVariants,
    ExtractedMafLines,
    RegionalExpression,
    DnaReads,
    RnaReads,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 9] = [
        ArtifactKind::TumorRnaAllcount,
        ArtifactKind::NormalDnaAllcount,
        ArtifactKind::TumorDnaAllcount,
        ArtifactKind::Vcf,
        ArtifactKind::SelectedVariants,
        ArtifactKind::ExtractedMafLines,
        ArtifactKind::RegionalExpression,
        ArtifactKind::DnaReads,
        ArtifactKind::RnaReads,
    ];

    /// Filename tag appended to the source file id, e.g.
    /// `<file_id>.allcount.gz`.
    pub fn tag(&self) -> &'static str {
        match self {
            ArtifactKind::TumorRnaAllcount => ".allcount.gz",
            ArtifactKind::NormalDnaAllcount => ".normal_dna_allcount.gz",
            ArtifactKind::TumorDnaAllcount => ".tumor_dna_allcount.gz",
            ArtifactKind::Vcf => ".vcf",
            ArtifactKind::SelectedVariants => ".selected_variants",
            ArtifactKind::ExtractedMafLines => ".extracted_maf_lines",
            ArtifactKind::RegionalExpression => ".regional_expression",
            ArtifactKind::DnaReads => ".dna_reads_at_selected_variants",
            ArtifactKind::RnaReads => ".rna_reads_at_selected_variants",
        }
    }

    /// Recognize a derived-file name of the form `<file_id><tag>`.
    pub fn recognize(filename: &str) -> Option<(FileId, ArtifactKind)> {
        for kind in ArtifactKind::ALL {
            if let Some(stem) = filename.strip_suffix(kind.tag()) {
                if let Ok(file_id) = stem.parse::<FileId>() {
                    return Some((file_id, kind));
                }
            }
        }
        None
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactKind::TumorRnaAllcount => "tumor RNA allcount",
            ArtifactKind::NormalDnaAllcount => "normal DNA allcount",
            ArtifactKind::TumorDnaAllcount => "tumor DNA allcount",
            ArtifactKind::Vcf => "VCF",
            ArtifactKind::SelectedVariants => "selected variants",
            ArtifactKind::ExtractedMafLines => "extracted MAF lines",
            ArtifactKind::RegionalExpression => "regional expression",
            ArtifactKind::DnaReads => "DNA reads at selected variants",
            ArtifactKind::RnaReads => "RNA reads at selected variants",
        };
        write!(f, "{name}")
    }
}

/// One raw-data slot on a case: the remote file, its expected checksum and
/// catalog size, and the local path once the snapshot has resolved it.
#[derive(Debug, Clone, Default)]
pub struct RoleSlot {
    pub file_id: Option<FileId>,
    pub expected_md5: Option<String>,
    pub size: u64,
    pub local_path: Option<Utf8PathBuf>,
}

impl RoleSlot {
    pub fn is_empty(&self) -> bool {
        self.file_id.is_none()
    }
}

/// One biological sample under study, with its role slots and the derived
/// artifacts resolved so far. Loaded from the case list, enriched in memory
/// during snapshot construction, never mutated by a stage.
#[derive(Debug, Clone)]
pub struct Case {
    pub id: CaseId,
    pub disease: Disease,
    slots: [RoleSlot; 6],
    pub maf_file_id: Option<FileId>,
    pub maf_path: Option<Utf8PathBuf>,
    pub derived: BTreeMap<ArtifactKind, Utf8PathBuf>,
}

impl Case {
    pub fn new(id: CaseId, disease: Disease) -> Self {
        Self {
            id,
            disease,
            slots: Default::default(),
            maf_file_id: None,
            maf_path: None,
            derived: BTreeMap::new(),
        }
    }

    pub fn slot(&self, role: AssayRole) -> &RoleSlot {
        &self.slots[role.index()]
    }

    pub fn slot_mut(&mut self, role: AssayRole) -> &mut RoleSlot {
        &mut self.slots[role.index()]
    }

    pub fn derived_path(&self, kind: ArtifactKind) -> Option<&Utf8Path> {
        self.derived.get(&kind).map(Utf8PathBuf::as_path)
    }
}
