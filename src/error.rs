use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AsepmError {
    #[error("invalid file id: {0}")]
    InvalidFileId(String),

    #[error("invalid case id: {0}")]
    InvalidCaseId(String),

    #[error("invalid disease label: {0}")]
    InvalidDisease(String),

    #[error("missing configuration file {0}")]
    MissingConfig(Utf8PathBuf),

    #[error("failed to read configuration file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON configuration: {0}")]
    ConfigParse(String),

    #[error("configuration lists no data directories")]
    NoDataDirectories,

    #[error("failed to rewrite case list at {path}: {message}")]
    CasesRewrite { path: Utf8PathBuf, message: String },

    #[error(
        "completed VCFs directory {0} does not share a parent with any data directory; \
         refusing to guess a destination"
    )]
    UnresolvedStagingRoot(Utf8PathBuf),

    #[error("dependency check found violations in {0} stage(s); not generating scripts")]
    DependencyViolations(usize),

    #[error("failed to write script {path}: {message}")]
    ScriptWrite { path: Utf8PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
