use std::fs::{self, File};
use std::io::{self, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::ResolvedConfig;
use crate::error::AsepmError;

/// Cap on identifiers per emitted command line, to stay under platform
/// argument-list limits while keeping process-spawn overhead low.
pub const MAX_IDS_PER_LINE: usize = 800;

/// The command streams one run writes into: the local script, the cluster
/// submission script, and the remote-Linux / cloud-burst shell fragments.
/// Streams without a configured filename are backed by `io::sink()` so the
/// stages never need to care which targets are enabled.
pub struct ScriptSet {
    local: BufWriter<File>,
    local_path: Utf8PathBuf,
    cluster: Box<dyn Write>,
    cluster_path: Option<Utf8PathBuf>,
    linux: Box<dyn Write>,
    linux_path: Utf8PathBuf,
    burst: Box<dyn Write>,
    burst_path: Option<Utf8PathBuf>,
    job_prefix: String,
}

impl ScriptSet {
    pub fn open(config: &ResolvedConfig) -> Result<Self, AsepmError> {
        let local = BufWriter::new(create(&config.local_script)?);
        let linux: Box<dyn Write> = Box::new(BufWriter::new(create(&config.linux_script)?));

        let cluster: Box<dyn Write> = match &config.cluster_script {
            Some(path) => Box::new(BufWriter::new(create(path)?)),
            None => Box::new(io::sink()),
        };
        let burst: Box<dyn Write> = match &config.burst_script {
            Some(path) => Box::new(BufWriter::new(create(path)?)),
            None => Box::new(io::sink()),
        };

        let job_prefix = match &config.cluster_scheduler {
            Some(scheduler) => format!("job submit /scheduler:{scheduler} "),
            None => String::new(),
        };

        Ok(Self {
            local,
            local_path: config.local_script.clone(),
            cluster,
            cluster_path: config.cluster_script.clone(),
            linux,
            linux_path: config.linux_script.clone(),
            burst,
            burst_path: config.burst_script.clone(),
            job_prefix,
        })
    }

    /// Remove every script a previous run may have left behind.
    pub fn delete_stale(config: &ResolvedConfig) -> Result<(), AsepmError> {
        let mut paths = vec![
            &config.local_script,
            &config.linux_script,
            &config.download_script,
        ];
        if let Some(path) = &config.cluster_script {
            paths.push(path);
        }
        if let Some(path) = &config.burst_script {
            paths.push(path);
        }

        for path in paths {
            match fs::remove_file(path.as_std_path()) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(AsepmError::Filesystem(format!("delete {path}: {err}")));
                }
            }
        }
        Ok(())
    }

    pub fn local_line(&mut self, line: &str) -> Result<(), AsepmError> {
        let path = self.local_path.clone();
        write_line(&mut self.local, line, &path)
    }

    /// Cluster commands are wrapped in the configured job-submission prefix.
    pub fn cluster_line(&mut self, line: &str) -> Result<(), AsepmError> {
        let path = self.cluster_path.clone().unwrap_or_default();
        let full = format!("{}{line}", self.job_prefix);
        write_line(&mut self.cluster, &full, &path)
    }

    /// Raw shell text for the remote-Linux script. The caller supplies the
    /// line feeds; no CR ever reaches this stream.
    pub fn linux_fragment(&mut self, text: &str) -> Result<(), AsepmError> {
        let path = self.linux_path.clone();
        write_raw(&mut self.linux, text, &path)
    }

    pub fn burst_fragment(&mut self, text: &str) -> Result<(), AsepmError> {
        let path = self.burst_path.clone().unwrap_or_default();
        write_raw(&mut self.burst, text, &path)
    }

    pub fn finish(mut self) -> Result<(), AsepmError> {
        let flush = |writer: &mut dyn Write, path: &Utf8Path| {
            writer.flush().map_err(|err| AsepmError::ScriptWrite {
                path: path.to_owned(),
                message: err.to_string(),
            })
        };
        flush(&mut self.local, &self.local_path)?;
        flush(&mut self.cluster, self.cluster_path.as_deref().unwrap_or(Utf8Path::new("")))?;
        flush(&mut self.linux, &self.linux_path)?;
        flush(&mut self.burst, self.burst_path.as_deref().unwrap_or(Utf8Path::new("")))?;
        Ok(())
    }
}

fn create(path: &Utf8Path) -> Result<File, AsepmError> {
    File::create(path.as_std_path()).map_err(|err| AsepmError::ScriptWrite {
        path: path.to_owned(),
        message: err.to_string(),
    })
}

fn write_line(writer: &mut dyn Write, line: &str, path: &Utf8Path) -> Result<(), AsepmError> {
    write_raw(writer, line, path)?;
    write_raw(writer, "\n", path)
}

fn write_raw(writer: &mut dyn Write, text: &str, path: &Utf8Path) -> Result<(), AsepmError> {
    writer
        .write_all(text.as_bytes())
        .map_err(|err| AsepmError::ScriptWrite {
            path: path.to_owned(),
            message: err.to_string(),
        })
}
