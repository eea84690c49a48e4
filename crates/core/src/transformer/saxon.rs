//! Saxon-HE engine running the page2tei stylesheet.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{TransformError, TransformJob, Transformer};
use crate::config::TransformConfig;

const SAXON_MAIN: &str = "net.sf.saxon.Transform";

/// Runs `java -cp <classpath> net.sf.saxon.Transform` per document.
#[derive(Debug, Clone)]
pub struct SaxonTransformer {
    config: TransformConfig,
}

impl SaxonTransformer {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    fn classpath(&self) -> Result<&str, TransformError> {
        self.config
            .saxon_classpath
            .as_deref()
            .map(str::trim)
            .filter(|cp| !cp.is_empty())
            .ok_or(TransformError::MissingClasspath)
    }

    /// Command line arguments after the java binary.
    pub fn args(&self, classpath: &str, input: &Path, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = self
            .config
            .java_opts
            .split_whitespace()
            .map(String::from)
            .collect();
        args.extend([
            "-cp".to_string(),
            classpath.to_string(),
            SAXON_MAIN.to_string(),
            format!("-s:{}", input.display()),
            format!("-xsl:{}", self.config.stylesheet.display()),
            format!("-o:{}", output.display()),
            "combine=true".to_string(),
            "ab=true".to_string(),
        ]);
        args
    }

    async fn run_saxon(&self, input: &Path, output: &Path) -> Result<(), TransformError> {
        let classpath = self.classpath()?;
        let mut child = Command::new(&self.config.java_path)
            .args(self.args(classpath, input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TransformError::JavaNotFound {
                        path: self.config.java_path.clone(),
                    }
                } else {
                    TransformError::Io(e)
                }
            })?;

        let mut stderr = child.stderr.take();
        let result = timeout(Duration::from_secs(self.config.timeout_secs), async {
            let mut error_output = String::new();
            if let Some(stderr) = stderr.as_mut() {
                stderr.read_to_string(&mut error_output).await?;
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, error_output))
        })
        .await;

        match result {
            Ok(Ok((status, _))) if status.success() => {
                debug!(input = %input.display(), "Saxon finished");
                Ok(())
            }
            Ok(Ok((status, error_output))) => Err(TransformError::failed(
                format!("Saxon exited with code: {:?}", status.code()),
                Some(error_output).filter(|s| !s.trim().is_empty()),
            )),
            Ok(Err(e)) => Err(TransformError::Io(e)),
            Err(_) => {
                let _ = child.kill().await;
                Err(TransformError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                })
            }
        }
    }
}

#[async_trait]
impl Transformer for SaxonTransformer {
    fn name(&self) -> &str {
        "saxon"
    }

    async fn validate(&self) -> Result<(), TransformError> {
        let classpath = self.classpath()?;
        for entry in std::env::split_paths(classpath) {
            if fs::metadata(&entry).await.is_err() {
                return Err(TransformError::ClasspathEntryMissing { path: entry });
            }
        }
        Ok(())
    }

    async fn transform(&self, job: &TransformJob) -> Result<String, TransformError> {
        let output: PathBuf = std::env::temp_dir().join(format!(
            "okar-{}-{}.xml",
            job.doc_id,
            uuid::Uuid::new_v4().simple()
        ));

        let result = match self.run_saxon(&job.mets_path, &output).await {
            Ok(()) => fs::read_to_string(&output)
                .await
                .map_err(|_| TransformError::failed("Saxon did not write an output file", None)),
            Err(e) => Err(e),
        };
        let _ = fs::remove_file(&output).await;
        result
    }
}
