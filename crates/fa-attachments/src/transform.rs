//! External transformation backend
//!
//! Derived versions are never produced in-process; the engine hands an
//! input path, an output path and a [`VersionSpec`] to an injected
//! [`Transformer`]. The shipped implementation drives the ImageMagick
//! command line tools.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::VersionSpec;

/// Transformation backend error
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("Transformer produced no output at {}", .0.display())]
    MissingOutput(PathBuf),
    #[error("{0}")]
    Backend(String),
}

/// Transformation backend.
///
/// `transform` must produce the output file at exactly `output`; `is_image`
/// is consulted for attributes configured with the image check.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(
        &self,
        input: &Path,
        output: &Path,
        spec: &VersionSpec,
    ) -> Result<(), TransformError>;

    async fn is_image(&self, path: &Path) -> bool;
}

/// ImageMagick-backed transformer using the `convert` and `identify`
/// command line tools on existing files.
#[derive(Debug, Clone)]
pub struct MagickTransformer {
    convert_program: String,
    identify_program: String,
}

impl Default for MagickTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl MagickTransformer {
    pub fn new() -> Self {
        Self {
            convert_program: "convert".to_string(),
            identify_program: "identify".to_string(),
        }
    }

    /// Override the tool names, e.g. `magick convert` wrappers or absolute
    /// paths.
    pub fn with_programs(
        convert_program: impl Into<String>,
        identify_program: impl Into<String>,
    ) -> Self {
        Self {
            convert_program: convert_program.into(),
            identify_program: identify_program.into(),
        }
    }

    /// Program and argument list for a spec; pure, exercised by tests.
    fn build_command(&self, input: &Path, output: &Path, spec: &VersionSpec) -> (String, Vec<String>) {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();

        match spec {
            VersionSpec::Image(ops) => {
                let mut args = vec![input.into_owned()];
                for op in ops {
                    args.extend(op.to_args());
                }
                args.push(output.into_owned());
                (self.convert_program.clone(), args)
            }
            VersionSpec::Command { program, args } => {
                let args = args
                    .iter()
                    .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
                    .collect();
                (program.clone(), args)
            }
        }
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<std::process::Output, TransformError> {
        debug!(program, ?args, "running transformer command");

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|source| TransformError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(TransformError::CommandFailed {
                program: program.to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl Transformer for MagickTransformer {
    async fn transform(
        &self,
        input: &Path,
        output: &Path,
        spec: &VersionSpec,
    ) -> Result<(), TransformError> {
        let (program, args) = self.build_command(input, output, spec);
        self.run(&program, &args).await?;

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(TransformError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }

    async fn is_image(&self, path: &Path) -> bool {
        let args = [path.to_string_lossy().into_owned()];
        match self.run(&self.identify_program, &args).await {
            Ok(output) => !output.stdout.is_empty(),
            Err(_) => false,
        }
    }
}
