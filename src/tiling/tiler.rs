//! External tiling tool.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::ToolInvocationError;

/// Extension of the pyramid index written next to the output base.
pub const INDEX_EXTENSION: &str = ".dzi";

/// Suffix of the tile directory written next to the output base.
pub const TILES_SUFFIX: &str = "_files";

/// Produces a Deep Zoom pyramid from a local image file.
///
/// Given `output_base` = `/tmp/x/photo`, an implementation must create
/// `/tmp/x/photo.dzi` and the tile tree `/tmp/x/photo_files/`.
#[async_trait]
pub trait TileGenerator: Send + Sync {
    async fn generate(&self, input: &Path, output_base: &Path) -> Result<(), ToolInvocationError>;
}

/// [`TileGenerator`] running `vips dzsave <input> <output_base>`.
#[derive(Debug, Clone)]
pub struct VipsTiler {
    program: PathBuf,
}

impl VipsTiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run `vips --version` and return its first output line.
    pub async fn version(&self) -> Result<String, ToolInvocationError> {
        let stdout = self.invoke(&[OsStr::new("--version")]).await?;
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }

    async fn invoke(&self, args: &[&OsStr]) -> Result<String, ToolInvocationError> {
        let program = self.program.display().to_string();

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolInvocationError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ToolInvocationError::Failed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for VipsTiler {
    fn default() -> Self {
        Self::new("vips")
    }
}

#[async_trait]
impl TileGenerator for VipsTiler {
    async fn generate(&self, input: &Path, output_base: &Path) -> Result<(), ToolInvocationError> {
        debug!(
            input = %input.display(),
            output = %output_base.display(),
            "Running dzsave"
        );
        self.invoke(&[OsStr::new("dzsave"), input.as_os_str(), output_base.as_os_str()])
            .await?;
        Ok(())
    }
}
