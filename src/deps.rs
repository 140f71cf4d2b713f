//! Dependency resolution via an external installer process

use crate::config::InstanceConfig;
use crate::sandbox::PythonSandbox;
use crate::validate::{ExecutableProgram, ParsedProgram};
use std::io;
use std::process::Command;
use thiserror::Error;

/// Why declared dependencies could not be made importable
#[derive(Debug, Error)]
pub enum InstallError {
    /// The configured installer command has no program to run
    #[error("installer command is empty")]
    NoInstaller,

    /// The install directory could not be created
    #[error("failed to create install directory {dir}: {source}")]
    CreateDir {
        dir: String,
        #[source]
        source: io::Error,
    },

    /// The install directory could not be registered on the module search path
    #[error("search path registration failed: {0}")]
    SearchPath(String),

    /// The installer process could not be started
    #[error("failed to run installer: {0}")]
    Spawn(#[source] io::Error),

    /// The installer ran and reported failure
    #[error("failed to install {specifiers}")]
    InstallFailed { specifiers: String },
}

impl InstallError {
    /// Failures attributable to the submission rather than the instance
    pub fn is_reportable(&self) -> bool {
        matches!(self, InstallError::InstallFailed { .. })
    }
}

/// Installs declared packages and hands the sandbox a program with the
/// annotation already removed
pub struct DependencyResolver {
    config: InstanceConfig,
}

impl DependencyResolver {
    pub fn new(config: InstanceConfig) -> Self {
        Self { config }
    }

    /// Make every declared package importable, then strip the annotation.
    ///
    /// A program without a manifest passes straight through. Otherwise the
    /// install directory is created, registered on the sandbox's module
    /// search path, and the installer runs to completion before the program
    /// is released for execution.
    pub fn prepare(
        &self,
        program: ParsedProgram,
        sandbox: &PythonSandbox,
    ) -> Result<ExecutableProgram, InstallError> {
        if let Some(manifest) = program.manifest() {
            let specifiers = manifest.specifiers();
            self.ensure_install_dir()?;
            sandbox
                .ensure_search_path(&self.config.install_dir)
                .map_err(|err| InstallError::SearchPath(err.to_string()))?;
            self.run_installer(&specifiers)?;
        }
        Ok(program.strip_annotation())
    }

    /// Paths and installer shared by every request on this instance
    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    fn ensure_install_dir(&self) -> Result<(), InstallError> {
        std::fs::create_dir_all(&self.config.install_dir).map_err(|source| {
            InstallError::CreateDir {
                dir: self.config.install_dir.display().to_string(),
                source,
            }
        })
    }

    fn run_installer(&self, specifiers: &[String]) -> Result<(), InstallError> {
        let (installer, leading_args) = self
            .config
            .installer_command
            .split_first()
            .ok_or(InstallError::NoInstaller)?;

        let mut command = Command::new(installer);
        command
            .args(leading_args)
            .arg("--disable-pip-version-check")
            .arg("install")
            .arg("--upgrade")
            .args(specifiers)
            .arg("--no-compile")
            .arg("-t")
            .arg(&self.config.install_dir)
            .arg("--cache-dir")
            .arg(&self.config.cache_dir);

        tracing::info!(
            installer = %installer,
            specifiers = ?specifiers,
            install_dir = %self.config.install_dir.display(),
            "installing declared packages"
        );

        let output = command.output().map_err(InstallError::Spawn)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                status = %output.status,
                stderr = %stderr.chars().take(400).collect::<String>(),
                "installer failed"
            );
            return Err(InstallError::InstallFailed {
                specifiers: specifiers.join(", "),
            });
        }
        Ok(())
    }
}
