//! Service manifest → supervision tree.
//!
//! ```text
//! <output_root>/
//!   <name>/
//!     run              cd <run dir> && exec <exec>
//!     <dest>...        rendered secret templates
//!     log/
//!       run            exec <logger> <log dir>
//!       <log dir>/
//! ```
//!
//! Only enabled services are materialized. Every template source is checked
//! before the first directory is created; a missing source leaves no partial
//! tree behind.

use botimage_core::{Manifest, ManifestError, ServiceSpec, SupervisorConfig};
use botimage_engine::{DecryptError, SecretsDecryptor};
use std::path::{Path, PathBuf};

/// Log directory used when a service declares none.
const DEFAULT_LOG_DIR: &str = "main";

/// One materialized service directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledService {
    pub name: String,
    /// Service directory on the host
    pub dir: PathBuf,
    /// Working directory of the service inside the image
    pub run_dir: PathBuf,
    /// Log directory inside the image
    pub log_dir: PathBuf,
    /// Rendered template files on the host
    pub rendered: Vec<PathBuf>,
    /// Command the supervisor launches
    pub launch: String,
}

#[derive(Debug, Clone)]
pub struct CompiledTree {
    pub root: PathBuf,
    pub services: Vec<CompiledService>,
}

pub struct ManifestCompiler<'a, D: SecretsDecryptor> {
    decryptor: &'a D,
    supervisor: &'a SupervisorConfig,
    templates_dir: PathBuf,
    install_root: PathBuf,
}

impl<'a, D: SecretsDecryptor> ManifestCompiler<'a, D> {
    /// `templates_dir` is the host directory holding encrypted templates;
    /// `install_root` is where the compiled tree will live inside the image.
    pub fn new(
        decryptor: &'a D,
        supervisor: &'a SupervisorConfig,
        templates_dir: impl Into<PathBuf>,
        install_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            decryptor,
            supervisor,
            templates_dir: templates_dir.into(),
            install_root: install_root.into(),
        }
    }

    /// Materialize every enabled service of `manifest` under `output_root`.
    ///
    /// # Errors
    ///
    /// - [`CompileError::Manifest`] if a template source is missing
    ///   (raised before anything is written)
    /// - [`CompileError::Decrypt`] if a template cannot be rendered
    /// - [`CompileError::Io`] for filesystem failures
    pub async fn compile(
        &self,
        manifest: &Manifest,
        output_root: &Path,
    ) -> Result<CompiledTree, CompileError> {
        self.check_templates(manifest)?;

        create_dir_all(output_root)?;

        let mut services = Vec::new();
        for spec in manifest.enabled() {
            services.push(self.compile_service(spec, output_root).await?);
        }

        tracing::info!(
            root = %output_root.display(),
            services = services.len(),
            "service tree compiled"
        );

        Ok(CompiledTree {
            root: output_root.to_path_buf(),
            services,
        })
    }

    fn check_templates(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        for spec in manifest.enabled() {
            for template in &spec.templates {
                let src = self.templates_dir.join(&template.src);
                if !src.is_file() {
                    return Err(ManifestError::TemplateNotFound {
                        service: spec.name.to_string(),
                        path: src,
                    });
                }
            }
        }
        Ok(())
    }

    async fn compile_service(
        &self,
        spec: &ServiceSpec,
        output_root: &Path,
    ) -> Result<CompiledService, CompileError> {
        let name = spec.name.as_str();
        let dir = output_root.join(name);
        std::fs::create_dir(&dir).map_err(|e| CompileError::Io {
            path: dir.clone(),
            source: e,
        })?;

        let mut rendered = Vec::with_capacity(spec.templates.len());
        for template in &spec.templates {
            let dest = dir.join(&template.dest);
            if let Some(parent) = dest.parent() {
                create_dir_all(parent)?;
            }
            self.decryptor
                .render_template(&self.templates_dir.join(&template.src), &dest)
                .await
                .map_err(|e| CompileError::Decrypt {
                    service: name.to_owned(),
                    source: e,
                })?;
            rendered.push(dest);
        }

        let installed = self.install_root.join(name);

        // Working directory
        let run_dir = match &spec.run_dir {
            Some(rel) => {
                create_dir_all(&dir.join(rel))?;
                normalize(&installed.join(rel))
            }
            None => installed.clone(),
        };
        let launch = spec
            .exec()
            .ok_or_else(|| ManifestError::MissingExec {
                name: name.to_owned(),
            })?
            .to_owned();
        write_script(&dir.join("run"), &self.service_script(&run_dir, &launch))?;

        // Logger
        let log_rel = match &spec.log_dir {
            Some(rel) => rel.clone(),
            None => PathBuf::from(DEFAULT_LOG_DIR),
        };
        create_dir_all(&dir.join("log").join(&log_rel))?;
        let log_dir = normalize(&installed.join("log").join(&log_rel));
        write_script(&dir.join("log").join("run"), &self.logger_script(&log_dir))?;

        tracing::debug!(service = name, run_dir = %run_dir.display(), "service compiled");

        Ok(CompiledService {
            name: name.to_owned(),
            dir,
            run_dir,
            log_dir,
            rendered,
            launch,
        })
    }

    fn service_script(&self, run_dir: &Path, launch: &str) -> String {
        format!(
            "#!{shell} -e\nexec 2>&1\ncd {dir}\nexec {launch}\n",
            shell = self.supervisor.shell,
            dir = shell_quote(&run_dir.to_string_lossy()),
        )
    }

    fn logger_script(&self, log_dir: &Path) -> String {
        let mut words = vec![self.supervisor.logger.clone()];
        words.extend(self.supervisor.logger_args.iter().cloned());
        words.push(shell_quote(&log_dir.to_string_lossy()));
        format!(
            "#!{shell} -e\nexec {cmd}\n",
            shell = self.supervisor.shell,
            cmd = words.join(" "),
        )
    }
}

/// Drop `.` components; inputs never contain `..`.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

/// Single-quote `s` for a POSIX shell unless it is plainly safe.
fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'))
    {
        return s.to_owned();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn create_dir_all(path: &Path) -> Result<(), CompileError> {
    std::fs::create_dir_all(path).map_err(|e| CompileError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_script(path: &Path, content: &str) -> Result<(), CompileError> {
    let io_err = |e| CompileError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    std::fs::write(path, content).map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(io_err)?;
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("failed to render secret template for service {service:?}")]
    Decrypt {
        service: String,
        source: DecryptError,
    },

    #[error("failed to write {path}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_leaves_plain_paths() {
        assert_eq!(shell_quote("/home/bot/svcs/a"), "/home/bot/svcs/a");
    }

    #[test]
    fn shell_quote_wraps_spaces_and_quotes() {
        assert_eq!(shell_quote("/a b"), "'/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn normalize_drops_cur_dir() {
        assert_eq!(normalize(Path::new("/a/./b/.")), PathBuf::from("/a/b"));
    }
}
