//! Service manifest schema and parse-time validation.
//!
//! The manifest is the `svcs` list of a deployment vars file:
//!
//! ```yaml
//! svcs:
//!   - name: colorcodebot
//!     enabled: true
//!     exec: ./venv/bin/python ./app/colorcodebot.py
//!   - name: papertrail
//!     enabled: true
//!     exec: remote_syslog -D -c log_files.prod.yml
//!     folder:
//!       log: papertrail
//!     sops_templates:
//!       - src: papertrail.log_files.yml.wz
//!         dest: log_files.prod.yml
//! ```
//!
//! Every relative path is checked here so later stages can join them without
//! escaping a service's own directory.

use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// A validated service name, safe to use as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceName(String);

impl ServiceName {
    /// # Errors
    ///
    /// [`ManifestError::InvalidName`] unless `name` consists of ASCII
    /// alphanumerics, `.`, `_` and `-` and does not start with `.`.
    pub fn new(name: &str) -> Result<Self, ManifestError> {
        let invalid = |reason| ManifestError::InvalidName {
            name: name.to_owned(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("must not be empty"));
        }
        // Supervisors skip dot-directories
        if name.starts_with('.') {
            return Err(invalid("must not start with '.'"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(invalid(
                "only ASCII letters, digits, '.', '_' and '-' are allowed",
            ));
        }
        Ok(Self(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One encrypted template rendered into a service directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSpec {
    /// Relative to the shared templates directory
    pub src: PathBuf,
    /// Relative to the service directory
    pub dest: PathBuf,
}

/// One declared service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: ServiceName,
    pub enabled: bool,
    exec: Option<String>,
    /// Working directory relative to the service directory
    pub run_dir: Option<PathBuf>,
    /// Log directory relative to `<service>/log`
    pub log_dir: Option<PathBuf>,
    pub templates: Vec<TemplateSpec>,
}

impl ServiceSpec {
    /// The launch command. Always `Some` for enabled services.
    pub fn exec(&self) -> Option<&str> {
        self.exec.as_deref()
    }
}

/// An ordered, validated list of services with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    services: Vec<ServiceSpec>,
}

impl Manifest {
    /// Parse and validate manifest YAML.
    ///
    /// # Errors
    ///
    /// - [`ManifestError::Parse`] for malformed YAML or unknown service keys
    /// - [`ManifestError::InvalidName`] / [`ManifestError::DuplicateName`]
    /// - [`ManifestError::MissingExec`] for an enabled service without `exec`
    /// - [`ManifestError::EscapingPath`] for absolute or `..` paths
    /// - [`ManifestError::TemplateDestConflict`] when a rendered template
    ///   would land on the run script, the logger, the working directory
    ///   or another template
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest =
            serde_yaml::from_str(content).map_err(|e| ManifestError::Parse { source: e })?;

        let mut seen = HashSet::new();
        let mut services = Vec::with_capacity(raw.svcs.len());

        for entry in raw.svcs {
            let spec = entry.validate()?;
            if !seen.insert(spec.name.clone()) {
                return Err(ManifestError::DuplicateName {
                    name: spec.name.to_string(),
                });
            }
            services.push(spec);
        }

        tracing::debug!(
            services = services.len(),
            enabled = services.iter().filter(|s| s.enabled).count(),
            "manifest parsed"
        );

        Ok(Self { services })
    }

    /// Read and parse the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content)
    }

    /// All declared services in manifest order.
    pub fn services(&self) -> &[ServiceSpec] {
        &self.services
    }

    /// Enabled services in manifest order.
    pub fn enabled(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.services.iter().filter(|s| s.enabled)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {source}")]
    Parse { source: serde_yaml::Error },

    #[error("invalid service name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("service name {name:?} is declared more than once")]
    DuplicateName { name: String },

    #[error("service {name:?} is enabled but has no exec command")]
    MissingExec { name: String },

    #[error("service {name:?} exec must be a single line")]
    MultilineExec { name: String },

    #[error("service {service:?} {field} path {path} must be relative and stay inside its directory")]
    EscapingPath {
        service: String,
        field: &'static str,
        path: PathBuf,
    },

    #[error("service {service:?} template dest {dest} {reason}")]
    TemplateDestConflict {
        service: String,
        dest: PathBuf,
        reason: &'static str,
    },

    #[error("service {service:?} template source {path} does not exist")]
    TemplateNotFound { service: String, path: PathBuf },
}

// ── Wire format ──

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    svcs: Vec<RawService>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawService {
    name: String,
    enabled: bool,
    exec: Option<String>,
    #[serde(default)]
    folder: RawFolder,
    #[serde(default)]
    sops_templates: Vec<RawTemplate>,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFolder {
    run: Option<PathBuf>,
    log: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTemplate {
    src: PathBuf,
    dest: PathBuf,
}

impl RawService {
    fn validate(self) -> Result<ServiceSpec, ManifestError> {
        let name = ServiceName::new(&self.name)?;

        let exec = self
            .exec
            .map(|e| e.trim().to_owned())
            .filter(|e| !e.is_empty());
        if let Some(exec) = &exec
            && exec.contains('\n')
        {
            return Err(ManifestError::MultilineExec {
                name: self.name.clone(),
            });
        }
        if self.enabled && exec.is_none() {
            return Err(ManifestError::MissingExec {
                name: self.name.clone(),
            });
        }

        let check = |field: &'static str, path: PathBuf, needs_file: bool| {
            if is_contained(&path, needs_file) {
                Ok(path)
            } else {
                Err(ManifestError::EscapingPath {
                    service: self.name.clone(),
                    field,
                    path,
                })
            }
        };

        let run_dir = self
            .folder
            .run
            .map(|p| check("folder.run", p, false))
            .transpose()?;
        let log_dir = self
            .folder
            .log
            .map(|p| check("folder.log", p, false))
            .transpose()?;
        let templates = self
            .sops_templates
            .into_iter()
            .map(|t| {
                Ok(TemplateSpec {
                    src: check("sops_templates.src", t.src, true)?,
                    dest: check("sops_templates.dest", t.dest, true)?,
                })
            })
            .collect::<Result<Vec<_>, ManifestError>>()?;
        check_template_dests(&self.name, run_dir.as_deref(), &templates)?;

        Ok(ServiceSpec {
            name,
            enabled: self.enabled,
            exec,
            run_dir,
            log_dir,
            templates,
        })
    }
}

/// Rendered templates share the service directory with the generated `run`
/// script, the `log/` subtree and the working directory.
fn check_template_dests(
    service: &str,
    run_dir: Option<&Path>,
    templates: &[TemplateSpec],
) -> Result<(), ManifestError> {
    let run_dir = match run_dir {
        Some(dir) => normal_parts(dir),
        None => Vec::new(),
    };

    for (i, template) in templates.iter().enumerate() {
        let dest = normal_parts(&template.dest);
        let conflict = |reason| ManifestError::TemplateDestConflict {
            service: service.to_owned(),
            dest: template.dest.clone(),
            reason,
        };

        match dest.first().and_then(|c| c.to_str()) {
            Some("run") => return Err(conflict("collides with the run script")),
            Some("log") => return Err(conflict("is inside the logger directory")),
            _ => {}
        }
        if !run_dir.is_empty() && run_dir.starts_with(&dest) {
            return Err(conflict("would replace the working directory"));
        }
        let overlaps = templates[..i].iter().any(|earlier| {
            let earlier = normal_parts(&earlier.dest);
            earlier.starts_with(&dest) || dest.starts_with(&earlier)
        });
        if overlaps {
            return Err(conflict("overlaps another template of the same service"));
        }
    }
    Ok(())
}

fn normal_parts(path: &Path) -> Vec<&OsStr> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// Relative, `..`-free, and naming at least one entry when `needs_file`.
fn is_contained(path: &Path, needs_file: bool) -> bool {
    let mut has_normal = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => has_normal = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    !path.as_os_str().is_empty() && (has_normal || !needs_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_entry() {
        let manifest = Manifest::parse(
            r#"
svcs:
  - name: papertrail
    enabled: true
    exec: remote_syslog -D
    folder:
      run: conf
      log: pt
    sops_templates:
      - src: papertrail.log_files.yml.wz
        dest: log_files.prod.yml
"#,
        )
        .unwrap();

        let svc = &manifest.services()[0];
        assert_eq!(svc.name.as_str(), "papertrail");
        assert_eq!(svc.exec(), Some("remote_syslog -D"));
        assert_eq!(svc.run_dir.as_deref(), Some(Path::new("conf")));
        assert_eq!(svc.log_dir.as_deref(), Some(Path::new("pt")));
        assert_eq!(
            svc.templates,
            vec![TemplateSpec {
                src: PathBuf::from("papertrail.log_files.yml.wz"),
                dest: PathBuf::from("log_files.prod.yml"),
            }]
        );
    }

    #[test]
    fn disabled_service_may_omit_exec() {
        let manifest = Manifest::parse("svcs:\n  - name: off\n    enabled: false\n").unwrap();
        assert_eq!(manifest.services().len(), 1);
        assert_eq!(manifest.enabled().count(), 0);
    }

    #[test]
    fn enabled_service_requires_exec() {
        let err = Manifest::parse("svcs:\n  - name: bot\n    enabled: true\n").unwrap_err();
        assert!(matches!(err, ManifestError::MissingExec { .. }), "got: {err}");
    }

    #[test]
    fn duplicate_names_rejected_even_when_disabled() {
        let err = Manifest::parse(
            "svcs:\n  - {name: bot, enabled: true, exec: run}\n  - {name: bot, enabled: false}\n",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateName { .. }), "got: {err}");
    }

    #[test]
    fn name_with_space_rejected() {
        let err = Manifest::parse("svcs:\n  - {name: my bot, enabled: true, exec: run}\n")
            .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidName { .. }), "got: {err}");
    }

    #[test]
    fn escaping_paths_rejected() {
        for yaml in [
            "svcs:\n  - {name: a, enabled: true, exec: x, folder: {run: ../..}}\n",
            "svcs:\n  - {name: a, enabled: true, exec: x, folder: {log: /var/log}}\n",
            "svcs:\n  - {name: a, enabled: true, exec: x, sops_templates: [{src: ../k, dest: k}]}\n",
            "svcs:\n  - {name: a, enabled: true, exec: x, sops_templates: [{src: k, dest: .}]}\n",
        ] {
            let err = Manifest::parse(yaml).unwrap_err();
            assert!(matches!(err, ManifestError::EscapingPath { .. }), "got: {err}");
        }
    }

    fn dest_conflict(yaml: &str) -> ManifestError {
        let err = Manifest::parse(yaml).unwrap_err();
        assert!(
            matches!(err, ManifestError::TemplateDestConflict { .. }),
            "got: {err}"
        );
        err
    }

    #[test]
    fn template_dest_on_run_script_rejected() {
        let err = dest_conflict(
            "svcs:\n  - {name: pt, enabled: true, exec: x, sops_templates: [{src: k, dest: run}]}\n",
        );
        assert!(err.to_string().contains("run script"), "got: {err}");
        dest_conflict(
            "svcs:\n  - {name: pt, enabled: true, exec: x, sops_templates: [{src: k, dest: ./run}]}\n",
        );
    }

    #[test]
    fn template_dest_in_logger_tree_rejected() {
        for dest in ["log", "log/main", "log/pt/secret.yml"] {
            dest_conflict(&format!(
                "svcs:\n  - {{name: pt, enabled: true, exec: x, folder: {{log: pt}}, sops_templates: [{{src: k, dest: {dest}}}]}}\n"
            ));
        }
    }

    #[test]
    fn template_dest_replacing_working_dir_rejected() {
        for dest in ["conf", "conf/sub"] {
            dest_conflict(&format!(
                "svcs:\n  - {{name: pt, enabled: true, exec: x, folder: {{run: conf/sub}}, sops_templates: [{{src: k, dest: {dest}}}]}}\n"
            ));
        }
    }

    #[test]
    fn template_dest_inside_working_dir_allowed() {
        let manifest = Manifest::parse(
            "svcs:\n  - {name: pt, enabled: true, exec: x, folder: {run: conf}, sops_templates: [{src: k, dest: conf/log_files.yml}]}\n",
        )
        .unwrap();
        assert_eq!(manifest.services()[0].templates.len(), 1);
    }

    #[test]
    fn overlapping_template_dests_rejected() {
        dest_conflict(
            "svcs:\n  - {name: pt, enabled: true, exec: x, sops_templates: [{src: a, dest: k.yml}, {src: b, dest: ./k.yml}]}\n",
        );
        dest_conflict(
            "svcs:\n  - {name: pt, enabled: true, exec: x, sops_templates: [{src: a, dest: conf/k.yml}, {src: b, dest: conf}]}\n",
        );
    }

    #[test]
    fn unknown_service_key_rejected() {
        let err =
            Manifest::parse("svcs:\n  - {name: a, enabled: true, exec: x, enable: true}\n")
                .unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }), "got: {err}");
    }

    #[test]
    fn other_top_level_keys_ignored() {
        let manifest = Manifest::parse("tz: UTC\nsvcs: []\n").unwrap();
        assert!(manifest.services().is_empty());
    }

    #[test]
    fn multiline_exec_rejected() {
        let err = Manifest::parse(
            "svcs:\n  - name: a\n    enabled: true\n    exec: |\n      one\n      two\n",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::MultilineExec { .. }), "got: {err}");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn names_with_whitespace_never_validate(
                head in "[a-z]{1,8}",
                tail in "[a-z]{0,8}",
                ws in "[ \t]",
            ) {
                let name = format!("{head}{ws}{tail}");
                prop_assert!(ServiceName::new(&name).is_err());
            }

            #[test]
            fn safe_names_validate(name in "[A-Za-z0-9_-][A-Za-z0-9._-]{0,30}") {
                prop_assert!(ServiceName::new(&name).is_ok());
            }
        }
    }
}
