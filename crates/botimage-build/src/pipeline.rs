//! The build state machine.
//!
//! ```text
//! INIT ─▶ RESOLVE_BASE ─┬─▶ JUMPSTART_BUILD ─┬─▶ PAYLOAD_APPLY ─▶ TRIM ─▶ PACKAGE ─▶ [PUSH] ─▶ DONE
//!                       └─▶ JUMPSTART_REUSE ─┘
//! ```
//!
//! Any failure before `DONE` discards the working container and leaves
//! both the jumpstart cache and the final tags as they were, except that
//! a jumpstart built and tagged earlier in the same run is kept.

use crate::archive;
use crate::cache::find_jumpstart;
use crate::compiler::ManifestCompiler;
use crate::session::{BuildError, BuildRequest, BuildSession, JumpstartStatus, Stage, StageError};
use botimage_core::{BuildConfig, ImageNaming, ImageRef, Manifest, RepoInfo};
use botimage_engine::{
    Buildah, CommandExecutor, ContainerSession, PushReport, SecretsDecryptor, TagRemoval,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const ROOT: &str = "root";

/// Holding area for preserved home entries while the home is replaced.
const STASH: &str = "/var/tmp/botimage-preserve";

/// Move `$1` to `$2` only when `$1` exists.
const MOVE_IF_EXISTS: &str = r#"if [ -e "$1" ]; then mv "$1" "$2"; fi"#;

/// Empty every existing directory given as an argument.
const CLEAR_DIRS: &str = r#"for p do if [ -e "$p" ]; then find "$p" -mindepth 1 -delete; fi; done"#;

/// What a finished build produced.
#[derive(Debug)]
pub struct BuildOutcome {
    pub image_id: String,
    pub tags: Vec<ImageRef>,
    pub jumpstart: JumpstartStatus,
    /// `None` when pushing was not requested
    pub push: Option<PushReport>,
}

/// Drives one build from repository discovery to tagged image.
pub struct Orchestrator<'a, E: CommandExecutor, D: SecretsDecryptor> {
    buildah: &'a Buildah<E>,
    decryptor: &'a D,
}

impl<'a, E: CommandExecutor, D: SecretsDecryptor> Orchestrator<'a, E, D> {
    pub fn new(buildah: &'a Buildah<E>, decryptor: &'a D) -> Self {
        Self { buildah, decryptor }
    }

    /// Run every stage for `request` against the repository containing
    /// `repo_dir`.
    ///
    /// # Errors
    ///
    /// [`BuildError`] carries the stage that failed. The working container
    /// has already been removed when it is returned.
    pub async fn run(
        &self,
        repo_dir: &Path,
        request: &BuildRequest,
    ) -> Result<BuildOutcome, BuildError> {
        let mut session = self.init(repo_dir, request).map_err(|e| BuildError {
            stage: Stage::Init,
            source: e,
        })?;

        match self.drive(&mut session, request).await {
            Ok(outcome) => {
                session.enter(Stage::Done);
                Ok(outcome)
            }
            Err(source) => {
                let stage = session.stage();
                tracing::error!(stage = %stage, error = %source, "build aborted");
                self.discard(&mut session).await;
                Err(BuildError { stage, source })
            }
        }
    }

    // ── INIT ──

    fn init(
        &self,
        repo_dir: &Path,
        request: &BuildRequest,
    ) -> Result<BuildSession<'a, E>, StageError> {
        let repo = RepoInfo::discover(repo_dir)?;
        let config = BuildConfig::load(&repo.root)?;
        let registry = match request.registry.as_deref() {
            Some(registry) => registry,
            None => config.image.default_registry.as_str(),
        };
        let naming = ImageNaming::new(
            registry,
            &config.image.app,
            &request.deployment,
            &config.image.base_distro,
        )?;

        if archive::is_dirty(&repo.root)? {
            tracing::warn!(
                repo = %repo.root.display(),
                "uncommitted changes are not part of the build; only HEAD is archived"
            );
        }

        tracing::info!(
            repo = %repo.root.display(),
            version = %repo.version,
            branch = repo.branch.as_deref().unwrap_or("-"),
            image = %naming.image_name(),
            "build session initialized"
        );

        Ok(BuildSession::new(config, repo, naming, request.date))
    }

    async fn drive(
        &self,
        session: &mut BuildSession<'a, E>,
        request: &BuildRequest,
    ) -> Result<BuildOutcome, StageError> {
        session.enter(Stage::ResolveBase);
        let cached = find_jumpstart(self.buildah, &session.naming, session.date).await?;
        let jumpstart = match cached {
            Some(image) => {
                session.enter(Stage::JumpstartReuse);
                self.jumpstart_reuse(session, image).await?
            }
            None => {
                session.enter(Stage::JumpstartBuild);
                self.jumpstart_build(session).await?
            }
        };

        session.enter(Stage::PayloadApply);
        self.payload_apply(session).await?;

        session.enter(Stage::Trim);
        let mut removable = session.config.packages.build.clone();
        removable.extend(session.config.packages.helper_build.iter().cloned());
        self.trim(session, &removable).await?;

        session.enter(Stage::Package);
        let (image_id, tags) = self.package(session).await?;

        let push = if request.push {
            session.enter(Stage::Push);
            let mut refs = tags.clone();
            if let JumpstartStatus::Built(image) = &jumpstart {
                refs.push(image.clone());
            }
            let report = self.buildah.push_all(&refs).await;
            for failure in &report.failed {
                tracing::warn!(image = %failure.reference, error = %failure.error, "push failed");
            }
            Some(report)
        } else {
            None
        };

        Ok(BuildOutcome {
            image_id,
            tags,
            jumpstart,
            push,
        })
    }

    // ── JUMPSTART ──

    async fn jumpstart_build(
        &self,
        session: &mut BuildSession<'a, E>,
    ) -> Result<JumpstartStatus, StageError> {
        let target = session.naming.jumpstart_ref(session.date);
        let container = self
            .buildah
            .open_session(
                &session.naming.container_name(),
                &session.config.image.base_image,
            )
            .await?;
        session.attach(container);

        let ctr = session.container()?;
        let cfg = &session.config;

        // 1. Packages
        if !cfg.packages.upgrade.is_empty() {
            ctr.run(ROOT, &cfg.packages.upgrade).await?;
        }
        let packages: Vec<String> = cfg
            .packages
            .runtime
            .iter()
            .chain(&cfg.packages.build)
            .chain(&cfg.packages.helper_build)
            .cloned()
            .collect();
        if !packages.is_empty() {
            let mut install = cfg.packages.install.clone();
            install.extend(packages);
            ctr.run(ROOT, &install).await?;
        }

        // 2. Timezone
        let tz = &cfg.image.timezone;
        ctr.run(
            ROOT,
            &[
                "ln".to_owned(),
                "-sf".to_owned(),
                format!("/usr/share/zoneinfo/{tz}"),
                "/etc/localtime".to_owned(),
            ],
        )
        .await?;
        ctr.set_env("TZ", tz).await?;

        // 3. Users
        ensure_user(ctr, &cfg.jumpstart.add_user, &cfg.jumpstart.builder_user).await?;
        ensure_user(ctr, &cfg.jumpstart.add_user, &cfg.image.app_user).await?;

        // 4. Fonts and helper tools
        for font in &cfg.jumpstart.fonts {
            ctr.add(&font.url, &font.dest, None).await?;
        }
        for step in &cfg.jumpstart.helper_steps {
            tracing::info!(user = %step.user, command = ?step.command, "helper step");
            ctr.run(&step.user, &step.command).await?;
        }

        // 5. Drop what only the helper steps needed
        self.trim(session, &cfg.packages.helper_build).await?;

        let image_id = ctr.commit().await?;
        self.buildah
            .tag(&image_id, std::slice::from_ref(&target))
            .await?;
        tracing::info!(image = %target, id = %image_id, "jumpstart image tagged");

        Ok(JumpstartStatus::Built(target))
    }

    async fn jumpstart_reuse(
        &self,
        session: &mut BuildSession<'a, E>,
        image: ImageRef,
    ) -> Result<JumpstartStatus, StageError> {
        let container = self
            .buildah
            .open_session(&session.naming.container_name(), &image.to_string())
            .await?;
        session.attach(container);
        Ok(JumpstartStatus::Reused(image))
    }

    // ── PAYLOAD_APPLY ──

    async fn payload_apply(&self, session: &BuildSession<'a, E>) -> Result<(), StageError> {
        let cfg = &session.config;
        let root = &session.repo.root;

        let manifest = Manifest::load(&root.join(cfg.manifest_path(session.deployment())))?;

        let workdir = tempfile::Builder::new()
            .prefix("botimage-")
            .tempdir()
            .map_err(|e| StageError::TempDir { source: e })?;

        let source = archive::archive_head(
            root,
            &archive_selection(root, cfg)?,
            &workdir.path().join("app.tar"),
        )?;

        let compiler = ManifestCompiler::new(
            self.decryptor,
            &cfg.supervisor,
            root.join(&cfg.manifest.templates_dir),
            cfg.service_root(),
        );
        let tree = compiler
            .compile(&manifest, &workdir.path().join("svcs"))
            .await?;

        let ctr = session.container()?;
        replace_home(ctr, cfg, &source, &tree.root).await?;

        let home = cfg.app_home();
        let user = cfg.image.app_user.as_str();
        for asset in &cfg.payload.assets {
            ctr.add(&asset.url, &home.join(&asset.dest), Some(user))
                .await?;
        }
        if let Some(warm) = cfg.payload.cache_warm.as_ref().filter(|c| !c.is_empty()) {
            ctr.run(user, warm).await?;
        }

        self.install_python(session).await?;

        // arch-lint: allow(no-error-swallowing) reason="the image is already populated; a leftover temp dir does not affect the build"
        if let Err(e) = workdir.close() {
            tracing::warn!(error = %e, "failed to remove build work directory");
        }
        Ok(())
    }

    async fn install_python(&self, session: &BuildSession<'a, E>) -> Result<(), StageError> {
        let ctr = session.container()?;
        let cfg = &session.config;
        let py = &cfg.python;
        let home = cfg.app_home();
        let user = cfg.image.app_user.as_str();

        let pyenv_root = home.join(&py.runtime_dir);
        let venv = home.join(&py.venv_dir);

        ctr.run(
            user,
            &[
                "env".to_owned(),
                format!("PYENV_ROOT={}", pyenv_root.display()),
                path_arg(&pyenv_root.join("bin/pyenv")),
                "install".to_owned(),
                "--skip-existing".to_owned(),
                py.version.clone(),
            ],
        )
        .await?;

        let interpreter = pyenv_root.join("versions").join(&py.version).join("bin/python");
        ctr.run(
            user,
            &[
                path_arg(&interpreter),
                "-m".to_owned(),
                "venv".to_owned(),
                path_arg(&venv),
            ],
        )
        .await?;

        let pip = |rest: &[String]| {
            let mut cmd = vec![
                path_arg(&venv.join("bin/python")),
                "-m".to_owned(),
                "pip".to_owned(),
            ];
            cmd.extend(rest.iter().cloned());
            cmd
        };
        let install = |requirements: &Path| {
            pip(&[
                "install".to_owned(),
                "--no-cache-dir".to_owned(),
                "-r".to_owned(),
                path_arg(&home.join(requirements)),
            ])
        };

        ctr.run(user, &install(&py.requirements)).await?;

        let overlay = cfg.overlay_requirements(session.deployment());
        if archive::head_contains(&session.repo.root, &overlay)? {
            ctr.run(user, &install(&overlay)).await?;
        } else {
            tracing::debug!(overlay = %overlay.display(), "no deployment requirements overlay");
        }

        if !py.strip.is_empty() {
            let mut uninstall = vec!["uninstall".to_owned(), "-y".to_owned()];
            uninstall.extend(py.strip.iter().cloned());
            ctr.run(user, &pip(&uninstall)).await?;
        }
        Ok(())
    }

    // ── TRIM ──

    /// Remove the installed subset of `packages`, then empty the trim paths.
    async fn trim(
        &self,
        session: &BuildSession<'a, E>,
        packages: &[String],
    ) -> Result<(), StageError> {
        let ctr = session.container()?;
        let cfg = &session.config;

        let listing = ctr.run_captured(ROOT, &cfg.packages.list_installed).await?;
        let removable = installed_subset(&listing, packages);
        if removable.is_empty() {
            tracing::debug!("no removable packages installed");
        } else {
            tracing::info!(packages = ?removable, "removing packages");
            let mut remove = cfg.packages.remove.clone();
            remove.extend(removable);
            ctr.run(ROOT, &remove).await?;
        }

        if let Some(autoremove) = cfg.packages.autoremove.as_ref().filter(|c| !c.is_empty()) {
            ctr.run(ROOT, autoremove).await?;
        }

        let paths = cfg.trim_paths();
        if !paths.is_empty() {
            let mut clear = vec![
                "sh".to_owned(),
                "-c".to_owned(),
                CLEAR_DIRS.to_owned(),
                "trim".to_owned(),
            ];
            clear.extend(paths.iter().map(|p| path_arg(p)));
            ctr.run(ROOT, &clear).await?;
        }
        Ok(())
    }

    // ── PACKAGE ──

    async fn package(
        &self,
        session: &mut BuildSession<'a, E>,
    ) -> Result<(String, Vec<ImageRef>), StageError> {
        let ctr = session.container()?;
        let cfg = &session.config;

        ctr.set_user(&cfg.image.app_user).await?;
        ctr.set_working_dir(&cfg.app_home()).await?;
        ctr.set_cmd(&format!(
            "{} {}",
            cfg.supervisor.command,
            cfg.service_root().display()
        ))
        .await?;

        let refs = session.naming.final_refs(
            &session.repo.version,
            session.date,
            session.repo.branch.as_deref(),
        );

        for reference in &refs {
            match self.buildah.remove_tag(reference).await {
                Ok(TagRemoval::Removed) => tracing::info!(image = %reference, "untagged previous image"),
                Ok(TagRemoval::Absent) => {}
                // arch-lint: allow(no-error-swallowing) reason="a tag that cannot be removed is overwritten by the single tag call below"
                Err(e) => tracing::warn!(
                    image = %reference,
                    error = %e,
                    "could not remove existing tag; treating it as absent"
                ),
            }
        }

        let container = session.detach().ok_or(StageError::NoContainer)?;
        let image_id = container.commit_and_remove().await?;
        self.buildah.tag(&image_id, &refs).await?;
        tracing::info!(id = %image_id, tags = refs.len(), "image committed and tagged");

        Ok((image_id, refs))
    }

    // ── Abort ──

    async fn discard(&self, session: &mut BuildSession<'a, E>) {
        if let Some(container) = session.detach() {
            let name = container.name().to_owned();
            match container.remove().await {
                Ok(()) => tracing::info!(container = %name, "working container removed"),
                Err(e) => {
                    tracing::warn!(container = %name, error = %e, "failed to remove working container")
                }
            }
        }
    }
}

/// Create `user` unless `/etc/passwd` already lists it.
async fn ensure_user<E: CommandExecutor>(
    ctr: &ContainerSession<'_, E>,
    add_user: &[String],
    user: &str,
) -> Result<(), StageError> {
    let passwd = ctr
        .run_captured(ROOT, &["cat".to_owned(), "/etc/passwd".to_owned()])
        .await?;
    if passwd_has_user(&passwd, user) {
        tracing::debug!(user, "user already exists");
        return Ok(());
    }

    let mut cmd = add_user.to_vec();
    cmd.push(user.to_owned());
    ctr.run(ROOT, &cmd).await?;
    tracing::info!(user, "user created");
    Ok(())
}

/// Swap the application home for the new payload, keeping the preserved
/// entries (same inode) across the swap.
async fn replace_home<E: CommandExecutor>(
    ctr: &ContainerSession<'_, E>,
    cfg: &BuildConfig,
    source: &Path,
    tree: &Path,
) -> Result<(), StageError> {
    let home = cfg.app_home();
    let user = cfg.image.app_user.as_str();
    let stash = PathBuf::from(STASH);
    let stashed = |i: usize| stash.join(i.to_string());

    ctr.run(ROOT, &["rm".to_owned(), "-rf".to_owned(), STASH.to_owned()])
        .await?;
    ctr.run(ROOT, &["mkdir".to_owned(), "-p".to_owned(), STASH.to_owned()])
        .await?;
    for (i, rel) in cfg.payload.preserve.iter().enumerate() {
        ctr.run(ROOT, &move_if_exists(&home.join(rel), &stashed(i)))
            .await?;
    }

    ctr.run(
        ROOT,
        &[
            "find".to_owned(),
            path_arg(&home),
            "-mindepth".to_owned(),
            "1".to_owned(),
            "-delete".to_owned(),
        ],
    )
    .await?;

    ctr.add(&path_arg(source), &home, Some(user)).await?;
    ctr.add(&path_arg(tree), &cfg.service_root(), Some(user))
        .await?;

    for (i, rel) in cfg.payload.preserve.iter().enumerate() {
        let target = home.join(rel);
        if let Some(parent) = target.parent().filter(|p| *p != home) {
            ctr.run(
                user,
                &["mkdir".to_owned(), "-p".to_owned(), path_arg(parent)],
            )
            .await?;
        }
        ctr.run(ROOT, &move_if_exists(&stashed(i), &target)).await?;
    }

    ctr.run(ROOT, &["rm".to_owned(), "-rf".to_owned(), STASH.to_owned()])
        .await?;
    tracing::info!(home = %home.display(), "application home replaced");
    Ok(())
}

/// Configured archive paths plus the templates directory when HEAD tracks
/// it. Services read their encrypted env files from there at run time
/// through `sops exec-env`.
fn archive_selection(
    root: &Path,
    cfg: &BuildConfig,
) -> Result<Vec<PathBuf>, archive::ArchiveError> {
    let mut paths = cfg.payload.archive_paths.clone();
    let templates = &cfg.manifest.templates_dir;
    // An empty selection already archives the whole tree
    if paths.is_empty() || paths.contains(templates) {
        return Ok(paths);
    }
    if archive::head_contains(root, templates)? {
        paths.push(templates.clone());
    }
    Ok(paths)
}

fn move_if_exists(from: &Path, to: &Path) -> Vec<String> {
    vec![
        "sh".to_owned(),
        "-c".to_owned(),
        MOVE_IF_EXISTS.to_owned(),
        "move".to_owned(),
        path_arg(from),
        path_arg(to),
    ]
}

fn passwd_has_user(passwd: &str, user: &str) -> bool {
    passwd
        .lines()
        .any(|line| line.split(':').next() == Some(user))
}

/// Entries of `wanted` that appear in a one-name-per-line package listing.
fn installed_subset(listing: &str, wanted: &[String]) -> Vec<String> {
    let installed: HashSet<&str> = listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    wanted
        .iter()
        .filter(|p| installed.contains(p.as_str()))
        .cloned()
        .collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
