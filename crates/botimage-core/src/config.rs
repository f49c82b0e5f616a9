use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up at the repository root.
pub const CONFIG_FILE: &str = "botimage.toml";

/// botimage.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub packages: PackageConfig,
    #[serde(default)]
    pub jumpstart: JumpstartConfig,
    #[serde(default)]
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub payload: PayloadConfig,
    #[serde(default)]
    pub python: PythonConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub trim: TrimConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Application name, the first part of the image name
    #[serde(default = "default_app")]
    pub app: String,
    /// Distro label, the last part of the image name
    #[serde(default = "default_base_distro")]
    pub base_distro: String,
    /// Minimal OS image the jumpstart layer starts from
    #[serde(default = "default_base_image")]
    pub base_image: String,
    /// Registry path used when `-r` is not given
    #[serde(default = "default_registry")]
    pub default_registry: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Account that owns the payload and runs the services
    #[serde(default = "default_app")]
    pub app_user: String,
}

/// Distro package manager contract. Each command is a prefix; package
/// names are appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    #[serde(default = "default_upgrade_command")]
    pub upgrade: Vec<String>,
    #[serde(default = "default_install_command")]
    pub install: Vec<String>,
    #[serde(default = "default_remove_command")]
    pub remove: Vec<String>,
    /// Prints one installed package name per line
    #[serde(default = "default_list_installed_command")]
    pub list_installed: Vec<String>,
    /// Removes packages nothing depends on anymore
    #[serde(default)]
    pub autoremove: Option<Vec<String>>,
    /// Packages kept in the final image
    #[serde(default = "default_runtime_packages")]
    pub runtime: Vec<String>,
    /// Packages removed by the final trim
    #[serde(default = "default_build_packages")]
    pub build: Vec<String>,
    /// Packages only the helper toolchain needs, removed by the jumpstart trim
    #[serde(default = "default_helper_build_packages")]
    pub helper_build: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JumpstartConfig {
    /// Unprivileged account for building helper tools from source
    #[serde(default = "default_builder_user")]
    pub builder_user: String,
    /// `useradd`-style prefix; the user name is appended
    #[serde(default = "default_add_user_command")]
    pub add_user: Vec<String>,
    #[serde(default = "default_helper_steps")]
    pub helper_steps: Vec<CommandStep>,
    #[serde(default = "default_fonts")]
    pub fonts: Vec<RemoteAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Vars file holding the `svcs` list, `{deployment}` is substituted
    #[serde(default = "default_manifest_path")]
    pub path: String,
    /// Shared directory of encrypted templates
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadConfig {
    /// Repository paths archived at HEAD into the app user's home. The
    /// templates directory is added whenever HEAD tracks it.
    #[serde(default = "default_archive_paths")]
    pub archive_paths: Vec<PathBuf>,
    /// Compiled service tree location, relative to the app user's home
    #[serde(default = "default_service_dir")]
    pub service_dir: PathBuf,
    /// Home-relative directories that survive the home replacement
    #[serde(default = "default_preserve")]
    pub preserve: Vec<PathBuf>,
    /// Pinned syntax and theme files; `dest` is home-relative
    #[serde(default = "default_assets")]
    pub assets: Vec<RemoteAsset>,
    /// Run as the app user once the assets are in place
    #[serde(default = "default_cache_warm")]
    pub cache_warm: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PythonConfig {
    #[serde(default = "default_python_version")]
    pub version: String,
    /// pyenv root, relative to the app user's home
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,
    /// Virtual environment, relative to the app user's home
    #[serde(default = "default_venv_dir")]
    pub venv_dir: PathBuf,
    /// Pinned requirements, relative to the repository root
    #[serde(default = "default_requirements")]
    pub requirements: PathBuf,
    /// Optional per-deployment requirements, `{deployment}` is substituted
    #[serde(default = "default_overlay")]
    pub overlay: String,
    /// Installer-only packages removed after dependencies are installed
    #[serde(default = "default_strip")]
    pub strip: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Scans the service directory; the container's default command
    #[serde(default = "default_supervisor_command")]
    pub command: String,
    #[serde(default = "default_logger")]
    pub logger: String,
    #[serde(default = "default_logger_args")]
    pub logger_args: Vec<String>,
    /// Interpreter line of generated run scripts
    #[serde(default = "default_shell")]
    pub shell: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimConfig {
    /// Transient directories whose contents are deleted. Relative entries
    /// are resolved against the app user's home.
    #[serde(default = "default_trim_paths")]
    pub paths: Vec<PathBuf>,
}

/// A command run inside the container as `user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStep {
    pub user: String,
    pub command: Vec<String>,
}

/// A pinned file fetched by URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAsset {
    pub url: String,
    pub dest: PathBuf,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            app: default_app(),
            base_distro: default_base_distro(),
            base_image: default_base_image(),
            default_registry: default_registry(),
            timezone: default_timezone(),
            app_user: default_app(),
        }
    }
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            upgrade: default_upgrade_command(),
            install: default_install_command(),
            remove: default_remove_command(),
            list_installed: default_list_installed_command(),
            autoremove: None,
            runtime: default_runtime_packages(),
            build: default_build_packages(),
            helper_build: default_helper_build_packages(),
        }
    }
}

impl Default for JumpstartConfig {
    fn default() -> Self {
        Self {
            builder_user: default_builder_user(),
            add_user: default_add_user_command(),
            helper_steps: default_helper_steps(),
            fonts: default_fonts(),
        }
    }
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            path: default_manifest_path(),
            templates_dir: default_templates_dir(),
        }
    }
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            archive_paths: default_archive_paths(),
            service_dir: default_service_dir(),
            preserve: default_preserve(),
            assets: default_assets(),
            cache_warm: default_cache_warm(),
        }
    }
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            version: default_python_version(),
            runtime_dir: default_runtime_dir(),
            venv_dir: default_venv_dir(),
            requirements: default_requirements(),
            overlay: default_overlay(),
            strip: default_strip(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            command: default_supervisor_command(),
            logger: default_logger(),
            logger_args: default_logger_args(),
            shell: default_shell(),
        }
    }
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            paths: default_trim_paths(),
        }
    }
}

impl BuildConfig {
    /// Load from botimage.toml in the given directory, or return defaults if not found.
    pub fn load(repo_root: &Path) -> crate::Result<Self> {
        let config_path = repo_root.join(CONFIG_FILE);
        if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path,
                source: e,
            })
        } else {
            tracing::debug!(path = %config_path.display(), "no config file; using defaults");
            Ok(Self::default())
        }
    }

    /// `/home/<app_user>`
    pub fn app_home(&self) -> PathBuf {
        PathBuf::from("/home").join(&self.image.app_user)
    }

    /// Absolute path of the compiled service tree inside the image.
    pub fn service_root(&self) -> PathBuf {
        self.app_home().join(&self.payload.service_dir)
    }

    pub fn manifest_path(&self, deployment: &str) -> PathBuf {
        PathBuf::from(substitute(&self.manifest.path, deployment))
    }

    pub fn overlay_requirements(&self, deployment: &str) -> PathBuf {
        PathBuf::from(substitute(&self.python.overlay, deployment))
    }

    /// Trim paths with relative entries resolved against the app home.
    pub fn trim_paths(&self) -> Vec<PathBuf> {
        let home = self.app_home();
        self.trim
            .paths
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { home.join(p) })
            .collect()
    }
}

fn substitute(template: &str, deployment: &str) -> String {
    template.replace("{deployment}", deployment)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

fn default_app() -> String {
    "colorcodebot".to_owned()
}

fn default_base_distro() -> String {
    "alpine".to_owned()
}

fn default_base_image() -> String {
    "docker.io/library/alpine:3.20".to_owned()
}

fn default_registry() -> String {
    "quay.io/andykluger".to_owned()
}

fn default_timezone() -> String {
    "UTC".to_owned()
}

fn default_upgrade_command() -> Vec<String> {
    strings(&["apk", "upgrade", "--no-progress", "--update"])
}

fn default_install_command() -> Vec<String> {
    strings(&["apk", "add", "--no-progress"])
}

fn default_remove_command() -> Vec<String> {
    strings(&["apk", "del", "--no-progress"])
}

fn default_list_installed_command() -> Vec<String> {
    strings(&["apk", "info"])
}

fn default_runtime_packages() -> Vec<String> {
    strings(&[
        "bzip2",
        "ca-certificates",
        "fontconfig",
        "libffi",
        "openssl",
        "readline",
        "s6",
        "sops",
        "sqlite-libs",
        "tzdata",
        "xz",
        "zlib",
    ])
}

fn default_build_packages() -> Vec<String> {
    strings(&[
        "build-base",
        "bzip2-dev",
        "git",
        "libffi-dev",
        "linux-headers",
        "openssl-dev",
        "readline-dev",
        "sqlite-dev",
        "xz-dev",
        "zlib-dev",
    ])
}

fn default_helper_build_packages() -> Vec<String> {
    strings(&["cargo", "fontconfig-dev", "freetype-dev", "harfbuzz-dev", "libxcb-dev"])
}

fn default_builder_user() -> String {
    "builder".to_owned()
}

fn default_add_user_command() -> Vec<String> {
    strings(&["adduser", "-D", "-s", "/bin/sh"])
}

fn default_helper_steps() -> Vec<CommandStep> {
    vec![
        CommandStep {
            user: default_builder_user(),
            command: strings(&[
                "cargo",
                "install",
                "--locked",
                "--root",
                "/home/builder/tools",
                "silicon",
            ]),
        },
        CommandStep {
            user: "root".to_owned(),
            command: strings(&[
                "install",
                "-m",
                "755",
                "/home/builder/tools/bin/silicon",
                "/usr/local/bin/silicon",
            ]),
        },
        CommandStep {
            user: default_app(),
            command: strings(&[
                "git",
                "clone",
                "--depth",
                "1",
                "https://github.com/pyenv/pyenv",
                "/home/colorcodebot/.pyenv",
            ]),
        },
    ]
}

fn default_fonts() -> Vec<RemoteAsset> {
    vec![RemoteAsset {
        url: "https://github.com/be5invis/Iosevka/releases/download/v31.9.1/PkgTTC-Iosevka-31.9.1.zip"
            .to_owned(),
        dest: PathBuf::from("/usr/share/fonts/iosevka/iosevka.zip"),
    }]
}

fn default_manifest_path() -> String {
    "vars.{deployment}.yml".to_owned()
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("sops")
}

fn default_archive_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("app")]
}

fn default_service_dir() -> PathBuf {
    PathBuf::from("svcs")
}

fn default_preserve() -> Vec<PathBuf> {
    vec![default_runtime_dir(), default_venv_dir()]
}

fn default_assets() -> Vec<RemoteAsset> {
    vec![RemoteAsset {
        url: "https://raw.githubusercontent.com/dracula/sublime/master/Dracula.tmTheme"
            .to_owned(),
        dest: PathBuf::from(".config/silicon/themes/Dracula.tmTheme"),
    }]
}

fn default_cache_warm() -> Option<Vec<String>> {
    Some(strings(&["silicon", "--build-cache"]))
}

fn default_python_version() -> String {
    "3.12.7".to_owned()
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from(".pyenv")
}

fn default_venv_dir() -> PathBuf {
    PathBuf::from("venv")
}

fn default_requirements() -> PathBuf {
    PathBuf::from("app/requirements.txt")
}

fn default_overlay() -> String {
    "app/requirements.{deployment}.txt".to_owned()
}

fn default_strip() -> Vec<String> {
    strings(&["pip", "setuptools", "wheel"])
}

fn default_supervisor_command() -> String {
    "s6-svscan".to_owned()
}

fn default_logger() -> String {
    "s6-log".to_owned()
}

fn default_logger_args() -> Vec<String> {
    strings(&["T"])
}

fn default_shell() -> String {
    "/bin/sh".to_owned()
}

fn default_trim_paths() -> Vec<PathBuf> {
    ["/root/.cache", "/home/builder", "/var/cache/apk", "/tmp", ".cache"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}
