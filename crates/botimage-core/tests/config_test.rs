use botimage_core::BuildConfig;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn load_returns_defaults_when_no_config_file() {
    let tmp = TempDir::new().unwrap();
    let config = BuildConfig::load(tmp.path()).unwrap();

    assert_eq!(config.image.app, "colorcodebot");
    assert_eq!(config.image.base_distro, "alpine");
    assert_eq!(config.image.default_registry, "quay.io/andykluger");
    assert_eq!(config.image.app_user, "colorcodebot");
    assert_eq!(config.jumpstart.builder_user, "builder");
    assert_eq!(config.manifest.path, "vars.{deployment}.yml");
    assert_eq!(config.manifest.templates_dir, PathBuf::from("sops"));
    assert_eq!(config.supervisor.command, "s6-svscan");
    assert_eq!(config.python.strip, vec!["pip", "setuptools", "wheel"]);
    assert!(config.packages.autoremove.is_none());
}

#[test]
fn load_parses_partial_config() {
    let tmp = TempDir::new().unwrap();
    let toml = r#"
[image]
app = "pastebot"
base_distro = "debian"
base_image = "docker.io/library/debian:bookworm-slim"

[packages]
install = ["apt-get", "install", "-y"]
autoremove = ["apt-get", "autoremove", "-y"]
build = ["gcc"]

[[jumpstart.helper_steps]]
user = "builder"
command = ["make", "install"]

[payload]
preserve = ["venv"]
cache_warm = []

[trim]
paths = ["/var/lib/apt/lists", ".cache"]
"#;
    std::fs::write(tmp.path().join("botimage.toml"), toml).unwrap();

    let config = BuildConfig::load(tmp.path()).unwrap();

    assert_eq!(config.image.app, "pastebot");
    assert_eq!(config.image.base_distro, "debian");
    // Untouched fields keep their defaults
    assert_eq!(config.image.timezone, "UTC");
    assert_eq!(config.packages.install, vec!["apt-get", "install", "-y"]);
    assert_eq!(
        config.packages.autoremove.as_deref(),
        Some(&["apt-get".to_owned(), "autoremove".to_owned(), "-y".to_owned()][..])
    );
    assert_eq!(config.packages.build, vec!["gcc"]);
    assert_eq!(config.jumpstart.helper_steps.len(), 1);
    assert_eq!(config.jumpstart.helper_steps[0].command, vec!["make", "install"]);
    assert_eq!(config.payload.preserve, vec![PathBuf::from("venv")]);
    assert_eq!(config.payload.cache_warm.as_deref(), Some(&[][..]));
}

#[test]
fn load_rejects_malformed_toml() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("botimage.toml"), "[image\napp = 1").unwrap();

    let err = BuildConfig::load(tmp.path()).unwrap_err();
    assert!(err.to_string().contains("failed to parse config"), "got: {err}");
}

#[test]
fn derived_paths_follow_app_user() {
    let mut config = BuildConfig::default();
    config.image.app_user = "bot".to_owned();

    assert_eq!(config.app_home(), Path::new("/home/bot"));
    assert_eq!(config.service_root(), Path::new("/home/bot/svcs"));
}

#[test]
fn deployment_placeholders_are_substituted() {
    let config = BuildConfig::default();

    assert_eq!(config.manifest_path("prod"), Path::new("vars.prod.yml"));
    assert_eq!(
        config.overlay_requirements("prod"),
        Path::new("app/requirements.prod.txt")
    );
}

#[test]
fn trim_paths_resolve_relative_entries_against_home() {
    let config = BuildConfig::default();
    let paths = config.trim_paths();

    assert!(paths.contains(&PathBuf::from("/home/colorcodebot/.cache")));
    assert!(paths.contains(&PathBuf::from("/var/cache/apk")));
    assert!(paths.iter().all(|p| p.is_absolute()));
}
