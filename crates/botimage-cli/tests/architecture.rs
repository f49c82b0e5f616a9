use arch_lint::rules::{NoErrorSwallowing, NoSilentResultDrop};
use arch_lint::{Analyzer, Severity};
use std::path::Path;

/// Every buildah, sops and git failure has to reach a stage error or a
/// logged warning. Checks AL003 and AL013 over the library and binary
/// sources of all botimage crates; test code is exempt.
#[test]
fn command_failures_are_never_swallowed() {
    let crates_dir = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("crates directory");

    let analyzer = Analyzer::builder()
        .root(crates_dir)
        .exclude("**/target/**")
        .exclude("**/tests/**")
        .rule(NoErrorSwallowing::new())
        .rule(NoSilentResultDrop::new())
        .build()
        .expect("build analyzer");

    let result = analyzer.analyze().expect("analyze");

    if result.has_violations_at(Severity::Warning) {
        panic!("{}", result.format_test_report(Severity::Warning));
    }
}
