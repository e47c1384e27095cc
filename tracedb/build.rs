use grev::git_revision_auto;

fn main() {
    // Shown by `tracedb --version`.
    let revision = git_revision_auto(".")
        .ok()
        .flatten()
        .unwrap_or_else(|| String::from("unknown"));
    println!("cargo:rustc-env=GIT_REVISION={revision}");
}
