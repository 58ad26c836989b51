//! Build metadata

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit SHA (short)
pub const GIT_SHA: &str = env!("VERGEN_GIT_SHA");

/// Commit timestamp, `unknown` for image builds without `.git`
pub const GIT_COMMIT_TIMESTAMP: &str = env!("VERGEN_GIT_COMMIT_TIMESTAMP");

/// Branch the binary was built from
pub const GIT_BRANCH: &str = env!("VERGEN_GIT_BRANCH");

/// Whether the working tree had uncommitted changes
pub const GIT_DIRTY: &str = env!("VERGEN_GIT_DIRTY");

/// rustc semver used for the build
pub const RUSTC_VERSION: &str = env!("VERGEN_RUSTC_SEMVER");

/// Build timestamp (RFC 3339)
pub const BUILD_TIMESTAMP: &str = env!("VERGEN_BUILD_TIMESTAMP");

/// Target triple, e.g. `x86_64-unknown-linux-musl`
pub const TARGET: &str = env!("VERGEN_CARGO_TARGET_TRIPLE");

/// Name reported to the Xelon API and used as the kube field manager.
pub const COMPONENT_NAME: &str = "xelon-cloud-controller-manager";

/// Returns `<version> (<git_sha>)`, with a ` dirty` marker for modified trees.
pub fn full_version() -> String {
    let dirty = if GIT_DIRTY == "true" { " dirty" } else { "" };
    format!("{VERSION} ({GIT_SHA}{dirty})")
}

/// User agent sent with every Xelon API request.
pub fn user_agent() -> String {
    format!("{COMPONENT_NAME}/{VERSION}")
}

/// Detailed build information for the `version` subcommand.
pub fn build_info() -> String {
    format!(
        "xelon-ccm {}\n\
         commit: {} ({})\n\
         branch: {}\n\
         built:  {}\n\
         rustc:  {}\n\
         target: {}",
        VERSION, GIT_SHA, GIT_COMMIT_TIMESTAMP, GIT_BRANCH, BUILD_TIMESTAMP, RUSTC_VERSION, TARGET
    )
}
