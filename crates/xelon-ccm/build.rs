use vergen_gitcl::{BuildBuilder, CargoBuilder, Emitter, GitclBuilder, RustcBuilder};

/// Git metadata injected by the image build when `.git` is not available.
const GIT_FALLBACKS: &[(&str, &str)] = &[
    ("VERGEN_GIT_SHA", "unknown"),
    ("VERGEN_GIT_BRANCH", "unknown"),
    ("VERGEN_GIT_COMMIT_TIMESTAMP", "unknown"),
    ("VERGEN_GIT_DIRTY", "false"),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let build = BuildBuilder::all_build()?;
    let cargo = CargoBuilder::all_cargo()?;
    let rustc = RustcBuilder::all_rustc()?;

    let mut emitter = Emitter::default();
    emitter
        .add_instructions(&build)?
        .add_instructions(&cargo)?
        .add_instructions(&rustc)?;

    match GitclBuilder::all_git() {
        Ok(git) => {
            emitter.add_instructions(&git)?;
        }
        Err(_) => {
            for (key, default) in GIT_FALLBACKS {
                let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
                println!("cargo::rustc-env={key}={value}");
            }
        }
    }

    emitter.emit()?;

    Ok(())
}
