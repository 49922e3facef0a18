use std::path::Path;
use std::process::Command;

/// Version suffix shown by `duebell --version`.
///
/// Packagers building from a tarball set DUEBELL_BUILD_SHA themselves;
/// otherwise it comes from `git describe` on the workspace checkout.
fn build_sha(workspace: &Path) -> String {
    if let Ok(sha) = std::env::var("DUEBELL_BUILD_SHA") {
        if !sha.trim().is_empty() {
            return sha.trim().to_string();
        }
    }

    let describe = Command::new("git")
        .arg("-C")
        .arg(workspace)
        .args(["describe", "--always", "--dirty", "--abbrev=10"])
        .output();
    match describe {
        Ok(out) if out.status.success() => {
            let sha = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if sha.is_empty() { "unknown".to_string() } else { sha }
        }
        _ => "unknown".to_string(),
    }
}

fn main() {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let workspace = Path::new(&manifest_dir).join("..");

    println!("cargo:rustc-env=DUEBELL_BUILD_SHA={}", build_sha(&workspace));
    println!("cargo:rerun-if-env-changed=DUEBELL_BUILD_SHA");
    println!("cargo:rerun-if-changed={}", workspace.join(".git/HEAD").display());
}
