use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "MIGRATOR_";

fn source_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            source_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
    Ok(())
}

/// `MIGRATOR_*` tokens: maximal runs of `[A-Z0-9_]` carrying the prefix.
fn env_keys(source: &str) -> impl Iterator<Item = &str> {
    source
        .split(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
        .filter(|token| token.len() > ENV_PREFIX.len() && token.starts_with(ENV_PREFIX))
}

fn main() -> io::Result<()> {
    let mut files = Vec::new();
    source_files(Path::new("src"), &mut files)?;
    files.sort();

    // The build id is a digest of the sources, so a lock written by a
    // different build of the binary is recognizable.
    let mut digest = Sha256::new();
    digest.update(env::var("CARGO_PKG_VERSION").unwrap_or_default());
    let mut keys = BTreeSet::new();
    for file in &files {
        let content = fs::read_to_string(file)?;
        digest.update(file.to_string_lossy().as_bytes());
        digest.update(content.as_bytes());
        keys.extend(env_keys(&content).map(str::to_string));
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR is not set"))?;
    let mut out = fs::File::create(out_dir.join("migrator_env_allowlist.rs"))?;
    writeln!(out, "pub const GENERATED_ENV_ALLOWLIST: &[&str] = &[")?;
    for key in &keys {
        writeln!(out, "    {key:?},")?;
    }
    writeln!(out, "];")?;

    let build_id = digest
        .finalize()
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    println!("cargo:rustc-env=BUILD_UUID={build_id}");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
    Ok(())
}
