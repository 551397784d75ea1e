//! List discovered mutants without running any tests.

use std::fs;
use std::io::Write;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;

use crate::mutant::discard_identity_sites;
use crate::visit::discover;
use crate::Result;

pub fn list_mutants<W: Write>(
    out: &mut W,
    package: &Utf8Path,
    files: &[Utf8PathBuf],
    emit_json: bool,
    show_diff: bool,
) -> Result<()> {
    let mut entries = Vec::new();
    for file in files {
        let full = package.join(file);
        let code =
            fs::read_to_string(&full).with_context(|| format!("read source file {full}"))?;
        let sites = discard_identity_sites(discover(&code, file.as_str())?);
        entries.push((file, code, sites));
    }
    if emit_json {
        let value: Vec<serde_json::Value> = entries
            .iter()
            .map(|(file, _, sites)| json!({ "sourceFile": file, "sites": sites }))
            .collect();
        serde_json::to_writer_pretty(&mut *out, &value).context("write mutant list as json")?;
        writeln!(out)?;
    } else {
        for (file, code, sites) in &entries {
            for site in sites {
                writeln!(out, "{}", site.to_styled_string(file.as_str()))?;
                if show_diff {
                    writeln!(out, "{}", site.diff(file.as_str(), code))?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::fs::{create_dir_all, write};

    use super::*;

    fn fixture() -> (tempfile::TempDir, Utf8PathBuf, Vec<Utf8PathBuf>) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        create_dir_all(root.join("Sources/App")).unwrap();
        write(root.join("Sources/App/Math.swift"), "let x = a + b\n").unwrap();
        (dir, root, vec!["Sources/App/Math.swift".into()])
    }

    #[test]
    fn text_listing_shows_location_and_change() {
        let (_dir, root, files) = fixture();
        let mut out = Vec::new();
        list_mutants(&mut out, &root, &files, false, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Sources/App/Math.swift:1:11:"));
        assert!(text.contains("replace + with -"));
    }

    #[test]
    fn json_listing_round_trips() {
        let (_dir, root, files) = fixture();
        let mut out = Vec::new();
        list_mutants(&mut out, &root, &files, true, false).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value[0]["sourceFile"], "Sources/App/Math.swift");
        assert_eq!(value[0]["sites"][0]["mutationOperator"], "arithmetic");
        assert_eq!(value[0]["sites"][0]["originalText"], "+");
    }

    #[test]
    fn diff_listing_includes_both_versions() {
        let (_dir, root, files) = fixture();
        let mut out = Vec::new();
        list_mutants(&mut out, &root, &files, false, true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("-let x = a + b"));
        assert!(text.contains("+let x = a - b"));
    }
}
