//! Derivation of the local output path from an artifact key.
//!
//! Artifact file names follow `<app-name>-<contenthash>.zip`. Dropping the hash
//! segment gives a path that is stable across versions, which is how a new
//! version replaces the previous one without a separate registry.

use crate::core::types::{DeploymentTarget, PointerDocument};

const ARCHIVE_EXTENSION: &str = ".zip";

/// Return the file-name portion of an object key (text after the last `/`).
pub fn zip_file_name(key: &str) -> Result<&str, String> {
    let name = key.rsplit('/').next().unwrap_or(key);
    if name.trim().is_empty() {
        return Err(format!("artifact key '{key}' has no file name"));
    }
    Ok(name)
}

/// Strip `.zip` and the trailing `-<hash>` segment from an artifact file name.
///
/// `foo-bar-deadbeef.zip` becomes `foo-bar`. A name without a `-` separator
/// derives an empty path, which is rejected rather than staged.
pub fn derive_output_path(file_name: &str) -> Result<String, String> {
    let stem = file_name
        .strip_suffix(ARCHIVE_EXTENSION)
        .unwrap_or(file_name);
    let segments: Vec<&str> = stem.split('-').collect();
    let kept = &segments[..segments.len() - 1];
    let output = kept.join("-");

    if output.is_empty() {
        return Err(format!(
            "artifact '{file_name}' does not encode <app-name>-<hash>"
        ));
    }
    if output == "." || output == ".." {
        return Err(format!(
            "artifact '{file_name}' derives unsafe output path '{output}'"
        ));
    }
    Ok(output)
}

/// Build the full deployment target for a parsed pointer.
pub fn deployment_target(pointer: &PointerDocument) -> Result<DeploymentTarget, String> {
    let name = zip_file_name(&pointer.key)?;
    let output_path = derive_output_path(name)?;
    Ok(DeploymentTarget {
        artifact: pointer.artifact(),
        zip_file_name: name.to_string(),
        output_path,
    })
}
