//! Pointer resolution: fetch the pointer object and derive the deployment target.

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::target::deployment_target;
use crate::core::types::{DeploymentTarget, ObjectLocation, PointerDocument};
use crate::error::DeployError;
use crate::io::report::Reporter;
use crate::io::storage::StorageClient;

const POINTER_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/pointer/v1.schema.json"
));

/// Pointer schema, compiled on first use.
static POINTER_VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(POINTER_SCHEMA).map_err(|e| format!("parse pointer schema: {e}"))?;
    validator_for(&schema).map_err(|e| format!("invalid pointer schema: {e}"))
});

/// Fetch the pointer at `pointer` and compute where its artifact unpacks to.
///
/// Empty coordinates fail with [`DeployError::Configuration`] before any
/// storage call. Fetch and parse failures are not retried here.
#[instrument(skip_all, fields(pointer = %pointer))]
pub fn resolve_pointer<S, R>(
    storage: &S,
    reporter: &R,
    pointer: &ObjectLocation,
) -> Result<DeploymentTarget, DeployError>
where
    S: StorageClient + ?Sized,
    R: Reporter + ?Sized,
{
    if pointer.bucket.trim().is_empty() {
        return Err(DeployError::Configuration(
            "pointer bucket is not configured".to_string(),
        ));
    }
    if pointer.key.trim().is_empty() {
        return Err(DeployError::Configuration(
            "pointer key is not configured".to_string(),
        ));
    }

    reporter.info(&format!("fetching pointer {pointer}"));
    let body = storage
        .fetch_object(pointer)
        .map_err(|source| DeployError::PointerFetch {
            location: pointer.clone(),
            source,
        })?;

    let document = parse_pointer(&body).map_err(|err| DeployError::PointerParse {
        location: pointer.clone(),
        reason: format!("{err:#}"),
    })?;
    let target = deployment_target(&document).map_err(|reason| DeployError::PointerParse {
        location: pointer.clone(),
        reason,
    })?;

    debug!(artifact = %target.artifact, output_path = %target.output_path, "pointer resolved");
    reporter.info(&format!(
        "pointer resolved: artifact {} -> {}",
        target.artifact, target.output_path
    ));
    Ok(target)
}

/// Parse and validate a pointer body: UTF-8, JSON, schema conformance.
pub fn parse_pointer(body: &[u8]) -> Result<PointerDocument> {
    let text = std::str::from_utf8(body).map_err(|e| anyhow!("pointer is not UTF-8: {e}"))?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| anyhow!("pointer is not valid JSON: {e}"))?;
    validate_schema(&value)?;
    let document: PointerDocument =
        serde_json::from_value(value).map_err(|e| anyhow!("deserialize pointer: {e}"))?;
    Ok(document)
}

fn validate_schema(pointer: &Value) -> Result<()> {
    let compiled = POINTER_VALIDATOR.as_ref().map_err(|e| anyhow!("{e}"))?;
    if !compiled.is_valid(pointer) {
        let messages = compiled
            .iter_errors(pointer)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        warn!(errors = messages.len(), "pointer failed schema validation");
        return Err(anyhow!(
            "pointer schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryStorage, RecordingReporter};

    fn pointer() -> ObjectLocation {
        ObjectLocation::new("deploys", "myapp/latest.json")
    }

    #[test]
    fn resolves_output_path_from_artifact_key() {
        let storage = MemoryStorage::new().with_object(
            &pointer(),
            br#"{"bucket":"artifacts","key":"releases/myapp-ab12cd34.zip","published":"2024-05-01"}"#,
        );
        let reporter = RecordingReporter::new();

        let target = resolve_pointer(&storage, &reporter, &pointer()).expect("resolve");
        assert_eq!(
            target.artifact,
            ObjectLocation::new("artifacts", "releases/myapp-ab12cd34.zip")
        );
        assert_eq!(target.zip_file_name, "myapp-ab12cd34.zip");
        assert_eq!(target.output_path, "myapp");
        assert_eq!(storage.fetch_calls(), 1);
        assert!(reporter.contains("fetching pointer deploys/myapp/latest.json"));
    }

    #[test]
    fn empty_bucket_fails_without_storage_call() {
        let storage = MemoryStorage::new();
        let reporter = RecordingReporter::new();

        let err =
            resolve_pointer(&storage, &reporter, &ObjectLocation::new("", "k.json")).unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
        assert_eq!(storage.fetch_calls(), 0);
        assert_eq!(storage.download_calls(), 0);
    }

    #[test]
    fn blank_key_fails_without_storage_call() {
        let storage = MemoryStorage::new();
        let reporter = RecordingReporter::new();

        let err = resolve_pointer(&storage, &reporter, &ObjectLocation::new("b", "  ")).unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
        assert_eq!(storage.fetch_calls(), 0);
    }

    #[test]
    fn missing_pointer_is_fetch_error() {
        let storage = MemoryStorage::new();
        let reporter = RecordingReporter::new();

        let err = resolve_pointer(&storage, &reporter, &pointer()).unwrap_err();
        assert!(matches!(err, DeployError::PointerFetch { .. }));
        assert_eq!(storage.fetch_calls(), 1);
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let storage = MemoryStorage::new().with_object(&pointer(), b"{not json");
        let reporter = RecordingReporter::new();

        let err = resolve_pointer(&storage, &reporter, &pointer()).unwrap_err();
        match err {
            DeployError::PointerParse { reason, .. } => assert!(reason.contains("not valid JSON")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_key_field_is_parse_error() {
        let storage = MemoryStorage::new().with_object(&pointer(), br#"{"bucket":"artifacts"}"#);
        let reporter = RecordingReporter::new();

        let err = resolve_pointer(&storage, &reporter, &pointer()).unwrap_err();
        match err {
            DeployError::PointerParse { reason, .. } => {
                assert!(reason.contains("schema validation failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn artifact_without_hash_segment_is_parse_error() {
        let storage = MemoryStorage::new()
            .with_object(&pointer(), br#"{"bucket":"artifacts","key":"releases/myapp.zip"}"#);
        let reporter = RecordingReporter::new();

        let err = resolve_pointer(&storage, &reporter, &pointer()).unwrap_err();
        assert!(matches!(err, DeployError::PointerParse { .. }));
    }

    #[test]
    fn pointer_schema_compiles_once_and_is_reused() {
        assert!(POINTER_VALIDATOR.is_ok());
        let first: *const Validator = POINTER_VALIDATOR.as_ref().expect("schema");
        for _ in 0..3 {
            parse_pointer(br#"{"bucket":"b","key":"app-1.zip"}"#).expect("parse");
        }
        let second: *const Validator = POINTER_VALIDATOR.as_ref().expect("schema");
        assert_eq!(first, second);
    }

    #[test]
    fn parse_pointer_rejects_non_utf8() {
        let err = parse_pointer(&[0xff, 0xfe]).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }
}
