//! Lab filesystem packaging.
//!
//! The lab root is archived as a gzip-compressed tarball whose root is the lab
//! directory itself, base64-encoded, and published as the ConfigMap
//! `<namespace>-lab-files` under the key `hostlab.b64`. Every machine mounts it
//! at `/tmp/kathara` and unpacks it from its bootstrap script.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use tracing::{debug, info, instrument};

use crate::error::{MegalosError, Result};
use crate::naming::lab_files_name;
use crate::resources::{ConfigMap, ObjectMeta};
use crate::traits::{with_timeout, ClusterApi};

/// ConfigMap key holding the encoded archive.
pub const LAB_ARCHIVE_KEY: &str = "hostlab.b64";

/// Archive the directory tree rooted at `lab_root`.
///
/// Entry paths are relative to the lab root (`./r1/etc/...`), never absolute.
pub fn package(lab_root: &Path) -> Result<Vec<u8>> {
    if !lab_root.is_dir() {
        return Err(MegalosError::InvalidConfig(format!(
            "lab root {} is not a directory",
            lab_root.display()
        )));
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", lab_root)?;

    let mut encoder = builder.into_inner()?;
    encoder.flush()?;
    let archive = encoder.finish()?;

    debug!(path = %lab_root.display(), bytes = archive.len(), "Lab archive built");
    Ok(archive)
}

/// Extract an archive produced by [`package`] into `dest`.
pub fn unpack(archive: &[u8], dest: &Path) -> Result<()> {
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    tar.unpack(dest)?;
    Ok(())
}

/// Text form of the archive as stored in the ConfigMap.
pub fn encode(archive: &[u8]) -> String {
    STANDARD.encode(archive)
}

/// Inverse of [`encode`].
pub fn decode(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| MegalosError::Internal(format!("invalid lab archive encoding: {}", e)))
}

/// Build the lab-files ConfigMap, failing if it would exceed `limit` bytes.
pub fn build_config_map(namespace: &str, archive: &[u8], limit: usize) -> Result<ConfigMap> {
    let metadata = ObjectMeta::new(lab_files_name(namespace))
        .with_namespace(namespace)
        .with_zero_grace_period();
    let config_map = ConfigMap::new(metadata).with_data(LAB_ARCHIVE_KEY, encode(archive));

    // Keys count toward the object size as well as values.
    let size = config_map.payload_len();
    if size > limit {
        return Err(MegalosError::PayloadTooLarge { size, limit });
    }
    Ok(config_map)
}

/// Publishes lab archives as namespace-scoped blob resources.
pub struct FilesystemPackager {
    api: Arc<dyn ClusterApi>,
    timeout: Duration,
    max_blob_bytes: usize,
}

impl FilesystemPackager {
    pub fn new(api: Arc<dyn ClusterApi>, timeout: Duration, max_blob_bytes: usize) -> Self {
        Self {
            api,
            timeout,
            max_blob_bytes,
        }
    }

    /// Create (or replace) `<namespace>-lab-files` with the encoded archive.
    ///
    /// Oversized archives are rejected before any API call is made.
    #[instrument(skip(self, archive), fields(namespace = %namespace, archive_bytes = archive.len()))]
    pub async fn publish(&self, namespace: &str, archive: &[u8]) -> Result<String> {
        let caps = with_timeout("capabilities", self.timeout, self.api.capabilities()).await?;
        let limit = self.max_blob_bytes.min(caps.max_object_bytes);
        let config_map = build_config_map(namespace, archive, limit)?;
        let name = config_map.metadata.name.clone();

        match with_timeout(
            "create configmap",
            self.timeout,
            self.api.create_config_map(namespace, &config_map),
        )
        .await
        {
            Ok(()) => info!(name = %name, "Lab files published"),
            Err(e) if e.is_already_exists() => {
                with_timeout(
                    "replace configmap",
                    self.timeout,
                    self.api.replace_config_map(namespace, &config_map),
                )
                .await?;
                info!(name = %name, "Lab files replaced");
            }
            Err(e) => return Err(e),
        }

        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use crate::resources::Namespace;
    use std::fs;

    fn sample_lab() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("r1/etc/quagga")).unwrap();
        fs::write(dir.path().join("r1/etc/quagga/zebra.conf"), "hostname r1\n").unwrap();
        fs::write(dir.path().join("r1.startup"), "ip addr add 10.0.0.1/24 dev eth0\n").unwrap();
        fs::write(dir.path().join("lab.conf"), "r1[0]=A\n").unwrap();
        dir
    }

    #[test]
    fn test_package_round_trip() {
        let lab = sample_lab();
        let archive = package(lab.path()).unwrap();

        let out = tempfile::tempdir().unwrap();
        unpack(&archive, out.path()).unwrap();

        for rel in ["r1/etc/quagga/zebra.conf", "r1.startup", "lab.conf"] {
            assert_eq!(
                fs::read(lab.path().join(rel)).unwrap(),
                fs::read(out.path().join(rel)).unwrap(),
                "{} differs after round trip",
                rel
            );
        }
    }

    #[test]
    fn test_archive_paths_are_relative() {
        let lab = sample_lab();
        let archive = package(lab.path()).unwrap();

        let mut tar = tar::Archive::new(GzDecoder::new(&archive[..]));
        for entry in tar.entries().unwrap() {
            let entry = entry.unwrap();
            let path = entry.path().unwrap().into_owned();
            assert!(!path.is_absolute(), "{} is absolute", path.display());
        }
    }

    #[test]
    fn test_package_rejects_missing_root() {
        let err = package(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, MegalosError::InvalidConfig(_)));
    }

    #[test]
    fn test_build_config_map() {
        let cm = build_config_map("abc", b"archive", 1024).unwrap();
        assert_eq!(cm.metadata.name, "abc-lab-files");
        assert_eq!(cm.metadata.deletion_grace_period_seconds, Some(0));
        assert_eq!(decode(&cm.data[LAB_ARCHIVE_KEY]).unwrap(), b"archive");
    }

    #[test]
    fn test_build_config_map_too_large() {
        let err = build_config_map("abc", &[0u8; 300], 100).unwrap_err();
        assert!(matches!(err, MegalosError::PayloadTooLarge { limit: 100, .. }));
    }

    #[test]
    fn test_build_config_map_counts_key() {
        let archive = [1u8; 48];
        let encoded_len = encode(&archive).len();

        let err = build_config_map("abc", &archive, encoded_len).unwrap_err();
        assert!(matches!(
            err,
            MegalosError::PayloadTooLarge { size, limit }
                if size == encoded_len + LAB_ARCHIVE_KEY.len() && limit == encoded_len
        ));

        let cm = build_config_map("abc", &archive, encoded_len + LAB_ARCHIVE_KEY.len()).unwrap();
        assert_eq!(cm.payload_len(), encoded_len + LAB_ARCHIVE_KEY.len());
    }

    #[tokio::test]
    async fn test_publish_rejects_archive_at_backend_ceiling() {
        let archive = [1u8; 48];
        let backend = Arc::new(MockBackend::new().with_max_object_bytes(encode(&archive).len()));
        backend
            .create_namespace(&Namespace::new(ObjectMeta::new("abc")))
            .await
            .unwrap();
        let packager = FilesystemPackager::new(backend.clone(), Duration::from_secs(5), 1024);

        let err = packager.publish("abc", &archive).await.unwrap_err();
        assert!(matches!(err, MegalosError::PayloadTooLarge { .. }));
        assert!(backend
            .journal()
            .iter()
            .all(|call| call.kind != "ConfigMap"));
    }

    #[tokio::test]
    async fn test_publish_is_idempotent() {
        let backend = Arc::new(MockBackend::new());
        backend
            .create_namespace(&Namespace::new(ObjectMeta::new("abc")))
            .await
            .unwrap();
        let packager = FilesystemPackager::new(backend.clone(), Duration::from_secs(5), 1024);

        packager.publish("abc", b"first").await.unwrap();
        let name = packager.publish("abc", b"second").await.unwrap();

        let cm = backend.config_map("abc", &name).unwrap();
        assert_eq!(decode(&cm.data[LAB_ARCHIVE_KEY]).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_publish_fails_fast_when_too_large() {
        let backend = Arc::new(MockBackend::new().with_max_object_bytes(16));
        backend
            .create_namespace(&Namespace::new(ObjectMeta::new("abc")))
            .await
            .unwrap();
        let packager = FilesystemPackager::new(backend.clone(), Duration::from_secs(5), 1024);

        let err = packager.publish("abc", &[7u8; 64]).await.unwrap_err();
        assert!(matches!(err, MegalosError::PayloadTooLarge { limit: 16, .. }));
        assert!(backend
            .journal()
            .iter()
            .all(|call| call.kind != "ConfigMap"));
    }
}
