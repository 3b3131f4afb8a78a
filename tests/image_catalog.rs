//! Image catalog integration tests
//!
//! Uploads go through the real `ArtifactStore` against the in-memory
//! storage host, with local files in a temp directory.

use std::fs;
use std::path::PathBuf;

use lava_ctl::artifact::{ArtifactStore, StoreError, METADATA_FILE};
use lava_ctl::mock::{FailureConfig, MemoryRemote, RemoteOp};
use lava_ctl::pipeline::{upload_image, ImageFiles};
use tempfile::TempDir;

const DOWNLOAD_BASE: &str = "http://lava.local:80/lava-files";
const STORAGE_ROOT: &str = "/data/lava-ftp";

fn store() -> (ArtifactStore<MemoryRemote>, MemoryRemote) {
    let remote = MemoryRemote::new();
    (ArtifactStore::new(remote.clone(), DOWNLOAD_BASE, STORAGE_ROOT), remote)
}

fn local_file(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_pair_upload_registers_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = local_file(&dir, "bzImage", b"kernel bytes");
    let rootfs = local_file(&dir, "core.ext4", b"rootfs bytes");

    let (mut store, remote) = store();
    let metadata = store
        .upload_image_pair("core-2024", &kernel, &rootfs, "qemux86-64")
        .unwrap();

    assert_eq!(metadata.device, "qemux86-64");
    assert_eq!(
        metadata.kernel.as_deref(),
        Some("file:///data/lava-ftp/core-2024/bzImage")
    );
    assert_eq!(
        metadata.rootfs.as_deref(),
        Some("file:///data/lava-ftp/core-2024/core.ext4.gz")
    );
    assert!(metadata.compressed);
    assert_eq!(metadata.checksums.len(), 2);
    assert_eq!(
        remote.puts(),
        vec!["core-2024/bzImage".to_string(), "core-2024/core.ext4.gz".to_string()]
    );
    assert!(remote.file(&format!("core-2024/{}", METADATA_FILE)).is_some());

    assert_eq!(store.list_catalog().unwrap(), vec!["core-2024".to_string()]);
    assert_eq!(store.get_metadata("core-2024").unwrap(), metadata);
}

#[test]
fn test_single_image_upload_keeps_patch_uncompressed() {
    let dir = tempfile::tempdir().unwrap();
    let image = local_file(&dir, "disk.wic", b"disk");
    let patch = local_file(&dir, "patch.sh", b"#!/bin/sh\n");

    let (mut store, remote) = store();
    let metadata = store
        .upload_image_single("iot", &image, &patch, "iot2000")
        .unwrap();

    assert_eq!(metadata.image.as_deref(), Some("file:///data/lava-ftp/iot/disk.wic.gz"));
    assert_eq!(metadata.patch.as_deref(), Some("file:///data/lava-ftp/iot/patch.sh"));
    assert!(metadata.kernel.is_none());
    assert_eq!(remote.file("iot/patch.sh").unwrap(), b"#!/bin/sh\n");

    let request = metadata.to_request().unwrap();
    assert_eq!(request.device(), "iot2000");
}

#[test]
fn test_catalog_skips_directories_without_metadata() {
    let (mut store, remote) = store();
    remote.insert_file("b-image/img-meta.yaml", b"device: qemux86\nkernel: k\nrootfs: r\n");
    remote.insert_file("a-image/img-meta.yaml", b"device: qemux86\nkernel: k\nrootfs: r\n");
    remote.insert_file("scratch/notes.txt", b"");
    remote.insert_file("loose.txt", b"");

    assert_eq!(
        store.list_catalog().unwrap(),
        vec!["a-image".to_string(), "b-image".to_string()]
    );
}

#[test]
fn test_empty_catalog() {
    let (mut store, _) = store();
    assert!(store.list_catalog().unwrap().is_empty());
}

#[test]
fn test_unknown_image_is_not_found() {
    let (mut store, _) = store();
    assert!(matches!(store.get_metadata("nope"), Err(StoreError::NotFound(name)) if name == "nope"));
}

#[test]
fn test_partial_upload_registers_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = local_file(&dir, "bzImage", b"kernel");
    let rootfs = local_file(&dir, "core.ext4", b"rootfs");

    let (mut store, remote) = store();
    // The kernel goes through, the rootfs upload drops the connection
    remote.fail(RemoteOp::Put, FailureConfig::disconnect("connection reset").after(1));

    let err = store
        .upload_image_pair("broken", &kernel, &rootfs, "qemux86")
        .unwrap_err();
    assert!(matches!(err, StoreError::Connection(_)));
    assert!(remote.file(&format!("broken/{}", METADATA_FILE)).is_none());
    assert!(matches!(store.get_metadata("broken"), Err(StoreError::NotFound(_))));
    assert!(store.list_catalog().unwrap().is_empty());
}

#[test]
fn test_missing_local_file_uploads_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = local_file(&dir, "bzImage", b"kernel");

    let (mut store, remote) = store();
    let err = store
        .upload_image_pair("core", &kernel, &dir.path().join("missing.ext4"), "qemux86")
        .unwrap_err();
    assert!(matches!(err, StoreError::MissingLocalFile(_)));
    assert!(remote.puts().is_empty());
}

#[test]
fn test_upload_image_flow_uses_given_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let files = ImageFiles::KernelRootfs {
        kernel: local_file(&dir, "bzImage", b"k"),
        rootfs: local_file(&dir, "rootfs.ext4.gz", b"already compressed"),
    };

    let (mut store, remote) = store();
    let (name, metadata) = upload_image(&mut store, "qemux86", &files, Some("nightly")).unwrap();
    assert_eq!(name, "nightly");
    assert_eq!(
        metadata.rootfs.as_deref(),
        Some("file:///data/lava-ftp/nightly/rootfs.ext4.gz")
    );
    assert_eq!(remote.file("nightly/rootfs.ext4.gz").unwrap(), b"already compressed");
}

#[test]
fn test_upload_image_flow_default_prefix_is_dated() {
    let dir = tempfile::tempdir().unwrap();
    let files = ImageFiles::Image {
        image: local_file(&dir, "disk.wic", b"d"),
        patch: local_file(&dir, "patch.sh", b"p"),
    };

    let (mut store, _) = store();
    let (name, _) = upload_image(&mut store, "iot2000", &files, None).unwrap();
    let date = name.strip_prefix("iot2000").unwrap();
    assert_eq!(date.len(), "YYYY-MM-DD".len());
    assert_eq!(store.list_catalog().unwrap(), vec![name]);
}
