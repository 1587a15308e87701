//! End-to-end tests: the full client transfer engine against an in-process
//! registry served over a real socket.

use std::collections::BTreeMap;
use std::path::Path;

use camino::Utf8PathBuf;

use modelx_client::{Client, Reference, CONFIG_FILE_NAME};
use modelx_registry::RegistryBuilder;
use modelx_storage::{FsProvider, Storage};

async fn spawn_registry() -> (String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::new(FsProvider::new(dir.path()).unwrap());
    let app = RegistryBuilder::new().storage(storage).build().await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), dir)
}

fn client(registry: &str) -> Client {
    Client::new(registry, "").unwrap().with_progress(false)
}

fn build_model_tree(root: &Path) {
    std::fs::write(
        root.join(CONFIG_FILE_NAME),
        "description: e2e demo model\n",
    )
    .unwrap();
    std::fs::write(root.join("README.md"), b"# demo\n").unwrap();
    std::fs::write(root.join("weights.bin"), vec![7u8; 4096]).unwrap();
    std::fs::write(root.join("empty.txt"), b"").unwrap();
    std::fs::write(root.join(".secret"), b"never pushed").unwrap();
    std::fs::create_dir_all(root.join("vocab/nested")).unwrap();
    std::fs::write(root.join("vocab/tokens.txt"), b"a b c d").unwrap();
    std::fs::write(root.join("vocab/nested/extra.txt"), b"deep").unwrap();
}

/// Collect file contents by relative path, ignoring the blob cache.
fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            let rel = path.strip_prefix(root).unwrap().to_string_lossy().to_string();
            if rel == ".modelx" || rel == ".secret" {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
            } else {
                out.insert(rel, std::fs::read(&path).unwrap());
            }
        }
    }
    out
}

fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

#[tokio::test]
async fn push_then_pull_is_byte_identical() {
    let (registry, _server_dir) = spawn_registry().await;
    let src = tempfile::tempdir().unwrap();
    build_model_tree(src.path());

    let client = client(&registry);
    client
        .push("library/demo", "v1", CONFIG_FILE_NAME, &utf8(src.path()))
        .await
        .unwrap();

    // manifest shape: one blob per non-hidden non-config top-level entry
    let manifest = client.get_manifest("library/demo", "v1").await.unwrap();
    assert_eq!(manifest.config.name, CONFIG_FILE_NAME);
    let names: Vec<_> = manifest.blobs.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["README.md", "empty.txt", "vocab", "weights.bin"]);

    let out = tempfile::tempdir().unwrap();
    client
        .pull("library/demo", "v1", &utf8(out.path()), false)
        .await
        .unwrap();

    assert_eq!(snapshot(src.path()), snapshot(out.path()));

    // pulling again into the same tree is a no-op and stays identical
    client
        .pull("library/demo", "v1", &utf8(out.path()), false)
        .await
        .unwrap();
    assert_eq!(snapshot(src.path()), snapshot(out.path()));
}

#[tokio::test]
async fn second_push_deduplicates_blobs() {
    let (registry, server_dir) = spawn_registry().await;
    let src = tempfile::tempdir().unwrap();
    build_model_tree(src.path());

    let client = client(&registry);
    for version in ["v1", "v2"] {
        client
            .push("library/dedup", version, CONFIG_FILE_NAME, &utf8(src.path()))
            .await
            .unwrap();
    }

    // both versions share the identical blob set: content addressing stores
    // each digest exactly once
    let blobs_dir = server_dir.path().join("library/dedup/blobs/sha256");
    let stored = std::fs::read_dir(&blobs_dir)
        .unwrap()
        .filter(|e| {
            !e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".meta")
        })
        .count();
    let manifest = client.get_manifest("library/dedup", "v1").await.unwrap();
    // every non-empty descriptor maps to one stored blob
    let non_empty = manifest
        .all_descriptors()
        .filter(|d| !d.digest.as_ref().unwrap().is_empty_content())
        .count();
    assert_eq!(stored, non_empty);

    let index = client.get_index("library/dedup", "").await.unwrap();
    assert_eq!(index.manifests.len(), 2);
}

#[tokio::test]
async fn forced_pull_purges_stray_entries() {
    let (registry, _server_dir) = spawn_registry().await;
    let src = tempfile::tempdir().unwrap();
    build_model_tree(src.path());

    let client = client(&registry);
    client
        .push("library/force", "v1", CONFIG_FILE_NAME, &utf8(src.path()))
        .await
        .unwrap();

    let out = tempfile::tempdir().unwrap();
    client
        .pull("library/force", "v1", &utf8(out.path()), false)
        .await
        .unwrap();

    std::fs::write(out.path().join("stray.tmp"), b"leftover").unwrap();
    std::fs::create_dir(out.path().join("stray-dir")).unwrap();

    client
        .pull("library/force", "v1", &utf8(out.path()), true)
        .await
        .unwrap();
    assert!(!out.path().join("stray.tmp").exists());
    assert!(!out.path().join("stray-dir").exists());
    assert_eq!(snapshot(src.path()), snapshot(out.path()));
}

#[tokio::test]
async fn copy_rebinds_a_version_without_the_working_tree() {
    let (registry, _server_dir) = spawn_registry().await;
    let src = tempfile::tempdir().unwrap();
    build_model_tree(src.path());

    let client = client(&registry);
    client
        .push("library/original", "v1", CONFIG_FILE_NAME, &utf8(src.path()))
        .await
        .unwrap();

    client
        .copy_to("library/original", "v1", &client, "library/copy", "v2")
        .await
        .unwrap();

    let copied = client.get_manifest("library/copy", "v2").await.unwrap();
    let original = client.get_manifest("library/original", "v1").await.unwrap();
    assert_eq!(copied.blobs, original.blobs);

    let out = tempfile::tempdir().unwrap();
    client
        .pull("library/copy", "v2", &utf8(out.path()), false)
        .await
        .unwrap();
    assert_eq!(snapshot(src.path()), snapshot(out.path()));
}

#[tokio::test]
async fn reference_flow_addresses_the_registry() {
    let (registry, _server_dir) = spawn_registry().await;
    let src = tempfile::tempdir().unwrap();
    build_model_tree(src.path());

    let reference = Reference::parse(&format!("{registry}/library/ref-demo@v1")).unwrap();
    assert_eq!(reference.repository, "library/ref-demo");
    assert_eq!(reference.version, "v1");

    let client = reference.client().unwrap().with_progress(false);
    client.ping().await.unwrap();
    client
        .push(
            &reference.repository,
            &reference.version,
            CONFIG_FILE_NAME,
            &utf8(src.path()),
        )
        .await
        .unwrap();

    // empty version resolves to latest on the wire; v1 is not latest, so
    // address it explicitly
    let manifest = client.get_manifest("library/ref-demo", "v1").await.unwrap();
    assert!(!manifest.blobs.is_empty());

    let global = client.get_global_index("ref-demo").await.unwrap();
    assert_eq!(global.manifests.len(), 1);
}

#[tokio::test]
async fn manifest_delete_and_index_removal() {
    let (registry, _server_dir) = spawn_registry().await;
    let src = tempfile::tempdir().unwrap();
    build_model_tree(src.path());

    let client = client(&registry);
    for version in ["v1", "v2"] {
        client
            .push("library/admin", version, CONFIG_FILE_NAME, &utf8(src.path()))
            .await
            .unwrap();
    }

    assert!(client
        .remote()
        .exists_manifest("library/admin", "v1")
        .await
        .unwrap());
    client
        .remote()
        .delete_manifest("library/admin", "v1")
        .await
        .unwrap();
    assert!(!client
        .remote()
        .exists_manifest("library/admin", "v1")
        .await
        .unwrap());
    assert_eq!(
        client.get_index("library/admin", "").await.unwrap().manifests.len(),
        1
    );

    client.remote().remove_index("library/admin").await.unwrap();
    let err = client.get_index("library/admin", "").await.unwrap_err();
    assert!(err.to_string().contains("INDEX_UNKNOWN"));
    assert!(client
        .get_global_index("library/admin")
        .await
        .unwrap()
        .manifests
        .is_empty());
}

#[tokio::test]
async fn pull_of_missing_version_reports_manifest_unknown() {
    let (registry, _server_dir) = spawn_registry().await;
    let client = client(&registry);
    let out = tempfile::tempdir().unwrap();
    let err = client
        .pull("library/ghost", "v9", &utf8(out.path()), false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("MANIFEST_UNKNOWN"));
}
