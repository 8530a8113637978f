//! Filesystem bridge and archive seeding, through the orchestrator.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use collection_literals::btree;
use wasmbox_runtime::tar::{Archive, EntryKind};
use wasmbox_runtime::{Api, ApiOptions, BufferedOutput, DirLoader, Error, ResourceLoader};

use common::{api, api_with, archive, loader, plain, CRT1};

#[test]
fn sysroot_seeds_directory_and_file() {
    let (mut api, _) = api();

    assert_eq!(api.file_contents("lib/crt1.o").unwrap(), CRT1.to_vec());
    assert!(api.exists("lib").unwrap());
    assert!(!api.exists("lib/crt2.o").unwrap());
}

#[test]
fn construction_logs_seeding() {
    let (_, output) = api_with(ApiOptions::default(), loader());
    let text = plain(&output.contents());
    assert!(text.contains("> Untarring sysroot.tar... done."), "{text}");
}

#[test]
fn later_writes_replace_earlier_ones() {
    let (mut api, _) = api();

    api.add_file("notes.txt", b"first").unwrap();
    api.add_file("notes.txt", b"second, longer").unwrap();
    assert_eq!(api.file_contents("notes.txt").unwrap(), b"second, longer");

    api.add_file("notes.txt", b"").unwrap();
    assert_eq!(api.file_contents("notes.txt").unwrap(), b"");
}

#[test]
fn directories_exist_without_contents() {
    let (mut api, _) = api();

    api.add_directory("include").unwrap();
    assert!(api.exists("include").unwrap());
}

#[test]
fn missing_file_is_reported() {
    let (mut api, output) = api();

    let err = api.file_contents("missing.o").unwrap_err();
    assert!(matches!(err, Error::NotFound(ref path) if path == "missing.o"));
    assert!(plain(&output.take()).contains("Error: no such file: missing.o"));
}

#[test]
fn large_files_grow_filesystem_memory() {
    let (mut api, _) = api();

    let big: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    api.add_file("big.bin", &big).unwrap();
    assert_eq!(api.file_contents("big.bin").unwrap(), big);
    // Earlier files survive the growth.
    assert_eq!(api.file_contents("lib/crt1.o").unwrap(), CRT1.to_vec());
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[test]
fn archive_round_trip_preserves_tree() {
    let sizes = [0usize, 1, 511, 512, 513, 1024, 1500];
    let files: Vec<(String, Vec<u8>)> = sizes
        .iter()
        .map(|&size| (format!("data/f{size}"), pattern(size)))
        .collect();

    let mut entries: Vec<(&str, &[u8])> = vec![("data/", &b""[..]), ("data/empty/", &b""[..])];
    entries.extend(files.iter().map(|(path, bytes)| (path.as_str(), bytes.as_slice())));
    let bytes = archive(&entries);

    let mut parsed = BTreeMap::new();
    let mut reader = Archive::new(&bytes);
    while let Some(entry) = reader.next_entry().unwrap() {
        assert_eq!(entry.size, entry.contents.len());
        parsed.insert(entry.name, entry.kind);
    }
    assert_eq!(
        parsed,
        btree! {
            "data".to_string() => EntryKind::Directory,
            "data/empty".to_string() => EntryKind::Directory,
            "data/f0".to_string() => EntryKind::Regular,
            "data/f1".to_string() => EntryKind::Regular,
            "data/f511".to_string() => EntryKind::Regular,
            "data/f512".to_string() => EntryKind::Regular,
            "data/f513".to_string() => EntryKind::Regular,
            "data/f1024".to_string() => EntryKind::Regular,
            "data/f1500".to_string() => EntryKind::Regular,
        }
    );

    let (mut api, _) = api_with(ApiOptions::default(), loader().with("sysroot.tar", bytes));
    for (path, contents) in &files {
        assert_eq!(&api.file_contents(path).unwrap(), contents, "{path}");
    }
    assert!(api.exists("data/empty").unwrap());
}

#[test]
fn symlinks_in_sysroot_fail_construction() {
    let mut bytes = archive(&[("lib/", &b""[..])]);
    // Retype the directory entry as a symlink and fix its checksum.
    bytes[156] = b'2';
    bytes[148..156].copy_from_slice(b"        ");
    let sum: u32 = bytes[..512].iter().map(|&b| u32::from(b)).sum();
    bytes[148..156].copy_from_slice(format!("{sum:06o}\0 ").as_bytes());

    let output = BufferedOutput::new();
    let result = Api::new(
        ApiOptions::default(),
        Box::new(loader().with("sysroot.tar", bytes)),
        Arc::new(output.clone()),
    );
    assert!(matches!(result, Err(Error::Assertion(_))));
    assert!(plain(&output.contents()).contains("unsupported archive entry type"));
}

#[test]
fn missing_filesystem_module_fails_construction() {
    let output = BufferedOutput::new();
    let result = Api::new(
        ApiOptions {
            memfs: "nowhere".to_string(),
            ..ApiOptions::default()
        },
        Box::new(loader()),
        Arc::new(output.clone()),
    );
    assert!(matches!(result, Err(Error::Resource { ref name, .. }) if name == "nowhere"));
    assert!(output.contents().contains("failed to load resource `nowhere`"));
}

#[test]
fn dir_loader_reads_resources_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("memfs"), common::MEMFS).unwrap();
    std::fs::write(dir.path().join("sysroot.tar"), common::sysroot()).unwrap();

    let loader = DirLoader::new(dir.path());
    assert_eq!(loader.read_buffer("sysroot.tar").unwrap(), common::sysroot());
    assert!(matches!(
        loader.read_buffer("clang"),
        Err(Error::Resource { ref name, .. }) if name == "clang"
    ));

    let output = BufferedOutput::new();
    let mut api = Api::new(
        ApiOptions::default(),
        Box::new(loader),
        Arc::new(output),
    )
    .unwrap();
    assert_eq!(api.file_contents("lib/crt1.o").unwrap(), CRT1.to_vec());
}
