use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ewsx::{
    Archive, CrcPolicy, DirectoryDetection, EwsxError, ExpandOptions, LoadOptions, ZipWriter,
    compose_dir, expand_archive,
};

fn template() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("sample_files/main.db")
}

enum Item<'a> {
    Dir(&'a str),
    File(&'a str, &'a [u8]),
}

fn build_schedule(path: &Path, items: &[Item]) {
    let mut writer = ZipWriter::new(Vec::new());
    for item in items {
        match item {
            Item::Dir(name) => writer.add_directory(name, None).unwrap(),
            Item::File(name, data) => writer.add_file(name, data, None).unwrap(),
        }
    }
    std::fs::write(path, writer.finish().unwrap()).unwrap();
}

/// Replace every occurrence of `from` with `to` (same length) in a file.
fn patch_bytes(path: &Path, from: &[u8], to: &[u8]) -> usize {
    assert_eq!(from.len(), to.len());
    let mut bytes = std::fs::read(path).unwrap();
    let mut hits = 0;
    let mut i = 0;
    while i + from.len() <= bytes.len() {
        if &bytes[i..i + from.len()] == from {
            bytes[i..i + from.len()].copy_from_slice(to);
            hits += 1;
            i += from.len();
        } else {
            i += 1;
        }
    }
    std::fs::write(path, bytes).unwrap();
    hits
}

fn contents(archive: &Archive) -> BTreeMap<String, Vec<u8>> {
    archive
        .entries()
        .iter()
        .map(|e| (e.path.clone(), e.data.clone()))
        .collect()
}

fn sample_items() -> Vec<Item<'static>> {
    vec![
        Item::Dir("media/"),
        Item::Dir("media/backgrounds/"),
        Item::File("media/backgrounds/sunrise.jpg", b"\xFF\xD8\xFFjpeg-bytes"),
        Item::File("media/welcome.mp4", b"video"),
        Item::Dir("archive/"),
        Item::File("main.db", b"SQLite format 3\0schedule"),
    ]
}

#[tokio::test]
async fn fresh_archive_round_trips_through_save() {
    let dir = tempfile::tempdir().unwrap();
    let saved = dir.path().join("New.ewsx");

    let fresh = Archive::create_with_template(&template()).await.unwrap();
    fresh.save(&saved).await.unwrap();

    let out = dir.path().join("out");
    let report = expand_archive(&saved, &out, &ExpandOptions::default())
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.directories, ["media"]);
    assert_eq!(report.files, ["main.db"]);

    assert!(out.join("media").is_dir());
    assert_eq!(std::fs::read_dir(out.join("media")).unwrap().count(), 0);
    assert_eq!(
        std::fs::read(out.join("main.db")).unwrap(),
        std::fs::read(template()).unwrap()
    );

    let reloaded = Archive::load_from(&saved).await.unwrap();
    assert_eq!(reloaded.origin(), Some(saved.as_path()));
    assert_eq!(reloaded.directories(), ["media"]);
    assert_eq!(reloaded.structure(), fresh.structure());
}

#[tokio::test]
async fn loaded_archive_round_trips_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let original = dir.path().join("Sunday.ewsx");
    build_schedule(&original, &sample_items());

    let first = Archive::load_from(&original).await.unwrap();
    assert_eq!(
        first.directories(),
        ["archive", "media", "media/backgrounds"]
    );
    assert_eq!(first.file("media/welcome.mp4"), Some(&b"video"[..]));

    let copy = dir.path().join("Sunday-copy.ewsx");
    first.save(&copy).await.unwrap();
    let second = Archive::load_from(&copy).await.unwrap();

    assert_eq!(contents(&first), contents(&second));
    assert_eq!(first.directories(), second.directories());
    assert_eq!(first.structure(), second.structure());
    assert_eq!(
        second.structure(),
        "archive/\nmedia/\n    backgrounds/sunrise.jpg\n    welcome.mp4\nmain.db\n"
    );
}

#[tokio::test]
async fn every_file_parent_is_a_recorded_directory() {
    let dir = tempfile::tempdir().unwrap();
    let original = dir.path().join("implicit.ewsx");
    // No explicit directory entries at all
    build_schedule(
        &original,
        &[
            Item::File("media/a/b/c.png", b"c"),
            Item::File("main.db", b"db"),
        ],
    );

    let archive = Archive::load_from(&original).await.unwrap();
    assert_eq!(archive.directories(), ["media", "media/a", "media/a/b"]);
    for entry in archive.entries() {
        if let Some((parent, _)) = entry.path.rsplit_once('/') {
            assert!(archive.directories().iter().any(|d| d == parent));
        }
    }
}

#[tokio::test]
async fn legacy_heuristic_treats_extensionless_names_as_directories() {
    let dir = tempfile::tempdir().unwrap();
    let original = dir.path().join("legacy.ewsx");
    build_schedule(
        &original,
        &[
            Item::Dir("media/"),
            Item::File("main.db", b"db"),
            Item::File("README", b"read me"),
            Item::File("slides", b""),
        ],
    );

    let legacy = ExpandOptions {
        detection: DirectoryDetection::LegacyExtensionHeuristic,
        ..ExpandOptions::default()
    };
    let out = dir.path().join("legacy");
    let report = expand_archive(&original, &out, &legacy).await.unwrap();
    assert_eq!(report.directories, ["media", "README", "slides"]);
    assert_eq!(report.files, ["main.db"]);
    assert!(out.join("README").is_dir());
    assert!(out.join("slides").is_dir());

    let out = dir.path().join("explicit");
    let report = expand_archive(&original, &out, &ExpandOptions::default())
        .await
        .unwrap();
    assert_eq!(report.directories, ["media"]);
    assert_eq!(report.files, ["main.db", "README", "slides"]);
    assert_eq!(std::fs::read(out.join("README")).unwrap(), b"read me");
}

#[tokio::test]
async fn backslash_entry_names_are_normalized() {
    let dir = tempfile::tempdir().unwrap();
    let original = dir.path().join("windows.ewsx");
    build_schedule(
        &original,
        &[
            Item::Dir("media/"),
            Item::File("media/slide.png", b"png"),
        ],
    );
    assert_eq!(patch_bytes(&original, b"media/slide.png", b"media\\slide.png"), 2);
    assert_eq!(patch_bytes(&original, b"media/", b"media\\"), 2);

    let archive = Archive::load_from(&original).await.unwrap();
    assert_eq!(archive.directories(), ["media"]);
    assert_eq!(archive.file("media/slide.png"), Some(&b"png"[..]));
}

#[tokio::test]
async fn expand_to_dir_numbers_new_schedules() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("schedules");
    for n in 1..=2 {
        let existing = output.join(format!("schedule{n}"));
        std::fs::create_dir_all(&existing).unwrap();
        std::fs::write(existing.join("marker.txt"), format!("prior {n}")).unwrap();
    }

    let original = dir.path().join("Sunday.ewsx");
    build_schedule(&original, &sample_items());
    let archive = Archive::load_from(&original).await.unwrap();

    let third = archive.expand_to_dir(&output).await.unwrap();
    assert_eq!(third, output.join("schedule3"));
    assert_eq!(
        std::fs::read(third.join("media/backgrounds/sunrise.jpg")).unwrap(),
        b"\xFF\xD8\xFFjpeg-bytes"
    );
    assert!(third.join("archive").is_dir());
    assert_eq!(
        std::fs::read(third.join("main.db")).unwrap(),
        b"SQLite format 3\0schedule"
    );

    for n in 1..=2 {
        let existing = output.join(format!("schedule{n}"));
        assert_eq!(std::fs::read_dir(&existing).unwrap().count(), 1);
        assert_eq!(
            std::fs::read_to_string(existing.join("marker.txt")).unwrap(),
            format!("prior {n}")
        );
    }

    // Not idempotent: identical content gets another directory
    let fourth = archive.expand_to_dir(&output).await.unwrap();
    assert_eq!(fourth, output.join("schedule4"));
}

#[tokio::test]
async fn expand_to_dir_creates_missing_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("nested").join("schedules");

    let fresh = Archive::create_with_template(&template()).await.unwrap();
    let first = fresh.expand_to_dir(&output).await.unwrap();
    assert_eq!(first, output.join("schedule1"));
    assert!(first.join("media").is_dir());
    assert!(first.join("main.db").is_file());
}

#[tokio::test]
async fn load_leaves_no_temporary_directory() {
    let dir = tempfile::tempdir().unwrap();
    let temp_root = dir.path().join("tmp");
    std::fs::create_dir(&temp_root).unwrap();
    let options = LoadOptions {
        temp_root: Some(temp_root.clone()),
        ..LoadOptions::default()
    };

    let good = dir.path().join("good.ewsx");
    build_schedule(&good, &sample_items());
    Archive::load_from_with(&good, &options).await.unwrap();
    assert_eq!(std::fs::read_dir(&temp_root).unwrap().count(), 0);

    let corrupt = dir.path().join("corrupt.ewsx");
    std::fs::write(&corrupt, b"PK\x03\x04 this stopped being a zip file").unwrap();
    let err = Archive::load_from_with(&corrupt, &options).await.unwrap_err();
    assert!(matches!(err, EwsxError::InvalidFormat(_)), "{err}");
    assert_eq!(std::fs::read_dir(&temp_root).unwrap().count(), 0);

    let missing = dir.path().join("missing.ewsx");
    let err = Archive::load_from_with(&missing, &options).await.unwrap_err();
    assert!(matches!(err, EwsxError::NotFound(ref p) if *p == missing));
    assert_eq!(std::fs::read_dir(&temp_root).unwrap().count(), 0);
}

#[tokio::test]
async fn corrupted_entry_does_not_abort_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let original = dir.path().join("partial.ewsx");

    let names: Vec<String> = (0..10).map(|i| format!("songs/song{i:02}.txt")).collect();
    let bodies: Vec<Vec<u8>> = (0..10)
        .map(|i| format!("verse {i}\n").repeat(8).into_bytes())
        .collect();
    let mut writer = ZipWriter::new(Vec::new());
    for (name, body) in names.iter().zip(&bodies) {
        writer.add_file(name, body, None).unwrap();
    }
    let mut bytes = writer.finish().unwrap();

    // The first occurrence of a name is its Local File Header; data follows directly
    let target = b"songs/song04.txt";
    let at = bytes
        .windows(target.len())
        .position(|w| w == target)
        .unwrap();
    let data_start = at + target.len();
    bytes[data_start] = 0xFF; // reserved deflate block type
    std::fs::write(&original, bytes).unwrap();

    let out = dir.path().join("out");
    let report = expand_archive(&original, &out, &ExpandOptions::default())
        .await
        .unwrap();
    assert_eq!(report.files.len(), 9);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "songs/song04.txt");
    assert!(!out.join("songs/song04.txt").exists());
    for (i, (name, body)) in names.iter().zip(&bodies).enumerate() {
        if i != 4 {
            assert_eq!(&std::fs::read(out.join(name)).unwrap(), body);
        }
    }

    let archive = Archive::load_from(&original).await.unwrap();
    assert_eq!(archive.entries().len(), 9);
    assert!(archive.file("songs/song04.txt").is_none());
}

/// One deflated entry whose central directory record takes its
/// uncompressed size from a ZIP64 extra field.
fn schedule_with_zip64_size(path: &Path, name: &str, data: &[u8], claimed: u64) {
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::Write;

    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    let payload = encoder.finish().unwrap();
    let mut crc = flate2::Crc::new();
    crc.update(data);

    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"PK\x03\x04");
    for field in [20u16, 0, 8, 0, 0x21] {
        bytes.write_u16::<LittleEndian>(field).unwrap();
    }
    bytes.write_u32::<LittleEndian>(crc.sum()).unwrap();
    bytes.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
    bytes.write_u32::<LittleEndian>(data.len() as u32).unwrap();
    bytes.write_u16::<LittleEndian>(name.len() as u16).unwrap();
    bytes.write_u16::<LittleEndian>(0).unwrap();
    bytes.extend_from_slice(name.as_bytes());
    bytes.extend_from_slice(&payload);

    let cd_offset = bytes.len() as u32;
    bytes.extend_from_slice(b"PK\x01\x02");
    for field in [45u16, 45, 0, 8, 0, 0x21] {
        bytes.write_u16::<LittleEndian>(field).unwrap();
    }
    bytes.write_u32::<LittleEndian>(crc.sum()).unwrap();
    bytes.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
    bytes.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
    for field in [name.len() as u16, 12, 0, 0, 0] {
        bytes.write_u16::<LittleEndian>(field).unwrap();
    }
    bytes.write_u32::<LittleEndian>(0).unwrap(); // external attributes
    bytes.write_u32::<LittleEndian>(0).unwrap(); // local header offset
    bytes.extend_from_slice(name.as_bytes());
    bytes.write_u16::<LittleEndian>(0x0001).unwrap();
    bytes.write_u16::<LittleEndian>(8).unwrap();
    bytes.write_u64::<LittleEndian>(claimed).unwrap();
    let cd_size = bytes.len() as u32 - cd_offset;

    bytes.extend_from_slice(b"PK\x05\x06");
    for field in [0u16, 0, 1, 1] {
        bytes.write_u16::<LittleEndian>(field).unwrap();
    }
    bytes.write_u32::<LittleEndian>(cd_size).unwrap();
    bytes.write_u32::<LittleEndian>(cd_offset).unwrap();
    bytes.write_u16::<LittleEndian>(0).unwrap();

    std::fs::write(path, bytes).unwrap();
}

#[tokio::test]
async fn oversized_zip64_length_fails_only_that_entry() {
    let dir = tempfile::tempdir().unwrap();
    let original = dir.path().join("huge.ewsx");
    schedule_with_zip64_size(&original, "main.db", b"SQLite format 3\0", u64::MAX >> 1);

    let out = dir.path().join("out");
    let report = expand_archive(&original, &out, &ExpandOptions::default())
        .await
        .unwrap();
    assert!(report.files.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "main.db");
    assert!(!out.join("main.db").exists());
}

#[tokio::test]
async fn honest_zip64_length_still_extracts() {
    let dir = tempfile::tempdir().unwrap();
    let original = dir.path().join("zip64.ewsx");
    let body = b"SQLite format 3\0".repeat(4);
    schedule_with_zip64_size(&original, "main.db", &body, body.len() as u64);

    let out = dir.path().join("out");
    let verify = ExpandOptions {
        crc: CrcPolicy::Verify,
        ..ExpandOptions::default()
    };
    let report = expand_archive(&original, &out, &verify).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(std::fs::read(out.join("main.db")).unwrap(), body);
}

#[tokio::test]
async fn composed_directory_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let original = dir.path().join("Sunday.ewsx");
    build_schedule(&original, &sample_items());

    let expanded = dir.path().join("expanded");
    expand_archive(&original, &expanded, &ExpandOptions::default())
        .await
        .unwrap();

    let composed = dir.path().join("Composed.ewsx");
    let written = compose_dir(&expanded, &composed).await.unwrap();
    assert_eq!(written, 6);

    let a = Archive::load_from(&original).await.unwrap();
    let b = Archive::load_from(&composed).await.unwrap();
    assert_eq!(contents(&a), contents(&b));
    assert_eq!(a.directories(), b.directories());
}

#[tokio::test]
async fn compose_rejects_missing_source() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nothing-here");
    let err = compose_dir(&missing, &dir.path().join("x.ewsx"))
        .await
        .unwrap_err();
    assert!(matches!(err, EwsxError::NotFound(_)));
}

#[tokio::test]
async fn save_to_unwritable_destination_fails() {
    let dir = tempfile::tempdir().unwrap();
    let fresh = Archive::create_with_template(&template()).await.unwrap();
    let dest = dir.path().join("no-such-dir").join("out.ewsx");
    assert!(matches!(fresh.save(&dest).await, Err(EwsxError::Io(_))));
}
