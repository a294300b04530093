//! Round trips through the animation pipeline: stills to GIF, GIF back to
//! stills, and re-encoding, with ledger bookkeeping checked along the way.

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, Rgba, RgbaImage};
use pixmill::animation;
use pixmill::params::{GifCreationParams, GifOptimizationParams, OutputFormat};
use pixmill::store::{HistoryStore, RecordStatus};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_still(dir: &Path, name: &str, rgba: [u8; 4]) -> PathBuf {
    let path = dir.join(name);
    RgbaImage::from_pixel(32, 32, Rgba(rgba)).save(&path).unwrap();
    path
}

fn frame_count(path: &Path) -> usize {
    let decoder = GifDecoder::new(BufReader::new(File::open(path).unwrap())).unwrap();
    decoder.into_frames().collect_frames().unwrap().len()
}

#[test]
fn create_builds_decodable_gif_and_one_ledger_row() {
    let tmp = TempDir::new().unwrap();
    let sources = vec![
        write_still(tmp.path(), "a.png", [255, 0, 0, 255]),
        write_still(tmp.path(), "b.png", [0, 255, 0, 255]),
        write_still(tmp.path(), "c.png", [0, 0, 255, 255]),
    ];
    let target = tmp.path().join("out.gif");
    let store = HistoryStore::open_in_memory().unwrap();

    let record = animation::create_from_images(
        &sources,
        &target,
        &GifCreationParams::new(),
        &store,
        |_| {},
    )
    .unwrap();

    assert_eq!(frame_count(&target), 3);
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.source_path, "3 source files");
    assert_eq!(record.source_format, "multiple");
    assert_eq!(record.target_format, "gif");
    assert_eq!(record.width, Some(32));
    assert!(record.target_size > 0);

    // One operation, one row
    assert_eq!(store.recent(10).len(), 1);
}

#[test]
fn create_with_resize_scales_the_canvas() {
    let tmp = TempDir::new().unwrap();
    let sources = vec![
        write_still(tmp.path(), "a.png", [255, 0, 0, 255]),
        write_still(tmp.path(), "b.png", [0, 0, 255, 255]),
    ];
    let target = tmp.path().join("out.gif");
    let store = HistoryStore::open_in_memory().unwrap();
    let params = GifCreationParams::new()
        .with_resize(Some(16), Some(16))
        .unwrap();

    let record =
        animation::create_from_images(&sources, &target, &params, &store, |_| {}).unwrap();
    assert_eq!(record.width, Some(16));
    assert_eq!(record.height, Some(16));
}

#[test]
fn create_with_single_input_fails_and_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let single = write_still(tmp.path(), "only.png", [10, 10, 10, 255]);
    let target = tmp.path().join("out.gif");
    let store = HistoryStore::open_in_memory().unwrap();

    let result = animation::create_from_images(
        &[single],
        &target,
        &GifCreationParams::new(),
        &store,
        |_| {},
    );

    assert!(matches!(
        result,
        Err(animation::AnimationError::InsufficientFrames(1))
    ));
    assert!(!target.exists());
    assert!(store.recent(10).is_empty());
}

#[test]
fn extract_writes_numbered_frames_without_ledger_rows() {
    let tmp = TempDir::new().unwrap();
    let sources = vec![
        write_still(tmp.path(), "a.png", [255, 0, 0, 255]),
        write_still(tmp.path(), "b.png", [0, 255, 0, 255]),
    ];
    let gif_path = tmp.path().join("anim.gif");
    let store = HistoryStore::open_in_memory().unwrap();
    animation::create_from_images(&sources, &gif_path, &GifCreationParams::new(), &store, |_| {})
        .unwrap();
    let rows_after_create = store.recent(10).len();

    let frames_dir = tmp.path().join("frames");
    let written =
        animation::extract_frames(&gif_path, &frames_dir, OutputFormat::Png, |_| {}).unwrap();

    assert_eq!(written.len(), 2);
    assert_eq!(written[0], frames_dir.join("frame_0000.png"));
    assert_eq!(written[1], frames_dir.join("frame_0001.png"));
    for path in &written {
        let img = image::open(path).unwrap();
        assert_eq!((img.width(), img.height()), (32, 32));
    }

    // Extraction appends nothing to the ledger
    assert_eq!(store.recent(10).len(), rows_after_create);
}

#[test]
fn extract_to_jpeg_uses_the_requested_extension() {
    let tmp = TempDir::new().unwrap();
    let sources = vec![
        write_still(tmp.path(), "a.png", [255, 0, 0, 255]),
        write_still(tmp.path(), "b.png", [0, 255, 0, 255]),
    ];
    let gif_path = tmp.path().join("anim.gif");
    let store = HistoryStore::open_in_memory().unwrap();
    animation::create_from_images(&sources, &gif_path, &GifCreationParams::new(), &store, |_| {})
        .unwrap();

    let frames_dir = tmp.path().join("frames");
    let written =
        animation::extract_frames(&gif_path, &frames_dir, OutputFormat::Jpeg, |_| {}).unwrap();
    assert!(written.iter().all(|p| p.extension().unwrap() == "jpg"));
}

#[test]
fn optimize_reencodes_and_reports_size_change() {
    let tmp = TempDir::new().unwrap();
    let sources = vec![
        write_still(tmp.path(), "a.png", [255, 0, 0, 255]),
        write_still(tmp.path(), "b.png", [0, 255, 0, 255]),
    ];
    let gif_path = tmp.path().join("anim.gif");
    let store = HistoryStore::open_in_memory().unwrap();
    animation::create_from_images(&sources, &gif_path, &GifCreationParams::new(), &store, |_| {})
        .unwrap();

    let optimized = tmp.path().join("anim_optimized.gif");
    let params = GifOptimizationParams::new().with_max_colors(16).unwrap();
    let outcome = animation::optimize(&gif_path, &optimized, &params, &store, |_| {}).unwrap();

    assert_eq!(frame_count(&optimized), 2);
    assert_eq!(outcome.record.status, RecordStatus::Completed);
    assert_eq!(outcome.record.source_format, "gif");
    assert_eq!(outcome.record.target_format, "gif");
    assert!(outcome.reduction_percent.is_finite());

    // Create plus optimize: two rows total
    assert_eq!(store.recent(10).len(), 2);
}

#[test]
fn optimize_rejects_a_corrupt_source() {
    let tmp = TempDir::new().unwrap();
    let broken = tmp.path().join("broken.gif");
    std::fs::write(&broken, b"GIF89a not really").unwrap();
    let store = HistoryStore::open_in_memory().unwrap();

    let result = animation::optimize(
        &broken,
        &tmp.path().join("out.gif"),
        &GifOptimizationParams::new(),
        &store,
        |_| {},
    );
    assert!(matches!(
        result,
        Err(animation::AnimationError::Decode { .. })
    ));
    assert!(store.recent(10).is_empty());
}
