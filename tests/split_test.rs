//! End-to-end tests: split compiler output, save the results and sidecars,
//! and produce device thumbnails from the saved books.

use std::fs;

use mobisplit::mobi::test_helpers::{ComboBook, Record0Builder, fake_jpeg};
use mobisplit::mobi::{ThumbnailRequest, assemble_container, extract_thumbnail, read_section};
use mobisplit::{
    Identifier, Outcome, PageMapMode, Result, SkipReason, SplitMode, SplitOptions, Splitter,
};
use tempfile::TempDir;

const UUID: &str = "0f3a9c2e-1b4d-4e5f-8a6b-7c8d9e0f1a2b";

fn id() -> Identifier {
    UUID.parse().unwrap()
}

fn render(_: &[u8], w: u32, h: u32) -> Result<Vec<u8>> {
    Ok(fake_jpeg(w, h))
}

fn split(book: &ComboBook, options: &SplitOptions) -> mobisplit::SplitOutput {
    let data = book.build().unwrap();
    Splitter::new().split(&data, &id(), options).unwrap()
}

fn apnx_asin(apnx: &[u8]) -> String {
    let len = u32::from_be_bytes(apnx[8..12].try_into().unwrap()) as usize;
    let header: serde_json::Value = serde_json::from_slice(&apnx[12..12 + len]).unwrap();
    header["asin"].as_str().unwrap().to_owned()
}

#[test]
fn test_save_result_writes_container() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.azw3");
    let options = SplitOptions::default().with_mode(SplitMode::for_path(&path));

    let out = split(&ComboBook::default(), &options);
    assert!(out.is_rewritten());
    out.save_result(&path).unwrap();

    let saved = fs::read(&path).unwrap();
    assert_eq!(saved, out.container);
    let rec0 = read_section(&saved, 0).unwrap();
    assert_eq!(u32::from_be_bytes(rec0[36..40].try_into().unwrap()), 8);
}

#[test]
fn test_eink_page_map_goes_into_sdr_directory() {
    let dir = TempDir::new().unwrap();
    let book = dir.path().join("book.azw3");
    let options = SplitOptions::default()
        .with_mode(SplitMode::Kf8)
        .with_page_map(PageMapMode::Eink);

    let out = split(&ComboBook::default(), &options);
    out.save_result(&book).unwrap();
    let written = out.save_page_map(&book, options.page_map).unwrap().unwrap();

    assert_eq!(written, dir.path().join("book.sdr").join("book.apnx"));
    let apnx = fs::read(&written).unwrap();
    assert_eq!(apnx[..4], [0u8, 1, 0, 1]);
    assert_eq!(apnx_asin(&apnx), id().content_code());
}

#[test]
fn test_app_page_map_goes_next_to_book() {
    let dir = TempDir::new().unwrap();
    let book = dir.path().join("book.mobi");
    let options = SplitOptions::default()
        .with_page_map(PageMapMode::App)
        .with_asin(Some("B00TESTING"));

    let out = split(&ComboBook::default(), &options);
    let written = out.save_page_map(&book, options.page_map).unwrap().unwrap();

    assert_eq!(written, dir.path().join("book.apnx"));
    assert!(!dir.path().join("book.sdr").exists());
    assert_eq!(apnx_asin(&fs::read(&written).unwrap()), "B00TESTING");
}

#[test]
fn test_no_page_map_file_without_mode_or_record() {
    let dir = TempDir::new().unwrap();
    let book = dir.path().join("book.azw3");
    let options = SplitOptions::default().with_mode(SplitMode::Kf8);

    let out = split(&ComboBook::default(), &options);
    assert!(out.page_map.is_some());
    assert_eq!(out.save_page_map(&book, PageMapMode::None).unwrap(), None);

    let bare = ComboBook {
        page_map: None,
        ..ComboBook::default()
    };
    let out = split(&bare, &options);
    assert_eq!(out.save_page_map(&book, PageMapMode::Eink).unwrap(), None);
    assert!(!dir.path().join("book.sdr").exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_kf8_only_input_is_saved_unchanged() {
    let dir = TempDir::new().unwrap();
    let rec0 = Record0Builder::new("Already_KF8").version(8).build();
    let data = assemble_container("Already_KF8", &[&rec0, b"text", b"EOF"]).unwrap();

    let options = SplitOptions::default()
        .with_mode(SplitMode::Kf8)
        .with_page_map(PageMapMode::Eink);
    let out = Splitter::new().split(&data, &id(), &options).unwrap();
    assert_eq!(out.outcome, Outcome::NotApplicable(SkipReason::Kf8Only));

    let path = dir.path().join("book.azw3");
    out.save_result(&path).unwrap();
    assert_eq!(fs::read(&path).unwrap(), data);
    assert_eq!(out.save_page_map(&path, options.page_map).unwrap(), None);
}

#[test]
fn test_options_file_drives_split() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("mobisplit.json");
    fs::write(
        &config,
        r#"{"mode":"kf8","force_asin_on_azw3":true,"generate_apnx":"app"}"#,
    )
    .unwrap();
    let options = SplitOptions::from_file(&config).unwrap();

    let out = split(&ComboBook::default(), &options);
    let book = dir.path().join("book.azw3");
    out.save_result(&book).unwrap();
    assert!(out.save_page_map(&book, options.page_map).unwrap().is_some());
    assert!(dir.path().join("book.apnx").exists());
}

#[test]
fn test_thumbnail_from_saved_book() {
    let dir = TempDir::new().unwrap();
    let book = dir.path().join("book.azw3");
    let options = SplitOptions::default()
        .with_mode(SplitMode::Kf8)
        .with_force_asin(true);

    let out = split(&ComboBook::default(), &options);
    out.save_result(&book).unwrap();

    let data = fs::read(&book).unwrap();
    let thumb = extract_thumbnail(&data, &ThumbnailRequest::default(), &render)
        .unwrap()
        .unwrap();
    assert_eq!(thumb.asin, id().content_code());
    assert_eq!(thumb.cde_type, "PDOC");

    let saved = thumb.save(dir.path()).unwrap();
    assert_eq!(
        saved.file_name().unwrap().to_str().unwrap(),
        format!("thumbnail_{}_PDOC_portrait.jpg", id().content_code())
    );
    assert_eq!(fs::read(&saved).unwrap(), thumb.jpeg);
}

#[test]
fn test_regenerated_thumbnail_survives_save() {
    let dir = TempDir::new().unwrap();
    let book = dir.path().join("book.azw3");
    let options = SplitOptions::default().with_mode(SplitMode::Kf8);

    let data = ComboBook::default().build().unwrap();
    let renderer = render;
    let out = Splitter::with_renderer(&renderer)
        .split(&data, &id(), &options)
        .unwrap();
    out.save_result(&book).unwrap();

    let plain = Splitter::new().split(&data, &id(), &options).unwrap();
    let saved = fs::read(&book).unwrap();
    assert_eq!(saved, out.container);
    assert!(saved.len() > plain.container.len());
}
