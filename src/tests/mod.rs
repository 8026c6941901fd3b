
use std::{fs, path::Path};

use super::{
    config::TranscodeOptions, load_file, save_file, Charset, CharsetTagStore as _,
    ConversionError, Error, LoadOptions, MemoryTagStore, NoTags, SaveOptions, Settings, TagUpdate,
    TranscodeResult,
};

fn load(path: &Path, encoding: Option<&str>, settings: &Settings) -> TranscodeResult {
    let options = LoadOptions {
        encoding: encoding.map(str::to_owned),
        ..Default::default()
    };
    load_file(path, &options, settings, &NoTags).unwrap()
}

fn save_options(encoding: &str, write_bom: bool) -> SaveOptions {
    SaveOptions {
        encoding: encoding.to_owned(),
        write_bom,
        ..Default::default()
    }
}

#[test]
fn utf8_bom_is_detected_and_stripped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.txt");
    fs::write(&path, b"\xef\xbb\xbf\x68\x65\x6c\x6c\x6f").unwrap();

    let r = load(&path, None, &Settings::default());
    assert_eq!(r.detected_encoding, Charset::Utf8);
    assert!(r.has_bom);
    assert_eq!(r.text, "hello");
    assert_eq!(r.decoded_length, 5);
    assert!(r.errors.is_empty());
    assert!(r.filter_error.is_none());
    assert!(r.close_error.is_none());
}

#[test]
fn legacy_encoding_ignores_bom_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("latin1.txt");
    fs::write(&path, b"\xef\xbb\xbfabc").unwrap();

    let r = load(&path, Some("ISO-8859-1"), &Settings::default());
    assert!(!r.has_bom);
    assert_eq!(r.text, "ï»¿abc");
}

#[test]
fn no_bom_for_single_byte_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");

    let report = save_file(
        &path,
        "café".as_bytes(),
        &save_options("ISO-8859-1", true),
        &Settings::default(),
        &NoTags,
    )
    .unwrap();
    assert!(!report.bom_written);
    assert_eq!(report.bytes_written, 4);
    assert_eq!(fs::read(&path).unwrap(), b"caf\xe9");
}

#[test]
fn invalid_byte_becomes_one_replacement() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.txt");
    fs::write(&path, b"ab\xffcd").unwrap();

    let r = load(&path, Some("UTF-8"), &Settings::default());
    assert_eq!(
        r.errors,
        [ConversionError {
            byte_value: 0xff,
            output_offset: 2
        }]
    );
    assert_eq!(&r.text.as_bytes()[2..5], b"\xef\xbf\xbd");
    assert_eq!(r.decoded_length, 7);
    assert_eq!(r.text, "ab\u{FFFD}cd");
}

#[test]
fn output_outgrows_initial_estimate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accents.txt");
    // each byte decodes to two, so the on-disk length underestimates the text
    fs::write(&path, vec![0xe9; 10_000]).unwrap();

    let mut settings = Settings::default();
    settings.transcode = TranscodeOptions {
        chunk_size: 100,
        grow_increment: 7,
        max_output: 1 << 20,
    };
    let r = load(&path, Some("ISO-8859-1"), &settings);
    assert_eq!(r.decoded_length, 20_000);
    assert!(r.text.chars().all(|c| c == 'é'));

    settings.transcode.max_output = 15_000;
    let e = load_file(
        &path,
        &LoadOptions {
            encoding: Some("ISO-8859-1".into()),
            ..Default::default()
        },
        &settings,
        &NoTags,
    )
    .unwrap_err();
    assert!(matches!(e, Error::OutputLimit { limit: 15_000 }));
}

#[test]
fn wide_encodings_round_trip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let text = "wide 😂 text, ünïcödé";
    let mut settings = Settings::default();
    // odd chunk size so units straddle reads
    settings.transcode.chunk_size = 9;

    for (label, charset) in [
        ("UTF-16LE", Charset::Utf16Le),
        ("UTF-16BE", Charset::Utf16Be),
        ("UTF-32LE", Charset::Utf32Le),
        ("UTF-32BE", Charset::Utf32Be),
    ] {
        let path = dir.path().join(label);
        let report = save_file(
            &path,
            text.as_bytes(),
            &save_options(label, true),
            &settings,
            &NoTags,
        )
        .unwrap();
        assert!(report.bom_written, "{label}");
        assert!(fs::read(&path).unwrap().starts_with(charset.bom()));

        let r = load(&path, None, &settings);
        assert_eq!(r.detected_encoding, charset, "{label}");
        assert!(r.has_bom);
        assert_eq!(r.text, text, "{label}");
    }
}

#[test]
fn charset_tag_skips_detection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sjis.txt");
    let tags = MemoryTagStore::new();
    let settings = Settings::default();

    let options = SaveOptions {
        tag: TagUpdate::Store,
        ..save_options("Shift_JIS", false)
    };
    let report = save_file(&path, "日本語テキスト".as_bytes(), &options, &settings, &tags).unwrap();
    assert!(report.tag_error.is_none());
    assert_eq!(tags.charset(&path).as_deref(), Some("shift_jis"));

    let r = load_file(&path, &LoadOptions::default(), &settings, &tags).unwrap();
    assert_eq!(r.detected_encoding, Charset::from_label("Shift_JIS").unwrap());
    assert_eq!(r.text, "日本語テキスト");

    // without the tag the bytes are not UTF-8 and fall back to the locale default
    let r = load(&path, None, &settings);
    assert_eq!(r.detected_encoding.name(), "windows-1252");

    let options = SaveOptions {
        tag: TagUpdate::Remove,
        ..save_options("UTF-8", false)
    };
    save_file(&path, b"plain", &options, &settings, &tags).unwrap();
    assert_eq!(tags.charset(&path), None);
}

#[test]
fn locale_default_applies_without_other_signals() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("koi8.txt");
    fs::write(&path, b"\xf0\xd2\xc9\xd7\xc5\xd4").unwrap();

    let settings = Settings::default().with_locale("ru_RU.KOI8-R");
    let r = load(&path, None, &settings);
    assert_eq!(r.detected_encoding.name(), "KOI8-R");
    assert_eq!(r.text, "Привет");

    let settings = settings.with_default_charset("windows-1251");
    let r = load(&path, None, &settings);
    assert_eq!(r.detected_encoding.name(), "windows-1251");
}

#[test]
fn lossy_save_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eucjp.txt");

    let report = save_file(
        &path,
        "¥500 😀".as_bytes(),
        &save_options("EUC-JP", false),
        &Settings::default(),
        &NoTags,
    )
    .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.non_reversible, 1);
    assert_eq!(fs::read(&path).unwrap(), b"\x5c500 ");
}

#[test]
fn unsupported_encoding_fails_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.txt");

    for label in ["x-no-such-charset", "UTF-EBCDIC", "replacement"] {
        let e = save_file(
            &path,
            b"text",
            &save_options(label, false),
            &Settings::default(),
            &NoTags,
        )
        .unwrap_err();
        assert!(matches!(e, Error::UnsupportedEncoding(_)), "{label}");
    }
    assert!(!path.exists());

    fs::write(&path, b"\xdd\x73\x66\x73abc").unwrap();
    let e = load_file(&path, &LoadOptions::default(), &Settings::default(), &NoTags).unwrap_err();
    assert!(matches!(e, Error::UnsupportedEncoding(name) if name == "UTF-EBCDIC"));
}

#[cfg(unix)]
#[test]
fn save_keeps_permissions() {
    use std::os::unix::fs::PermissionsExt as _;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.txt");
    fs::write(&path, b"old").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

    save_file(
        &path,
        b"new",
        &save_options("UTF-8", false),
        &Settings::default(),
        &NoTags,
    )
    .unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"new");
    let mode = fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o640);
}
