mod common;

use common::*;
use mediascope_core::{ContainerKind, FileSource, Prober, StreamKind};

#[test]
fn every_sample_reaches_its_probe() {
    for (ext, data, format) in samples() {
        let report = probe_bytes(&data, Some(ext));
        assert_eq!(report.general.get("Format"), Some(format), "{}", ext);
        assert_eq!(report.container.file_size, data.len() as u64, "{}", ext);
        assert!(!report.streams.is_empty(), "{}: no streams", ext);
    }
}

#[test]
fn sniffing_ignores_misleading_extensions() {
    let report = probe_bytes(&mkv_file(), Some("mp4"));
    assert_eq!(report.container.format, ContainerKind::Matroska);
    let report = probe_bytes(&wav_file(100), Some("ts"));
    assert_eq!(report.container.format, ContainerKind::Wave);
}

#[test]
fn ac3_is_described_in_every_carrier() {
    for (ext, data) in [("mkv", mkv_file()), ("ts", ts_file(90_000, 40)), ("mpg", ps_file(40))] {
        let report = probe_bytes(&data, Some(ext));
        let audio: Vec<_> = report.streams_of(StreamKind::Audio).collect();
        assert_eq!(audio.len(), 1, "{}", ext);
        assert_eq!(audio[0].get("Format"), Some("AC-3"), "{}", ext);
        assert_eq!(audio[0].key("sampling_rate"), Some("48000"), "{}", ext);
        assert_eq!(audio[0].key("bit_rate"), Some("32000"), "{}", ext);
    }
}

#[test]
fn wave_duration_and_size() {
    let data = wav_file(750);
    let report = probe_bytes(&data, None);
    assert_eq!(report.container.duration_ms, Some(750));
    assert_eq!(report.general.key("duration"), Some("750"));
    assert_eq!(report.general.key("count_of_audio_streams"), Some("1"));
}

#[test]
fn mp4_video_track() {
    let report = probe_bytes(&mp4_file(), None);
    let video: Vec<_> = report.streams_of(StreamKind::Video).collect();
    assert_eq!(video.len(), 1);
    assert_eq!(video[0].get("Format"), Some("AVC"));
    assert_eq!(video[0].key("width"), Some("640"));
    assert_eq!(video[0].key("height"), Some("360"));
    assert_eq!(report.container.duration_ms, Some(4000));
}

#[test]
fn unknown_bytes_give_an_unknown_report() {
    let report = probe_bytes(&[0x42; 1000], None);
    assert_eq!(report.container.format, ContainerKind::Unknown);
    assert!(report.streams.is_empty());
    assert_eq!(report.general.get("Format"), Some("Unknown"));

    let empty = probe_bytes(&[], Some("ts"));
    assert!(empty.streams.is_empty());
}

#[test]
fn probing_twice_gives_the_same_report() {
    for (ext, data, _) in samples() {
        let first = probe_bytes(&data, Some(ext));
        let second = probe_bytes(&data, Some(ext));
        assert_eq!(first, second, "{}", ext);
    }
}

#[test]
fn files_on_disk_match_memory() {
    let dir = tempfile::tempdir().unwrap();
    let prober = Prober::default();
    for (ext, data, _) in samples() {
        let path = dir.path().join(format!("sample.{}", ext));
        std::fs::write(&path, &data).unwrap();
        let from_disk = prober.probe_path(&path).unwrap();
        let mut src = FileSource::open(&path).unwrap();
        let from_source = prober.probe_source(&mut src, Some(ext)).unwrap();
        assert_eq!(from_disk, from_source, "{}", ext);
    }
}

#[test]
fn missing_file_is_an_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Prober::default().probe_path(&dir.path().join("absent.mkv")).unwrap_err();
    assert!(err.to_string().contains("cannot open"));
}

#[test]
fn reports_serialize_to_json() {
    let report = probe_bytes(&mkv_file(), None);
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["container"]["format"], "Matroska");
    assert!(value["streams"].as_array().is_some_and(|s| s.len() == 1));
}
