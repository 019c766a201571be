// Damaged inputs: every probe must return a report for any prefix or
// mutation of a valid file, without panicking.

mod common;

use common::*;

fn assert_sane(data: &[u8], ext: &str) {
    let report = probe_bytes(data, Some(ext));
    assert!(report.general.get("Format").is_some(), "{}: General without Format", ext);
    assert_eq!(report.container.file_size, data.len() as u64, "{}", ext);
    if let Some(overhead) = report.container.stream_overhead {
        assert!(overhead <= report.container.file_size, "{}: overhead {} over file size", ext, overhead);
    }
}

#[test]
fn every_prefix_is_tolerated() {
    for (ext, data, _) in samples() {
        let step = (data.len() / 97).max(1);
        for cut in (0..data.len()).step_by(step) {
            assert_sane(&data[..cut], ext);
        }
    }
}

#[test]
fn random_byte_flips_are_tolerated() {
    let mut rng = Rng::new(0x5EED_CAFE);
    for (ext, data, _) in samples() {
        for _ in 0..64 {
            let mut damaged = data.clone();
            for _ in 0..1 + rng.below(8) {
                let at = rng.below(damaged.len());
                damaged[at] = rng.next() as u8;
            }
            assert_sane(&damaged, ext);
        }
    }
}

#[test]
fn header_sizes_set_to_extremes_are_tolerated() {
    let mut rng = Rng::new(42);
    for (ext, data, _) in samples() {
        for _ in 0..32 {
            let mut damaged = data.clone();
            let at = rng.below(damaged.len().saturating_sub(4));
            let fill = if rng.next() & 1 == 0 { 0xFF } else { 0x00 };
            for b in damaged.iter_mut().skip(at).take(4) {
                *b = fill;
            }
            assert_sane(&damaged, ext);
        }
    }
}

#[test]
fn spliced_files_are_tolerated() {
    let all = samples();
    for (ext, head, _) in &all {
        for (_, tail, _) in &all {
            let mut spliced = head[..head.len() / 2].to_vec();
            spliced.extend_from_slice(&tail[tail.len() / 2..]);
            assert_sane(&spliced, ext);
        }
    }
}
