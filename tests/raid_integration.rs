//! Integration tests for striped files
//!
//! These drive [`RaidFile`] end to end over in-memory stripes with injected
//! faults, over local files, and through the tokio dispatch adapter.

use std::sync::Arc;

use assert_matches::assert_matches;
use stripeio::adapters::{AsyncDispatch, LocalStripe, MemStripe};
use stripeio::raid::HEADER_SIZE;
use stripeio::{AccessMode, Error, RaidConfig, RaidFile, SharedTransport};

const WIDTH: usize = 64;

// =============================================================================
// Helpers
// =============================================================================

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ (i >> 8) as u8)
        .collect()
}

fn urls(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("mem://stripe.{}", i)).collect()
}

fn dp(n: usize) -> RaidConfig {
    RaidConfig::raid_dp(urls(n)).with_stripe_width(WIDTH)
}

fn rs(n: usize, parity: usize) -> RaidConfig {
    RaidConfig::reed_s(urls(n), parity).with_stripe_width(WIDTH)
}

fn mem_stripes(config: &RaidConfig) -> Vec<Arc<MemStripe>> {
    config
        .stripe_urls
        .iter()
        .map(|url| Arc::new(MemStripe::new(url.clone())))
        .collect()
}

fn transports(mems: &[Arc<MemStripe>]) -> Vec<SharedTransport> {
    mems.iter().map(|m| m.clone() as SharedTransport).collect()
}

fn raid(config: &RaidConfig, mems: &[Arc<MemStripe>]) -> RaidFile {
    RaidFile::new(config.clone(), transports(mems)).unwrap()
}

/// Write `data` sequentially in `step` sized calls and close
fn store(config: &RaidConfig, mems: &[Arc<MemStripe>], data: &[u8], step: usize) {
    let mut f = raid(config, mems);
    f.open(AccessMode::WriteOnly).unwrap();
    for (i, chunk) in data.chunks(step).enumerate() {
        assert_eq!(f.write((i * step) as u64, chunk).unwrap(), chunk.len());
    }
    f.close().unwrap();
}

/// Open read-only and read the whole file
fn load(config: &RaidConfig, mems: &[Arc<MemStripe>]) -> (Vec<u8>, RaidFile) {
    let mut f = raid(config, mems);
    f.open(AccessMode::ReadOnly).unwrap();
    let mut buf = vec![0u8; f.size().unwrap() as usize];
    assert_eq!(f.read(0, &mut buf).unwrap(), buf.len());
    (buf, f)
}

// =============================================================================
// Round Trips
// =============================================================================

#[test]
fn test_double_parity_round_trip() {
    let config = dp(6);
    for len in [1, 63, 64, 65, 1023, 1024, 1025, 4099] {
        let mems = mem_stripes(&config);
        let data = pattern(len, 3);
        store(&config, &mems, &data, 100);

        let (read, mut f) = load(&config, &mems);
        assert_eq!(read, data, "len {}", len);
        assert!(!f.done_recovery());
        f.close().unwrap();
    }
}

#[test]
fn test_reed_solomon_round_trip() {
    let config = rs(7, 3);
    for len in [1, 64, 255, 256, 257, 3000] {
        let mems = mem_stripes(&config);
        let data = pattern(len, 9);
        store(&config, &mems, &data, 77);

        let (read, _) = load(&config, &mems);
        assert_eq!(read, data, "len {}", len);
    }
}

#[test]
fn test_parity_survives_max_failures_at_every_length() {
    for (config, lost) in [(dp(6), vec![0, 4]), (rs(7, 3), vec![0, 3, 6])] {
        for len in [1, 65, 1025, 4099] {
            let mems = mem_stripes(&config);
            let data = pattern(len, 5);
            store(&config, &mems, &data, 333);

            for &i in &lost {
                mems[i].fail_data_reads(true);
            }
            let (read, f) = load(&config, &mems);
            assert_eq!(read, data, "{} len {}", config.layout, len);
            assert!(f.done_recovery());
        }
    }
}

#[test]
fn test_empty_file() {
    let config = dp(4);
    let mems = mem_stripes(&config);
    store(&config, &mems, &[], 1);

    let mut f = raid(&config, &mems);
    f.open(AccessMode::ReadWrite).unwrap();
    assert_eq!(f.size().unwrap(), 0);
    assert_eq!(f.read(0, &mut [0u8; 8]).unwrap(), 0);

    let report = f.rebuild().unwrap();
    assert_eq!(report.groups, 1);
    assert_eq!(report.blocks_rebuilt, 0);
    assert!(!report.healed);
    f.close().unwrap();
}

// =============================================================================
// Degraded Reads
// =============================================================================

#[test]
fn test_six_stripe_double_parity_recovers_one_stripe() {
    let config = dp(6);
    let mems = mem_stripes(&config);
    let data = pattern(1024, 1);
    store(&config, &mems, &data, 1024);

    mems[2].fail_data_reads(true);
    let (read, mut f) = load(&config, &mems);
    assert_eq!(read, data);
    assert!(f.done_recovery());

    let stats = f.stats();
    assert_eq!(stats.bytes_read, 1024);
    assert_eq!(stats.recovery_passes, 1);
    // One column of a 4 row group
    assert_eq!(stats.blocks_recovered, 4);
    f.close().unwrap();
}

#[test]
fn test_partial_range_with_failed_range() {
    let config = dp(6);
    let mems = mem_stripes(&config);
    let data = pattern(3000, 2);
    store(&config, &mems, &data, 3000);

    // Second block of stripe 0 is the second row of group 0
    mems[0].fail_read_range(HEADER_SIZE + WIDTH as u64, WIDTH as u64);

    let mut f = raid(&config, &mems);
    f.open(AccessMode::ReadOnly).unwrap();
    let mut buf = vec![0u8; 700];
    assert_eq!(f.read(150, &mut buf).unwrap(), 700);
    assert_eq!(buf, &data[150..850]);
    assert!(f.done_recovery());
}

#[test]
fn test_erasure_tolerates_parity_count_only() {
    let config = rs(6, 2);
    let mems = mem_stripes(&config);
    let data = pattern(2000, 4);
    store(&config, &mems, &data, 500);

    mems[0].fail_data_reads(true);
    mems[5].fail_data_reads(true);
    let (read, mut f) = load(&config, &mems);
    assert_eq!(read, data);
    f.close().unwrap();

    mems[3].fail_data_reads(true);
    let mut f = raid(&config, &mems);
    f.open(AccessMode::ReadOnly).unwrap();
    let mut buf = vec![0u8; 2000];
    assert_matches!(f.read(0, &mut buf), Err(Error::Unrecoverable { .. }));
    assert_eq!(f.stats().recovery_failures, 1);
}

#[test]
fn test_double_parity_three_failures_unrecoverable() {
    let config = dp(6);
    let mems = mem_stripes(&config);
    store(&config, &mems, &pattern(1024, 0), 1024);

    for i in [0, 1, 5] {
        mems[i].fail_data_reads(true);
    }
    let mut f = raid(&config, &mems);
    f.open(AccessMode::ReadOnly).unwrap();
    assert_matches!(f.read(0, &mut [0u8; 1024]), Err(Error::Unrecoverable { .. }));
}

// =============================================================================
// Headers
// =============================================================================

#[test]
fn test_reordered_stripes_are_mapped_by_header() {
    let config = rs(5, 2);
    let mems = mem_stripes(&config);
    let data = pattern(1500, 8);
    store(&config, &mems, &data, 1500);

    let reversed: Vec<Arc<MemStripe>> = mems.iter().rev().cloned().collect();
    let (read, f) = load(&config, &reversed);
    assert_eq!(read, data);
    assert_eq!(f.mapping().physical(0), 4);
    assert_eq!(f.mapping().logical(0), 4);
    assert!(!f.done_recovery());
}

#[test]
fn test_relabel_is_stable_across_read_only_opens() {
    let config = dp(6);
    let mems = mem_stripes(&config);
    let data = pattern(2500, 6);
    store(&config, &mems, &data, 2500);
    mems[3].clobber_header();

    let mut first = None;
    for _ in 0..2 {
        let (read, mut f) = load(&config, &mems);
        assert_eq!(read, data);
        assert!(f.done_recovery());

        let stat = f.stat().unwrap();
        assert_eq!(stat.lost_stripes, vec!["mem://stripe.3".to_string()]);
        let mapping = f.mapping().clone();
        assert_eq!(*first.get_or_insert_with(|| mapping.clone()), mapping);
        f.close().unwrap();
    }
}

#[test]
fn test_parity_count_invalid_headers_keep_layout() {
    let config = rs(6, 2);
    let mems = mem_stripes(&config);
    let data = pattern(1300, 14);
    store(&config, &mems, &data, 1300);

    let (_, mut clean) = load(&config, &mems);
    let clean_map = clean.mapping().clone();
    let clean_size = clean.size().unwrap();
    clean.close().unwrap();

    mems[1].clobber_header();
    mems[4].clobber_header();
    let (read, mut degraded) = load(&config, &mems);
    assert_eq!(read, data);
    assert_eq!(degraded.mapping(), &clean_map);
    assert_eq!(degraded.size().unwrap(), clean_size);
    assert_eq!(degraded.stat().unwrap().lost_stripes.len(), 2);
    degraded.close().unwrap();
}

#[test]
fn test_too_many_invalid_headers() {
    let config = dp(6);
    let mems = mem_stripes(&config);
    store(&config, &mems, &pattern(500, 0), 500);
    for i in [0, 2, 4] {
        mems[i].clobber_header();
    }

    let mut f = raid(&config, &mems);
    assert_matches!(
        f.open(AccessMode::ReadOnly),
        Err(Error::HeaderUnrecoverable {
            invalid: 3,
            tolerated: 2
        })
    );
    assert!(!f.is_open());
    assert!(mems.iter().all(|m| !m.is_open()));
}

#[test]
fn test_corrupt_header_counts_are_relabeled() {
    let config = dp(6);
    let mems = mem_stripes(&config);
    let data = pattern(2500, 16);
    store(&config, &mems, &data, 2500);

    // Block count follows the magic and the stripe id
    for i in [2, 3] {
        mems[i].poke(20, &u64::MAX.to_le_bytes());
    }

    let (read, mut f) = load(&config, &mems);
    assert_eq!(read, data);
    assert_eq!(f.size().unwrap(), 2500);
    assert_eq!(f.stat().unwrap().lost_stripes.len(), 2);
    f.close().unwrap();
}

#[test]
fn test_width_mismatch_rejected() {
    let config = dp(6);
    let mems = mem_stripes(&config);
    store(&config, &mems, &pattern(500, 0), 500);

    let mut f = raid(&config.clone().with_stripe_width(128), &mems);
    assert_matches!(f.open(AccessMode::ReadOnly), Err(Error::Config(_)));
}

#[test]
fn test_open_request_carries_booking() {
    let mut config = dp(4);
    config.target_size = 1 << 20;
    config.booking_opaque = "booking=abc".to_string();
    let mems = mem_stripes(&config);

    let mut f = raid(&config, &mems);
    f.open(AccessMode::WriteOnly).unwrap();
    let request = mems[0].last_open_request().unwrap();
    assert_eq!(request.target_size, 1 << 20);
    assert_eq!(request.opaque, "booking=abc");
}

// =============================================================================
// Rebuild
// =============================================================================

#[test]
fn test_rebuild_heals_relabeled_stripe() {
    let config = dp(6).with_store_recovery(true);
    let mems = mem_stripes(&config);
    let data = pattern(2500, 7);
    store(&config, &mems, &data, 2500);
    let before = mems[2].contents();

    mems[2].clobber_header();
    let mut f = raid(&config, &mems);
    f.open(AccessMode::ReadWrite).unwrap();
    assert_eq!(f.stat().unwrap().lost_stripes.len(), 1);

    let report = f.rebuild().unwrap();
    assert_eq!(report.groups, 3);
    assert!(report.healed);
    assert!(report.blocks_rebuilt >= 12);
    assert!(f.stat().unwrap().lost_stripes.is_empty());
    f.close().unwrap();

    assert_eq!(mems[2].contents(), before);
    let (read, f) = load(&config, &mems);
    assert_eq!(read, data);
    assert!(!f.done_recovery());
}

#[test]
fn test_rebuild_without_store_keeps_stripe_lost() {
    let config = rs(6, 2);
    let mems = mem_stripes(&config);
    let data = pattern(900, 1);
    store(&config, &mems, &data, 900);

    mems[1].clobber_header();
    let mut f = raid(&config, &mems);
    f.open(AccessMode::ReadWrite).unwrap();
    let report = f.rebuild().unwrap();
    assert!(!report.healed);
    f.close().unwrap();

    // Still flagged at the next open
    let (read, mut f) = load(&config, &mems);
    assert_eq!(read, data);
    assert_eq!(f.stat().unwrap().lost_stripes, vec!["mem://stripe.1".to_string()]);
    f.close().unwrap();
}

// =============================================================================
// Truncate
// =============================================================================

#[test]
fn test_truncate_shrink_then_grow() {
    let config = dp(6);
    let mems = mem_stripes(&config);
    let data = pattern(3000, 11);

    let mut f = raid(&config, &mems);
    f.open(AccessMode::WriteOnly).unwrap();
    f.write(0, &data).unwrap();

    f.truncate(1000).unwrap();
    assert_eq!(f.size().unwrap(), 1000);
    let mut buf = vec![0u8; 1000];
    assert_eq!(f.read(0, &mut buf).unwrap(), 1000);
    assert_eq!(buf, &data[..1000]);

    f.truncate(2000).unwrap();
    let mut buf = vec![0xffu8; 2000];
    assert_eq!(f.read(0, &mut buf).unwrap(), 2000);
    assert_eq!(&buf[..1000], &data[..1000]);
    assert!(buf[1000..].iter().all(|&b| b == 0));
    f.close().unwrap();

    let mut expected = data[..1000].to_vec();
    expected.resize(2000, 0);
    mems[0].fail_data_reads(true);
    mems[4].fail_data_reads(true);
    let (read, _) = load(&config, &mems);
    assert_eq!(read, expected);
}

#[test]
fn test_truncate_cuts_stripes_to_group() {
    let config = rs(5, 2);
    let mems = mem_stripes(&config);

    let mut f = raid(&config, &mems);
    f.open(AccessMode::WriteOnly).unwrap();
    f.write(0, &pattern(2000, 0)).unwrap();
    f.truncate(200).unwrap();
    f.close().unwrap();

    // 200 bytes fit in two groups of three 64 byte blocks
    for m in &mems {
        assert_eq!(m.contents().len() as u64, HEADER_SIZE + 2 * WIDTH as u64);
    }
}

#[test]
fn test_truncate_twice_then_grow() {
    let config = dp(6);
    let mems = mem_stripes(&config);
    let data = pattern(3000, 15);

    let mut f = raid(&config, &mems);
    f.open(AccessMode::WriteOnly).unwrap();
    f.write(0, &data).unwrap();
    f.truncate(2100).unwrap();
    f.truncate(700).unwrap();
    assert_eq!(f.size().unwrap(), 700);
    f.truncate(3000).unwrap();

    let mut buf = vec![0xffu8; 3000];
    assert_eq!(f.read(0, &mut buf).unwrap(), 3000);
    assert_eq!(&buf[..700], &data[..700]);
    assert!(buf[700..].iter().all(|&b| b == 0));
    f.close().unwrap();

    let mut expected = data[..700].to_vec();
    expected.resize(3000, 0);
    mems[1].fail_data_reads(true);
    mems[5].fail_data_reads(true);
    let (read, _) = load(&config, &mems);
    assert_eq!(read, expected);
}

// =============================================================================
// Write Modes
// =============================================================================

#[test]
fn test_append_after_reopen_keeps_parity() {
    for (config, lost) in [(dp(6), vec![0, 4]), (rs(6, 2), vec![0, 3])] {
        let mems = mem_stripes(&config);
        let data = pattern(200, 31);
        store(&config, &mems, &data[..100], 100);

        let mut f = raid(&config, &mems);
        f.open(AccessMode::ReadWrite).unwrap();
        f.write(100, &data[100..]).unwrap();
        f.close().unwrap();

        for &i in &lost {
            mems[i].fail_data_reads(true);
        }
        let (read, f) = load(&config, &mems);
        assert_eq!(read, data, "{}", config.layout);
        assert!(f.done_recovery());
    }
}

#[test]
fn test_overwrite_of_flushed_group_keeps_parity() {
    for (config, lost) in [(dp(6), vec![1, 5]), (rs(6, 2), vec![1, 2])] {
        let mems = mem_stripes(&config);
        let data = pattern(3000, 32);
        let patch = pattern(150, 77);

        let mut f = raid(&config, &mems);
        f.open(AccessMode::WriteOnly).unwrap();
        f.write(0, &data[..2000]).unwrap();
        f.write(200, &patch).unwrap();
        f.write(2000, &data[2000..]).unwrap();
        f.close().unwrap();

        let mut expected = data.clone();
        expected[200..350].copy_from_slice(&patch);
        for &i in &lost {
            mems[i].fail_data_reads(true);
        }
        let (read, _) = load(&config, &mems);
        assert_eq!(read, expected, "{}", config.layout);
    }
}

#[test]
fn test_write_after_shrink_keeps_parity() {
    let config = dp(6);
    let mems = mem_stripes(&config);
    let data = pattern(3000, 33);
    let tail = pattern(800, 66);

    let mut f = raid(&config, &mems);
    f.open(AccessMode::WriteOnly).unwrap();
    f.write(0, &data).unwrap();
    f.truncate(700).unwrap();
    f.write(700, &tail).unwrap();
    f.close().unwrap();

    let mut expected = data[..700].to_vec();
    expected.extend_from_slice(&tail);
    mems[2].fail_data_reads(true);
    mems[5].fail_data_reads(true);
    let (read, _) = load(&config, &mems);
    assert_eq!(read, expected);
}

#[test]
fn test_non_streaming_random_writes() {
    let config = dp(6).with_streaming(false);
    let mems = mem_stripes(&config);
    let data = pattern(3000, 12);
    let patch = pattern(100, 99);

    let mut f = raid(&config, &mems);
    f.open(AccessMode::WriteOnly).unwrap();
    f.write(2000, &data[2000..]).unwrap();
    f.write(0, &data[..2000]).unwrap();
    f.write(500, &patch).unwrap();
    f.close().unwrap();

    let mut expected = data.clone();
    expected[500..600].copy_from_slice(&patch);

    mems[1].fail_data_reads(true);
    mems[3].fail_data_reads(true);
    let (read, _) = load(&config, &mems);
    assert_eq!(read, expected);
}

#[test]
fn test_update_rewrites_existing_group() {
    let config = rs(6, 2).with_streaming(false);
    let mems = mem_stripes(&config);
    let data = pattern(1000, 13);
    store(&config, &mems, &data, 1000);

    let mut f = raid(&config, &mems);
    f.open(AccessMode::ReadWrite).unwrap();
    assert_eq!(f.size().unwrap(), 1000);
    f.write(300, b"overwritten").unwrap();
    f.close().unwrap();

    let mut expected = data;
    expected[300..311].copy_from_slice(b"overwritten");
    mems[2].fail_data_reads(true);
    mems[4].fail_data_reads(true);
    let (read, _) = load(&config, &mems);
    assert_eq!(read, expected);
}

// =============================================================================
// Removal
// =============================================================================

#[test]
fn test_remove_deletes_every_stripe() {
    let config = dp(4);
    let mems = mem_stripes(&config);
    store(&config, &mems, &pattern(100, 0), 100);

    let mut f = raid(&config, &mems);
    f.open(AccessMode::ReadWrite).unwrap();
    f.remove().unwrap();
    assert!(!f.is_open());
    assert!(mems.iter().all(|m| !m.exists()));
}

// =============================================================================
// Transports
// =============================================================================

#[test]
fn test_local_stripes_survive_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let urls: Vec<String> = (0..5)
        .map(|i| format!("file://{}", dir.path().join(format!("stripe.{}", i)).display()))
        .collect();
    let config = RaidConfig::reed_s(urls.clone(), 2).with_stripe_width(128);
    let open = || {
        let transports = urls
            .iter()
            .map(|u| Arc::new(LocalStripe::new(u.clone())) as SharedTransport)
            .collect();
        RaidFile::new(config.clone(), transports).unwrap()
    };

    let data = pattern(5000, 21);
    let mut f = open();
    f.open(AccessMode::WriteOnly).unwrap();
    f.write(0, &data).unwrap();
    f.close().unwrap();

    // 14 groups of 384 bytes, one 128 byte block per stripe each
    for i in 0..5 {
        let path = dir.path().join(format!("stripe.{}", i));
        assert_eq!(std::fs::metadata(path).unwrap().len(), HEADER_SIZE + 14 * 128);
    }

    std::fs::remove_file(dir.path().join("stripe.1")).unwrap();
    let mut f = open();
    f.open(AccessMode::ReadOnly).unwrap();
    let mut buf = vec![0u8; 5000];
    assert_eq!(f.read(0, &mut buf).unwrap(), 5000);
    assert_eq!(buf, data);
    assert_eq!(f.stat().unwrap().lost_stripes, vec![urls[1].clone()]);

    f.remove().unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_dispatch_pool_round_trip_with_failure() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(4)
        .build()
        .unwrap();
    let config = dp(6);
    let stripes: Vec<Arc<AsyncDispatch<MemStripe>>> = config
        .stripe_urls
        .iter()
        .map(|u| Arc::new(AsyncDispatch::new(MemStripe::new(u.clone()), runtime.handle().clone())))
        .collect();
    let open = || {
        let transports = stripes.iter().map(|s| s.clone() as SharedTransport).collect();
        RaidFile::new(config.clone(), transports).unwrap()
    };

    let data = pattern(5000, 17);
    let mut f = open();
    f.open(AccessMode::WriteOnly).unwrap();
    for (i, chunk) in data.chunks(700).enumerate() {
        f.write((i * 700) as u64, chunk).unwrap();
    }
    f.close().unwrap();

    stripes[2].inner().fail_data_reads(true);
    let mut f = open();
    f.open(AccessMode::ReadOnly).unwrap();
    let mut buf = vec![0u8; 5000];
    assert_eq!(f.read(0, &mut buf).unwrap(), 5000);
    assert_eq!(buf, data);
    assert!(f.done_recovery());
    f.close().unwrap();
}
