mod common;

use std::sync::Arc;

use nand_controller::bch::BchCodec;
use nand_controller::cache::EvictionPolicy;
use nand_controller::testing::MemoryTransport;
use nand_controller::{Cache, NandController, NandError, ReservedBlocks};

use common::{flip_bits, init_tracing, tiny_config, tiny_geometry};

#[test]
fn bch_round_trip_survives_up_to_t_bit_errors_via_shared_helper() {
    let codec = BchCodec::new(8, 5).unwrap();
    let data = b"end to end payload";
    let parity = codec.encode(data).unwrap();
    let mut codeword = data.to_vec();
    codeword.extend_from_slice(&parity);
    flip_bits(&mut codeword, &[1, 30, 55, 80, 100]);
    let (decoded, errors) = codec.decode(&codeword).unwrap();
    assert_eq!(&decoded[..], &data[..]);
    assert_eq!(errors, 5);
}

fn reserved_len() -> u32 {
    ReservedBlocks::default().len()
}

#[test]
fn happy_path_write_then_read_with_no_ecc_corrections() {
    let transport = MemoryTransport::new(tiny_geometry());
    let controller = NandController::new(transport, tiny_config()).unwrap();

    controller.write_page(10, 0, b"hello").unwrap();
    let data = controller.read_page(10, 0).unwrap();
    assert_eq!(&data[..5], b"hello");

    let info = controller.device_info().unwrap();
    assert_eq!(info.statistics.ecc_corrections, 0);
}

#[test]
fn retry_recovers_from_transient_uncorrectable_reads() {
    init_tracing();
    let transport = MemoryTransport::new(tiny_geometry());
    let physical = 2 + reserved_len();
    transport.fail_next_reads_uncorrectably(physical, 0, 2);

    let mut config = tiny_config();
    config.firmware.max_read_retries = 3;
    let controller = NandController::new(transport, config).unwrap();

    controller.write_page(2, 0, b"retry me").unwrap();
    let data = controller.read_page(2, 0).unwrap();
    assert_eq!(&data[..8], b"retry me");

    let info = controller.device_info().unwrap();
    assert_eq!(info.statistics.reads, 1);
}

#[test]
fn exhausting_the_retry_budget_surfaces_uncorrectable() {
    let transport = MemoryTransport::new(tiny_geometry());
    let physical = 2 + reserved_len();
    transport.fail_next_reads_uncorrectably(physical, 0, 100);

    let mut config = tiny_config();
    config.firmware.max_read_retries = 2;
    let controller = NandController::new(transport, config).unwrap();

    controller.write_page(2, 0, b"doomed").unwrap();
    assert!(matches!(
        controller.read_page(2, 0),
        Err(NandError::Uncorrectable)
    ));
}

#[test]
fn bad_block_marking_on_write_failure_rejects_subsequent_writes() {
    init_tracing();
    let transport = MemoryTransport::new(tiny_geometry());
    let physical = reserved_len();
    transport.inject_page_fault(physical, 0);

    let controller = NandController::new(transport, tiny_config()).unwrap();

    assert!(controller.write_page(0, 0, b"x").is_err());
    let info = controller.device_info().unwrap();
    assert_eq!(info.bad_block_count, 1);
    assert!(matches!(
        controller.write_page(0, 0, b"y"),
        Err(NandError::BadBlock { .. })
    ));
}

#[test]
fn wear_leveling_trigger_moves_hot_block_onto_fresh_block() {
    let transport = MemoryTransport::new(tiny_geometry());
    let mut config = tiny_config();
    config.wear_level.threshold = 3;
    let controller = NandController::new(transport, config).unwrap();

    for i in 0..6 {
        controller
            .write_page(0, 0, format!("write {i}").as_bytes())
            .unwrap();
    }

    let info = controller.device_info().unwrap();
    assert!(info.wear.max >= info.wear.min);
    assert!(info.wear.max - info.wear.min <= 6);
}

#[test]
fn cache_lfu_keeps_most_frequently_used_entries() {
    let cache = Cache::<&str, Vec<u8>>::new(2, EvictionPolicy::Lfu);
    cache.put("a", vec![1], None);
    cache.put("b", vec![2], None);
    cache.get(&"a");
    cache.get(&"a");
    cache.get(&"b");
    cache.put("c", vec![3], None);

    assert!(cache.contains(&"a"));
    assert!(cache.contains(&"c"));
    assert!(!cache.contains(&"b"));
}

#[test]
fn metadata_persists_bad_blocks_across_restart() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new(tiny_geometry()));
    let reserved = reserved_len();
    let faulty_physicals = [reserved, reserved + 5, reserved + 8];
    for &physical in &faulty_physicals {
        transport.inject_page_fault(physical, 0);
    }

    {
        let controller = NandController::new(Arc::clone(&transport), tiny_config()).unwrap();
        for &physical in &faulty_physicals {
            let logical = physical - reserved;
            assert!(controller.write_page(logical, 0, b"doomed write").is_err());
        }
        let info = controller.device_info().unwrap();
        assert_eq!(info.bad_block_count, faulty_physicals.len());
        controller.shutdown();
        // `controller` is dropped here; the only remaining handle to the
        // backing storage is the `transport` Arc itself.
    }

    let reloaded = NandController::new(Arc::clone(&transport), tiny_config()).unwrap();
    for &physical in &faulty_physicals {
        assert!(reloaded.is_bad_physical_block(physical).unwrap());
    }
}

#[test]
fn save_and_load_data_round_trips_across_blocks() {
    let transport = MemoryTransport::new(tiny_geometry());
    let controller = NandController::new(transport, tiny_config()).unwrap();

    let payload: Vec<u8> = (0..500u32).map(|b| (b % 256) as u8).collect();
    controller.save_data("report.bin", &payload).unwrap();
    let (name, restored) = controller.load_data().unwrap();

    assert_eq!(name, "report.bin");
    assert_eq!(restored, payload);
}
