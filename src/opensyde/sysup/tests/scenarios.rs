//! End to end scenarios for the four public sequences, driven against the scripted driver
//! simulator. The assertions work on the simulator's ordered call trace.

use crate::opensyde::sysup::driver::sim::{DriverCall, DriverSimulator, ServiceId};
use crate::opensyde::sysup::driver::{
    DriverError, RoutingError, RESET_TYPE_KEY_OFF_ON, RESET_TYPE_TO_FLASHLOADER,
};
use crate::opensyde::sysup::fingerprint::FixedFingerprintSource;
use crate::opensyde::sysup::firmware::{HexArea, HexImage, MemoryHexFileReader};
use crate::opensyde::sysup::progress::{ProgressLog, ProgressStep};
use crate::opensyde::sysup::sequences::{SequenceTiming, UpdateSequences};
use crate::opensyde::sysup::staging::create_temporary_folder;
use crate::opensyde::sysup::sysdef::{
    Application, Bus, BusType, ComInterfaceSettings, DiagnosticServerType, FlashJob,
    FlashloaderType, Node, NodeAddress, SystemDefinition,
};
use crate::opensyde::sysup::Error;

use crc::{Crc, CRC_32_ISO_HDLC};

use std::fs;
use std::io::Write;
use std::path::Path;

// Fixtures ---------------------------------------------------------------------------------------

fn write_file(dir: &Path, name: &str, content: &[u8]) -> String {
    let path = dir.join(name);
    let mut file = fs::File::create(&path).unwrap();
    file.write_all(content).unwrap();
    path.to_string_lossy().to_string()
}

fn osy_node(name: &str, bus_index: usize, node_id: u8, application_count: usize) -> Node {
    let mut node = Node::new(name, "ESX3CM", FlashloaderType::OpenSyde);
    node.diagnostic_server = DiagnosticServerType::OpenSyde;
    for index in 0..application_count {
        node.applications
            .push(Application::new(&format!("application_{}", index)));
    }
    node.interfaces
        .push(ComInterfaceSettings::new(bus_index, true, node_id));
    node
}

fn stw_node(name: &str, bus_index: usize, node_id: u8) -> Node {
    let mut node = Node::new(name, "ESX2", FlashloaderType::StwFlashloader);
    node.applications.push(Application::new("application_0"));
    node.interfaces
        .push(ComInterfaceSettings::new(bus_index, true, node_id));
    node
}

/// One openSYDE address based node with two applications on a local CAN bus
fn single_hex_node_system() -> SystemDefinition {
    SystemDefinition {
        buses: vec![Bus::new("CAN1", 1, BusType::Can)],
        nodes: vec![osy_node("Controller", 0, 5, 2)],
    }
}

/// One openSYDE file based node on a local CAN bus
fn single_file_node_system() -> SystemDefinition {
    let mut node = osy_node("Logger", 0, 7, 1);
    node.device_definition.flashloader_is_file_based = true;
    SystemDefinition {
        buses: vec![Bus::new("CAN1", 1, BusType::Can)],
        nodes: vec![node],
    }
}

/// client -- CAN1 -- Router -- CAN2 -- Target; the target is reachable via routing only
fn routed_system() -> SystemDefinition {
    let mut router = osy_node("Router", 0, 10, 1);
    router
        .interfaces
        .push(ComInterfaceSettings::new(1, true, 11));
    let target = osy_node("Target", 1, 20, 1);

    SystemDefinition {
        buses: vec![
            Bus::new("CAN1", 1, BusType::Can),
            Bus::new("CAN2", 2, BusType::Can),
        ],
        nodes: vec![router, target],
    }
}

fn sequences_for(
    sysdef: SystemDefinition,
    active_nodes: Vec<bool>,
) -> UpdateSequences<DriverSimulator, ProgressLog> {
    let mut sequences = UpdateSequences::new(
        sysdef,
        active_nodes,
        0,
        DriverSimulator::new(),
        ProgressLog::new(),
    )
    .unwrap();
    sequences.set_timing(SequenceTiming::immediate());
    sequences.set_fingerprint_source(Box::new(FixedFingerprintSource::new(
        [26, 8, 1],
        [13, 37, 0],
        "tester",
    )));
    sequences
}

fn esx_image() -> HexImage {
    let mut image = HexImage::new(vec![
        HexArea::new(0x1000, (0..100u32).map(|value| value as u8).collect()),
        HexArea::new(0x2000, (0..200u32).map(|value| value as u8).collect()),
    ]);
    image.signature_address = Some(0x8000);
    image.device_name = Some("ESX3CM".to_string());
    image
}

/// Trace without the polling timeout bookkeeping calls
fn essentials(calls: &[DriverCall]) -> Vec<DriverCall> {
    calls
        .iter()
        .filter(|call| {
            !matches!(
                call,
                DriverCall::SetPollingTimeout { .. } | DriverCall::ResetPollingTimeout { .. }
            )
        })
        .cloned()
        .collect()
}

// S1: address based success ----------------------------------------------------------------------

#[test]
fn address_based_update_success_trace() {
    let _ = env_logger::builder().is_test(true).try_init();

    let temp = tempfile::tempdir().unwrap();
    let hex_path = write_file(temp.path(), "app.hex", b"raw hex");
    let node = NodeAddress::new(1, 5);

    let mut sequences = sequences_for(single_hex_node_system(), vec![true]);
    sequences.driver_mut().set_device_name(node, "ESX3CM");
    sequences.driver_mut().set_max_block_length(64);
    let mut reader = MemoryHexFileReader::new();
    reader.add_image("app.hex", esx_image());
    sequences.set_hex_file_reader(Box::new(reader));

    sequences.activate_flashloader(true).unwrap();

    let activation = sequences.driver().calls().to_vec();
    assert!(activation.contains(&DriverCall::BroadcastRequestProgramming));
    assert!(activation.contains(&DriverCall::BroadcastEcuReset {
        reset_type: RESET_TYPE_TO_FLASHLOADER
    }));
    assert!(activation.contains(&DriverCall::BroadcastEnterPreProgrammingSession));
    assert!(activation.contains(&DriverCall::SetPreProgrammingMode { node }));
    // broadcasts go out before any node is addressed individually
    assert!(
        activation
            .iter()
            .position(|call| *call == DriverCall::BroadcastEcuReset {
                reset_type: RESET_TYPE_TO_FLASHLOADER
            })
            .unwrap()
            < activation
                .iter()
                .position(|call| *call == DriverCall::SetPreProgrammingMode { node })
                .unwrap()
    );

    sequences.driver_mut().clear_calls();
    let jobs = vec![FlashJob::new(&[&hex_path])];
    sequences.update_system(&jobs, &[0]).unwrap();

    let expected = vec![
        DriverCall::ReconnectNode { node },
        DriverCall::ReadDeviceName { node },
        DriverCall::SetProgrammingMode { node },
        DriverCall::CheckFlashMemoryAvailable {
            node,
            offset: 0x1000,
            size: 100,
        },
        DriverCall::CheckFlashMemoryAvailable {
            node,
            offset: 0x2000,
            size: 200,
        },
        DriverCall::WriteFingerprint {
            node,
            date: [26, 8, 1],
            time: [13, 37, 0],
            user_name: "tester".to_string(),
        },
        DriverCall::RequestDownload {
            node,
            offset: 0x1000,
            size: 100,
        },
        DriverCall::TransferData {
            node,
            block_sequence_counter: 1,
            size: 59,
        },
        DriverCall::TransferData {
            node,
            block_sequence_counter: 2,
            size: 41,
        },
        DriverCall::RequestTransferExitAddressBased {
            node,
            check_signature: false,
            signature_address: 0,
        },
        DriverCall::RequestDownload {
            node,
            offset: 0x2000,
            size: 200,
        },
        DriverCall::TransferData {
            node,
            block_sequence_counter: 1,
            size: 59,
        },
        DriverCall::TransferData {
            node,
            block_sequence_counter: 2,
            size: 59,
        },
        DriverCall::TransferData {
            node,
            block_sequence_counter: 3,
            size: 59,
        },
        DriverCall::TransferData {
            node,
            block_sequence_counter: 4,
            size: 23,
        },
        DriverCall::RequestTransferExitAddressBased {
            node,
            check_signature: true,
            signature_address: 0x8000,
        },
        DriverCall::DisconnectNode { node },
    ];
    assert_eq!(essentials(sequences.driver().calls()), expected);

    // every chunk respects the service header reservation
    for (_, size) in sequences.driver().transfer_data_trace(node) {
        assert!(size > 0 && size <= 64 - 5);
    }
}

#[test]
fn staged_copies_with_index_prefix_flash_through_memory_reader() {
    let source_dir = tempfile::tempdir().unwrap();
    let other_dir = source_dir.path().join("other");
    fs::create_dir(&other_dir).unwrap();
    // two source files with identical names; staging renames them to 1_app.hex / 2_app.hex
    let first_path = write_file(source_dir.path(), "app.hex", b"raw hex one");
    let second_path = write_file(&other_dir, "app.hex", b"raw hex two");
    let node = NodeAddress::new(1, 5);

    let sysdef = single_hex_node_system();
    let target_dir = tempfile::tempdir().unwrap();
    let target = format!("{}/staging/", target_dir.path().display());
    let mut jobs = vec![FlashJob::new(&[&first_path, &second_path])];
    create_temporary_folder(&sysdef.nodes, &[true], &target, &mut jobs).unwrap();
    assert!(jobs[0].files_to_flash[0].ends_with("1_app.hex"));
    assert!(jobs[0].files_to_flash[1].ends_with("2_app.hex"));

    let mut sequences = sequences_for(sysdef, vec![true]);
    sequences.driver_mut().set_device_name(node, "ESX3CM");
    let mut image = esx_image();
    image.areas.truncate(1);
    let mut reader = MemoryHexFileReader::new();
    // registered under the original name only; the reader resolves the staged copies
    reader.add_image("app.hex", image);
    sequences.set_hex_file_reader(Box::new(reader));

    sequences.update_system(&jobs, &[0]).unwrap();

    let downloads = sequences
        .driver()
        .calls()
        .iter()
        .filter(|call| matches!(call, DriverCall::RequestDownload { .. }))
        .count();
    assert_eq!(downloads, 2);
}

// S2: device name mismatch -----------------------------------------------------------------------

#[test]
fn device_name_mismatch_stops_before_any_download() {
    let temp = tempfile::tempdir().unwrap();
    let hex_path = write_file(temp.path(), "app.hex", b"raw hex");
    let node = NodeAddress::new(1, 5);

    let mut sequences = sequences_for(single_hex_node_system(), vec![true]);
    sequences.driver_mut().set_device_name(node, "ESX3CM");
    let mut image = esx_image();
    image.device_name = Some("OTHER".to_string());
    let mut reader = MemoryHexFileReader::new();
    reader.add_image("app.hex", image);
    sequences.set_hex_file_reader(Box::new(reader));

    let jobs = vec![FlashJob::new(&[&hex_path])];
    let result = sequences.update_system(&jobs, &[0]);

    assert!(matches!(result, Err(Error::Overflow(_))));
    assert!(sequences
        .driver()
        .position_of(|call| matches!(call, DriverCall::RequestDownload { .. }))
        .is_none());
    assert!(sequences
        .sink()
        .contains_step(ProgressStep::UpdateSystemOsyNodeCheckDeviceNameMatchError));
}

// S3: file based success with CRC --------------------------------------------------------------

#[test]
fn file_based_update_sends_basename_and_crc() {
    let temp = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0..512u32).map(|value| (value % 256) as u8).collect();
    // a path recorded on a foreign host still reduces to its base name
    let file_path = write_file(temp.path(), "C:\\x\\firmware.bin", &payload);
    let node = NodeAddress::new(1, 7);

    let mut sequences = sequences_for(single_file_node_system(), vec![true]);
    sequences.driver_mut().set_max_block_length(260);

    let jobs = vec![FlashJob::new(&[&file_path])];
    sequences.update_system(&jobs, &[0]).unwrap();

    let expected_crc = Crc::<u32>::new(&CRC_32_ISO_HDLC).checksum(&payload);
    let expected = vec![
        DriverCall::ReconnectNode { node },
        DriverCall::SetProgrammingMode { node },
        DriverCall::WriteFingerprint {
            node,
            date: [26, 8, 1],
            time: [13, 37, 0],
            user_name: "tester".to_string(),
        },
        DriverCall::RequestFileTransfer {
            node,
            file_name: "firmware.bin".to_string(),
            size: 512,
        },
        DriverCall::TransferData {
            node,
            block_sequence_counter: 1,
            size: 255,
        },
        DriverCall::TransferData {
            node,
            block_sequence_counter: 2,
            size: 255,
        },
        DriverCall::TransferData {
            node,
            block_sequence_counter: 3,
            size: 2,
        },
        DriverCall::RequestTransferExitFileBased {
            node,
            crc: expected_crc,
        },
        DriverCall::DisconnectNode { node },
    ];
    assert_eq!(essentials(sequences.driver().calls()), expected);

    // the transferred name must not contain any directory components
    let file_name = sequences
        .driver()
        .calls()
        .iter()
        .find_map(|call| match call {
            DriverCall::RequestFileTransfer { file_name, .. } => Some(file_name.clone()),
            _ => None,
        })
        .unwrap();
    assert!(!file_name.contains('/') && !file_name.contains('\\'));
}

// S4: routed update with router timeout ----------------------------------------------------------

#[test]
fn router_timeout_latches_router_and_target() {
    let router = NodeAddress::new(1, 10);

    let mut sequences = sequences_for(routed_system(), vec![true, true]);
    sequences.driver_mut().add_route(1, 1, vec![0]);
    sequences.driver_mut().script_error(
        ServiceId::SetPreProgrammingMode,
        Some(router),
        DriverError::Timeout,
    );

    let result = sequences.activate_flashloader(false);
    assert_eq!(result, Err(Error::Warn));

    // the router timed out; the target sits behind it
    assert!(!sequences.is_node_reachable(0));
    assert!(!sequences.is_node_reachable(1));

    // subsequent sequences must not talk to either node
    sequences.driver_mut().clear_calls();
    let result = sequences.read_device_information(false);
    assert_eq!(result, Err(Error::Warn));
    assert!(sequences.driver().calls().is_empty());
}

// S5: abort during transfer ----------------------------------------------------------------------

#[test]
fn abort_vote_during_transfer_returns_busy() {
    let temp = tempfile::tempdir().unwrap();
    let hex_path = write_file(temp.path(), "app.hex", b"raw hex");
    let node = NodeAddress::new(1, 5);

    let mut sequences = sequences_for(single_hex_node_system(), vec![true]);
    sequences.driver_mut().set_device_name(node, "ESX3CM");
    sequences.driver_mut().set_max_block_length(64);
    let mut reader = MemoryHexFileReader::new();
    reader.add_image("app.hex", esx_image());
    sequences.set_hex_file_reader(Box::new(reader));

    // vote for abort right after the second transferred block of the first area
    sequences
        .sink_mut()
        .abort_on_step_occurrence(ProgressStep::UpdateSystemOsyNodeFlashHexAreaTransferStart, 3);

    let jobs = vec![FlashJob::new(&[&hex_path])];
    let result = sequences.update_system(&jobs, &[0]);

    assert_eq!(result, Err(Error::Busy));
    assert_eq!(sequences.driver().transfer_data_trace(node).len(), 2);
    assert!(sequences
        .driver()
        .position_of(|call| matches!(call, DriverCall::RequestTransferExitAddressBased { .. }))
        .is_none());
    assert!(sequences.sink().contains_step(ProgressStep::UpdateSystemAborted));
}

// S6: reset order --------------------------------------------------------------------------------

#[test]
fn reset_reaches_routed_target_before_its_router() {
    let router = NodeAddress::new(1, 10);
    let target = NodeAddress::new(2, 20);

    let mut sequences = sequences_for(routed_system(), vec![true, true]);
    sequences.driver_mut().add_route(1, 1, vec![0]);

    sequences.reset_system().unwrap();

    let target_reset = sequences
        .driver()
        .position_of(|call| {
            *call
                == DriverCall::EcuReset {
                    node: target,
                    reset_type: RESET_TYPE_KEY_OFF_ON,
                }
        })
        .unwrap();
    let router_reset = sequences
        .driver()
        .position_of(|call| {
            *call
                == DriverCall::EcuReset {
                    node: router,
                    reset_type: RESET_TYPE_KEY_OFF_ON,
                }
        })
        .unwrap();
    assert!(target_reset < router_reset);

    // routing balance holds for the routed target
    assert_eq!(
        sequences.driver().start_routing_count(1),
        sequences.driver().stop_routing_count(1)
    );
    assert!(sequences.driver().start_routing_count(1) >= 1);
}

// Universal invariants ---------------------------------------------------------------------------

#[test]
fn failed_route_setup_still_balances_start_and_stop() {
    let mut sequences = sequences_for(routed_system(), vec![true, true]);
    sequences.driver_mut().add_route(1, 1, vec![0]);
    sequences.driver_mut().script_routing_error(
        1,
        RoutingError {
            error_index: 0,
            error: DriverError::Timeout,
        },
    );

    let result = sequences.activate_flashloader(false);
    assert_eq!(result, Err(Error::Warn));

    assert_eq!(
        sequences.driver().start_routing_count(1),
        sequences.driver().stop_routing_count(1)
    );

    // the failed hop is latched together with the target
    assert!(!sequences.is_node_reachable(0));
    assert!(!sequences.is_node_reachable(1));
}

#[test]
fn block_sequence_counter_wraps_from_255_to_0() {
    let temp = tempfile::tempdir().unwrap();
    let hex_path = write_file(temp.path(), "app.hex", b"raw hex");
    let node = NodeAddress::new(1, 5);

    let mut sequences = sequences_for(single_hex_node_system(), vec![true]);
    sequences.driver_mut().set_device_name(node, "ESX3CM");
    // 6 byte blocks leave one payload byte per transfer
    sequences.driver_mut().set_max_block_length(6);

    let mut image = HexImage::new(vec![HexArea::new(
        0x1000,
        (0..300u32).map(|value| value as u8).collect(),
    )]);
    image.signature_address = Some(0x8000);
    image.device_name = Some("ESX3CM".to_string());
    let mut reader = MemoryHexFileReader::new();
    reader.add_image("app.hex", image);
    sequences.set_hex_file_reader(Box::new(reader));

    let jobs = vec![FlashJob::new(&[&hex_path])];
    sequences.update_system(&jobs, &[0]).unwrap();

    let trace = sequences.driver().transfer_data_trace(node);
    assert_eq!(trace.len(), 300);
    assert_eq!(trace[0].0, 1);
    assert_eq!(trace[254].0, 255);
    assert_eq!(trace[255].0, 0);
    assert_eq!(trace[256].0, 1);
    for (_, size) in trace {
        assert_eq!(size, 1);
    }
}

#[test]
fn fingerprint_precedes_first_download() {
    let temp = tempfile::tempdir().unwrap();
    let hex_path = write_file(temp.path(), "app.hex", b"raw hex");
    let node = NodeAddress::new(1, 5);

    let mut sequences = sequences_for(single_hex_node_system(), vec![true]);
    sequences.driver_mut().set_device_name(node, "ESX3CM");
    let mut reader = MemoryHexFileReader::new();
    reader.add_image("app.hex", esx_image());
    sequences.set_hex_file_reader(Box::new(reader));

    let jobs = vec![FlashJob::new(&[&hex_path])];
    sequences.update_system(&jobs, &[0]).unwrap();

    let fingerprint = sequences
        .driver()
        .position_of(|call| matches!(call, DriverCall::WriteFingerprint { .. }))
        .unwrap();
    let first_download = sequences
        .driver()
        .position_of(|call| matches!(call, DriverCall::RequestDownload { .. }))
        .unwrap();
    assert!(fingerprint < first_download);
}

// Update order and validation --------------------------------------------------------------------

#[test]
fn update_order_defines_node_sequence() {
    let temp = tempfile::tempdir().unwrap();
    let first_path = write_file(temp.path(), "first.hex", b"raw hex");
    let second_path = write_file(temp.path(), "second.hex", b"raw hex");

    let mut node_a = osy_node("NodeA", 0, 5, 1);
    node_a.device_definition.flashloader_is_file_based = false;
    let node_b = osy_node("NodeB", 0, 6, 1);
    let sysdef = SystemDefinition {
        buses: vec![Bus::new("CAN1", 1, BusType::Can)],
        nodes: vec![node_a, node_b],
    };
    let address_a = NodeAddress::new(1, 5);
    let address_b = NodeAddress::new(1, 6);

    let mut sequences = sequences_for(sysdef, vec![true, true]);
    sequences.driver_mut().set_device_name(address_a, "ESX3CM");
    sequences.driver_mut().set_device_name(address_b, "ESX3CM");

    let mut image = esx_image();
    image.areas.truncate(1);
    let mut reader = MemoryHexFileReader::new();
    reader.add_image("first.hex", image.clone());
    reader.add_image("second.hex", image);
    sequences.set_hex_file_reader(Box::new(reader));

    let jobs = vec![
        FlashJob::new(&[&first_path]),
        FlashJob::new(&[&second_path]),
    ];
    sequences.update_system(&jobs, &[1, 0]).unwrap();

    let read_b = sequences
        .driver()
        .position_of(|call| *call == DriverCall::ReadDeviceName { node: address_b })
        .unwrap();
    let read_a = sequences
        .driver()
        .position_of(|call| *call == DriverCall::ReadDeviceName { node: address_a })
        .unwrap();
    assert!(read_b < read_a);
}

#[test]
fn update_rejects_files_for_inactive_node() {
    let temp = tempfile::tempdir().unwrap();
    let hex_path = write_file(temp.path(), "app.hex", b"raw hex");

    let sysdef = SystemDefinition {
        buses: vec![Bus::new("CAN1", 1, BusType::Can)],
        nodes: vec![osy_node("NodeA", 0, 5, 1), osy_node("NodeB", 0, 6, 1)],
    };
    let mut sequences = sequences_for(sysdef, vec![true, false]);

    let jobs = vec![FlashJob::default(), FlashJob::new(&[&hex_path])];
    let result = sequences.update_system(&jobs, &[1]);
    assert!(matches!(result, Err(Error::NoAct(_))));
}

#[test]
fn update_rejects_node_missing_from_order() {
    let temp = tempfile::tempdir().unwrap();
    let first_path = write_file(temp.path(), "first.hex", b"raw hex");
    let second_path = write_file(temp.path(), "second.hex", b"raw hex");

    let sysdef = SystemDefinition {
        buses: vec![Bus::new("CAN1", 1, BusType::Can)],
        nodes: vec![osy_node("NodeA", 0, 5, 1), osy_node("NodeB", 0, 6, 1)],
    };
    let mut sequences = sequences_for(sysdef, vec![true, true]);

    let jobs = vec![
        FlashJob::new(&[&first_path]),
        FlashJob::new(&[&second_path]),
    ];
    let result = sequences.update_system(&jobs, &[0]);
    assert!(matches!(result, Err(Error::NoAct(_))));
}

#[test]
fn update_rejects_order_with_wrong_size() {
    let temp = tempfile::tempdir().unwrap();
    let hex_path = write_file(temp.path(), "app.hex", b"raw hex");

    let mut sequences = sequences_for(single_hex_node_system(), vec![true]);

    let jobs = vec![FlashJob::new(&[&hex_path])];
    let result = sequences.update_system(&jobs, &[0, 0]);
    assert!(matches!(result, Err(Error::NoAct(_))));
}

#[test]
fn update_rejects_wrong_job_vector_size() {
    let mut sequences = sequences_for(single_hex_node_system(), vec![true]);

    let result = sequences.update_system(&[], &[]);
    assert!(matches!(result, Err(Error::Overflow(_))));
}

#[test]
fn update_rejects_missing_file() {
    let mut sequences = sequences_for(single_hex_node_system(), vec![true]);

    let jobs = vec![FlashJob::new(&["/does/not/exist.hex"])];
    let result = sequences.update_system(&jobs, &[0]);
    assert!(matches!(result, Err(Error::RdWr(_))));
}

// Fingerprint fallback ---------------------------------------------------------------------------

#[test]
fn missing_user_name_is_reported_and_replaced() {
    let temp = tempfile::tempdir().unwrap();
    let hex_path = write_file(temp.path(), "app.hex", b"raw hex");
    let node = NodeAddress::new(1, 5);

    let mut sequences = sequences_for(single_hex_node_system(), vec![true]);
    sequences.set_fingerprint_source(Box::new(FixedFingerprintSource::without_user_name(
        [26, 8, 1],
        [13, 37, 0],
    )));
    sequences.driver_mut().set_device_name(node, "ESX3CM");
    let mut reader = MemoryHexFileReader::new();
    reader.add_image("app.hex", esx_image());
    sequences.set_hex_file_reader(Box::new(reader));

    let jobs = vec![FlashJob::new(&[&hex_path])];
    sequences.update_system(&jobs, &[0]).unwrap();

    let user_name = sequences
        .driver()
        .calls()
        .iter()
        .find_map(|call| match call {
            DriverCall::WriteFingerprint { user_name, .. } => Some(user_name.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(user_name, "unknown");
    assert!(sequences
        .sink()
        .contains_step(ProgressStep::UpdateSystemOsyNodeFingerprintNameNotReadable));
}

// Activation variants ----------------------------------------------------------------------------

#[test]
fn ethernet_activation_reconnects_before_session_request() {
    let mut node = osy_node("Controller", 0, 5, 1);
    node.interfaces[0].node_id = 5;
    let sysdef = SystemDefinition {
        buses: vec![Bus::new("ETH1", 3, BusType::Ethernet)],
        nodes: vec![node],
    };
    let address = NodeAddress::new(3, 5);

    let mut sequences = sequences_for(sysdef, vec![true]);
    sequences.activate_flashloader(true).unwrap();

    let calls = sequences.driver().calls();
    // no CAN broadcast window on Ethernet
    assert!(!calls.contains(&DriverCall::BroadcastEnterPreProgrammingSession));
    let reconnect = sequences
        .driver()
        .position_of(|call| *call == DriverCall::ReconnectNode { node: address })
        .unwrap();
    let session = sequences
        .driver()
        .position_of(|call| *call == DriverCall::SetPreProgrammingMode { node: address })
        .unwrap();
    assert!(reconnect < session);
}

#[test]
fn stw_node_activation_uses_reset_flash_and_wakeup() {
    let sysdef = SystemDefinition {
        buses: vec![Bus::new("CAN1", 1, BusType::Can)],
        nodes: vec![stw_node("OldTimer", 0, 9)],
    };
    let address = NodeAddress::new(1, 9);

    let mut sequences = sequences_for(sysdef, vec![true]);
    sequences.activate_flashloader(true).unwrap();

    let calls = sequences.driver().calls();
    assert!(calls.contains(&DriverCall::StwRequestNodeResetBroadcast));
    assert!(calls.contains(&DriverCall::StwSendFlash { node: address }));
    assert!(calls.contains(&DriverCall::StwWakeupLocalId { node: address }));
    // no openSYDE broadcasts for a pure STW bus
    assert!(!calls.contains(&DriverCall::BroadcastRequestProgramming));
}

#[test]
fn stw_wakeup_failure_latches_node_and_returns_warn() {
    let sysdef = SystemDefinition {
        buses: vec![Bus::new("CAN1", 1, BusType::Can)],
        nodes: vec![stw_node("OldTimer", 0, 9)],
    };
    let address = NodeAddress::new(1, 9);

    let mut sequences = sequences_for(sysdef, vec![true]);
    sequences.driver_mut().script_error(
        ServiceId::StwWakeupLocalId,
        Some(address),
        DriverError::Transport("no answer".to_string()),
    );

    let result = sequences.activate_flashloader(false);
    assert_eq!(result, Err(Error::Warn));
    assert!(!sequences.is_node_reachable(0));
}

// STW update -------------------------------------------------------------------------------------

#[test]
fn stw_update_delegates_to_do_flash_and_forwards_progress() {
    let temp = tempfile::tempdir().unwrap();
    let hex_path = write_file(temp.path(), "legacy.hex", b"raw hex");
    let address = NodeAddress::new(1, 9);

    let sysdef = SystemDefinition {
        buses: vec![Bus::new("CAN1", 1, BusType::Can)],
        nodes: vec![stw_node("OldTimer", 0, 9)],
    };
    let mut sequences = sequences_for(sysdef, vec![true]);

    let jobs = vec![FlashJob::new(&[&hex_path])];
    sequences.update_system(&jobs, &[0]).unwrap();

    assert!(sequences
        .driver()
        .position_of(|call| matches!(
            call,
            DriverCall::StwDoFlash { node, .. } if *node == address
        ))
        .is_some());
    assert!(sequences.sink().contains_step(ProgressStep::UpdateSystemXflProgress));
}

#[test]
fn stw_update_abort_vote_returns_busy() {
    let temp = tempfile::tempdir().unwrap();
    let hex_path = write_file(temp.path(), "legacy.hex", b"raw hex");

    let sysdef = SystemDefinition {
        buses: vec![Bus::new("CAN1", 1, BusType::Can)],
        nodes: vec![stw_node("OldTimer", 0, 9)],
    };
    let mut sequences = sequences_for(sysdef, vec![true]);
    sequences
        .sink_mut()
        .abort_on_step_occurrence(ProgressStep::UpdateSystemXflProgress, 1);

    let jobs = vec![FlashJob::new(&[&hex_path])];
    let result = sequences.update_system(&jobs, &[0]);
    assert_eq!(result, Err(Error::Busy));
}

// Reading device information ---------------------------------------------------------------------

#[test]
fn read_device_information_collects_osy_details() {
    let node = NodeAddress::new(1, 5);

    let mut sequences = sequences_for(single_hex_node_system(), vec![true]);
    sequences.driver_mut().set_device_name(node, "ESX3CM");

    sequences.read_device_information(true).unwrap();

    let expected = vec![
        DriverCall::ReconnectNode { node },
        DriverCall::SetPreProgrammingMode { node },
        DriverCall::ReadDeviceName { node },
        DriverCall::SetSecurityLevel { node, level: 1 },
        DriverCall::ReadAllFlashBlockData { node },
        DriverCall::ReadFlashloaderInformation { node },
        DriverCall::DisconnectNode { node },
    ];
    assert_eq!(essentials(sequences.driver().calls()), expected);

    let infos = sequences.sink().osy_infos();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].0, 0);
    assert_eq!(infos[0].1.device_name, "ESX3CM");
}

#[test]
fn read_device_information_skips_block_data_for_file_based_node() {
    let node = NodeAddress::new(1, 7);

    let mut sequences = sequences_for(single_file_node_system(), vec![true]);
    sequences.driver_mut().set_device_name(node, "LOGGER");

    sequences.read_device_information(true).unwrap();

    assert!(sequences
        .driver()
        .position_of(|call| matches!(call, DriverCall::ReadAllFlashBlockData { .. }))
        .is_none());
    let infos = sequences.sink().osy_infos();
    assert_eq!(infos.len(), 1);
    assert!(infos[0].1.applications.is_empty());
}

#[test]
fn read_device_information_collects_stw_details() {
    let address = NodeAddress::new(1, 9);

    let sysdef = SystemDefinition {
        buses: vec![Bus::new("CAN1", 1, BusType::Can)],
        nodes: vec![stw_node("OldTimer", 0, 9)],
    };
    let mut sequences = sequences_for(sysdef, vec![true]);

    sequences.read_device_information(true).unwrap();

    let expected = vec![
        DriverCall::StwWakeupLocalId { node: address },
        DriverCall::StwReadDeviceInformation { node: address },
    ];
    assert_eq!(essentials(sequences.driver().calls()), expected);
    assert_eq!(sequences.sink().stw_infos().len(), 1);
}

// Routed update ----------------------------------------------------------------------------------

#[test]
fn routed_update_brackets_node_with_routing() {
    let temp = tempfile::tempdir().unwrap();
    let hex_path = write_file(temp.path(), "app.hex", b"raw hex");
    let target = NodeAddress::new(2, 20);

    let mut sequences = sequences_for(routed_system(), vec![true, true]);
    sequences.driver_mut().add_route(1, 1, vec![0]);
    sequences.driver_mut().set_device_name(target, "ESX3CM");

    let mut image = esx_image();
    image.areas.truncate(1);
    let mut reader = MemoryHexFileReader::new();
    reader.add_image("app.hex", image);
    sequences.set_hex_file_reader(Box::new(reader));

    let jobs = vec![FlashJob::default(), FlashJob::new(&[&hex_path])];
    sequences.update_system(&jobs, &[1]).unwrap();

    let start = sequences
        .driver()
        .position_of(|call| *call == DriverCall::StartRouting { node_index: 1 })
        .unwrap();
    let download = sequences
        .driver()
        .position_of(|call| matches!(call, DriverCall::RequestDownload { .. }))
        .unwrap();
    let stop = sequences
        .driver()
        .position_of(|call| *call == DriverCall::StopRouting { node_index: 1 })
        .unwrap();
    assert!(start < download && download < stop);
    assert_eq!(
        sequences.driver().start_routing_count(1),
        sequences.driver().stop_routing_count(1)
    );
}
