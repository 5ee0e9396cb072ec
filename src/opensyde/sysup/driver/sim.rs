use crate::opensyde::sysup::driver::{ComDriver, DriverError, RoutingError};
use crate::opensyde::sysup::info::{FlashBlockInfo, FlashloaderInformation, StwDeviceInformation};
use crate::opensyde::sysup::sysdef::NodeAddress;

use std::collections::HashMap;

// Driver call trace ------------------------------------------------------------------------------

///
/// One recorded driver call with its salient arguments.
///
/// The simulator records every call in order; tests assert their expectations against this
/// trace (service order, routing balance, transfer chunking, ...).
///
#[derive(Debug, PartialEq, Clone)]
pub enum DriverCall {
    BroadcastRequestProgramming,
    BroadcastEcuReset {
        reset_type: u8,
    },
    BroadcastEnterPreProgrammingSession,
    RequestProgramming {
        node: NodeAddress,
    },
    SetPreProgrammingMode {
        node: NodeAddress,
    },
    SetProgrammingMode {
        node: NodeAddress,
    },
    SetSecurityLevel {
        node: NodeAddress,
        level: u8,
    },
    ReadDeviceName {
        node: NodeAddress,
    },
    ReadAllFlashBlockData {
        node: NodeAddress,
    },
    ReadFlashloaderInformation {
        node: NodeAddress,
    },
    CheckFlashMemoryAvailable {
        node: NodeAddress,
        offset: u32,
        size: u32,
    },
    RequestDownload {
        node: NodeAddress,
        offset: u32,
        size: u32,
    },
    RequestFileTransfer {
        node: NodeAddress,
        file_name: String,
        size: u32,
    },
    TransferData {
        node: NodeAddress,
        block_sequence_counter: u8,
        size: usize,
    },
    RequestTransferExitAddressBased {
        node: NodeAddress,
        check_signature: bool,
        signature_address: u32,
    },
    RequestTransferExitFileBased {
        node: NodeAddress,
        crc: u32,
    },
    WriteFingerprint {
        node: NodeAddress,
        date: [u8; 3],
        time: [u8; 3],
        user_name: String,
    },
    EcuReset {
        node: NodeAddress,
        reset_type: u8,
    },
    StwRequestNodeResetBroadcast,
    StwRequestNodeReset {
        node: NodeAddress,
    },
    StwSendFlash {
        node: NodeAddress,
    },
    StwWakeupLocalId {
        node: NodeAddress,
    },
    StwReadDeviceInformation {
        node: NodeAddress,
    },
    StwDoFlash {
        node: NodeAddress,
        file_path: String,
    },
    StwNetReset {
        node: NodeAddress,
    },
    ReconnectNode {
        node: NodeAddress,
    },
    DisconnectNode {
        node: NodeAddress,
    },
    SetPollingTimeout {
        node: NodeAddress,
        timeout_ms: u32,
    },
    ResetPollingTimeout {
        node: NodeAddress,
    },
    ClearReceiveQueue,
    StartRouting {
        node_index: usize,
    },
    StopRouting {
        node_index: usize,
    },
}

// Service id -------------------------------------------------------------------------------------

/// Identifies a driver service for error scripting
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum ServiceId {
    BroadcastRequestProgramming,
    BroadcastEcuReset,
    BroadcastEnterPreProgrammingSession,
    RequestProgramming,
    SetPreProgrammingMode,
    SetProgrammingMode,
    SetSecurityLevel,
    ReadDeviceName,
    ReadAllFlashBlockData,
    ReadFlashloaderInformation,
    CheckFlashMemoryAvailable,
    RequestDownload,
    RequestFileTransfer,
    TransferData,
    RequestTransferExitAddressBased,
    RequestTransferExitFileBased,
    WriteFingerprint,
    EcuReset,
    StwRequestNodeResetBroadcast,
    StwRequestNodeReset,
    StwSendFlash,
    StwWakeupLocalId,
    StwReadDeviceInformation,
    StwDoFlash,
    StwNetReset,
    ReconnectNode,
    DisconnectNode,
}

// Driver simulator -------------------------------------------------------------------------------

///
/// Scripted communication driver for testing.
///
/// Responses (device names, block data, max block length, routes) and failures are
/// configured up front; every call is recorded in an ordered trace.
///
pub struct DriverSimulator {
    calls: Vec<DriverCall>,

    device_names: HashMap<NodeAddress, String>,
    flash_blocks: HashMap<NodeAddress, Vec<FlashBlockInfo>>,
    flashloader_information: HashMap<NodeAddress, FlashloaderInformation>,
    stw_information: HashMap<NodeAddress, StwDeviceInformation>,
    max_block_length: u32,

    /// node index -> (target bus index, node indexes of the route points)
    routes: HashMap<usize, (usize, Vec<usize>)>,

    scripted_errors: HashMap<(ServiceId, Option<NodeAddress>), DriverError>,
    scripted_routing_errors: HashMap<usize, RoutingError>,
}

impl Default for DriverSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverSimulator {
    pub fn new() -> DriverSimulator {
        DriverSimulator {
            calls: Vec::new(),
            device_names: HashMap::new(),
            flash_blocks: HashMap::new(),
            flashloader_information: HashMap::new(),
            stw_information: HashMap::new(),
            max_block_length: 64,
            routes: HashMap::new(),
            scripted_errors: HashMap::new(),
            scripted_routing_errors: HashMap::new(),
        }
    }

    // Scripting ----------------------------------------------------------------------------

    pub fn set_device_name(&mut self, node: NodeAddress, name: &str) {
        self.device_names.insert(node, name.to_string());
    }

    pub fn set_flash_blocks(&mut self, node: NodeAddress, blocks: Vec<FlashBlockInfo>) {
        self.flash_blocks.insert(node, blocks);
    }

    pub fn set_flashloader_information(&mut self, node: NodeAddress, info: FlashloaderInformation) {
        self.flashloader_information.insert(node, info);
    }

    pub fn set_stw_information(&mut self, node: NodeAddress, info: StwDeviceInformation) {
        self.stw_information.insert(node, info);
    }

    pub fn set_max_block_length(&mut self, max_block_length: u32) {
        self.max_block_length = max_block_length;
    }

    /// Declare that the node with the given index is reached via routing: over the route
    /// point nodes (in hop order) onto the given target bus.
    pub fn add_route(&mut self, node_index: usize, target_bus_index: usize, points: Vec<usize>) {
        self.routes.insert(node_index, (target_bus_index, points));
    }

    /// Let every call of `service` fail; `node` restricts the script to one target
    /// (`None` matches any target including broadcasts).
    pub fn script_error(&mut self, service: ServiceId, node: Option<NodeAddress>, error: DriverError) {
        self.scripted_errors.insert((service, node), error);
    }

    /// Let route setup to the given node fail
    pub fn script_routing_error(&mut self, node_index: usize, error: RoutingError) {
        self.scripted_routing_errors.insert(node_index, error);
    }

    // Trace access -------------------------------------------------------------------------

    pub fn calls(&self) -> &[DriverCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Number of successful `start_routing` calls for the node
    pub fn start_routing_count(&self, node_index: usize) -> usize {
        self.calls
            .iter()
            .filter(|call| **call == DriverCall::StartRouting { node_index })
            .count()
    }

    /// Number of `stop_routing` calls for the node
    pub fn stop_routing_count(&self, node_index: usize) -> usize {
        self.calls
            .iter()
            .filter(|call| **call == DriverCall::StopRouting { node_index })
            .count()
    }

    /// All recorded transfer data calls for one node as (sequence counter, payload size)
    pub fn transfer_data_trace(&self, node: NodeAddress) -> Vec<(u8, usize)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                DriverCall::TransferData {
                    node: called_node,
                    block_sequence_counter,
                    size,
                } if *called_node == node => Some((*block_sequence_counter, *size)),
                _ => None,
            })
            .collect()
    }

    /// Position of the first matching call in the trace
    pub fn position_of<F>(&self, predicate: F) -> Option<usize>
    where
        F: Fn(&DriverCall) -> bool,
    {
        self.calls.iter().position(predicate)
    }

    // Private helpers ----------------------------------------------------------------------

    fn check_scripted(
        &mut self,
        service: ServiceId,
        node: Option<NodeAddress>,
    ) -> Result<(), DriverError> {
        if let Some(error) = self.scripted_errors.get(&(service, node)) {
            return Err(error.clone());
        }
        if node.is_some() {
            if let Some(error) = self.scripted_errors.get(&(service, None)) {
                return Err(error.clone());
            }
        }
        Ok(())
    }
}

impl ComDriver for DriverSimulator {
    fn osy_broadcast_request_programming(&mut self) -> Result<(), DriverError> {
        self.calls.push(DriverCall::BroadcastRequestProgramming);
        self.check_scripted(ServiceId::BroadcastRequestProgramming, None)
    }

    fn osy_broadcast_ecu_reset(&mut self, reset_type: u8) -> Result<(), DriverError> {
        self.calls.push(DriverCall::BroadcastEcuReset { reset_type });
        self.check_scripted(ServiceId::BroadcastEcuReset, None)
    }

    fn osy_can_broadcast_enter_pre_programming_session(&mut self) -> Result<(), DriverError> {
        self.calls
            .push(DriverCall::BroadcastEnterPreProgrammingSession);
        self.check_scripted(ServiceId::BroadcastEnterPreProgrammingSession, None)
    }

    fn osy_request_programming(&mut self, node: NodeAddress) -> Result<(), DriverError> {
        self.calls.push(DriverCall::RequestProgramming { node });
        self.check_scripted(ServiceId::RequestProgramming, Some(node))
    }

    fn osy_set_pre_programming_mode(&mut self, node: NodeAddress) -> Result<(), DriverError> {
        self.calls.push(DriverCall::SetPreProgrammingMode { node });
        self.check_scripted(ServiceId::SetPreProgrammingMode, Some(node))
    }

    fn osy_set_programming_mode(&mut self, node: NodeAddress) -> Result<(), DriverError> {
        self.calls.push(DriverCall::SetProgrammingMode { node });
        self.check_scripted(ServiceId::SetProgrammingMode, Some(node))
    }

    fn osy_set_security_level(&mut self, node: NodeAddress, level: u8) -> Result<(), DriverError> {
        self.calls.push(DriverCall::SetSecurityLevel { node, level });
        self.check_scripted(ServiceId::SetSecurityLevel, Some(node))
    }

    fn osy_read_device_name(&mut self, node: NodeAddress) -> Result<String, DriverError> {
        self.calls.push(DriverCall::ReadDeviceName { node });
        self.check_scripted(ServiceId::ReadDeviceName, Some(node))?;
        match self.device_names.get(&node) {
            Some(name) => Ok(name.clone()),
            None => Err(DriverError::Transport(format!(
                "no device name scripted for {}",
                node
            ))),
        }
    }

    fn osy_read_all_flash_block_data(
        &mut self,
        node: NodeAddress,
    ) -> Result<Vec<FlashBlockInfo>, DriverError> {
        self.calls.push(DriverCall::ReadAllFlashBlockData { node });
        self.check_scripted(ServiceId::ReadAllFlashBlockData, Some(node))?;
        Ok(self.flash_blocks.get(&node).cloned().unwrap_or_default())
    }

    fn osy_read_flashloader_information(
        &mut self,
        node: NodeAddress,
    ) -> Result<FlashloaderInformation, DriverError> {
        self.calls.push(DriverCall::ReadFlashloaderInformation { node });
        self.check_scripted(ServiceId::ReadFlashloaderInformation, Some(node))?;
        Ok(self
            .flashloader_information
            .get(&node)
            .cloned()
            .unwrap_or_default())
    }

    fn osy_check_flash_memory_available(
        &mut self,
        node: NodeAddress,
        offset: u32,
        size: u32,
    ) -> Result<(), DriverError> {
        self.calls
            .push(DriverCall::CheckFlashMemoryAvailable { node, offset, size });
        self.check_scripted(ServiceId::CheckFlashMemoryAvailable, Some(node))
    }

    fn osy_request_download(
        &mut self,
        node: NodeAddress,
        offset: u32,
        size: u32,
    ) -> Result<u32, DriverError> {
        self.calls
            .push(DriverCall::RequestDownload { node, offset, size });
        self.check_scripted(ServiceId::RequestDownload, Some(node))?;
        Ok(self.max_block_length)
    }

    fn osy_request_file_transfer(
        &mut self,
        node: NodeAddress,
        file_name: &str,
        size: u32,
    ) -> Result<u32, DriverError> {
        self.calls.push(DriverCall::RequestFileTransfer {
            node,
            file_name: file_name.to_string(),
            size,
        });
        self.check_scripted(ServiceId::RequestFileTransfer, Some(node))?;
        Ok(self.max_block_length)
    }

    fn osy_transfer_data(
        &mut self,
        node: NodeAddress,
        block_sequence_counter: u8,
        data: &[u8],
    ) -> Result<(), DriverError> {
        self.calls.push(DriverCall::TransferData {
            node,
            block_sequence_counter,
            size: data.len(),
        });
        self.check_scripted(ServiceId::TransferData, Some(node))
    }

    fn osy_request_transfer_exit_address_based(
        &mut self,
        node: NodeAddress,
        check_signature: bool,
        signature_address: u32,
    ) -> Result<(), DriverError> {
        self.calls.push(DriverCall::RequestTransferExitAddressBased {
            node,
            check_signature,
            signature_address,
        });
        self.check_scripted(ServiceId::RequestTransferExitAddressBased, Some(node))
    }

    fn osy_request_transfer_exit_file_based(
        &mut self,
        node: NodeAddress,
        crc: u32,
    ) -> Result<(), DriverError> {
        self.calls
            .push(DriverCall::RequestTransferExitFileBased { node, crc });
        self.check_scripted(ServiceId::RequestTransferExitFileBased, Some(node))
    }

    fn osy_write_application_software_fingerprint(
        &mut self,
        node: NodeAddress,
        date: [u8; 3],
        time: [u8; 3],
        user_name: &str,
    ) -> Result<(), DriverError> {
        self.calls.push(DriverCall::WriteFingerprint {
            node,
            date,
            time,
            user_name: user_name.to_string(),
        });
        self.check_scripted(ServiceId::WriteFingerprint, Some(node))
    }

    fn osy_ecu_reset(&mut self, node: NodeAddress, reset_type: u8) -> Result<(), DriverError> {
        self.calls.push(DriverCall::EcuReset { node, reset_type });
        self.check_scripted(ServiceId::EcuReset, Some(node))
    }

    fn stw_request_node_reset_broadcast(&mut self) -> Result<(), DriverError> {
        self.calls.push(DriverCall::StwRequestNodeResetBroadcast);
        self.check_scripted(ServiceId::StwRequestNodeResetBroadcast, None)
    }

    fn stw_request_node_reset(&mut self, node: NodeAddress) -> Result<(), DriverError> {
        self.calls.push(DriverCall::StwRequestNodeReset { node });
        self.check_scripted(ServiceId::StwRequestNodeReset, Some(node))
    }

    fn stw_send_flash(&mut self, node: NodeAddress) -> Result<(), DriverError> {
        self.calls.push(DriverCall::StwSendFlash { node });
        self.check_scripted(ServiceId::StwSendFlash, Some(node))
    }

    fn stw_wakeup_local_id(&mut self, node: NodeAddress) -> Result<(), DriverError> {
        self.calls.push(DriverCall::StwWakeupLocalId { node });
        self.check_scripted(ServiceId::StwWakeupLocalId, Some(node))
    }

    fn stw_read_device_information(
        &mut self,
        node: NodeAddress,
    ) -> Result<StwDeviceInformation, DriverError> {
        self.calls.push(DriverCall::StwReadDeviceInformation { node });
        self.check_scripted(ServiceId::StwReadDeviceInformation, Some(node))?;
        Ok(self.stw_information.get(&node).cloned().unwrap_or_default())
    }

    fn stw_do_flash(
        &mut self,
        node: NodeAddress,
        file_path: &str,
        progress: &mut dyn FnMut(u8, &str) -> bool,
    ) -> Result<(), DriverError> {
        self.calls.push(DriverCall::StwDoFlash {
            node,
            file_path: file_path.to_string(),
        });
        self.check_scripted(ServiceId::StwDoFlash, Some(node))?;

        // coarse simulated progress trace
        for percent in [0u8, 50u8, 100u8] {
            if progress(percent, "flashing ...") {
                return Err(DriverError::Aborted);
            }
        }
        Ok(())
    }

    fn stw_net_reset(&mut self, node: NodeAddress) -> Result<(), DriverError> {
        self.calls.push(DriverCall::StwNetReset { node });
        self.check_scripted(ServiceId::StwNetReset, Some(node))
    }

    fn reconnect_node(&mut self, node: NodeAddress) -> Result<(), DriverError> {
        self.calls.push(DriverCall::ReconnectNode { node });
        self.check_scripted(ServiceId::ReconnectNode, Some(node))
    }

    fn disconnect_node(&mut self, node: NodeAddress) -> Result<(), DriverError> {
        self.calls.push(DriverCall::DisconnectNode { node });
        self.check_scripted(ServiceId::DisconnectNode, Some(node))
    }

    fn set_polling_timeout(&mut self, node: NodeAddress, timeout_ms: u32) {
        self.calls
            .push(DriverCall::SetPollingTimeout { node, timeout_ms });
    }

    fn reset_polling_timeout(&mut self, node: NodeAddress) {
        self.calls.push(DriverCall::ResetPollingTimeout { node });
    }

    fn clear_receive_queue(&mut self) {
        self.calls.push(DriverCall::ClearReceiveQueue);
    }

    fn routing_bus_index(&self, node_index: usize) -> Option<usize> {
        self.routes
            .get(&node_index)
            .map(|(bus_index, _)| *bus_index)
    }

    fn route_points(&self, node_index: usize) -> Vec<usize> {
        self.routes
            .get(&node_index)
            .map(|(_, points)| points.clone())
            .unwrap_or_default()
    }

    fn routing_point_maximum(&self) -> usize {
        self.routes
            .values()
            .map(|(_, points)| points.len())
            .max()
            .unwrap_or(0)
    }

    fn start_routing(&mut self, node_index: usize) -> Result<(), RoutingError> {
        self.calls.push(DriverCall::StartRouting { node_index });
        match self.scripted_routing_errors.get(&node_index) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn stop_routing(&mut self, node_index: usize) {
        self.calls.push(DriverCall::StopRouting { node_index });
    }
}

// Tests ------------------------------------------------------------------------------------------
