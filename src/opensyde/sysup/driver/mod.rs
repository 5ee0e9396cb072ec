pub mod sim;

use crate::opensyde::sysup::info::{FlashBlockInfo, FlashloaderInformation, StwDeviceInformation};
use crate::opensyde::sysup::sysdef::NodeAddress;

use std::fmt;

// Reset types ------------------------------------------------------------------------------------

/// ECU reset sub function: reset into the flashloader
pub const RESET_TYPE_TO_FLASHLOADER: u8 = 0x60;

/// ECU reset sub function: behave like a power cycle
pub const RESET_TYPE_KEY_OFF_ON: u8 = 0x02;

// Driver error -----------------------------------------------------------------------------------

///
/// Error reported by the communication driver for one service.
///
#[derive(Debug, PartialEq, Clone)]
pub enum DriverError {
    /// No response within the active polling timeout
    Timeout,

    /// Server sent a negative response with this code
    Nack(u8),

    /// Transport layer problem with description
    Transport(String),

    /// The operation was aborted through its progress callback
    Aborted,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DriverError::Timeout => write!(f, "service timed out"),
            DriverError::Nack(code) => write!(f, "negative response code 0x{:02X}", code),
            DriverError::Transport(text) => write!(f, "transport error: {}", text),
            DriverError::Aborted => write!(f, "operation aborted"),
        }
    }
}

///
/// Failure to set up a route to a node.
///
/// `error_index` names the node on the route at which the setup failed, so the caller can
/// mark that hop unreachable as well.
///
#[derive(Debug, PartialEq, Clone)]
pub struct RoutingError {
    pub error_index: usize,
    pub error: DriverError,
}

// Com driver trait -------------------------------------------------------------------------------

///
/// Service surface of the communication driver as seen by the update sequences.
///
/// The driver owns the transports and both flashloader protocol implementations; the
/// sequences only decide which service to call on which node in which order. Targeted
/// services address servers by `NodeAddress`; routing bookkeeping works with node indexes
/// into the system definition.
///
/// Polling timeouts are a driver global resource: a caller that changes them must restore
/// the default via `reset_polling_timeout` before handing the driver back.
///
pub trait ComDriver {
    // openSYDE broadcast services (local bus only) ------------------------------------------

    /// Broadcast the RequestProgramming flag to all openSYDE nodes on the local bus
    fn osy_broadcast_request_programming(&mut self) -> Result<(), DriverError>;

    /// Broadcast an ECU reset request of the given type on the local bus
    fn osy_broadcast_ecu_reset(&mut self, reset_type: u8) -> Result<(), DriverError>;

    /// CAN only: broadcast one EnterPreProgrammingSession request on the local bus
    fn osy_can_broadcast_enter_pre_programming_session(&mut self) -> Result<(), DriverError>;

    // openSYDE targeted services ------------------------------------------------------------

    /// Set the RequestProgramming flag of one node (used for routed nodes)
    fn osy_request_programming(&mut self, node: NodeAddress) -> Result<(), DriverError>;

    /// Request the PreProgramming session (implicitly confirms the node is in flashloader)
    fn osy_set_pre_programming_mode(&mut self, node: NodeAddress) -> Result<(), DriverError>;

    /// Request the Programming session with security level 3
    fn osy_set_programming_mode(&mut self, node: NodeAddress) -> Result<(), DriverError>;

    /// Activate the given security level
    fn osy_set_security_level(&mut self, node: NodeAddress, level: u8) -> Result<(), DriverError>;

    /// Read the device name of the node
    fn osy_read_device_name(&mut self, node: NodeAddress) -> Result<String, DriverError>;

    /// Read information about all flash blocks (address based devices only)
    fn osy_read_all_flash_block_data(
        &mut self,
        node: NodeAddress,
    ) -> Result<Vec<FlashBlockInfo>, DriverError>;

    /// Read the general flashloader information of the node
    fn osy_read_flashloader_information(
        &mut self,
        node: NodeAddress,
    ) -> Result<FlashloaderInformation, DriverError>;

    /// Ask the node whether the memory range can be programmed
    fn osy_check_flash_memory_available(
        &mut self,
        node: NodeAddress,
        offset: u32,
        size: u32,
    ) -> Result<(), DriverError>;

    /// Announce a download of `size` bytes to `offset`; returns the maximum block length the
    /// node accepts for the subsequent transfers
    fn osy_request_download(
        &mut self,
        node: NodeAddress,
        offset: u32,
        size: u32,
    ) -> Result<u32, DriverError>;

    /// Announce a file transfer of `size` bytes; returns the maximum block length
    fn osy_request_file_transfer(
        &mut self,
        node: NodeAddress,
        file_name: &str,
        size: u32,
    ) -> Result<u32, DriverError>;

    /// Transfer one data block
    fn osy_transfer_data(
        &mut self,
        node: NodeAddress,
        block_sequence_counter: u8,
        data: &[u8],
    ) -> Result<(), DriverError>;

    /// Finalize an address based transfer, optionally triggering the signature check
    fn osy_request_transfer_exit_address_based(
        &mut self,
        node: NodeAddress,
        check_signature: bool,
        signature_address: u32,
    ) -> Result<(), DriverError>;

    /// Finalize a file based transfer, passing the CRC over the transferred payload
    fn osy_request_transfer_exit_file_based(
        &mut self,
        node: NodeAddress,
        crc: u32,
    ) -> Result<(), DriverError>;

    /// Write the application software fingerprint (date, time, user name)
    fn osy_write_application_software_fingerprint(
        &mut self,
        node: NodeAddress,
        date: [u8; 3],
        time: [u8; 3],
        user_name: &str,
    ) -> Result<(), DriverError>;

    /// Send an ECU reset request of the given type to one node
    fn osy_ecu_reset(&mut self, node: NodeAddress, reset_type: u8) -> Result<(), DriverError>;

    // STW Flashloader services --------------------------------------------------------------

    /// Send the configured reset request messages for all STW nodes on the local bus
    fn stw_request_node_reset_broadcast(&mut self) -> Result<(), DriverError>;

    /// Send the configured reset request message for one STW node
    fn stw_request_node_reset(&mut self, node: NodeAddress) -> Result<(), DriverError>;

    /// Send one "FLASH" message on the bus of the given node
    fn stw_send_flash(&mut self, node: NodeAddress) -> Result<(), DriverError>;

    /// Wake up the node addressed by its local id
    fn stw_wakeup_local_id(&mut self, node: NodeAddress) -> Result<(), DriverError>;

    /// Read device information (basic data and checksum blocks) from the node
    fn stw_read_device_information(
        &mut self,
        node: NodeAddress,
    ) -> Result<StwDeviceInformation, DriverError>;

    /// Run the complete STW Flashloader flash procedure for one hex file.
    ///
    /// The driver reports its own progress through `progress`; a `true` return value from
    /// the callback aborts the procedure and the service returns `DriverError::Aborted`.
    fn stw_do_flash(
        &mut self,
        node: NodeAddress,
        file_path: &str,
        progress: &mut dyn FnMut(u8, &str) -> bool,
    ) -> Result<(), DriverError>;

    /// Send the NET reset request on the bus of the given node
    fn stw_net_reset(&mut self, node: NodeAddress) -> Result<(), DriverError>;

    // Connection handling -------------------------------------------------------------------

    /// (Re-)establish the connection to one node; only has an effect on Ethernet
    fn reconnect_node(&mut self, node: NodeAddress) -> Result<(), DriverError>;

    /// Drop the connection to one node
    fn disconnect_node(&mut self, node: NodeAddress) -> Result<(), DriverError>;

    /// Set the polling timeout used for targeted services
    fn set_polling_timeout(&mut self, node: NodeAddress, timeout_ms: u32);

    /// Restore the default polling timeout
    fn reset_polling_timeout(&mut self, node: NodeAddress);

    /// Drop all unprocessed received messages
    fn clear_receive_queue(&mut self);

    // Routing -------------------------------------------------------------------------------

    /// Bus index the node is reached on if routing is required; `None` for nodes on the
    /// local bus
    fn routing_bus_index(&self, node_index: usize) -> Option<usize>;

    /// Indexes of the nodes forwarding traffic on the route to the given node, in hop order
    fn route_points(&self, node_index: usize) -> Vec<usize>;

    /// Number of hops on the route to the given node
    fn routing_point_count(&self, node_index: usize) -> usize {
        self.route_points(node_index).len()
    }

    /// Longest route (in hops) over all nodes
    fn routing_point_maximum(&self) -> usize;

    /// Set up the route to the given node
    fn start_routing(&mut self, node_index: usize) -> Result<(), RoutingError>;

    /// Tear down the route to the given node
    fn stop_routing(&mut self, node_index: usize);
}
