mod activate;
mod flash_osy;
mod read_info;
mod reset;
mod update;

use crate::opensyde::sysup::driver::ComDriver;
use crate::opensyde::sysup::fingerprint::{FingerprintSource, SystemFingerprintSource};
use crate::opensyde::sysup::firmware::{HexFileReader, MemoryHexFileReader};
use crate::opensyde::sysup::progress::{ProgressEvent, ProgressSink, ProgressStep};
use crate::opensyde::sysup::sysdef::{
    BusType, DiagnosticServerType, FlashloaderType, NodeAddress, SystemDefinition,
};
use crate::opensyde::sysup::Error;

use std::time::Duration;

// Timing -----------------------------------------------------------------------------------------

///
/// Wait and scan times used while driving nodes through resets.
///
/// The defaults are the values the flashloader implementations are known to cope with; they
/// should not be tightened without evidence from real hardware. Tests shrink them to keep
/// the suite fast.
///
#[derive(Debug, Clone)]
pub struct SequenceTiming {
    /// How long to spam the enter-flashloader broadcasts on a CAN local bus
    pub can_flashloader_scan: Duration,

    /// Pause between two enter-flashloader broadcasts
    pub flash_broadcast_interval: Duration,

    /// Wait after a broadcast reset on an Ethernet local bus (targets re-init their NIC)
    pub ethernet_boot_wait: Duration,

    /// Wait after resetting a routed node before reconnecting across the route
    pub routed_reset_wait: Duration,

    /// How long to spam the "FLASH" message towards a routed STW node
    pub routed_xfl_scan: Duration,

    /// Wait before stopping a route after a reset request (the reset has no response; the
    /// routers need time to actually forward it)
    pub reset_forward_wait: Duration,
}

impl Default for SequenceTiming {
    fn default() -> Self {
        SequenceTiming {
            can_flashloader_scan: Duration::from_millis(5000),
            flash_broadcast_interval: Duration::from_millis(5),
            ethernet_boot_wait: Duration::from_millis(5500),
            routed_reset_wait: Duration::from_millis(2000),
            routed_xfl_scan: Duration::from_millis(1000),
            reset_forward_wait: Duration::from_millis(20),
        }
    }
}

impl SequenceTiming {
    /// All waits zeroed; for tests against a simulated driver
    pub fn immediate() -> SequenceTiming {
        SequenceTiming {
            can_flashloader_scan: Duration::ZERO,
            flash_broadcast_interval: Duration::ZERO,
            ethernet_boot_wait: Duration::ZERO,
            routed_reset_wait: Duration::ZERO,
            routed_xfl_scan: Duration::ZERO,
            reset_forward_wait: Duration::ZERO,
        }
    }
}

// Update sequences -------------------------------------------------------------------------------

///
/// Driver of the system update sequences.
///
/// Owns the communication driver and the progress sink for the duration of the procedure
/// and keeps the dynamic state: which nodes are active, which have timed out, and which
/// server is currently being talked to.
///
/// The public sequences are `activate_flashloader`, `read_device_information`,
/// `update_system` and `reset_system`; they are expected to be called in that order (reset
/// being optional after a failed update as well).
///
/// All sequences run on the calling thread; service calls and waits block.
///
pub struct UpdateSequences<D, S>
where
    D: ComDriver,
    S: ProgressSink,
{
    sysdef: SystemDefinition,
    active_nodes: Vec<bool>,
    active_bus_index: usize,

    driver: D,
    sink: S,
    hex_reader: Box<dyn HexFileReader>,
    fingerprint: Box<dyn FingerprintSource>,
    timing: SequenceTiming,

    /// Latch: node (or a hop on its route) ran into a service timeout
    timeout_nodes: Vec<bool>,

    /// Address of the server currently being worked with
    current_node: NodeAddress,

    /// Index of the node currently being worked with
    current_node_index: usize,

    /// Index of the file currently being flashed
    current_file: usize,
}

impl<D, S> UpdateSequences<D, S>
where
    D: ComDriver,
    S: ProgressSink,
{
    ///
    /// Set up the sequences for one system.
    ///
    /// `active_nodes` must carry one flag per node of the system definition;
    /// `active_bus_index` is the bus the client is attached to.
    ///
    pub fn new(
        sysdef: SystemDefinition,
        active_nodes: Vec<bool>,
        active_bus_index: usize,
        driver: D,
        sink: S,
    ) -> Result<Self, Error> {
        if active_nodes.len() != sysdef.nodes.len() {
            return Err(Error::Overflow(format!(
                "Size of active node flags ({}) does not match the number of nodes ({})",
                active_nodes.len(),
                sysdef.nodes.len()
            )));
        }
        if active_bus_index >= sysdef.buses.len() {
            return Err(Error::Range(format!(
                "Active bus index {} out of range ({} buses)",
                active_bus_index,
                sysdef.buses.len()
            )));
        }

        let node_count = sysdef.nodes.len();
        Ok(UpdateSequences {
            sysdef,
            active_nodes,
            active_bus_index,
            driver,
            sink,
            hex_reader: Box::new(MemoryHexFileReader::new()),
            fingerprint: Box::new(SystemFingerprintSource::new()),
            timing: SequenceTiming::default(),
            timeout_nodes: vec![false; node_count],
            current_node: NodeAddress::default(),
            current_node_index: 0,
            current_file: 0,
        })
    }

    // Configuration ------------------------------------------------------------------------

    pub fn set_hex_file_reader(&mut self, reader: Box<dyn HexFileReader>) {
        self.hex_reader = reader;
    }

    pub fn set_fingerprint_source(&mut self, source: Box<dyn FingerprintSource>) {
        self.fingerprint = source;
    }

    pub fn set_timing(&mut self, timing: SequenceTiming) {
        self.timing = timing;
    }

    // Access -------------------------------------------------------------------------------

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Hand back driver and sink, consuming the sequences
    pub fn into_parts(self) -> (D, S) {
        (self.driver, self.sink)
    }

    /// Address of the server the sequences worked with most recently
    pub fn current_node(&self) -> NodeAddress {
        self.current_node
    }

    /// Index of the file flashed most recently (within the current node's job)
    pub fn current_file(&self) -> usize {
        self.current_file
    }

    ///
    /// Whether the node can currently be talked to.
    ///
    /// False once the node itself or any node on its route has run into a service timeout
    /// during a previous sequence step.
    ///
    pub fn is_node_reachable(&self, node_index: usize) -> bool {
        if self.timeout_nodes[node_index] {
            return false;
        }
        self.driver
            .route_points(node_index)
            .iter()
            .all(|route_node| !self.timeout_nodes[*route_node])
    }

    // Classification -----------------------------------------------------------------------

    ///
    /// Check whether the node is an active update participant on the given bus.
    ///
    /// Returns the flashloader protocol and the server address if the node is marked active
    /// and has a connected, update enabled interface on the bus.
    ///
    fn node_on_bus(
        &self,
        node_index: usize,
        bus_index: usize,
    ) -> Option<(FlashloaderType, NodeAddress)> {
        if !self.active_nodes[node_index] {
            return None;
        }
        let node = &self.sysdef.nodes[node_index];

        // a node is either a full openSYDE node or an STW Flashloader node
        if node.diagnostic_server == DiagnosticServerType::OpenSyde {
            debug_assert!(node.flashloader == FlashloaderType::OpenSyde);
        }

        for interface in &node.interfaces {
            if interface.bus_connected
                && interface.bus_index == Some(bus_index)
                && interface.update_enabled
            {
                let address =
                    NodeAddress::new(self.sysdef.buses[bus_index].bus_id, interface.node_id);
                return Some((node.flashloader, address));
            }
        }
        None
    }

    fn node_is_update_target(&self, node_index: usize) -> bool {
        self.sysdef.nodes[node_index].is_update_target()
    }

    // Reporting ----------------------------------------------------------------------------

    /// Sequence global progress report; returns the sink's abort vote
    fn report(&mut self, step: ProgressStep, error: Option<Error>, percent: u8, info: &str) -> bool {
        let event = ProgressEvent {
            step,
            error,
            percent,
            server: None,
            info: info.to_string(),
        };
        log::debug!("{:?} ({}%): {}", event.step, event.percent, event.info);
        self.sink.report(&event)
    }

    /// Progress report for the current server; returns the sink's abort vote
    fn report_server(
        &mut self,
        step: ProgressStep,
        error: Option<Error>,
        percent: u8,
        info: &str,
    ) -> bool {
        let event = ProgressEvent {
            step,
            error,
            percent,
            server: Some(self.current_node),
            info: info.to_string(),
        };
        log::debug!(
            "{:?} ({}%) [{}]: {}",
            event.step,
            event.percent,
            self.current_node,
            event.info
        );
        self.sink.report(&event)
    }

    // Connection helpers -------------------------------------------------------------------

    fn local_bus_id(&self) -> u8 {
        self.sysdef.buses[self.active_bus_index].bus_id
    }

    fn bus_type_of_current_node(&self) -> Option<BusType> {
        self.sysdef
            .buses
            .iter()
            .find(|bus| bus.bus_id == self.current_node.bus_id)
            .map(|bus| bus.bus_type)
    }

    ///
    /// Reconnect to the current server if its bus is Ethernet.
    ///
    /// A reset breaks the active TCP connection, so Ethernet nodes need a reconnect before
    /// the next targeted service. With `restart_routing` the route is re-established first;
    /// required for Ethernet-to-Ethernet routing where the reset tore the route down.
    ///
    fn reconnect_to_target_server(
        &mut self,
        restart_routing: bool,
        node_index: usize,
    ) -> Result<(), Error> {
        if self.bus_type_of_current_node() != Some(BusType::Ethernet) {
            return Ok(());
        }
        if restart_routing && self.current_node.bus_id != self.local_bus_id() {
            self.driver
                .start_routing(node_index)
                .map_err(|routing_error| Error::from_driver(routing_error.error))?;
        }
        self.driver
            .reconnect_node(self.current_node)
            .map_err(Error::from_driver)
    }

    ///
    /// Disconnect from the current server.
    ///
    /// For a routed Ethernet target the route is stopped instead, but only if
    /// `disconnect_on_ip_to_ip_routing` is set; while the route is still needed the
    /// connection must stay up.
    ///
    fn disconnect_from_target_server(&mut self, disconnect_on_ip_to_ip_routing: bool) {
        if self.current_node.bus_id == self.local_bus_id() {
            let _ = self.driver.disconnect_node(self.current_node);
        } else if self.bus_type_of_current_node() == Some(BusType::Ethernet)
            && disconnect_on_ip_to_ip_routing
        {
            self.driver.stop_routing(self.current_node_index);
        }
    }

    // Local bus scan -----------------------------------------------------------------------

    /// Any active update target with the given protocol directly on the local bus?
    fn any_active_on_local_bus(&self, protocol: FlashloaderType) -> bool {
        (0..self.sysdef.nodes.len()).any(|node_index| {
            matches!(self.node_on_bus(node_index, self.active_bus_index),
                Some((node_protocol, _)) if node_protocol == protocol)
        })
    }

    /// Address of one active STW Flashloader node on the local bus (for bus wide services)
    fn first_stw_device_on_local_bus(&self) -> Option<NodeAddress> {
        (0..self.sysdef.nodes.len()).find_map(|node_index| {
            match self.node_on_bus(node_index, self.active_bus_index) {
                Some((FlashloaderType::StwFlashloader, address)) => Some(address),
                _ => None,
            }
        })
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}
