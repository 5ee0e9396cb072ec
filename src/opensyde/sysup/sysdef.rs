use std::fmt;

// Bus --------------------------------------------------------------------------------------------

/// Transport type of a bus
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BusType {
    Can,
    Ethernet,
}

///
/// One bus of the system definition.
///
/// The bus id is the one-byte identifier used on the wire; the index of the bus within
/// `SystemDefinition::buses` is what the routing layer works with.
///
#[derive(Debug, Clone)]
pub struct Bus {
    pub name: String,
    pub bus_id: u8,
    pub bus_type: BusType,
}

impl Bus {
    pub fn new(name: &str, bus_id: u8, bus_type: BusType) -> Bus {
        Bus {
            name: name.to_string(),
            bus_id,
            bus_type,
        }
    }
}

// Node properties --------------------------------------------------------------------------------

/// Flashloader protocol spoken by a node
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum FlashloaderType {
    OpenSyde,
    StwFlashloader,
    None,
}

/// Diagnostic server protocol spoken by a node
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum DiagnosticServerType {
    OpenSyde,
    None,
}

///
/// Settings of one communication interface of a node.
///
#[derive(Debug, Clone)]
pub struct ComInterfaceSettings {
    /// Index of the connected bus within the system definition (valid if `bus_connected`)
    pub bus_index: Option<usize>,

    /// Interface is physically connected to the bus
    pub bus_connected: bool,

    /// Interface may be used for system update
    pub update_enabled: bool,

    /// Node id of the node on this bus
    pub node_id: u8,
}

impl ComInterfaceSettings {
    pub fn new(bus_index: usize, update_enabled: bool, node_id: u8) -> ComInterfaceSettings {
        ComInterfaceSettings {
            bus_index: Some(bus_index),
            bus_connected: true,
            update_enabled,
            node_id,
        }
    }
}

///
/// One application contained in a node.
///
/// The engine only cares about the count (a node is an update target iff it has at least one
/// application, and an address based node accepts at most one file per application).
///
#[derive(Debug, Clone)]
pub struct Application {
    pub name: String,
}

impl Application {
    pub fn new(name: &str) -> Application {
        Application {
            name: name.to_string(),
        }
    }
}

///
/// Device definition properties relevant for the update sequences.
///
#[derive(Debug, Clone)]
pub struct DeviceDefinition {
    /// Target accepts opaque files instead of hex images
    pub flashloader_is_file_based: bool,

    /// Maximum time in ms the target may take to erase one continuous flash area
    pub request_download_timeout_ms: u32,

    /// Maximum time in ms the target may take to write one transferred block
    pub transfer_data_timeout_ms: u32,
}

impl Default for DeviceDefinition {
    fn default() -> Self {
        DeviceDefinition {
            flashloader_is_file_based: false,
            request_download_timeout_ms: 20000,
            transfer_data_timeout_ms: 1000,
        }
    }
}

// Node -------------------------------------------------------------------------------------------

///
/// One node of the system definition.
///
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub device_type: String,
    pub applications: Vec<Application>,
    pub flashloader: FlashloaderType,
    pub diagnostic_server: DiagnosticServerType,
    pub interfaces: Vec<ComInterfaceSettings>,
    pub device_definition: DeviceDefinition,
}

impl Node {
    pub fn new(name: &str, device_type: &str, flashloader: FlashloaderType) -> Node {
        Node {
            name: name.to_string(),
            device_type: device_type.to_string(),
            applications: Vec::new(),
            flashloader,
            diagnostic_server: DiagnosticServerType::None,
            interfaces: Vec::new(),
            device_definition: DeviceDefinition::default(),
        }
    }

    /// A node is a direct update target iff it contains at least one application.
    /// (It might still be needed as a router for other nodes.)
    pub fn is_update_target(&self) -> bool {
        !self.applications.is_empty()
    }
}

// System definition ------------------------------------------------------------------------------

///
/// Static description of the network: all nodes and all buses.
///
/// Set once before starting any sequence; the engine never mutates it.
///
#[derive(Debug, Clone, Default)]
pub struct SystemDefinition {
    pub nodes: Vec<Node>,
    pub buses: Vec<Bus>,
}

// Node address -----------------------------------------------------------------------------------

///
/// Address of a server on a specific bus.
///
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, Default)]
pub struct NodeAddress {
    pub bus_id: u8,
    pub node_id: u8,
}

impl NodeAddress {
    pub fn new(bus_id: u8, node_id: u8) -> NodeAddress {
        NodeAddress { bus_id, node_id }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "bus {} node {}", self.bus_id, self.node_id)
    }
}

// Flash job --------------------------------------------------------------------------------------

///
/// Files to flash to one node within one call to `update_system`.
///
#[derive(Debug, Clone, Default)]
pub struct FlashJob {
    /// Absolute paths of the files to flash, in transfer order
    pub files_to_flash: Vec<String>,
}

impl FlashJob {
    pub fn new<S: AsRef<str>>(files: &[S]) -> FlashJob {
        FlashJob {
            files_to_flash: files
                .iter()
                .map(|file| file.as_ref().to_string())
                .collect(),
        }
    }
}

// Tests ------------------------------------------------------------------------------------------
