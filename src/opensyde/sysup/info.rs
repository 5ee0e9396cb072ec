// openSYDE device information --------------------------------------------------------------------

///
/// Information about one flash block (application) as reported by an openSYDE flashloader.
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlashBlockInfo {
    pub application_name: String,
    pub application_version: String,
    pub build_date: String,
    pub build_time: String,
    pub block_start_address: u32,
    pub block_end_address: u32,
    pub signature_valid: bool,
    pub additional_information: String,
}

///
/// General information reported by an openSYDE flashloader.
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlashloaderInformation {
    pub flashloader_software_version: [u8; 3],
    pub flashloader_protocol_version: [u8; 3],
    pub protocol_version: [u8; 3],
    pub flash_count: u32,
    pub ecu_serial_number: [u8; 6],
    pub ecu_article_number: u32,
    pub ecu_hardware_version_number: String,
    pub flash_fingerprint_date: [u8; 3],
    pub flash_fingerprint_time: [u8; 3],
    pub flash_fingerprint_user_name: String,
}

///
/// Everything the device information reader collects from one openSYDE node.
///
#[derive(Debug, Clone, Default)]
pub struct OsyDeviceInformation {
    pub device_name: String,

    /// Flash block information; empty for file based devices
    pub applications: Vec<FlashBlockInfo>,

    pub more_information: FlashloaderInformation,
}

// STW Flashloader device information -------------------------------------------------------------

///
/// Fingerprint data reported by an STW Flashloader node (where supported).
///
#[derive(Debug, Clone, Default)]
pub struct StwFingerprintData {
    pub programming_date: Option<[u8; 3]>,
    pub programming_time: Option<[u8; 3]>,
    pub user_name: Option<String>,
    pub checksum: Option<u32>,
}

///
/// Everything the device information reader collects from one STW Flashloader node.
///
/// Older protocol versions do not report all fields; unavailable fields stay `None`.
///
#[derive(Debug, Clone, Default)]
pub struct StwDeviceInformation {
    pub device_id: Option<String>,
    pub flashloader_version: Option<String>,
    pub protocol_version: Option<u16>,
    pub erase_count: Option<u32>,
    pub serial_number: Option<String>,
    pub sector_count: Option<u16>,
    pub finger_print: Option<StwFingerprintData>,

    /// One textual information block per application found on the device
    pub device_info_blocks: Vec<String>,
}

// Textual dumps ----------------------------------------------------------------------------------

///
/// Convert openSYDE device information to a list of text lines.
///
/// No-frills textual representation for applications that just want to display what the
/// reader reported.
///
pub fn osy_information_to_text(info: &OsyDeviceInformation) -> Vec<String> {
    let mut text = Vec::new();

    text.push(format!("Device name: {}", info.device_name));
    text.push(format!("Number of applications: {}", info.applications.len()));

    for (index, block) in info.applications.iter().enumerate() {
        text.push(format!("Application {}", index));
        text.push(format!(" Name: {}", block.application_name));
        text.push(format!(" Version: {}", block.application_version));
        text.push(format!(" Build date: {}", block.build_date));
        text.push(format!(" Build time: {}", block.build_time));
        text.push(format!(
            " Block start address: 0x{:08X}",
            block.block_start_address
        ));
        text.push(format!(
            " Block end address: 0x{:08X}",
            block.block_end_address
        ));
        text.push(format!(
            " Signature valid: {}",
            if block.signature_valid { "yes" } else { "no" }
        ));
        text.push(format!(
            " Additional information: {}",
            block.additional_information
        ));
    }

    let more = &info.more_information;
    text.push(format!(
        "Flashloader software version: V{}.{:02}r{}",
        more.flashloader_software_version[0],
        more.flashloader_software_version[1],
        more.flashloader_software_version[2]
    ));
    text.push(format!(
        "Flashloader protocol version: V{}.{:02}r{}",
        more.flashloader_protocol_version[0],
        more.flashloader_protocol_version[1],
        more.flashloader_protocol_version[2]
    ));
    text.push(format!(
        "Protocol version: V{}.{:02}r{}",
        more.protocol_version[0], more.protocol_version[1], more.protocol_version[2]
    ));
    text.push(format!("Flash count: {}", more.flash_count));
    text.push(format!(
        "Device serial number: {:02X}.{:02X}{:02X}{:02X}.{:02X}{:02X}",
        more.ecu_serial_number[0],
        more.ecu_serial_number[1],
        more.ecu_serial_number[2],
        more.ecu_serial_number[3],
        more.ecu_serial_number[4],
        more.ecu_serial_number[5]
    ));
    text.push(format!("Device article number: {}", more.ecu_article_number));
    text.push(format!(
        "Device article version: {}",
        more.ecu_hardware_version_number
    ));
    text.push(format!(
        "Flash fingerprint date: {:02}-{:02}-{:02} (yy-mm-dd)",
        more.flash_fingerprint_date[0],
        more.flash_fingerprint_date[1],
        more.flash_fingerprint_date[2]
    ));
    text.push(format!(
        "Flash fingerprint time: {:02}:{:02}:{:02}",
        more.flash_fingerprint_time[0],
        more.flash_fingerprint_time[1],
        more.flash_fingerprint_time[2]
    ));
    text.push(format!(
        "Flash fingerprint username: {}",
        more.flash_fingerprint_user_name
    ));

    text
}

///
/// Convert STW Flashloader device information to a list of text lines.
///
pub fn stw_information_to_text(info: &StwDeviceInformation) -> Vec<String> {
    let mut text = Vec::new();
    let unknown = || "unknown".to_string();

    text.push(format!(
        "Device name: {}",
        info.device_id.clone().unwrap_or_else(unknown)
    ));
    match info.device_info_blocks.len() {
        0 => text.push("Number of applications: unknown".to_string()),
        count => {
            text.push(format!("Number of applications: {}", count));
            for (index, block) in info.device_info_blocks.iter().enumerate() {
                text.push(format!("Application {}", index));
                text.push(format!(" {}", block));
            }
        }
    }
    text.push(format!(
        "Flashloader software version: {}",
        info.flashloader_version.clone().unwrap_or_else(unknown)
    ));
    match info.protocol_version {
        Some(version) => text.push(format!(
            "Protocol version: V{:x}.{:x}{:x}r{:x}",
            (version >> 12) & 0x0F,
            (version >> 8) & 0x0F,
            (version >> 4) & 0x0F,
            version & 0x0F
        )),
        None => text.push("Protocol version: unknown (< V3.00r0)".to_string()),
    }
    text.push(format!(
        "Flash count: {}",
        info.erase_count
            .map(|count| count.to_string())
            .unwrap_or_else(unknown)
    ));
    text.push(format!(
        "Device serial number: {}",
        info.serial_number.clone().unwrap_or_else(unknown)
    ));

    match &info.finger_print {
        None => text.push("Flash fingerprint: not supported by this device".to_string()),
        Some(finger_print) => {
            match finger_print.programming_date {
                Some(date) => text.push(format!(
                    "Flash fingerprint date: {:02}-{:02}-{:02} (yy-mm-dd)",
                    date[0], date[1], date[2]
                )),
                None => text.push("Flash fingerprint date: unknown".to_string()),
            }
            match finger_print.programming_time {
                Some(time) => text.push(format!(
                    "Flash fingerprint time: {:02}:{:02}:{:02}",
                    time[0], time[1], time[2]
                )),
                None => text.push("Flash fingerprint time: unknown".to_string()),
            }
            text.push(format!(
                "Flash fingerprint username: {}",
                finger_print.user_name.clone().unwrap_or_else(unknown)
            ));
            match finger_print.checksum {
                Some(checksum) => {
                    text.push(format!("Flash fingerprint checksum: 0x{:08x}", checksum))
                }
                None => text.push("Flash fingerprint checksum: unknown".to_string()),
            }
        }
    }

    text.push(format!(
        "Number of flash sectors: {}",
        info.sector_count
            .map(|count| count.to_string())
            .unwrap_or_else(unknown)
    ));

    text
}

// Application comparison -------------------------------------------------------------------------

///
/// Properties identifying one application version.
///
/// Used to compare client side files against what a device reports, to decide which
/// applications actually need to be flashed.
///
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationProperties {
    pub name: String,
    pub version: String,
    pub build_date: String,
    pub build_time: String,
}

///
/// Check which client side applications are already present on the server.
///
/// Returns one flag per client side application: true if an application with identical
/// properties is contained in the server side list.
///
pub fn check_for_changed_applications(
    client_side: &[ApplicationProperties],
    server_side: &[ApplicationProperties],
) -> Vec<bool> {
    client_side
        .iter()
        .map(|client_application| {
            server_side
                .iter()
                .any(|server_application| server_application == client_application)
        })
        .collect()
}

// Tests ------------------------------------------------------------------------------------------
