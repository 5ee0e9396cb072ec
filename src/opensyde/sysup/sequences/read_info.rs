use crate::opensyde::sysup::driver::ComDriver;
use crate::opensyde::sysup::info::OsyDeviceInformation;
use crate::opensyde::sysup::progress::{ProgressSink, ProgressStep};
use crate::opensyde::sysup::sequences::UpdateSequences;
use crate::opensyde::sysup::sysdef::FlashloaderType;
use crate::opensyde::sysup::Error;

impl<D, S> UpdateSequences<D, S>
where
    D: ComDriver,
    S: ProgressSink,
{
    ///
    /// Read identification information from all active nodes.
    ///
    /// Prerequisite: the system is in the state after a successful `activate_flashloader`;
    /// all active nodes are in flashloader mode.
    ///
    /// Nodes are visited in definition order, setting up and tearing down routing where
    /// required. The collected information is handed to the progress sink's
    /// `on_osy_info_read` / `on_stw_info_read` callbacks.
    ///
    /// With `fail_on_first_error` the first per-node failure aborts the sequence with its
    /// error; otherwise the sequence continues and reports `Warn` if any node failed.
    ///
    pub fn read_device_information(&mut self, fail_on_first_error: bool) -> Result<(), Error> {
        let mut at_least_one_error = false;
        let node_count = self.sysdef.nodes.len();

        for node_index in 0..node_count {
            // progress based on node position
            let percent = (((node_index + 1) * 100) / (node_count + 1)) as u8;
            let abort = self.report(
                ProgressStep::ReadDeviceInfoStart,
                None,
                percent,
                "Reading device information from device ...",
            );

            let node_result = if abort {
                Err(Error::Busy)
            } else if !self.is_node_reachable(node_index) {
                log::warn!(
                    "Read device information: node ({}) is not reachable due to previous timeout.",
                    node_index
                );
                Err(Error::Timeout)
            } else {
                self.read_device_information_from_node(node_index, percent)
            };

            if let Err(error) = node_result {
                at_least_one_error = true;
                if fail_on_first_error {
                    return Err(error);
                }
            }
        }

        self.report(
            ProgressStep::ReadDeviceInfoFinished,
            None,
            100,
            "Device information read from all devices.",
        );

        if at_least_one_error {
            return Err(Error::Warn);
        }
        Ok(())
    }

    // Per node -----------------------------------------------------------------------------

    fn read_device_information_from_node(
        &mut self,
        node_index: usize,
        percent: u8,
    ) -> Result<(), Error> {
        let routing = self.driver.routing_bus_index(node_index);
        let bus_index = routing.unwrap_or(self.active_bus_index);

        let mut routing_started = false;
        let mut result = Ok(());
        if routing.is_some() {
            routing_started = true;
            if let Err(routing_error) = self.driver.start_routing(node_index) {
                result = Err(Error::from_driver(routing_error.error));
            }
        }

        if result.is_ok() {
            if let Some((protocol, address)) = self.node_on_bus(node_index, bus_index) {
                if self.node_is_update_target(node_index) {
                    self.current_node = address;
                    self.current_node_index = node_index;

                    result = match protocol {
                        FlashloaderType::OpenSyde => {
                            self.report_server(
                                ProgressStep::ReadDeviceInfoOsyStart,
                                None,
                                percent,
                                "Reading openSYDE device information ...",
                            );
                            let read_result = self.read_device_information_osy(node_index, percent);
                            if read_result.is_ok() {
                                self.report_server(
                                    ProgressStep::ReadDeviceInfoOsyFinished,
                                    None,
                                    percent,
                                    "openSYDE device information read.",
                                );
                            }
                            read_result
                        }
                        FlashloaderType::StwFlashloader => {
                            self.report_server(
                                ProgressStep::ReadDeviceInfoXflStart,
                                None,
                                percent,
                                "Reading STW Flashloader device information ...",
                            );
                            let read_result = self.read_device_information_xfl(node_index, percent);
                            if read_result.is_ok() {
                                self.report_server(
                                    ProgressStep::ReadDeviceInfoXflFinished,
                                    None,
                                    percent,
                                    "STW Flashloader device information read.",
                                );
                            }
                            read_result
                        }
                        FlashloaderType::None => Ok(()),
                    };
                }
            }
        }

        if routing_started {
            // stop routing always to clean up
            self.driver.stop_routing(node_index);
        }
        result
    }

    fn read_device_information_osy(&mut self, node_index: usize, percent: u8) -> Result<(), Error> {
        let mut info = OsyDeviceInformation::default();

        // Ethernet: we might have run into the session timeout and need to reconnect
        if let Err(error) = self
            .driver
            .reconnect_node(self.current_node)
            .map_err(Error::from_driver)
        {
            self.report_server(
                ProgressStep::ReadDeviceInfoOsyReconnectError,
                Some(error.clone()),
                percent,
                "Could not reconnect to node",
            );
            return Err(error);
        }

        let result = self.read_osy_info_services(node_index, percent, &mut info);
        self.disconnect_from_target_server(true);

        if result.is_ok() {
            // report findings to the application
            self.sink.on_osy_info_read(&info, node_index);
        }
        result
    }

    fn read_osy_info_services(
        &mut self,
        node_index: usize,
        percent: u8,
        info: &mut OsyDeviceInformation,
    ) -> Result<(), Error> {
        let address = self.current_node;

        // request the PreProgramming session to prevent session timeout issues
        self.report_server(
            ProgressStep::ReadDeviceInfoOsySetSessionStart,
            None,
            percent,
            "Activating PreProgramming session ...",
        );
        if let Err(error) = self.driver.osy_set_pre_programming_mode(address) {
            let error = Error::from_driver(error);
            self.report_server(
                ProgressStep::ReadDeviceInfoOsySetSessionError,
                Some(error.clone()),
                percent,
                "Error activating PreProgramming session.",
            );
            return Err(error);
        }

        self.report_server(
            ProgressStep::ReadDeviceInfoOsyDeviceNameStart,
            None,
            percent,
            "Reading device name ...",
        );
        match self.driver.osy_read_device_name(address) {
            Ok(device_name) => info.device_name = device_name,
            Err(error) => {
                let error = Error::from_driver(error);
                self.report_server(
                    ProgressStep::ReadDeviceInfoOsyDeviceNameError,
                    Some(error.clone()),
                    percent,
                    "Error reading device name.",
                );
                return Err(error);
            }
        }

        self.report_server(
            ProgressStep::ReadDeviceInfoOsyFlashBlocksStart,
            None,
            percent,
            "Reading flash block information ...",
        );
        if let Err(error) = self.driver.osy_set_security_level(address, 1) {
            let error = Error::from_driver(error);
            self.report_server(
                ProgressStep::ReadDeviceInfoOsyFlashBlocksSecurityError,
                Some(error.clone()),
                percent,
                "Error setting security level for reading flash block information.",
            );
            return Err(error);
        }

        // block information is only available for address based devices
        if !self.sysdef.nodes[node_index]
            .device_definition
            .flashloader_is_file_based
        {
            match self.driver.osy_read_all_flash_block_data(address) {
                Ok(blocks) => info.applications = blocks,
                Err(error) => {
                    let error = Error::from_driver(error);
                    self.report_server(
                        ProgressStep::ReadDeviceInfoOsyFlashBlocksError,
                        Some(error.clone()),
                        percent,
                        "Error reading flash block information.",
                    );
                    return Err(error);
                }
            }
        } else {
            info.applications.clear();
        }

        self.report_server(
            ProgressStep::ReadDeviceInfoOsyFlashloaderInfoStart,
            None,
            percent,
            "Reading even more information ...",
        );
        match self.driver.osy_read_flashloader_information(address) {
            Ok(more_information) => info.more_information = more_information,
            Err(error) => {
                let error = Error::from_driver(error);
                self.report_server(
                    ProgressStep::ReadDeviceInfoOsyFlashloaderInfoError,
                    Some(error.clone()),
                    percent,
                    "Error reading even more information.",
                );
                return Err(error);
            }
        }

        Ok(())
    }

    fn read_device_information_xfl(&mut self, node_index: usize, percent: u8) -> Result<(), Error> {
        let address = self.current_node;

        // bring the device into wakeup state
        if let Err(error) = self.driver.stw_wakeup_local_id(address) {
            let error = Error::from_driver(error);
            self.report_server(
                ProgressStep::ReadDeviceInfoXflWakeupError,
                Some(error.clone()),
                percent,
                "Could not perform node wakeup.",
            );
            return Err(error);
        }

        self.report_server(
            ProgressStep::ReadDeviceInfoXflReadingInformationStart,
            None,
            percent,
            "Reading information from node ...",
        );
        match self.driver.stw_read_device_information(address) {
            Ok(information) => {
                // report findings to the application
                self.sink.on_stw_info_read(&information, node_index);
                Ok(())
            }
            Err(error) => {
                let error = Error::from_driver(error);
                self.report_server(
                    ProgressStep::ReadDeviceInfoXflReadingInformationError,
                    Some(error.clone()),
                    percent,
                    "Could not read information from node.",
                );
                Err(error)
            }
        }
    }
}
