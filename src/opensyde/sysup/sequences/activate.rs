use crate::opensyde::sysup::driver::{ComDriver, DriverError, RESET_TYPE_TO_FLASHLOADER};
use crate::opensyde::sysup::progress::{ProgressSink, ProgressStep};
use crate::opensyde::sysup::sequences::UpdateSequences;
use crate::opensyde::sysup::sysdef::{BusType, FlashloaderType};
use crate::opensyde::sysup::Error;

use std::time::Instant;

impl<D, S> UpdateSequences<D, S>
where
    D: ComDriver,
    S: ProgressSink,
{
    ///
    /// Bring all active nodes into flashloader mode.
    ///
    /// Local bus first: broadcast the programming request and the reset, then keep the
    /// flashloader window open (CAN) or wait for the targets' interfaces to come back
    /// (Ethernet), then confirm every directly connected node individually. Routed nodes
    /// are handled one by one afterwards, as broadcasts do not cross routers.
    ///
    /// STW Flashloader nodes can only be end points, not routers.
    ///
    /// With `fail_on_first_error` the first per-node failure aborts the sequence with its
    /// error; otherwise the sequence continues and reports `Warn` if any node failed.
    ///
    pub fn activate_flashloader(&mut self, fail_on_first_error: bool) -> Result<(), Error> {
        let mut at_least_one_error = false;

        self.report(
            ProgressStep::ActivateFlashloaderOsyBcRequestProgrammingStart,
            None,
            0,
            "Broadcasting openSYDE Flashloader activation request ...",
        );

        self.driver.clear_receive_queue();

        // reset timeout latches
        self.timeout_nodes = vec![false; self.sysdef.nodes.len()];

        let osy_devices_active = self.any_active_on_local_bus(FlashloaderType::OpenSyde);
        let stw_device_on_local_bus = self.first_stw_device_on_local_bus();

        if osy_devices_active {
            if let Err(error) = self.driver.osy_broadcast_request_programming() {
                let error = Error::from_driver(error);
                self.report(
                    ProgressStep::ActivateFlashloaderOsyBcRequestProgrammingError,
                    Some(error.clone()),
                    0,
                    "RequestProgramming request failed.",
                );
                return Err(error);
            }

            self.report(
                ProgressStep::ActivateFlashloaderOsyBcEcuResetStart,
                None,
                10,
                "Broadcasting openSYDE EcuReset request ...",
            );
            if let Err(error) = self.driver.osy_broadcast_ecu_reset(RESET_TYPE_TO_FLASHLOADER) {
                let error = Error::from_driver(error);
                self.report(
                    ProgressStep::ActivateFlashloaderOsyBcEcuResetError,
                    Some(error.clone()),
                    10,
                    "EcuReset request failed.",
                );
                return Err(error);
            }
        }

        if stw_device_on_local_bus.is_some() {
            self.report(
                ProgressStep::ActivateFlashloaderXflEcuResetStart,
                None,
                15,
                "Sending STW Flashloader reset requests ...",
            );
            if let Err(error) = self.driver.stw_request_node_reset_broadcast() {
                let error = Error::from_driver(error);
                self.report(
                    ProgressStep::ActivateFlashloaderXflEcuResetError,
                    Some(error.clone()),
                    15,
                    "Sending request failed.",
                );
                return Err(error);
            }
        }

        // keep the targets in the flashloader window
        if self.sysdef.buses[self.active_bus_index].bus_type == BusType::Can {
            let abort = self.report(
                ProgressStep::ActivateFlashloaderOsyXflBcEnterFlashloaderStart,
                None,
                20,
                "Broadcasting enter Flashloader request ...",
            );
            if abort {
                return Err(Error::Busy);
            }

            let scan_start = Instant::now();
            loop {
                if osy_devices_active {
                    if let Err(error) =
                        self.driver.osy_can_broadcast_enter_pre_programming_session()
                    {
                        let error = Error::from_driver(error);
                        self.report(
                            ProgressStep::ActivateFlashloaderOsyBcEnterPreProgrammingError,
                            Some(error.clone()),
                            20,
                            "EnterPreProgramming broadcast failed.",
                        );
                        return Err(error);
                    }
                }
                if let Some(stw_device) = stw_device_on_local_bus {
                    if let Err(error) = self.driver.stw_send_flash(stw_device) {
                        let error = Error::from_driver(error);
                        self.report(
                            ProgressStep::ActivateFlashloaderXflBcFlashError,
                            Some(error.clone()),
                            20,
                            "Send \"FLASH\" broadcast failed.",
                        );
                        return Err(error);
                    }
                }

                self.sleep(self.timing.flash_broadcast_interval);
                if scan_start.elapsed() >= self.timing.can_flashloader_scan {
                    break;
                }
            }
        } else {
            // Ethernet: give the targets some time to reset and initialize their interfaces
            self.sleep(self.timing.ethernet_boot_wait);
        }

        // confirm all nodes that are directly on the local bus
        self.report(
            ProgressStep::ActivateFlashloaderOsyXflBcPingStart,
            None,
            30,
            "Checking node states ...",
        );

        for node_index in 0..self.sysdef.nodes.len() {
            let classified = self.node_on_bus(node_index, self.active_bus_index);
            let Some((protocol, address)) = classified else {
                continue;
            };
            if !self.node_is_update_target(node_index) {
                continue;
            }
            // routed nodes are handled in the second pass
            if self.driver.routing_bus_index(node_index).is_some() {
                continue;
            }

            self.current_node = address;
            self.current_node_index = node_index;
            self.report_server(
                ProgressStep::ActivateFlashloaderOsyXflBcPingStart,
                None,
                30,
                "Checking node state ...",
            );

            let node_result = match protocol {
                FlashloaderType::OpenSyde => self.confirm_local_osy_node(node_index),
                FlashloaderType::StwFlashloader => self.confirm_local_xfl_node(node_index),
                FlashloaderType::None => Ok(()),
            };

            if let Err(error) = node_result {
                at_least_one_error = true;
                if fail_on_first_error {
                    return Err(error);
                }
            }
        }

        // second pass: nodes that can only be reached via routing
        for node_index in 0..self.sysdef.nodes.len() {
            let Some(bus_index) = self.driver.routing_bus_index(node_index) else {
                continue;
            };
            let Some((protocol, address)) = self.node_on_bus(node_index, bus_index) else {
                continue;
            };
            if !self.node_is_update_target(node_index) {
                continue;
            }

            self.current_node = address;
            self.current_node_index = node_index;
            self.report_server(
                ProgressStep::ActivateFlashloaderOsyXflBcPingStart,
                None,
                30,
                "Checking node state ...",
            );

            let node_result = if self.is_node_reachable(node_index) {
                self.activate_routed_node(node_index, protocol)
            } else {
                // a node on the route already timed out earlier
                self.report_server(
                    ProgressStep::ActivateFlashloaderRoutingError,
                    Some(Error::Timeout),
                    50,
                    "Starting routing for node failed",
                );
                log::error!(
                    "Activate Flashloader: start of routing for node ({}) failed due to not \
                     available node on route.",
                    node_index
                );
                Err(Error::Timeout)
            };

            if let Err(error) = node_result {
                at_least_one_error = true;
                if fail_on_first_error {
                    return Err(error);
                }
            }
        }

        self.report(
            ProgressStep::ActivateFlashloaderFinished,
            None,
            100,
            "Flashloader activated on all devices.",
        );

        if at_least_one_error {
            return Err(Error::Warn);
        }
        Ok(())
    }

    // Local bus confirmation ---------------------------------------------------------------

    fn confirm_local_osy_node(&mut self, node_index: usize) -> Result<(), Error> {
        let address = self.current_node;

        // Ethernet: the reset broke the active TCP connection
        if let Err(error) = self.reconnect_to_target_server(false, node_index) {
            self.report_server(
                ProgressStep::ActivateFlashloaderOsyReconnectError,
                Some(error.clone()),
                30,
                "Could not reconnect to node",
            );
            if error == Error::Timeout {
                self.timeout_nodes[node_index] = true;
            }
            let _ = self.driver.disconnect_node(address);
            return Err(error);
        }

        // One SetPreProgrammingMode request confirms the node is in flashloader (an
        // application has no PreProgramming session) and, on Ethernet, moves it from
        // flashloader to programming ready state.
        let mut result = Ok(());
        if let Err(error) = self.driver.osy_set_pre_programming_mode(address) {
            let error = Error::from_driver(error);
            self.report_server(
                ProgressStep::ActivateFlashloaderOsySetSessionError,
                Some(error.clone()),
                30,
                "Request to set active session failed.",
            );
            if error == Error::Timeout {
                self.timeout_nodes[node_index] = true;
            }
            result = Err(error);
        }

        let _ = self.driver.disconnect_node(address);
        result
    }

    fn confirm_local_xfl_node(&mut self, node_index: usize) -> Result<(), Error> {
        // The node should be in sleep state now; wakeup is the only usable service. Another
        // node being addressed later sends it back to sleep, so this is side effect free.
        if let Err(error) = self.driver.stw_wakeup_local_id(self.current_node) {
            let error = Error::from_driver(error);
            self.report_server(
                ProgressStep::ActivateFlashloaderXflWakeupError,
                Some(error.clone()),
                30,
                "Could not perform node wakeup.",
            );
            // wakeup has no negative response; a failure means the node is not there
            self.timeout_nodes[node_index] = true;
            return Err(error);
        }
        Ok(())
    }

    // Routed activation --------------------------------------------------------------------

    fn activate_routed_node(
        &mut self,
        node_index: usize,
        protocol: FlashloaderType,
    ) -> Result<(), Error> {
        self.report_server(
            ProgressStep::ActivateFlashloaderRoutingStart,
            None,
            50,
            "Starting routing for node ...",
        );

        if let Err(routing_error) = self.driver.start_routing(node_index) {
            let error = Error::from_driver(routing_error.error.clone());
            self.report_server(
                ProgressStep::ActivateFlashloaderRoutingError,
                Some(error.clone()),
                50,
                "Starting routing for node failed",
            );
            log::error!(
                "Activate Flashloader: start of routing for node ({}) failed: {}",
                node_index,
                routing_error.error
            );
            if routing_error.error == DriverError::Timeout {
                // neither the target nor the failed hop can be talked to
                self.timeout_nodes[node_index] = true;
                self.timeout_nodes[routing_error.error_index] = true;
            }
            self.driver.stop_routing(node_index);
            return Err(error);
        }

        let result = match protocol {
            FlashloaderType::OpenSyde => self.activate_routed_osy_node(node_index),
            FlashloaderType::StwFlashloader => self.activate_routed_xfl_node(node_index),
            FlashloaderType::None => Ok(()),
        };

        // stop routing always to clean up
        self.driver.stop_routing(node_index);
        result
    }

    fn activate_routed_osy_node(&mut self, node_index: usize) -> Result<(), Error> {
        let address = self.current_node;

        // set the request programming flag to bring the server into flashloader
        if let Err(error) = self.driver.osy_request_programming(address) {
            let error = Error::from_driver(error);
            self.report_server(
                ProgressStep::ActivateFlashloaderOsyBcRequestProgrammingError,
                Some(error.clone()),
                50,
                "RequestProgramming request for routing device failed.",
            );
            if error == Error::Timeout {
                self.timeout_nodes[node_index] = true;
            }
            return Err(error);
        }

        let reset_result = self.driver.osy_ecu_reset(address, RESET_TYPE_TO_FLASHLOADER);
        self.disconnect_from_target_server(true);
        reset_result.map_err(Error::from_driver)?;

        // give the target time to reset and bring its interface back up
        self.sleep(self.timing.routed_reset_wait);
        self.reconnect_to_target_server(true, node_index)?;

        let mut result = Ok(());
        if let Err(error) = self.driver.osy_set_pre_programming_mode(address) {
            let error = Error::from_driver(error);
            self.report_server(
                ProgressStep::ActivateFlashloaderOsySetSessionError,
                Some(error.clone()),
                50,
                "Request to set active session for routing device failed.",
            );
            if error == Error::Timeout {
                self.timeout_nodes[node_index] = true;
            }
            result = Err(error);
        }

        self.disconnect_from_target_server(false);
        result
    }

    fn activate_routed_xfl_node(&mut self, node_index: usize) -> Result<(), Error> {
        let address = self.current_node;

        if let Err(error) = self.driver.stw_request_node_reset(address) {
            let error = Error::from_driver(error);
            self.report_server(
                ProgressStep::ActivateFlashloaderXflEcuResetError,
                Some(error.clone()),
                15,
                "Sending request failed.",
            );
            return Err(error);
        }

        let scan_start = Instant::now();
        loop {
            if let Err(error) = self.driver.stw_send_flash(address) {
                let error = Error::from_driver(error);
                self.report_server(
                    ProgressStep::ActivateFlashloaderXflBcFlashError,
                    Some(error.clone()),
                    20,
                    "Send \"FLASH\" broadcast failed.",
                );
                return Err(error);
            }
            self.sleep(self.timing.flash_broadcast_interval);
            if scan_start.elapsed() >= self.timing.routed_xfl_scan {
                break;
            }
        }

        if let Err(error) = self.driver.stw_wakeup_local_id(address) {
            let error = Error::from_driver(error);
            self.report_server(
                ProgressStep::ActivateFlashloaderXflWakeupError,
                Some(error.clone()),
                50,
                "Could not perform node wakeup for routing device.",
            );
            self.timeout_nodes[node_index] = true;
            return Err(error);
        }
        Ok(())
    }
}
