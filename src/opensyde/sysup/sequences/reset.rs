use crate::opensyde::sysup::driver::{ComDriver, RESET_TYPE_KEY_OFF_ON};
use crate::opensyde::sysup::progress::{ProgressSink, ProgressStep};
use crate::opensyde::sysup::sequences::UpdateSequences;
use crate::opensyde::sysup::sysdef::FlashloaderType;
use crate::opensyde::sysup::Error;

use std::collections::HashSet;

impl<D, S> UpdateSequences<D, S>
where
    D: ComDriver,
    S: ProgressSink,
{
    ///
    /// Reset all active nodes of the system.
    ///
    /// Nodes are reset from the longest route backwards: resetting a router before its
    /// downstream peers would tear down the routing path and strand them. openSYDE nodes
    /// get an individual ECU reset request (broadcasts cannot be routed); for STW
    /// Flashloader nodes one NET reset per bus is enough.
    ///
    pub fn reset_system(&mut self) -> Result<(), Error> {
        let longest_route = self.driver.routing_point_maximum();
        let mut xfl_reset_sent_for_bus: HashSet<usize> = HashSet::new();

        self.report(ProgressStep::ResetSystemStart, None, 0, "Resetting System ...");

        for route_size in (0..=longest_route).rev() {
            for node_index in 0..self.sysdef.nodes.len() {
                if !self.is_node_reachable(node_index) {
                    continue;
                }
                if self.driver.routing_point_count(node_index) != route_size {
                    continue;
                }

                self.reset_node(node_index, &mut xfl_reset_sent_for_bus)?;
            }
        }

        self.report(
            ProgressStep::ResetSystemFinished,
            None,
            100,
            "System was reset.",
        );
        Ok(())
    }

    fn reset_node(
        &mut self,
        node_index: usize,
        xfl_reset_sent_for_bus: &mut HashSet<usize>,
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
                self.current_node = address;
                self.current_node_index = node_index;

                result = match protocol {
                    FlashloaderType::OpenSyde => {
                        let reconnect_result = self
                            .driver
                            .reconnect_node(address)
                            .map_err(Error::from_driver);
                        match reconnect_result {
                            Ok(()) => {
                                let reset_result = self
                                    .driver
                                    .osy_ecu_reset(address, RESET_TYPE_KEY_OFF_ON)
                                    .map_err(Error::from_driver);
                                self.disconnect_from_target_server(true);
                                reset_result
                            }
                            Err(error) => Err(error),
                        }
                    }
                    FlashloaderType::StwFlashloader => {
                        // one reset broadcast per network is enough; in case of routing a
                        // concrete device is needed to address the right bus
                        if !xfl_reset_sent_for_bus.contains(&bus_index) {
                            xfl_reset_sent_for_bus.insert(bus_index);
                            self.driver.stw_net_reset(address).map_err(Error::from_driver)
                        } else {
                            Ok(())
                        }
                    }
                    FlashloaderType::None => Ok(()),
                };

                if let Err(error) = &result {
                    self.report_server(
                        ProgressStep::ResetSystemOsyNodeError,
                        Some(error.clone()),
                        0,
                        "Could not reset node.",
                    );
                }
            }
        }

        if routing_started {
            // the reset request has no response; give the routers time to actually
            // forward it before tearing the route down
            self.sleep(self.timing.reset_forward_wait);
            self.driver.stop_routing(node_index);
        }
        result
    }
}
