use crate::opensyde::sysup::driver::{ComDriver, DriverError};
use crate::opensyde::sysup::progress::{ProgressEvent, ProgressSink, ProgressStep};
use crate::opensyde::sysup::sequences::UpdateSequences;
use crate::opensyde::sysup::sysdef::{FlashJob, FlashloaderType};
use crate::opensyde::sysup::Error;

use std::path::Path;

impl<D, S> UpdateSequences<D, S>
where
    D: ComDriver,
    S: ProgressSink,
{
    ///
    /// Flash all configured files to the defined devices.
    ///
    /// Prerequisite: the system is in the state after a successful `activate_flashloader`.
    ///
    /// `jobs` must contain one (possibly empty) file list per node of the system
    /// definition. `update_order` decides the sequence: it must contain the index of every
    /// node with at least one file exactly once and nothing else.
    ///
    /// Nodes are updated strictly one after the other; the first failure stops the
    /// sequence.
    ///
    pub fn update_system(
        &mut self,
        jobs: &[FlashJob],
        update_order: &[usize],
    ) -> Result<(), Error> {
        self.current_file = 0;

        self.check_update_parameters(jobs, update_order)?;

        self.report(
            ProgressStep::UpdateSystemStart,
            None,
            0,
            "Starting System Update ...",
        );

        for &node_index in update_order {
            self.current_node_index = node_index;

            if !self.is_node_reachable(node_index) {
                log::error!(
                    "System Update: node ({}) is not reachable due to previous timeout.",
                    node_index
                );
                return Err(Error::Timeout);
            }

            let routing = self.driver.routing_bus_index(node_index);
            let bus_index = routing.unwrap_or(self.active_bus_index);

            let mut routing_started = false;
            let mut node_result = Ok(());
            if routing.is_some() {
                routing_started = true;
                if let Err(routing_error) = self.driver.start_routing(node_index) {
                    node_result = Err(Error::from_driver(routing_error.error));
                }
            }

            if node_result.is_ok() {
                if let Some((protocol, address)) = self.node_on_bus(node_index, bus_index) {
                    self.current_node = address;
                    node_result = match protocol {
                        FlashloaderType::OpenSyde => {
                            self.update_osy_node(node_index, &jobs[node_index].files_to_flash)
                        }
                        FlashloaderType::StwFlashloader => {
                            self.flash_node_xfl(&jobs[node_index].files_to_flash)
                        }
                        FlashloaderType::None => Ok(()),
                    };
                }
            }

            if routing_started {
                // stop routing always to clean up
                self.driver.stop_routing(node_index);
            }

            if let Err(error) = node_result {
                // a timed out node must not be contacted by subsequent sequences
                if error == Error::Timeout {
                    self.timeout_nodes[node_index] = true;
                }
                return Err(error);
            }
        }

        self.report(
            ProgressStep::UpdateSystemFinished,
            None,
            100,
            "Finished System Update.",
        );
        Ok(())
    }

    // Parameter validation -----------------------------------------------------------------

    fn check_update_parameters(
        &self,
        jobs: &[FlashJob],
        update_order: &[usize],
    ) -> Result<(), Error> {
        if jobs.len() != self.sysdef.nodes.len() {
            return Err(Error::Overflow(format!(
                "Number of flash jobs ({}) does not match the number of nodes ({})",
                jobs.len(),
                self.sysdef.nodes.len()
            )));
        }

        let mut nodes_to_flash = 0usize;
        for (node_index, job) in jobs.iter().enumerate() {
            if job.files_to_flash.is_empty() {
                continue;
            }
            if !self.active_nodes[node_index] {
                log::error!(
                    "System Update: file(s) to flash configured for node ({}) which is not \
                     marked as active!",
                    node_index
                );
                return Err(Error::NoAct(format!(
                    "Files to flash configured for inactive node ({})",
                    node_index
                )));
            }
            nodes_to_flash += 1;

            if !update_order.contains(&node_index) {
                return Err(Error::NoAct(format!(
                    "Node ({}) has files to flash but no position in the update order",
                    node_index
                )));
            }

            for file in &job.files_to_flash {
                if !Path::new(file).is_file() {
                    log::error!("System Update: could not find file \"{}\"!", file);
                    return Err(Error::RdWr(format!("Could not find file \"{}\"", file)));
                }
            }
        }

        // one position per node to flash, no node twice
        if update_order.len() != nodes_to_flash {
            return Err(Error::NoAct(format!(
                "Update order has {} positions but {} nodes have files to flash",
                update_order.len(),
                nodes_to_flash
            )));
        }
        for (position, node_index) in update_order.iter().enumerate() {
            if update_order[position + 1..].contains(node_index) {
                return Err(Error::NoAct(format!(
                    "Node ({}) has more than one position in the update order",
                    node_index
                )));
            }
        }
        Ok(())
    }

    // Dispatch -----------------------------------------------------------------------------

    fn update_osy_node(&mut self, node_index: usize, files: &[String]) -> Result<(), Error> {
        let device = &self.sysdef.nodes[node_index].device_definition;
        let file_based = device.flashloader_is_file_based;
        let request_download_timeout_ms = device.request_download_timeout_ms;
        let transfer_data_timeout_ms = device.transfer_data_timeout_ms;

        self.report_server(
            ProgressStep::UpdateSystemOsyNodeStart,
            None,
            10,
            "Starting device update ...",
        );

        let result = if file_based {
            self.flash_node_osy_file(files, request_download_timeout_ms, transfer_data_timeout_ms)
        } else {
            self.flash_node_osy_hex(files, request_download_timeout_ms, transfer_data_timeout_ms)
        };

        if result.is_ok() {
            self.report_server(
                ProgressStep::UpdateSystemOsyNodeFinished,
                None,
                100,
                "Finishing device update ...",
            );
        }
        result
    }

    ///
    /// Flash one STW Flashloader node.
    ///
    /// The driver runs the whole procedure per file; its progress callbacks are forwarded
    /// to the progress sink, whose abort vote cancels the procedure.
    ///
    fn flash_node_xfl(&mut self, files: &[String]) -> Result<(), Error> {
        self.report_server(
            ProgressStep::UpdateSystemXflNodeStart,
            None,
            0,
            "Flashing node ...",
        );

        for (file_index, file) in files.iter().enumerate() {
            self.current_file = file_index;

            self.report_server(
                ProgressStep::UpdateSystemXflNodeFlashHexStart,
                None,
                0,
                "Flashing HEX file ...",
            );

            let address = self.current_node;
            let mut aborted = false;
            let flash_result = {
                let sink = &mut self.sink;
                self.driver.stw_do_flash(address, file, &mut |percent, text| {
                    let event = ProgressEvent {
                        step: ProgressStep::UpdateSystemXflProgress,
                        error: None,
                        percent,
                        server: Some(address),
                        info: text.to_string(),
                    };
                    let vote = sink.report(&event);
                    aborted |= vote;
                    vote
                })
            };

            if let Err(error) = flash_result {
                if aborted || error == DriverError::Aborted {
                    return Err(Error::Busy);
                }
                let error = Error::from_driver(error);
                self.report_server(
                    ProgressStep::UpdateSystemXflNodeFlashHexError,
                    Some(error.clone()),
                    100,
                    "Flashing HEX file failed.",
                );
                return Err(error);
            }

            self.report_server(
                ProgressStep::UpdateSystemXflNodeFlashHexFinished,
                None,
                100,
                "Flashing HEX file finished.",
            );
        }

        self.report_server(
            ProgressStep::UpdateSystemXflNodeFinished,
            None,
            100,
            "Flashing node finished.",
        );
        Ok(())
    }
}
