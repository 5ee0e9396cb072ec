use crate::opensyde::sysup::driver::ComDriver;
use crate::opensyde::sysup::firmware::{HexFileError, HexImage};
use crate::opensyde::sysup::progress::{ProgressSink, ProgressStep};
use crate::opensyde::sysup::sequences::UpdateSequences;
use crate::opensyde::sysup::staging::extract_file_name;
use crate::opensyde::sysup::Error;

use crc::{Crc, CRC_32_ISO_HDLC};

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

fn percent_of(done: u32, total: u32) -> u8 {
    if total == 0 {
        100
    } else {
        ((done as u64 * 100) / (total as u64)) as u8
    }
}

/// File size via end-seek, leaving the read position at the start
fn file_length(file: &mut File) -> std::io::Result<u64> {
    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    Ok(size)
}

impl<D, S> UpdateSequences<D, S>
where
    D: ComDriver,
    S: ProgressSink,
{
    // Address based update -----------------------------------------------------------------

    ///
    /// Flash one openSYDE address based node.
    ///
    /// Prerequisites (not checked here): the current node is set, the server is in
    /// flashloader mode, the file list is not empty.
    ///
    /// All hex files are parsed up front so that an invalid file is caught before the
    /// target's flash memory is touched. The embedded device name of every file must match
    /// the name reported by the device.
    ///
    pub(super) fn flash_node_osy_hex(
        &mut self,
        files: &[String],
        request_download_timeout_ms: u32,
        transfer_data_timeout_ms: u32,
    ) -> Result<(), Error> {
        let mut images: Vec<HexImage> = Vec::with_capacity(files.len());
        let mut signature_addresses: Vec<u32> = Vec::with_capacity(files.len());
        let mut result = Ok(());

        // open all files first to fail fast
        for file in files {
            self.report_server(
                ProgressStep::UpdateSystemOsyNodeHexOpenStart,
                None,
                0,
                &format!("Opening HEX file {}.", file),
            );
            match self.hex_reader.read(file) {
                Err(HexFileError::Load(reason)) => {
                    let error = Error::RdWr(reason.clone());
                    self.report_server(
                        ProgressStep::UpdateSystemOsyNodeHexOpenError,
                        Some(error.clone()),
                        0,
                        &format!("Opening HEX file. Reason: {}.", reason),
                    );
                    result = Err(error);
                }
                Ok(image) => match image.signature_address {
                    None => {
                        let error =
                            Error::Config(format!("No signature block found in \"{}\"", file));
                        self.report_server(
                            ProgressStep::UpdateSystemOsyNodeHexSignatureError,
                            Some(error.clone()),
                            0,
                            "Could not find signature block in HEX file.",
                        );
                        result = Err(error);
                    }
                    Some(signature_address) => {
                        signature_addresses.push(signature_address);
                        images.push(image);
                    }
                },
            }
            if result.is_err() {
                break;
            }
        }

        // Ethernet: we might have run into the session timeout and need to reconnect
        if result.is_ok() {
            if let Err(error) = self
                .driver
                .reconnect_node(self.current_node)
                .map_err(Error::from_driver)
            {
                self.report_server(
                    ProgressStep::UpdateSystemOsyReconnectError,
                    Some(error.clone()),
                    10,
                    "Could not reconnect to node",
                );
                result = Err(error);
            }
        }

        if result.is_ok() {
            result = self.check_device_name_against_images(files, &images);
        }

        if result.is_ok() {
            result = self.check_flash_memory_for_images(files, &images);
        }

        if result.is_ok() {
            // all prerequisites checked; commence the flashing
            result = self.write_fingerprint_osy();
        }

        if result.is_ok() {
            for (file_index, image) in images.iter().enumerate() {
                self.current_file = file_index;
                result = self.flash_one_file_osy_hex(
                    image,
                    signature_addresses[file_index],
                    request_download_timeout_ms,
                    transfer_data_timeout_ms,
                );
                if result.is_err() {
                    // error report is already in the subfunction
                    break;
                }
            }
        }

        self.disconnect_from_target_server(true);
        result
    }

    /// Cross check the embedded device name of every image against the device
    fn check_device_name_against_images(
        &mut self,
        files: &[String],
        images: &[HexImage],
    ) -> Result<(), Error> {
        self.report_server(
            ProgressStep::UpdateSystemOsyNodeCheckDeviceNameStart,
            None,
            10,
            "X-checking device name of device against HEX file contents ...",
        );

        let device_name = match self.driver.osy_read_device_name(self.current_node) {
            Ok(device_name) => device_name,
            Err(error) => {
                let error = Error::from_driver(error);
                self.report_server(
                    ProgressStep::UpdateSystemOsyNodeCheckDeviceNameCommError,
                    Some(error.clone()),
                    10,
                    "Could not read device name from device.",
                );
                return Err(error);
            }
        };

        for (file_index, image) in images.iter().enumerate() {
            match &image.device_name {
                None => {
                    let error = Error::NoAct(format!(
                        "Could not read device name from file {}. Reason: Device name not found.",
                        files[file_index]
                    ));
                    self.report_server(
                        ProgressStep::UpdateSystemOsyNodeCheckDeviceNameFileError,
                        Some(error.clone()),
                        10,
                        &format!(
                            "Could not read device name from file {}. \
                             Reason: Device name not found.",
                            files[file_index]
                        ),
                    );
                    return Err(error);
                }
                Some(image_device_name) => {
                    if device_name.trim() != image_device_name.trim() {
                        let text = format!(
                            "Device names of device and HEX file {} do not match. Device \
                             reported: \"{}\". HEX file contains: \"{}\".",
                            files[file_index],
                            device_name.trim(),
                            image_device_name.trim()
                        );
                        let error = Error::Overflow(text.clone());
                        self.report_server(
                            ProgressStep::UpdateSystemOsyNodeCheckDeviceNameMatchError,
                            Some(error.clone()),
                            10,
                            &text,
                        );
                        return Err(error);
                    }
                }
            }
        }
        Ok(())
    }

    /// Enter the programming session and ask the device whether all areas fit
    fn check_flash_memory_for_images(
        &mut self,
        files: &[String],
        images: &[HexImage],
    ) -> Result<(), Error> {
        self.report_server(
            ProgressStep::UpdateSystemOsyNodeCheckMemoryStart,
            None,
            20,
            "Checking memory availability ...",
        );
        if let Err(error) = self.driver.osy_set_programming_mode(self.current_node) {
            let error = Error::from_driver(error);
            self.report_server(
                ProgressStep::UpdateSystemOsyNodeCheckMemorySessionError,
                Some(error.clone()),
                20,
                "Could not activate programming session.",
            );
            return Err(error);
        }

        for (file_index, image) in images.iter().enumerate() {
            for area in &image.areas {
                if let Err(error) = self.driver.osy_check_flash_memory_available(
                    self.current_node,
                    area.offset,
                    area.data.len() as u32,
                ) {
                    let error = Error::from_driver(error);
                    self.report_server(
                        ProgressStep::UpdateSystemOsyNodeCheckMemoryNotOk,
                        Some(error.clone()),
                        20,
                        &format!(
                            "Could not get confirmation about flash memory availability. \
                             (File: {} Offset: 0x{:08x} Size: 0x{:08x}).",
                            files[file_index],
                            area.offset,
                            area.data.len()
                        ),
                    );
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    ///
    /// Flash one hex image to an address based node.
    ///
    /// Prerequisites: the target is in the programming session, the image was checked
    /// against the device.
    ///
    fn flash_one_file_osy_hex(
        &mut self,
        image: &HexImage,
        signature_address: u32,
        request_download_timeout_ms: u32,
        transfer_data_timeout_ms: u32,
    ) -> Result<(), Error> {
        let address = self.current_node;
        let total_bytes = image.total_byte_count();
        let mut bytes_flashed: u32 = 0;
        let area_count = image.areas.len();
        let mut result = Ok(());

        self.report_server(
            ProgressStep::UpdateSystemOsyNodeFlashHexStart,
            None,
            0,
            "Flashing HEX file ...",
        );

        for (area_index, area) in image.areas.iter().enumerate() {
            let area_size = area.data.len() as u32;
            let mut percent = percent_of(bytes_flashed, total_bytes);
            let mut area_result = Ok(());

            let abort = self.report_server(
                ProgressStep::UpdateSystemOsyNodeFlashHexAreaStart,
                None,
                percent,
                &format!("Erasing flash memory for area {}...", area_index + 1),
            );
            if abort {
                self.report_server(
                    ProgressStep::UpdateSystemAborted,
                    None,
                    percent,
                    "Flashing HEX file aborted.",
                );
                area_result = Err(Error::Busy);
            }

            if area_result.is_ok() {
                // erasing can take a while; use the device specific timeout
                self.driver
                    .set_polling_timeout(address, request_download_timeout_ms);

                match self.driver.osy_request_download(address, area.offset, area_size) {
                    Err(error) => {
                        let error = Error::from_driver(error);
                        self.report_server(
                            ProgressStep::UpdateSystemOsyNodeFlashHexAreaEraseError,
                            Some(error.clone()),
                            percent,
                            &format!(
                                "Erasing flash memory for area {} failed \
                                 (Offset: 0x{:08X} Size: 0x{:08X}).",
                                area_index + 1,
                                area.offset,
                                area_size
                            ),
                        );
                        area_result = Err(error);
                    }
                    Ok(max_block_length) => {
                        self.driver
                            .set_polling_timeout(address, transfer_data_timeout_ms);

                        let mut block_sequence_counter: u8 = 1;
                        let mut remaining = area_size as usize;
                        while remaining > 0 {
                            let abort = self.report_server(
                                ProgressStep::UpdateSystemOsyNodeFlashHexAreaTransferStart,
                                None,
                                percent,
                                &format!(
                                    "Writing data for area {:02}/{:02}  byte {:08}/{:08} ...",
                                    area_index + 1,
                                    area_count,
                                    area_size as usize - remaining,
                                    area_size
                                ),
                            );
                            if abort {
                                self.report_server(
                                    ProgressStep::UpdateSystemAborted,
                                    None,
                                    percent,
                                    "Flashing HEX file aborted.",
                                );
                                area_result = Err(Error::Busy);
                                break;
                            }

                            // 5 bytes of each block are reserved for the service header
                            let chunk = remaining.min(max_block_length as usize - 5);
                            let offset_in_area = area_size as usize - remaining;
                            let slice = &area.data[offset_in_area..offset_in_area + chunk];

                            if let Err(error) =
                                self.driver
                                    .osy_transfer_data(address, block_sequence_counter, slice)
                            {
                                let error = Error::from_driver(error);
                                self.report_server(
                                    ProgressStep::UpdateSystemOsyNodeFlashHexAreaTransferError,
                                    Some(error.clone()),
                                    percent,
                                    "Could not write data.",
                                );
                                area_result = Err(error);
                                break;
                            }

                            remaining -= chunk;
                            block_sequence_counter = if block_sequence_counter < 0xFF {
                                block_sequence_counter + 1
                            } else {
                                0x00
                            };
                            bytes_flashed += chunk as u32;
                            percent = percent_of(bytes_flashed, total_bytes);
                        }
                    }
                }
            }

            // the services with the specific timeouts are finished
            self.driver.reset_polling_timeout(address);

            if area_result.is_ok() {
                self.report_server(
                    ProgressStep::UpdateSystemOsyNodeFlashHexAreaTransferStart,
                    None,
                    percent,
                    &format!(
                        "Writing data for area {:02}/{:02}  byte {:08}/{:08} ...",
                        area_index + 1,
                        area_count,
                        area_size,
                        area_size
                    ),
                );

                // the last area carries the signature check
                let exit_result = if area_index == area_count - 1 {
                    self.report_server(
                        ProgressStep::UpdateSystemOsyNodeFlashHexAreaExitFinalStart,
                        None,
                        percent,
                        "Finalizing the final area and checking the signature ...",
                    );
                    self.driver.osy_request_transfer_exit_address_based(
                        address,
                        true,
                        signature_address,
                    )
                } else {
                    self.report_server(
                        ProgressStep::UpdateSystemOsyNodeFlashHexAreaExitStart,
                        None,
                        percent,
                        "Finalizing the area ...",
                    );
                    self.driver
                        .osy_request_transfer_exit_address_based(address, false, 0)
                };

                if let Err(error) = exit_result {
                    let error = Error::from_driver(error);
                    self.report_server(
                        ProgressStep::UpdateSystemOsyNodeFlashHexAreaExitError,
                        Some(error.clone()),
                        percent,
                        "Could not finalize the area.",
                    );
                    area_result = Err(error);
                }
            }

            if area_result.is_err() {
                result = area_result;
                break;
            }
        }

        if result.is_ok() {
            self.report_server(
                ProgressStep::UpdateSystemOsyNodeFlashHexFinished,
                None,
                100,
                "Flashing HEX file finished.",
            );
        }
        result
    }

    // File based update --------------------------------------------------------------------

    ///
    /// Write one or more files to an openSYDE file based node.
    ///
    /// Prerequisites (not checked here): the current node is set, the server is in
    /// flashloader mode, the files are present on the client file system.
    ///
    pub(super) fn flash_node_osy_file(
        &mut self,
        files: &[String],
        request_download_timeout_ms: u32,
        transfer_data_timeout_ms: u32,
    ) -> Result<(), Error> {
        let mut result = Ok(());

        // Ethernet: we might have run into the session timeout and need to reconnect
        if let Err(error) = self
            .driver
            .reconnect_node(self.current_node)
            .map_err(Error::from_driver)
        {
            self.report_server(
                ProgressStep::UpdateSystemOsyReconnectError,
                Some(error.clone()),
                10,
                "Could not reconnect to node",
            );
            result = Err(error);
        }

        if result.is_ok() {
            self.report_server(
                ProgressStep::UpdateSystemOsyNodeCheckMemoryStart,
                None,
                20,
                "Checking memory availability ...",
            );
            if let Err(error) = self.driver.osy_set_programming_mode(self.current_node) {
                let error = Error::from_driver(error);
                self.report_server(
                    ProgressStep::UpdateSystemOsyNodeCheckMemorySessionError,
                    Some(error.clone()),
                    20,
                    "Could not activate programming session.",
                );
                result = Err(error);
            }
        }

        if result.is_ok() {
            // all prerequisites checked; commence the flashing
            result = self.write_fingerprint_osy();
        }

        if result.is_ok() {
            for (file_index, file) in files.iter().enumerate() {
                self.current_file = file_index;
                result = self.flash_one_file_osy_file(
                    file,
                    request_download_timeout_ms,
                    transfer_data_timeout_ms,
                );
                if result.is_err() {
                    // error report is already in the subfunction
                    break;
                }
            }
        }

        self.disconnect_from_target_server(true);
        result
    }

    ///
    /// Transfer one file to a file based node.
    ///
    /// Only the file name is reported to the target; directory components are stripped.
    /// The rolling CRC over the transferred payload is handed to the target with the
    /// transfer exit request for verification.
    ///
    fn flash_one_file_osy_file(
        &mut self,
        file_path: &str,
        request_download_timeout_ms: u32,
        transfer_data_timeout_ms: u32,
    ) -> Result<(), Error> {
        let address = self.current_node;
        let file_name = extract_file_name(file_path).to_string();

        self.report_server(
            ProgressStep::UpdateSystemOsyNodeFlashFileStart,
            None,
            0,
            "Transferring file ...",
        );

        let mut file = match File::open(file_path) {
            Ok(file) => file,
            Err(error) => {
                return Err(Error::RdWr(format!(
                    "Could not open file \"{}\": {}",
                    file_path, error
                )));
            }
        };
        let total_bytes = match file_length(&mut file) {
            Ok(size) => size as u32,
            Err(error) => {
                return Err(Error::RdWr(format!(
                    "Could not get size of file \"{}\": {}",
                    file_path, error
                )));
            }
        };

        let abort = self.report_server(
            ProgressStep::UpdateSystemOsyNodeFlashFilePrepareStart,
            None,
            0,
            &format!("Preparing file system for file \"{}\"...", file_name),
        );
        if abort {
            return Err(Error::Busy);
        }

        // preparing the target file system can take a while
        self.driver
            .set_polling_timeout(address, request_download_timeout_ms);

        let mut result = Ok(());
        let mut percent: u8 = 0;
        let mut digest = CRC32.digest();

        match self
            .driver
            .osy_request_file_transfer(address, &file_name, total_bytes)
        {
            Err(error) => {
                let error = Error::from_driver(error);
                self.report_server(
                    ProgressStep::UpdateSystemOsyNodeFlashFilePrepareError,
                    Some(error.clone()),
                    0,
                    &format!("Preparing file system for file \"{}\" failed.", file_name),
                );
                result = Err(error);
            }
            Ok(max_block_length) => {
                self.driver
                    .set_polling_timeout(address, transfer_data_timeout_ms);

                let mut block_sequence_counter: u8 = 1;
                let mut remaining = total_bytes as usize;
                let mut buffer = vec![0u8; max_block_length as usize - 5];

                while remaining > 0 {
                    percent = percent_of(total_bytes - remaining as u32, total_bytes);
                    let abort = self.report_server(
                        ProgressStep::UpdateSystemOsyNodeFlashFileTransferStart,
                        None,
                        percent,
                        &format!(
                            "Writing data byte {:08}/{:08} ...",
                            total_bytes as usize - remaining,
                            total_bytes
                        ),
                    );
                    if abort {
                        self.report_server(
                            ProgressStep::UpdateSystemAborted,
                            None,
                            percent,
                            "Flashing file aborted.",
                        );
                        result = Err(Error::Busy);
                        break;
                    }

                    // 5 bytes of each block are reserved for the service header
                    let chunk = remaining.min(max_block_length as usize - 5);
                    if let Err(error) = file.read_exact(&mut buffer[..chunk]) {
                        // aborting mid-procedure is not ideal, but reading the whole file
                        // up front is no option: files can be large and the client short
                        // on RAM
                        self.report_server(
                            ProgressStep::UpdateSystemOsyNodeFlashFileTransferError,
                            Some(Error::RdWr(error.to_string())),
                            percent,
                            "Could not read from input file.",
                        );
                        result = Err(Error::RdWr(format!(
                            "Could not read from file \"{}\"",
                            file_path
                        )));
                        break;
                    }

                    if let Err(error) =
                        self.driver
                            .osy_transfer_data(address, block_sequence_counter, &buffer[..chunk])
                    {
                        let error = Error::from_driver(error);
                        self.report_server(
                            ProgressStep::UpdateSystemOsyNodeFlashFileTransferError,
                            Some(error.clone()),
                            percent,
                            "Could not write data.",
                        );
                        result = Err(error);
                        break;
                    }

                    // update the continuous CRC
                    digest.update(&buffer[..chunk]);

                    remaining -= chunk;
                    block_sequence_counter = if block_sequence_counter < 0xFF {
                        block_sequence_counter + 1
                    } else {
                        0x00
                    };
                }
            }
        }

        // the file is not needed anymore
        drop(file);

        // the services with the specific timeouts are finished
        self.driver.reset_polling_timeout(address);

        if result.is_ok() {
            self.report_server(
                ProgressStep::UpdateSystemOsyNodeFlashFileTransferStart,
                None,
                percent,
                &format!("Writing data byte {:08}/{:08} ...", total_bytes, total_bytes),
            );
            self.report_server(
                ProgressStep::UpdateSystemOsyNodeFlashFileExitStart,
                None,
                percent,
                "Finalizing the transfer and checking the transfer CRC ...",
            );

            let transfer_crc = digest.finalize();
            if let Err(error) = self
                .driver
                .osy_request_transfer_exit_file_based(address, transfer_crc)
            {
                let error = Error::from_driver(error);
                self.report_server(
                    ProgressStep::UpdateSystemOsyNodeFlashFileExitError,
                    Some(error.clone()),
                    percent,
                    "Could not finalize the transfer.",
                );
                result = Err(error);
            }
        }

        if result.is_ok() {
            self.report_server(
                ProgressStep::UpdateSystemOsyNodeFlashFileFinished,
                None,
                100,
                "Flashing file finished.",
            );
        }
        result
    }

    // Fingerprint --------------------------------------------------------------------------

    ///
    /// Write the application software fingerprint (date, time, user name).
    ///
    /// Prerequisite: the server is in the programming session.
    ///
    pub(super) fn write_fingerprint_osy(&mut self) -> Result<(), Error> {
        let date = self.fingerprint.date();
        let time = self.fingerprint.time();
        let configured_user_name = self.fingerprint.user_name();

        self.report_server(
            ProgressStep::UpdateSystemOsyNodeFingerprintStart,
            None,
            30,
            "Writing fingerprint ...",
        );

        let user_name = match configured_user_name {
            Some(user_name) => user_name,
            None => {
                self.report_server(
                    ProgressStep::UpdateSystemOsyNodeFingerprintNameNotReadable,
                    Some(Error::Warn),
                    30,
                    "Could not get user name from system. Using \"unknown\".",
                );
                "unknown".to_string()
            }
        };

        if let Err(error) = self.driver.osy_write_application_software_fingerprint(
            self.current_node,
            date,
            time,
            &user_name,
        ) {
            let error = Error::from_driver(error);
            self.report_server(
                ProgressStep::UpdateSystemOsyNodeFingerprintError,
                Some(error.clone()),
                30,
                "Could not write fingerprint.",
            );
            return Err(error);
        }
        Ok(())
    }
}
