use crate::opensyde::sysup::info::{OsyDeviceInformation, StwDeviceInformation};
use crate::opensyde::sysup::sysdef::NodeAddress;
use crate::opensyde::sysup::Error;

use std::collections::HashMap;

// Progress steps ---------------------------------------------------------------------------------

///
/// Step of a sequence a progress report refers to.
///
/// Closed enumeration over all stages of the four public sequences; the suffix encodes
/// whether the report announces the step or reports its failure.
///
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum ProgressStep {
    // activate_flashloader
    ActivateFlashloaderOsyBcRequestProgrammingStart,
    ActivateFlashloaderOsyBcRequestProgrammingError,
    ActivateFlashloaderOsyBcEcuResetStart,
    ActivateFlashloaderOsyBcEcuResetError,
    ActivateFlashloaderXflEcuResetStart,
    ActivateFlashloaderXflEcuResetError,
    ActivateFlashloaderOsyXflBcEnterFlashloaderStart,
    ActivateFlashloaderOsyBcEnterPreProgrammingError,
    ActivateFlashloaderXflBcFlashError,
    ActivateFlashloaderOsyXflBcPingStart,
    ActivateFlashloaderOsyReconnectError,
    ActivateFlashloaderOsySetSessionError,
    ActivateFlashloaderXflWakeupError,
    ActivateFlashloaderRoutingStart,
    ActivateFlashloaderRoutingError,
    ActivateFlashloaderFinished,

    // read_device_information
    ReadDeviceInfoStart,
    ReadDeviceInfoOsyStart,
    ReadDeviceInfoOsyFinished,
    ReadDeviceInfoXflStart,
    ReadDeviceInfoXflFinished,
    ReadDeviceInfoOsyReconnectError,
    ReadDeviceInfoOsySetSessionStart,
    ReadDeviceInfoOsySetSessionError,
    ReadDeviceInfoOsyDeviceNameStart,
    ReadDeviceInfoOsyDeviceNameError,
    ReadDeviceInfoOsyFlashBlocksStart,
    ReadDeviceInfoOsyFlashBlocksSecurityError,
    ReadDeviceInfoOsyFlashBlocksError,
    ReadDeviceInfoOsyFlashloaderInfoStart,
    ReadDeviceInfoOsyFlashloaderInfoError,
    ReadDeviceInfoXflWakeupError,
    ReadDeviceInfoXflReadingInformationStart,
    ReadDeviceInfoXflReadingInformationError,
    ReadDeviceInfoFinished,

    // update_system
    UpdateSystemStart,
    UpdateSystemOsyNodeStart,
    UpdateSystemOsyNodeFinished,
    UpdateSystemOsyNodeHexOpenStart,
    UpdateSystemOsyNodeHexOpenError,
    UpdateSystemOsyNodeHexSignatureError,
    UpdateSystemOsyReconnectError,
    UpdateSystemOsyNodeCheckDeviceNameStart,
    UpdateSystemOsyNodeCheckDeviceNameCommError,
    UpdateSystemOsyNodeCheckDeviceNameFileError,
    UpdateSystemOsyNodeCheckDeviceNameMatchError,
    UpdateSystemOsyNodeCheckMemoryStart,
    UpdateSystemOsyNodeCheckMemorySessionError,
    UpdateSystemOsyNodeCheckMemoryNotOk,
    UpdateSystemOsyNodeFingerprintStart,
    UpdateSystemOsyNodeFingerprintNameNotReadable,
    UpdateSystemOsyNodeFingerprintError,
    UpdateSystemOsyNodeFlashHexStart,
    UpdateSystemOsyNodeFlashHexAreaStart,
    UpdateSystemOsyNodeFlashHexAreaEraseError,
    UpdateSystemOsyNodeFlashHexAreaTransferStart,
    UpdateSystemOsyNodeFlashHexAreaTransferError,
    UpdateSystemOsyNodeFlashHexAreaExitStart,
    UpdateSystemOsyNodeFlashHexAreaExitFinalStart,
    UpdateSystemOsyNodeFlashHexAreaExitError,
    UpdateSystemOsyNodeFlashHexFinished,
    UpdateSystemOsyNodeFlashFileStart,
    UpdateSystemOsyNodeFlashFilePrepareStart,
    UpdateSystemOsyNodeFlashFilePrepareError,
    UpdateSystemOsyNodeFlashFileTransferStart,
    UpdateSystemOsyNodeFlashFileTransferError,
    UpdateSystemOsyNodeFlashFileExitStart,
    UpdateSystemOsyNodeFlashFileExitError,
    UpdateSystemOsyNodeFlashFileFinished,
    UpdateSystemXflNodeStart,
    UpdateSystemXflNodeFlashHexStart,
    UpdateSystemXflNodeFlashHexError,
    UpdateSystemXflNodeFlashHexFinished,
    UpdateSystemXflNodeFinished,
    UpdateSystemXflProgress,
    UpdateSystemAborted,
    UpdateSystemFinished,

    // reset_system
    ResetSystemStart,
    ResetSystemOsyNodeError,
    ResetSystemFinished,
}

// Progress event ---------------------------------------------------------------------------------

///
/// One progress report.
///
/// `server` is set for reports that refer to a specific node and `None` for sequence global
/// reports.
///
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub step: ProgressStep,

    /// Failure reported with this event; `None` for plain progress
    pub error: Option<Error>,

    /// Progress of the running sequence part, 0..=100
    pub percent: u8,

    /// Affected server, if the report is node specific
    pub server: Option<NodeAddress>,

    /// Additional text information
    pub info: String,
}

// Progress sink trait ----------------------------------------------------------------------------

///
/// Observer of sequence progress.
///
/// `report` is the abort channel as well: returning `true` asks the engine to abort the
/// running sequence at the next suspension point.
///
pub trait ProgressSink {
    /// Receive one progress event; return `true` to request an abort
    fn report(&mut self, event: &ProgressEvent) -> bool;

    /// Receive the detailed result of reading an openSYDE node's device information
    fn on_osy_info_read(&mut self, _info: &OsyDeviceInformation, _node_index: usize) {}

    /// Receive the detailed result of reading an STW Flashloader node's device information
    fn on_stw_info_read(&mut self, _info: &StwDeviceInformation, _node_index: usize) {}
}

// Recording sink ---------------------------------------------------------------------------------

///
/// Progress sink recording all events, with a scriptable abort vote.
///
#[derive(Default)]
pub struct ProgressLog {
    events: Vec<ProgressEvent>,
    osy_infos: Vec<(usize, OsyDeviceInformation)>,
    stw_infos: Vec<(usize, StwDeviceInformation)>,
    step_counts: HashMap<ProgressStep, usize>,
    abort_on: Option<(ProgressStep, usize)>,
}

impl ProgressLog {
    pub fn new() -> ProgressLog {
        ProgressLog::default()
    }

    /// Vote for abort on the n-th (1 based) report of the given step
    pub fn abort_on_step_occurrence(&mut self, step: ProgressStep, occurrence: usize) {
        self.abort_on = Some((step, occurrence));
    }

    pub fn events(&self) -> &[ProgressEvent] {
        &self.events
    }

    pub fn osy_infos(&self) -> &[(usize, OsyDeviceInformation)] {
        &self.osy_infos
    }

    pub fn stw_infos(&self) -> &[(usize, StwDeviceInformation)] {
        &self.stw_infos
    }

    /// Whether any recorded event refers to the given step
    pub fn contains_step(&self, step: ProgressStep) -> bool {
        self.events.iter().any(|event| event.step == step)
    }
}

impl ProgressSink for ProgressLog {
    fn report(&mut self, event: &ProgressEvent) -> bool {
        self.events.push(event.clone());
        let count = self.step_counts.entry(event.step).or_insert(0);
        *count += 1;

        match self.abort_on {
            Some((step, occurrence)) => event.step == step && *count == occurrence,
            None => false,
        }
    }

    fn on_osy_info_read(&mut self, info: &OsyDeviceInformation, node_index: usize) {
        self.osy_infos.push((node_index, info.clone()));
    }

    fn on_stw_info_read(&mut self, info: &StwDeviceInformation, node_index: usize) {
        self.stw_infos.push((node_index, info.clone()));
    }
}

// Tests ------------------------------------------------------------------------------------------
