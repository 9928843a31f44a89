//! Single entry point crossing into the enclave
//!
//! Every secure engine service and every forwarded KMS request goes through [`CallGate::call`].
//! The gate validates the caller before anything else: a call from outside the interface code,
//! or with a status word or KMS buffer reaching into enclave RAM, resets the system.

use core::hint::black_box;

use secure_engine_kms_interface::{
    is_kms_service, ActiveFwInfo, Cluster, FwState, FwType, Rv, SeResult, SeStatus, ServiceId,
    CLUSTER_MASK, SE_ADDON_MASK, VALID_ALL_SLOTS,
};

use crate::config::{MemoryMap, Region};
use crate::dispatcher::{KmsEntry, Request};
use crate::fwimg::{FirmwareImages, Flash};

/// Restricted services latch, open
const SE_UNLOCKED: u32 = 0x5555_5555;
/// Restricted services latch, closed until reset
const SE_LOCKED: u32 = 0x7AAA_AAAA;
/// Minimum output of the low level finish services, one authentication tag
const FINISH_OUTPUT_MIN: usize = 16;

/// Hooks into the core and the secure hardware
pub trait Platform {
    fn reset(&mut self) -> !;
    fn in_handler_mode(&self) -> bool;
    /// Mask interrupts and switch to the enclave's protected execution
    fn enter_protected_area(&mut self);
    /// Leave the protected execution, restoring the caller's interrupt mask
    fn exit_protected_area(&mut self, primask: u32);
    fn vector_table(&self) -> usize;
    fn set_vector_table(&mut self, address: usize);
    fn enclave_vector_table(&self) -> usize;
    fn set_core_clock(&mut self);
    fn save_disable_irq(&mut self, state: &mut [u32]);
    fn restore_enable_irq(&mut self, state: &[u32]);
    /// Scrub the enclave state before the restricted services get locked
    fn core_cleanup(&mut self);
    /// Lock the keys used by the restricted services
    fn lock_keys(&mut self) -> Result<(), SeStatus>;
    fn exit_interrupt(&mut self);
}

/// Firmware decryption and authentication primitives
pub trait EngineServices {
    fn decrypt_init(&mut self, header: &[u8], fw_type: FwType) -> Result<(), SeStatus>;
    fn decrypt_append(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        output_len: &mut usize,
    ) -> Result<(), SeStatus>;
    fn decrypt_finish(&mut self, output: &mut [u8], output_len: &mut usize)
        -> Result<(), SeStatus>;
    fn authenticate_init(&mut self, header: &[u8], fw_type: FwType) -> Result<(), SeStatus>;
    fn authenticate_append(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        output_len: &mut usize,
    ) -> Result<(), SeStatus>;
    fn authenticate_finish(
        &mut self,
        output: &mut [u8],
        output_len: &mut usize,
    ) -> Result<(), SeStatus>;
    fn authenticate_metadata(&mut self, header: &[u8]) -> Result<(), SeStatus>;
    fn ext_flash_decrypt_init(&mut self, header: &[u8]) -> Result<(), SeStatus>;
}

/// Arguments of a service call
#[derive(Debug)]
pub enum ServiceArgs<'a, 'v> {
    Empty,
    /// Low level decrypt and authenticate init
    ImageHeader { header: &'a [u8], fw_type: FwType },
    Append {
        input: &'a [u8],
        output: &'a mut [u8],
        output_len: &'a mut usize,
    },
    Finish {
        output: &'a mut [u8],
        output_len: &'a mut usize,
    },
    /// Metadata authentication and external flash decryption
    Header { header: &'a [u8] },
    FwInfo {
        slot: u32,
        info: &'a mut Option<ActiveFwInfo>,
    },
    Slot { slot: u32 },
    GetState {
        slot: u32,
        state: &'a mut Option<FwState>,
    },
    SetState { slot: u32, state: FwState },
    SaveIrq { state: &'a mut [u32] },
    RestoreIrq { state: &'a [u32] },
    Read { address: usize, buffer: &'a mut [u8] },
    Write { address: usize, data: &'a [u8] },
    Erase { address: usize, len: usize },
    Kms(Request<'a, 'v>),
}

/// Status word written back to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Engine(SeStatus),
    /// Result of a forwarded KMS request
    Kms(Rv),
}

fn engine_result(status: &mut Status, result: Result<(), SeStatus>) -> SeResult {
    match result {
        Ok(()) => SeResult::Success,
        Err(error) => {
            *status = Status::Engine(error);
            SeResult::Error
        }
    }
}

fn mismatch(_id: ServiceId) -> SeResult {
    debug!("Arguments do not belong to {_id:?}");
    SeResult::Error
}

pub struct CallGate<P, E, F, K> {
    platform: P,
    engine: E,
    images: FirmwareImages<F>,
    kms: K,
    memory: MemoryMap,
    restricted: u32,
    in_interrupt: bool,
}

impl<P: Platform, E: EngineServices, F: Flash, K: KmsEntry> CallGate<P, E, F, K> {
    pub fn new(platform: P, engine: E, images: FirmwareImages<F>, kms: K, memory: MemoryMap) -> Self {
        Self {
            platform,
            engine,
            images,
            kms,
            memory,
            restricted: SE_UNLOCKED,
            in_interrupt: false,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn images(&mut self) -> &mut FirmwareImages<F> {
        &mut self.images
    }

    pub fn kms(&self) -> &K {
        &self.kms
    }

    /// An interrupt routed to the non secure world is being serviced until `ExitInterrupt`
    pub fn enter_interrupt(&mut self) {
        self.in_interrupt = true;
    }

    pub fn call(
        &mut self,
        caller: usize,
        status: &mut Status,
        primask: u32,
        service: u32,
        args: ServiceArgs<'_, '_>,
    ) -> SeResult {
        self.platform.enter_protected_area();
        self.check_caller(caller, Region::of(&*status));
        let result = self.guarded(status, service, args);
        self.platform.exit_protected_area(primask);
        result
    }

    fn reset(&mut self, _reason: &str) -> ! {
        error!("Security violation, resetting: {_reason}");
        self.platform.reset()
    }

    fn check_caller(&mut self, caller: usize, status: Region) {
        if !self.memory.interface_rom.contains(caller, 1) {
            self.reset("call from outside of the interface");
        }
        if !self.in_caller_ram(status) {
            self.reset("status word outside of caller RAM");
        }

        let rom = black_box(self.memory.interface_rom);
        if caller < rom.start || caller - rom.start >= rom.len {
            self.reset("call from outside of the interface");
        }
        if !black_box(self.in_caller_ram(status)) {
            self.reset("status word outside of caller RAM");
        }
    }

    /// Inside RAM and clear of enclave RAM
    fn in_caller_ram(&self, region: Region) -> bool {
        self.memory.ram.contains(region.start, region.len)
            && !self.memory.se_ram.overlaps(region.start, region.len)
    }

    /// Inside bootloader RAM and clear of enclave RAM, checked twice
    fn in_bootloader_ram(&self, region: Region) -> bool {
        let first = self.memory.bootloader_ram.contains(region.start, region.len)
            && !self.memory.se_ram.overlaps(region.start, region.len);
        let memory = black_box(self.memory);
        let second = !memory.se_ram.overlaps(region.start, region.len)
            && memory.bootloader_ram.contains(region.start, region.len);
        first && second
    }

    fn check_restricted(&mut self, id: ServiceId) {
        if !id.is_restricted() {
            return;
        }
        if self.restricted == SE_LOCKED {
            self.reset("restricted service called after lock");
        }
        if black_box(self.restricted) != SE_UNLOCKED {
            self.reset("restricted service called after lock");
        }
    }

    fn guarded(&mut self, status: &mut Status, service: u32, args: ServiceArgs<'_, '_>) -> SeResult {
        let exit_interrupt = service == u32::from(ServiceId::ExitInterrupt);
        if self.in_interrupt && !exit_interrupt {
            debug!("Service {service:#x} called while servicing an interrupt");
            *status = Status::Engine(SeStatus::Busy);
            return SeResult::Success;
        }
        if exit_interrupt {
            if !self.in_interrupt {
                *status = Status::Engine(SeStatus::Ok);
                return SeResult::Error;
            }
            if !self.platform.in_handler_mode() {
                *status = Status::Engine(SeStatus::Busy);
                return SeResult::Success;
            }
        }

        let caller_table = self.platform.vector_table();
        let enclave_table = self.platform.enclave_vector_table();
        self.platform.set_vector_table(enclave_table);
        *status = Status::Engine(SeStatus::Ok);

        let result = if is_kms_service(service) {
            self.forward(status, service, args)
        } else {
            self.serve(status, service, args)
        };

        self.platform.set_vector_table(caller_table);
        if result == SeResult::Error && *status == Status::Engine(SeStatus::Ok) {
            *status = Status::Engine(SeStatus::Ko);
        }
        result
    }

    fn forward(&mut self, status: &mut Status, service: u32, args: ServiceArgs<'_, '_>) -> SeResult {
        let ServiceArgs::Kms(request) = args else {
            debug!("KMS service {service:#x} without a request");
            return SeResult::Error;
        };
        let mut refused = false;
        request.visit_buffers(|address, len| {
            refused |= len != 0 && !self.in_caller_ram(Region::new(address, len));
        });
        if refused {
            self.reset("KMS buffer outside of caller RAM");
        }
        let memory = black_box(self.memory);
        let mut admitted = true;
        request.visit_buffers(|address, len| {
            admitted &= len == 0
                || (!memory.se_ram.overlaps(address, len) && memory.ram.contains(address, len));
        });
        if !admitted {
            self.reset("KMS buffer outside of caller RAM");
        }

        let function = (service & !(SE_ADDON_MASK | CLUSTER_MASK)) | u32::from(Cluster::Unsecure);
        let rv = self.kms.dispatch(function, request);
        *status = Status::Kms(rv);
        if rv == Rv::Ok {
            SeResult::Success
        } else {
            SeResult::Error
        }
    }

    fn serve(&mut self, status: &mut Status, service: u32, args: ServiceArgs<'_, '_>) -> SeResult {
        let Ok(id) = ServiceId::try_from(service) else {
            self.reset("unknown service");
        };
        self.check_restricted(id);

        match id {
            ServiceId::Init => {
                let ServiceArgs::Empty = args else {
                    return mismatch(id);
                };
                self.platform.set_core_clock();
                SeResult::Success
            }
            ServiceId::LlDecryptInit | ServiceId::LlAuthenticateFwInit => {
                let ServiceArgs::ImageHeader { header, fw_type } = args else {
                    return mismatch(id);
                };
                if !self.in_bootloader_ram(Region::of(header)) {
                    return SeResult::Error;
                }
                let result = if id == ServiceId::LlDecryptInit {
                    self.engine.decrypt_init(header, fw_type)
                } else {
                    self.engine.authenticate_init(header, fw_type)
                };
                engine_result(status, result)
            }
            ServiceId::LlDecryptAppend | ServiceId::LlAuthenticateFwAppend => {
                let ServiceArgs::Append {
                    input,
                    output,
                    output_len,
                } = args
                else {
                    return mismatch(id);
                };
                let buffers = [
                    Region::of(input),
                    Region::of(&*output),
                    Region::of(&*output_len),
                ];
                if input.is_empty() || !buffers.iter().all(|b| self.in_bootloader_ram(*b)) {
                    return SeResult::Error;
                }
                let result = if id == ServiceId::LlDecryptAppend {
                    self.engine.decrypt_append(input, output, output_len)
                } else {
                    self.engine.authenticate_append(input, output, output_len)
                };
                engine_result(status, result)
            }
            ServiceId::LlDecryptFinish | ServiceId::LlAuthenticateFwFinish => {
                let ServiceArgs::Finish { output, output_len } = args else {
                    return mismatch(id);
                };
                if output.len() < FINISH_OUTPUT_MIN
                    || !self.in_bootloader_ram(Region::of(&*output))
                    || !self.in_bootloader_ram(Region::of(&*output_len))
                {
                    return SeResult::Error;
                }
                let result = if id == ServiceId::LlDecryptFinish {
                    self.engine.decrypt_finish(output, output_len)
                } else {
                    self.engine.authenticate_finish(output, output_len)
                };
                engine_result(status, result)
            }
            ServiceId::HlAuthenticateMetadata | ServiceId::ExtFlashDecryptInit => {
                let ServiceArgs::Header { header } = args else {
                    return mismatch(id);
                };
                if !self.in_bootloader_ram(Region::of(header)) {
                    return SeResult::Error;
                }
                let result = if id == ServiceId::HlAuthenticateMetadata {
                    self.engine.authenticate_metadata(header)
                } else {
                    self.engine.ext_flash_decrypt_init(header)
                };
                engine_result(status, result)
            }
            ServiceId::AppGetActiveFwInfo => {
                let ServiceArgs::FwInfo { slot, info } = args else {
                    return mismatch(id);
                };
                let region = Region::of(&*info);
                if !self.in_caller_ram(region) || !black_box(self.in_caller_ram(region)) {
                    return SeResult::Error;
                }
                match self.images.active_fw_info(slot) {
                    Ok(active) => {
                        *info = Some(active);
                        SeResult::Success
                    }
                    Err(error) => error.into(),
                }
            }
            ServiceId::AppValidateFw => {
                let ServiceArgs::Slot { slot } = args else {
                    return mismatch(id);
                };
                let result = if slot == VALID_ALL_SLOTS {
                    let master = self.images.layout().master_slot;
                    self.images.set_state(master, FwState::ValidAll)
                } else {
                    self.images.set_state(slot, FwState::Valid)
                };
                match result {
                    Ok(()) => SeResult::Success,
                    Err(_err) => {
                        warn!("Failed to validate slot {slot}: {_err:?}");
                        SeResult::Error
                    }
                }
            }
            ServiceId::AppGetFwState | ServiceId::ImgGetFwState => {
                let ServiceArgs::GetState { slot, state } = args else {
                    return mismatch(id);
                };
                if !self.in_bootloader_ram(Region::of(&*state)) {
                    return SeResult::Error;
                }
                match self.images.state(slot) {
                    Ok(current) => {
                        *state = Some(current);
                        SeResult::Success
                    }
                    Err(error) => error.into(),
                }
            }
            ServiceId::ImgSetFwState => {
                let ServiceArgs::SetState { slot, state } = args else {
                    return mismatch(id);
                };
                match self.images.set_state(slot, state) {
                    Ok(()) => {
                        info!("Slot {slot} is now {state:?}");
                        SeResult::Success
                    }
                    Err(error) => error.into(),
                }
            }
            ServiceId::SysSaveDisableIrq => {
                let ServiceArgs::SaveIrq { state } = args else {
                    return mismatch(id);
                };
                let region = Region::of(&*state);
                if !self.in_caller_ram(region) || !black_box(self.in_caller_ram(region)) {
                    return SeResult::Error;
                }
                self.platform.save_disable_irq(state);
                SeResult::Success
            }
            ServiceId::SysRestoreEnableIrq => {
                let ServiceArgs::RestoreIrq { state } = args else {
                    return mismatch(id);
                };
                let region = Region::of(state);
                if !self.in_caller_ram(region) || !black_box(self.in_caller_ram(region)) {
                    return SeResult::Error;
                }
                self.platform.restore_enable_irq(state);
                SeResult::Success
            }
            ServiceId::ImgRead => {
                let ServiceArgs::Read { address, buffer } = args else {
                    return mismatch(id);
                };
                if !self.in_bootloader_ram(Region::of(&*buffer)) {
                    return SeResult::Error;
                }
                match self.images.read(address, buffer) {
                    Ok(()) => SeResult::Success,
                    Err(error) => error.into(),
                }
            }
            ServiceId::ImgWrite => {
                let ServiceArgs::Write { address, data } = args else {
                    return mismatch(id);
                };
                if !self.in_bootloader_ram(Region::of(data)) {
                    return SeResult::Error;
                }
                match self.images.write(address, data) {
                    Ok(()) => SeResult::Success,
                    Err(error) => error.into(),
                }
            }
            ServiceId::ImgErase => {
                let ServiceArgs::Erase { address, len } = args else {
                    return mismatch(id);
                };
                match self.images.erase(address, len) {
                    Ok(()) => SeResult::Success,
                    Err(error) => error.into(),
                }
            }
            ServiceId::LockRestrictServices => {
                let ServiceArgs::Empty = args else {
                    return mismatch(id);
                };
                self.platform.core_cleanup();
                self.restricted = SE_LOCKED;
                info!("Restricted services locked");
                engine_result(status, self.platform.lock_keys())
            }
            ServiceId::ExitInterrupt => {
                self.in_interrupt = false;
                self.platform.exit_interrupt();
                self.reset("interrupt serviced")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::boxed::Box;
    use std::vec::Vec;

    use secure_engine_kms_interface::{FunctionId, Info, KMS_ADDON};

    use super::*;
    use crate::testing::{kms, MemoryFlash, TestKms, IMAGE_LAYOUT};

    const ROM: usize = 0x0C00_0000;
    const CALLER: usize = ROM + 0x40;
    const CALLER_TABLE: usize = 0x0804_0000;
    const ENCLAVE_TABLE: usize = 0x0C00_4000;

    #[derive(Debug, Default)]
    struct TestPlatform {
        vector_table: usize,
        tables: Vec<usize>,
        handler_mode: bool,
        protected: bool,
        primask: Option<u32>,
        clock_set: bool,
        cleaned: bool,
        keys_locked: bool,
        refuse_key_lock: bool,
        interrupts_exited: usize,
        irq: Vec<u32>,
    }

    impl Platform for TestPlatform {
        fn reset(&mut self) -> ! {
            panic!("system reset");
        }

        fn in_handler_mode(&self) -> bool {
            self.handler_mode
        }

        fn enter_protected_area(&mut self) {
            self.protected = true;
        }

        fn exit_protected_area(&mut self, primask: u32) {
            self.protected = false;
            self.primask = Some(primask);
        }

        fn vector_table(&self) -> usize {
            self.vector_table
        }

        fn set_vector_table(&mut self, address: usize) {
            self.tables.push(address);
            self.vector_table = address;
        }

        fn enclave_vector_table(&self) -> usize {
            ENCLAVE_TABLE
        }

        fn set_core_clock(&mut self) {
            self.clock_set = true;
        }

        fn save_disable_irq(&mut self, state: &mut [u32]) {
            state.fill(0x1234);
            self.irq = state.to_vec();
        }

        fn restore_enable_irq(&mut self, state: &[u32]) {
            self.irq = state.to_vec();
        }

        fn core_cleanup(&mut self) {
            self.cleaned = true;
        }

        fn lock_keys(&mut self) -> Result<(), SeStatus> {
            if self.refuse_key_lock {
                return Err(SeStatus::Ko);
            }
            self.keys_locked = true;
            Ok(())
        }

        fn exit_interrupt(&mut self) {
            self.interrupts_exited += 1;
        }
    }

    /// Accepts everything except a final authentication tag
    #[derive(Debug, Default)]
    struct TestEngine {
        calls: Vec<&'static str>,
    }

    impl EngineServices for TestEngine {
        fn decrypt_init(&mut self, _header: &[u8], _fw_type: FwType) -> Result<(), SeStatus> {
            self.calls.push("decrypt_init");
            Ok(())
        }

        fn decrypt_append(
            &mut self,
            input: &[u8],
            output: &mut [u8],
            output_len: &mut usize,
        ) -> Result<(), SeStatus> {
            self.calls.push("decrypt_append");
            output[..input.len()].copy_from_slice(input);
            *output_len = input.len();
            Ok(())
        }

        fn decrypt_finish(
            &mut self,
            _output: &mut [u8],
            output_len: &mut usize,
        ) -> Result<(), SeStatus> {
            self.calls.push("decrypt_finish");
            *output_len = 0;
            Ok(())
        }

        fn authenticate_init(&mut self, _header: &[u8], _fw_type: FwType) -> Result<(), SeStatus> {
            self.calls.push("authenticate_init");
            Ok(())
        }

        fn authenticate_append(
            &mut self,
            _input: &[u8],
            _output: &mut [u8],
            _output_len: &mut usize,
        ) -> Result<(), SeStatus> {
            self.calls.push("authenticate_append");
            Ok(())
        }

        fn authenticate_finish(
            &mut self,
            _output: &mut [u8],
            _output_len: &mut usize,
        ) -> Result<(), SeStatus> {
            self.calls.push("authenticate_finish");
            Err(SeStatus::SignatureErr)
        }

        fn authenticate_metadata(&mut self, _header: &[u8]) -> Result<(), SeStatus> {
            self.calls.push("authenticate_metadata");
            Ok(())
        }

        fn ext_flash_decrypt_init(&mut self, _header: &[u8]) -> Result<(), SeStatus> {
            self.calls.push("ext_flash_decrypt_init");
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct BootloaderRam {
        header: [u8; 32],
        input: [u8; 16],
        output: [u8; 32],
        output_len: usize,
        state: Option<FwState>,
    }

    struct EnclaveRam {
        bytes: [u8; 64],
        status: Status,
    }

    type Gate = CallGate<TestPlatform, TestEngine, MemoryFlash, TestKms>;

    struct Fixture {
        gate: Gate,
        bootloader: Box<BootloaderRam>,
        enclave: Box<EnclaveRam>,
        status: Status,
    }

    impl Fixture {
        fn new() -> Self {
            let bootloader = Box::<BootloaderRam>::default();
            let enclave = Box::new(EnclaveRam {
                bytes: [0; 64],
                status: Status::Engine(SeStatus::Ok),
            });
            let memory = MemoryMap {
                interface_rom: Region::new(ROM, 0x100),
                ram: Region::new(0, usize::MAX),
                se_ram: Region::of(&*enclave),
                bootloader_ram: Region::of(&*bootloader),
            };
            let mut flash = MemoryFlash::default();
            flash.set_state(0, FwState::SelfTest);
            let platform = TestPlatform {
                vector_table: CALLER_TABLE,
                ..Default::default()
            };
            Self {
                gate: CallGate::new(
                    platform,
                    TestEngine::default(),
                    FirmwareImages::new(flash, IMAGE_LAYOUT),
                    kms(),
                    memory,
                ),
                bootloader,
                enclave,
                status: Status::Engine(SeStatus::Ko),
            }
        }

        fn call(&mut self, service: ServiceId, args: ServiceArgs<'_, '_>) -> SeResult {
            self.gate
                .call(CALLER, &mut self.status, 0, u32::from(service), args)
        }
    }

    #[test]
    fn init_sets_clock() {
        let mut f = Fixture::new();
        assert_eq!(f.call(ServiceId::Init, ServiceArgs::Empty), SeResult::Success);
        assert_eq!(f.status, Status::Engine(SeStatus::Ok));
        let platform = f.gate.platform();
        assert!(platform.clock_set);
        assert!(!platform.protected);
        assert_eq!(platform.primask, Some(0));
        assert_eq!(platform.tables, [ENCLAVE_TABLE, CALLER_TABLE]);
    }

    #[test]
    #[should_panic(expected = "system reset")]
    fn foreign_caller_resets() {
        let mut f = Fixture::new();
        let service = u32::from(ServiceId::Init);
        f.gate
            .call(ROM + 0x100, &mut f.status, 0, service, ServiceArgs::Empty);
    }

    #[test]
    #[should_panic(expected = "system reset")]
    fn status_in_enclave_resets() {
        let mut f = Fixture::new();
        let service = u32::from(ServiceId::Init);
        f.gate
            .call(CALLER, &mut f.enclave.status, 0, service, ServiceArgs::Empty);
    }

    #[test]
    #[should_panic(expected = "system reset")]
    fn unknown_service_resets() {
        let mut f = Fixture::new();
        f.gate.call(CALLER, &mut f.status, 0, 0x77, ServiceArgs::Empty);
    }

    #[test]
    fn failure_restores_vector_table() {
        let mut f = Fixture::new();
        let args = ServiceArgs::Slot { slot: 2 };
        assert_eq!(f.call(ServiceId::AppValidateFw, args), SeResult::Error);
        assert_eq!(f.status, Status::Engine(SeStatus::Ko));
        assert_eq!(f.gate.platform().vector_table, CALLER_TABLE);

        let args = ServiceArgs::Slot { slot: 0 };
        assert_eq!(f.call(ServiceId::Init, args), SeResult::Error);
        assert!(!f.gate.platform().clock_set);
    }

    #[test]
    fn validate_and_read_state() {
        let mut f = Fixture::new();
        let args = ServiceArgs::Slot { slot: 0 };
        assert_eq!(f.call(ServiceId::AppValidateFw, args), SeResult::Success);

        let args = ServiceArgs::GetState {
            slot: 0,
            state: &mut f.bootloader.state,
        };
        let id = u32::from(ServiceId::AppGetFwState);
        assert_eq!(f.gate.call(CALLER, &mut f.status, 0, id, args), SeResult::Success);
        assert_eq!(f.bootloader.state, Some(FwState::Valid));

        let mut outside = None;
        let args = ServiceArgs::GetState {
            slot: 0,
            state: &mut outside,
        };
        assert_eq!(f.call(ServiceId::ImgGetFwState, args), SeResult::Error);
        assert_eq!(outside, None);
    }

    #[test]
    fn validate_all_marks_master() {
        let mut f = Fixture::new();
        let args = ServiceArgs::Slot {
            slot: VALID_ALL_SLOTS,
        };
        assert_eq!(f.call(ServiceId::AppValidateFw, args), SeResult::Success);
        assert_eq!(f.gate.images().state(0), Ok(FwState::ValidAll));
    }

    #[test]
    fn set_state_follows_lifecycle() {
        let mut f = Fixture::new();
        let args = ServiceArgs::SetState {
            slot: 0,
            state: FwState::New,
        };
        assert_eq!(f.call(ServiceId::ImgSetFwState, args), SeResult::Error);
        let args = ServiceArgs::SetState {
            slot: 0,
            state: FwState::Invalid,
        };
        assert_eq!(f.call(ServiceId::ImgSetFwState, args), SeResult::Success);
        assert_eq!(f.gate.images().state(0), Ok(FwState::Invalid));
    }

    #[test]
    fn active_firmware_info() {
        let mut f = Fixture::new();
        let header = IMAGE_LAYOUT.slots[0].header;
        f.gate
            .images()
            .flash()
            .program(header + 6, &[0x02, 0x00, 0x00, 0x80, 0x00, 0x00]);
        let mut info = None;
        let args = ServiceArgs::FwInfo {
            slot: 0,
            info: &mut info,
        };
        assert_eq!(f.call(ServiceId::AppGetActiveFwInfo, args), SeResult::Success);
        assert_eq!(
            info,
            Some(ActiveFwInfo {
                version: 2,
                size: 0x8000
            })
        );
    }

    #[test]
    fn header_access() {
        let mut f = Fixture::new();
        let write = u32::from(ServiceId::ImgWrite);
        let read = u32::from(ServiceId::ImgRead);
        let header = IMAGE_LAYOUT.slots[0].header;
        f.bootloader.input = [0xF0; 16];
        let args = ServiceArgs::Write {
            address: header + 0x40,
            data: &f.bootloader.input,
        };
        assert_eq!(
            f.gate.call(CALLER, &mut f.status, 0, write, args),
            SeResult::Success
        );
        let args = ServiceArgs::Read {
            address: header + 0x40,
            buffer: &mut f.bootloader.output[..16],
        };
        assert_eq!(
            f.gate.call(CALLER, &mut f.status, 0, read, args),
            SeResult::Success
        );
        assert_eq!(f.bootloader.output[..16], [0xF0; 16]);

        let args = ServiceArgs::Read {
            address: header + IMAGE_LAYOUT.image_offset,
            buffer: &mut f.bootloader.output,
        };
        assert_eq!(
            f.gate.call(CALLER, &mut f.status, 0, read, args),
            SeResult::Error
        );
        let mut stack = [0; 4];
        let args = ServiceArgs::Read {
            address: header,
            buffer: &mut stack,
        };
        assert_eq!(f.call(ServiceId::ImgRead, args), SeResult::Error);

        let args = ServiceArgs::Erase {
            address: IMAGE_LAYOUT.slots[2].header,
            len: 16,
        };
        assert_eq!(f.call(ServiceId::ImgErase, args), SeResult::Error);
        assert_eq!(f.gate.images().flash().erase_count(), 0);
    }

    #[test]
    fn low_level_decryption() {
        let mut f = Fixture::new();
        let args = ServiceArgs::ImageHeader {
            header: &f.bootloader.header,
            fw_type: FwType::Complete,
        };
        let id = u32::from(ServiceId::LlDecryptInit);
        assert_eq!(f.gate.call(CALLER, &mut f.status, 0, id, args), SeResult::Success);

        f.bootloader.input = [7; 16];
        let ram = &mut *f.bootloader;
        let args = ServiceArgs::Append {
            input: &ram.input,
            output: &mut ram.output,
            output_len: &mut ram.output_len,
        };
        let id = u32::from(ServiceId::LlDecryptAppend);
        assert_eq!(f.gate.call(CALLER, &mut f.status, 0, id, args), SeResult::Success);
        assert_eq!(ram.output_len, 16);
        assert_eq!(ram.output[..16], [7; 16]);

        let args = ServiceArgs::Append {
            input: &ram.input[..0],
            output: &mut ram.output,
            output_len: &mut ram.output_len,
        };
        assert_eq!(f.gate.call(CALLER, &mut f.status, 0, id, args), SeResult::Error);

        let args = ServiceArgs::Finish {
            output: &mut ram.output[..8],
            output_len: &mut ram.output_len,
        };
        let id = u32::from(ServiceId::LlDecryptFinish);
        assert_eq!(f.gate.call(CALLER, &mut f.status, 0, id, args), SeResult::Error);
        assert_eq!(f.gate.engine().calls, ["decrypt_init", "decrypt_append"]);

        let header = [0; 32];
        let args = ServiceArgs::ImageHeader {
            header: &header,
            fw_type: FwType::Complete,
        };
        assert_eq!(f.call(ServiceId::LlDecryptInit, args), SeResult::Error);
        assert_eq!(f.status, Status::Engine(SeStatus::Ko));
    }

    #[test]
    fn authentication_failure_status() {
        let mut f = Fixture::new();
        let ram = &mut *f.bootloader;
        let args = ServiceArgs::Finish {
            output: &mut ram.output,
            output_len: &mut ram.output_len,
        };
        let id = u32::from(ServiceId::LlAuthenticateFwFinish);
        assert_eq!(f.gate.call(CALLER, &mut f.status, 0, id, args), SeResult::Error);
        assert_eq!(f.status, Status::Engine(SeStatus::SignatureErr));

        let args = ServiceArgs::Header {
            header: &ram.header,
        };
        let id = u32::from(ServiceId::HlAuthenticateMetadata);
        assert_eq!(f.gate.call(CALLER, &mut f.status, 0, id, args), SeResult::Success);
    }

    #[test]
    fn irq_state_buffers() {
        let mut f = Fixture::new();
        let mut state = [0; 2];
        let args = ServiceArgs::SaveIrq { state: &mut state };
        assert_eq!(f.call(ServiceId::SysSaveDisableIrq, args), SeResult::Success);
        assert_eq!(state, [0x1234; 2]);
        let args = ServiceArgs::RestoreIrq { state: &[1, 2] };
        assert_eq!(f.call(ServiceId::SysRestoreEnableIrq, args), SeResult::Success);
        assert_eq!(f.gate.platform().irq, [1, 2]);
    }

    #[test]
    fn header_in_enclave_refused() {
        let mut f = Fixture::new();
        let args = ServiceArgs::Header {
            header: &f.enclave.bytes[..16],
        };
        let id = u32::from(ServiceId::ExtFlashDecryptInit);
        assert_eq!(f.gate.call(CALLER, &mut f.status, 0, id, args), SeResult::Error);
        assert_eq!(f.status, Status::Engine(SeStatus::Ko));
        assert!(f.gate.engine().calls.is_empty());
    }

    #[test]
    fn lock_restricted_services() {
        let mut f = Fixture::new();
        assert_eq!(
            f.call(ServiceId::LockRestrictServices, ServiceArgs::Empty),
            SeResult::Success
        );
        let platform = f.gate.platform();
        assert!(platform.cleaned && platform.keys_locked);

        let args = ServiceArgs::Slot { slot: 0 };
        assert_eq!(f.call(ServiceId::AppValidateFw, args), SeResult::Success);
    }

    #[test]
    #[should_panic(expected = "system reset")]
    fn restricted_service_after_lock_resets() {
        let mut f = Fixture::new();
        f.gate.platform.refuse_key_lock = true;
        assert_eq!(
            f.call(ServiceId::LockRestrictServices, ServiceArgs::Empty),
            SeResult::Error
        );
        f.call(ServiceId::Init, ServiceArgs::Empty);
    }

    #[test]
    fn busy_while_servicing_interrupt() {
        let mut f = Fixture::new();
        assert_eq!(
            f.call(ServiceId::ExitInterrupt, ServiceArgs::Empty),
            SeResult::Error
        );
        assert_eq!(f.status, Status::Engine(SeStatus::Ok));

        f.gate.enter_interrupt();
        assert_eq!(f.call(ServiceId::Init, ServiceArgs::Empty), SeResult::Success);
        assert_eq!(f.status, Status::Engine(SeStatus::Busy));
        assert!(!f.gate.platform().clock_set);
        assert!(f.gate.platform().tables.is_empty());

        assert_eq!(
            f.call(ServiceId::ExitInterrupt, ServiceArgs::Empty),
            SeResult::Success
        );
        assert_eq!(f.status, Status::Engine(SeStatus::Busy));
        assert_eq!(f.gate.platform().interrupts_exited, 0);
    }

    #[test]
    #[should_panic(expected = "system reset")]
    fn exit_interrupt_resets() {
        let mut f = Fixture::new();
        f.gate.enter_interrupt();
        f.gate.platform.handler_mode = true;
        f.call(ServiceId::ExitInterrupt, ServiceArgs::Empty);
    }

    #[test]
    fn kms_forwarding() {
        let mut f = Fixture::new();
        let id = KMS_ADDON | u32::from(FunctionId::Initialize);
        let result = f
            .gate
            .call(CALLER, &mut f.status, 0, id, ServiceArgs::Kms(Request::Initialize));
        assert_eq!(result, SeResult::Success);
        assert_eq!(f.status, Status::Kms(Rv::Ok));
        assert!(f.gate.kms().sessions().is_initialized());

        let result = f
            .gate
            .call(CALLER, &mut f.status, 0, id, ServiceArgs::Kms(Request::Initialize));
        assert_eq!(result, SeResult::Error);
        assert_eq!(f.status, Status::Kms(Rv::CryptokiAlreadyInitialized));

        let mut info: Option<Info> = None;
        let id = KMS_ADDON | u32::from(FunctionId::GetInfo);
        let args = ServiceArgs::Kms(Request::GetInfo { info: &mut info });
        assert_eq!(f.gate.call(CALLER, &mut f.status, 0, id, args), SeResult::Success);
        assert!(info.is_some());

        let args = ServiceArgs::Empty;
        assert_eq!(f.gate.call(CALLER, &mut f.status, 0, id, args), SeResult::Error);
    }

    #[test]
    #[should_panic(expected = "system reset")]
    fn kms_buffer_in_enclave_resets() {
        let mut f = Fixture::new();
        let id = KMS_ADDON | u32::from(FunctionId::GenerateRandom);
        let args = ServiceArgs::Kms(Request::GenerateRandom {
            session: 1,
            output: &mut f.enclave.bytes[..8],
        });
        f.gate.call(CALLER, &mut f.status, 0, id, args);
    }

    #[test]
    #[should_panic(expected = "system reset")]
    fn kms_buffer_outside_ram_resets() {
        let mut f = Fixture::new();
        f.gate.memory.ram = Region::of(&f.status);
        let mut output = [0; 8];
        let id = KMS_ADDON | u32::from(FunctionId::GenerateRandom);
        let args = ServiceArgs::Kms(Request::GenerateRandom {
            session: 1,
            output: &mut output,
        });
        f.gate.call(CALLER, &mut f.status, 0, id, args);
    }

    #[test]
    fn empty_kms_buffer_forwarded() {
        let mut f = Fixture::new();
        f.gate.memory.ram = Region::of(&f.status);
        let id = KMS_ADDON | u32::from(FunctionId::GenerateRandom);
        let args = ServiceArgs::Kms(Request::GenerateRandom {
            session: 1,
            output: &mut [],
        });
        assert_eq!(f.gate.call(CALLER, &mut f.status, 0, id, args), SeResult::Error);
        assert_eq!(f.status, Status::Kms(Rv::CryptokiNotInitialized));
    }
}
