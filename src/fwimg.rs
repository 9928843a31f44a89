//! Firmware slot headers: state field and header area access
//!
//! The state field is three words that start erased and only ever have bits cleared, so a state
//! change is expressed as the list of words to overwrite and never needs an erase.

use secure_engine_kms_interface::{ActiveFwInfo, FwState, SeResult};

const STATE_WORDS: usize = 3;
const STATE_LEN: usize = STATE_WORDS * 4;
const FW_VERSION_OFFSET: usize = 6;
const FW_SIZE_OFFSET: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashError;

/// Raw access to the flash holding the slot headers
pub trait Flash {
    fn read(&mut self, address: usize, buffer: &mut [u8]) -> Result<(), FlashError>;
    /// Program `data`. Flash can only clear bits, set bits in `data` must already be set.
    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), FlashError>;
    fn erase(&mut self, address: usize, len: usize) -> Result<(), FlashError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    UnknownSlot,
    NotActive,
    OutsideHeader,
    IllegalTransition,
    /// Two reads of the state field disagreed
    Inconsistent,
    WouldSetBits,
    Flash,
}

impl From<Error> for SeResult {
    fn from(_error: Error) -> Self {
        Self::Error
    }
}

impl From<FlashError> for Error {
    fn from(_error: FlashError) -> Self {
        Self::Flash
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotKind {
    /// Slot executing firmware
    Active,
    /// Slot receiving a firmware update
    Download,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotConfig {
    pub kind: SlotKind,
    /// Flash address of the slot header
    pub header: usize,
}

impl SlotConfig {
    pub const fn active(header: usize) -> Self {
        Self {
            kind: SlotKind::Active,
            header,
        }
    }

    pub const fn download(header: usize) -> Self {
        Self {
            kind: SlotKind::Download,
            header,
        }
    }
}

/// Slot header table, slots are numbered by their index
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageLayout {
    pub slots: &'static [SlotConfig],
    /// Slot whose state records `ValidAll`
    pub master_slot: u32,
    /// Offset of the state field inside a header
    pub state_offset: usize,
    /// Offset of the image after its header, the header area spans `[header, header + image_offset)`
    pub image_offset: usize,
}

pub struct FirmwareImages<F> {
    flash: F,
    layout: ImageLayout,
}

impl<F: Flash> FirmwareImages<F> {
    pub fn new(flash: F, layout: ImageLayout) -> Self {
        Self { flash, layout }
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn flash(&mut self) -> &mut F {
        &mut self.flash
    }

    fn slot(&self, slot: u32) -> Result<&SlotConfig, Error> {
        self.layout
            .slots
            .get(slot as usize)
            .ok_or(Error::UnknownSlot)
    }

    fn active_slot(&self, slot: u32) -> Result<&SlotConfig, Error> {
        let config = self.slot(slot)?;
        if config.kind != SlotKind::Active {
            return Err(Error::NotActive);
        }
        Ok(config)
    }

    fn read_pattern(&mut self, header: usize) -> Result<[u32; STATE_WORDS], Error> {
        let mut raw = [0; STATE_LEN];
        self.flash
            .read(header + self.layout.state_offset, &mut raw)
            .map_err(|_err| {
                error!("Failed to read firmware state: {_err:?}");
                Error::Flash
            })?;
        let mut words = [0; STATE_WORDS];
        for (word, bytes) in words.iter_mut().zip(raw.chunks_exact(4)) {
            *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
        Ok(words)
    }

    /// State of an active or download slot
    pub fn state(&mut self, slot: u32) -> Result<FwState, Error> {
        let header = self.slot(slot)?.header;
        self.read_pattern(header).map(FwState::from_pattern)
    }

    /// Move an active slot to `requested` along one of the lifecycle edges
    pub fn set_state(&mut self, slot: u32, requested: FwState) -> Result<(), Error> {
        let header = self.active_slot(slot)?.header;
        let first = self.read_pattern(header)?;
        let second = self.read_pattern(header)?;
        if first != second {
            warn!("Firmware state of slot {slot} changed between reads");
            return Err(Error::Inconsistent);
        }
        let current = FwState::from_pattern(first);
        if !current.can_become(requested) {
            debug!("Refusing firmware state change {current:?} -> {requested:?}");
            return Err(Error::IllegalTransition);
        }

        let target = requested.pattern();
        if first.iter().zip(&target).any(|(now, next)| next & !now != 0) {
            return Err(Error::WouldSetBits);
        }
        for (idx, (now, next)) in first.iter().zip(&target).enumerate() {
            if now == next {
                continue;
            }
            let address = header + self.layout.state_offset + idx * 4;
            self.flash.write(address, &next.to_le_bytes()).map_err(|_err| {
                error!("Failed to write firmware state: {_err:?}");
                Error::Flash
            })?;
        }
        info!("Firmware slot {slot}: {current:?} -> {requested:?}");
        Ok(())
    }

    /// Whether `[address, address + len)` is inside the header area of an active slot
    pub fn in_active_header(&self, address: usize, len: usize) -> bool {
        let Some(end) = address.checked_add(len) else {
            return false;
        };
        self.layout
            .slots
            .iter()
            .filter(|slot| slot.kind == SlotKind::Active)
            .any(|slot| {
                address >= slot.header
                    && end <= slot.header.saturating_add(self.layout.image_offset)
            })
    }

    fn check_header_area(&self, address: usize, len: usize) -> Result<(), Error> {
        if len == 0 || !self.in_active_header(address, len) {
            warn!("Access to {address:#x}+{len} outside of the firmware headers");
            return Err(Error::OutsideHeader);
        }
        Ok(())
    }

    pub fn read(&mut self, address: usize, buffer: &mut [u8]) -> Result<(), Error> {
        self.check_header_area(address, buffer.len())?;
        Ok(self.flash.read(address, buffer)?)
    }

    pub fn write(&mut self, address: usize, data: &[u8]) -> Result<(), Error> {
        self.check_header_area(address, data.len())?;
        Ok(self.flash.write(address, data)?)
    }

    pub fn erase(&mut self, address: usize, len: usize) -> Result<(), Error> {
        self.check_header_area(address, len)?;
        Ok(self.flash.erase(address, len)?)
    }

    /// Version and size recorded in the header of an active slot
    pub fn active_fw_info(&mut self, slot: u32) -> Result<ActiveFwInfo, Error> {
        let header = self.active_slot(slot)?.header;
        let mut raw = [0; FW_SIZE_OFFSET + 4];
        self.flash.read(header, &mut raw)?;
        let version = u16::from_le_bytes([raw[FW_VERSION_OFFSET], raw[FW_VERSION_OFFSET + 1]]);
        let size = u32::from_le_bytes([
            raw[FW_SIZE_OFFSET],
            raw[FW_SIZE_OFFSET + 1],
            raw[FW_SIZE_OFFSET + 2],
            raw[FW_SIZE_OFFSET + 3],
        ]);
        Ok(ActiveFwInfo { version, size })
    }
}
