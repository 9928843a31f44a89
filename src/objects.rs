//! Object handles, their provenance ranges and the serialised object format
//!
//! Local objects are stored as a "key head": five little endian words
//! (`version`, `configuration`, `blobs_size`, `blobs_count`, `object_id`) followed by
//! `blobs_count` attributes, each a `type` word, a `size` word and `size` bytes of value padded to
//! a multiple of four bytes.

use core::ops::RangeInclusive;

use secure_engine_kms_interface::{attribute, AttributeType, ObjectHandle};

use crate::config::{ConfigError, LOCKABLE_KEYS, NVM_OBJECTS_MAX};

pub const KEY_HEAD_VERSION: u32 = 0xB10B_0240;
pub const KEY_HEAD_CONFIGURATION: u32 = 0xB10B_0003;
pub const KEY_HEAD_LEN: usize = 20;
const ATTRIBUTE_HEAD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Truncated,
    BadHeader,
    TooLarge,
}

/// Where the object designated by a handle lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRange {
    /// Baked into the firmware, immutable
    Embedded,
    /// Provisioned into NVM by blob import, immutable at runtime
    NvmStatic,
    /// Created at runtime and persisted
    NvmDynamic,
    /// Created at runtime, lost on finalization
    VmDynamic,
    ExtTokenStatic,
    ExtTokenDynamic,
    Unknown,
}

impl ObjectRange {
    pub fn is_local(self) -> bool {
        matches!(
            self,
            Self::Embedded | Self::NvmStatic | Self::NvmDynamic | Self::VmDynamic
        )
    }

    pub fn is_external(self) -> bool {
        matches!(self, Self::ExtTokenStatic | Self::ExtTokenDynamic)
    }
}

/// Inclusive range of object handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRange {
    pub first: ObjectHandle,
    pub last: ObjectHandle,
}

impl HandleRange {
    pub const fn new(first: ObjectHandle, last: ObjectHandle) -> Self {
        Self { first, last }
    }

    pub const fn contains(&self, handle: ObjectHandle) -> bool {
        handle >= self.first && handle <= self.last
    }

    pub fn overlaps(&self, other: &HandleRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }

    pub fn handles(&self) -> RangeInclusive<ObjectHandle> {
        self.first..=self.last
    }
}

/// Handle ranges of every object provenance, checked in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLayout {
    pub embedded: Option<HandleRange>,
    pub nvm_static: Option<HandleRange>,
    pub nvm_dynamic: Option<HandleRange>,
    pub vm_dynamic: Option<HandleRange>,
    pub ext_token_static: Option<HandleRange>,
    pub ext_token_dynamic: Option<HandleRange>,
}

impl Default for ObjectLayout {
    fn default() -> Self {
        Self {
            embedded: Some(HandleRange::new(1, 29)),
            nvm_static: Some(HandleRange::new(30, 49)),
            nvm_dynamic: None,
            vm_dynamic: Some(HandleRange::new(50, 69)),
            ext_token_static: Some(HandleRange::new(70, 89)),
            ext_token_dynamic: Some(HandleRange::new(90, 110)),
        }
    }
}

impl ObjectLayout {
    fn ranges(&self) -> [(ObjectRange, Option<HandleRange>); 6] {
        [
            (ObjectRange::Embedded, self.embedded),
            (ObjectRange::NvmStatic, self.nvm_static),
            (ObjectRange::NvmDynamic, self.nvm_dynamic),
            (ObjectRange::VmDynamic, self.vm_dynamic),
            (ObjectRange::ExtTokenStatic, self.ext_token_static),
            (ObjectRange::ExtTokenDynamic, self.ext_token_dynamic),
        ]
    }

    pub fn classify(&self, handle: ObjectHandle) -> ObjectRange {
        self.ranges()
            .into_iter()
            .find_map(|(range, handles)| {
                handles
                    .filter(|handles| handles.contains(handle))
                    .map(|_| range)
            })
            .unwrap_or(ObjectRange::Unknown)
    }

    pub fn range(&self, range: ObjectRange) -> Option<HandleRange> {
        self.ranges()
            .into_iter()
            .find(|(candidate, _)| *candidate == range)
            .and_then(|(_, handles)| handles)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ranges = self.ranges();
        for (idx, (_, handles)) in ranges.iter().enumerate() {
            let Some(handles) = handles else {
                continue;
            };
            if handles.first > handles.last {
                return Err(ConfigError::EmptyRange);
            }
            if handles.contains(0) {
                return Err(ConfigError::NullHandle);
            }
            if handles.last >= LOCKABLE_KEYS {
                return Err(ConfigError::BeyondLockCapacity);
            }
            let overlapping = ranges[idx + 1..]
                .iter()
                .filter_map(|(_, other)| other.as_ref())
                .any(|other| other.overlaps(handles));
            if overlapping {
                return Err(ConfigError::Overlap);
            }
        }
        let nvm_handles: usize = [self.nvm_static, self.nvm_dynamic]
            .iter()
            .flatten()
            .map(|range| range.handles().count())
            .sum();
        if nvm_handles > NVM_OBJECTS_MAX {
            return Err(ConfigError::BeyondStoreCapacity);
        }
        Ok(())
    }
}

/// One attribute of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute<'a> {
    pub kind: AttributeType,
    pub value: &'a [u8],
}

impl<'a> Attribute<'a> {
    pub const fn new(kind: AttributeType, value: &'a [u8]) -> Self {
        Self { kind, value }
    }

    pub const fn bool(kind: AttributeType, value: bool) -> Self {
        Self {
            kind,
            value: if value { &[1] } else { &[0] },
        }
    }
}

/// Look up an attribute in a template
pub fn find<'a>(template: &[Attribute<'a>], kind: AttributeType) -> Option<&'a [u8]> {
    template
        .iter()
        .find(|attribute| attribute.kind == kind)
        .map(|attribute| attribute.value)
}

/// Attribute read request of `GetAttributeValue`
///
/// `len` is `None` when the length is unavailable, i.e. the attribute does not exist, is sensitive
/// or does not fit in `value`.
#[derive(Debug)]
pub struct AttributeRequest<'a> {
    pub kind: AttributeType,
    pub value: Option<&'a mut [u8]>,
    pub len: Option<usize>,
}

impl<'a> AttributeRequest<'a> {
    pub fn new(kind: AttributeType, value: Option<&'a mut [u8]>) -> Self {
        Self {
            kind,
            value,
            len: None,
        }
    }
}

fn word(bytes: &[u8], offset: usize) -> Result<u32, Error> {
    bytes
        .get(offset..offset + 4)
        .and_then(|word| word.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(Error::Truncated)
}

/// Serialised length of an attribute whose value is `len` bytes, `None` on overflow
fn attribute_len(len: usize) -> Option<usize> {
    len.checked_add(ATTRIBUTE_HEAD_LEN + 3).map(|total| total & !3)
}

/// Parsed view of a serialised object
#[derive(Debug, Clone, Copy)]
pub struct ObjectView<'a> {
    handle: ObjectHandle,
    count: u32,
    attributes: &'a [u8],
}

impl<'a> ObjectView<'a> {
    /// Parse an object occupying the whole of `bytes`
    pub fn parse(bytes: &'a [u8]) -> Result<Self, Error> {
        let (view, len) = Self::parse_prefix(bytes)?;
        if len != bytes.len() {
            return Err(Error::BadHeader);
        }
        Ok(view)
    }

    /// Parse the object at the start of `bytes`, returning it and its serialised length
    pub fn parse_prefix(bytes: &'a [u8]) -> Result<(Self, usize), Error> {
        if word(bytes, 0)? != KEY_HEAD_VERSION || word(bytes, 4)? != KEY_HEAD_CONFIGURATION {
            return Err(Error::BadHeader);
        }
        let size = word(bytes, 8)? as usize;
        let count = word(bytes, 12)?;
        let handle = word(bytes, 16)?;
        let end = KEY_HEAD_LEN.checked_add(size).ok_or(Error::Truncated)?;
        let attributes = bytes.get(KEY_HEAD_LEN..end).ok_or(Error::Truncated)?;

        let mut offset = 0;
        for _ in 0..count {
            let len = word(attributes, offset + 4)? as usize;
            offset = attribute_len(len)
                .and_then(|len| offset.checked_add(len))
                .ok_or(Error::Truncated)?;
            if offset > attributes.len() {
                return Err(Error::Truncated);
            }
        }
        if offset != attributes.len() {
            return Err(Error::BadHeader);
        }

        Ok((
            Self {
                handle,
                count,
                attributes,
            },
            end,
        ))
    }

    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    pub fn attributes(&self) -> Attributes<'a> {
        Attributes {
            data: self.attributes,
            remaining: self.count,
        }
    }

    pub fn attribute(&self, kind: AttributeType) -> Option<&'a [u8]> {
        self.attributes()
            .find(|attribute| attribute.kind == kind)
            .map(|attribute| attribute.value)
    }

    pub fn bool_attribute(&self, kind: AttributeType) -> Option<bool> {
        self.attribute(kind)
            .and_then(|value| value.first())
            .map(|value| *value != 0)
    }

    pub fn u32_attribute(&self, kind: AttributeType) -> Option<u32> {
        self.attribute(kind)
            .and_then(|value| value.try_into().ok())
            .map(u32::from_le_bytes)
    }

    /// Whether every attribute of `template` is present with the same value
    pub fn matches(&self, template: &[Attribute<'_>]) -> bool {
        template
            .iter()
            .all(|wanted| self.attribute(wanted.kind) == Some(wanted.value))
    }

    /// Objects are extractable unless they explicitly say otherwise
    pub fn is_extractable(&self) -> bool {
        self.bool_attribute(attribute::EXTRACTABLE) != Some(false)
    }

    pub fn is_destroyable(&self) -> bool {
        self.bool_attribute(attribute::DESTROYABLE) != Some(false)
    }
}

pub struct Attributes<'a> {
    data: &'a [u8],
    remaining: u32,
}

impl<'a> Iterator for Attributes<'a> {
    type Item = Attribute<'a>;

    fn next(&mut self) -> Option<Attribute<'a>> {
        if self.remaining == 0 {
            return None;
        }
        let kind = word(self.data, 0).ok()?;
        let len = word(self.data, 4).ok()? as usize;
        let value = self.data.get(ATTRIBUTE_HEAD_LEN..)?.get(..len)?;
        self.data = attribute_len(len)
            .and_then(|next| self.data.get(next..))
            .unwrap_or_default();
        self.remaining -= 1;
        Some(Attribute { kind, value })
    }
}

/// Serialises an object attribute by attribute
pub struct ObjectBuilder<const N: usize> {
    buffer: heapless::Vec<u8, N>,
    count: u32,
}

impl<const N: usize> ObjectBuilder<N> {
    pub fn new(handle: ObjectHandle) -> Result<Self, Error> {
        let mut buffer = heapless::Vec::new();
        for word in [KEY_HEAD_VERSION, KEY_HEAD_CONFIGURATION, 0, 0, handle] {
            buffer
                .extend_from_slice(&word.to_le_bytes())
                .map_err(|_| Error::TooLarge)?;
        }
        Ok(Self { buffer, count: 0 })
    }

    /// Append an attribute unless the object already has one of the same type
    pub fn push(&mut self, kind: AttributeType, value: &[u8]) -> Result<&mut Self, Error> {
        if self.contains(kind) {
            return Ok(self);
        }
        let len = u32::try_from(value.len()).map_err(|_| Error::TooLarge)?;
        let padding = [0; 3];
        self.buffer
            .extend_from_slice(&kind.to_le_bytes())
            .and_then(|_| self.buffer.extend_from_slice(&len.to_le_bytes()))
            .and_then(|_| self.buffer.extend_from_slice(value))
            .and_then(|_| {
                self.buffer
                    .extend_from_slice(&padding[..value.len().wrapping_neg() & 3])
            })
            .map_err(|_| Error::TooLarge)?;
        self.count += 1;
        Ok(self)
    }

    pub fn push_u32(&mut self, kind: AttributeType, value: u32) -> Result<&mut Self, Error> {
        self.push(kind, &value.to_le_bytes())
    }

    pub fn extend(&mut self, template: &[Attribute<'_>]) -> Result<&mut Self, Error> {
        for attribute in template {
            self.push(attribute.kind, attribute.value)?;
        }
        Ok(self)
    }

    fn contains(&self, kind: AttributeType) -> bool {
        Attributes {
            data: &self.buffer[KEY_HEAD_LEN..],
            remaining: self.count,
        }
        .any(|attribute| attribute.kind == kind)
    }

    pub fn finish(mut self) -> heapless::Vec<u8, N> {
        let size = (self.buffer.len() - KEY_HEAD_LEN) as u32;
        self.buffer[8..12].copy_from_slice(&size.to_le_bytes());
        self.buffer[12..16].copy_from_slice(&self.count.to_le_bytes());
        self.buffer
    }
}
