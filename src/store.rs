//! Local object storage
//!
//! Embedded objects are read straight from the firmware image. NVM objects are persisted through
//! [`NvmStorage`] as postcard encoded [`NvmRecord`]s and cached in RAM once the library is
//! initialized. Volatile objects only live in RAM.

use secure_engine_kms_interface::{ObjectHandle, Rv};
use serde::{Deserialize, Serialize};

use crate::config::{NVM_OBJECTS_MAX, OBJECT_MAX_LEN, VM_OBJECTS_MAX};
use crate::objects::{self, ObjectLayout, ObjectRange, ObjectView};

const RECORD_VERSION: u8 = 1;
/// Record overhead on top of the object itself
const RECORD_OVERHEAD: usize = 16;

pub type ObjectBlob = heapless::Vec<u8, OBJECT_MAX_LEN>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    NotFound,
    Full,
    Exists,
    WrongRange,
    Malformed,
    ReadFailed,
    WriteFailed,
    SerializationFailed,
    DeserializationFailed,
}

impl From<Error> for Rv {
    fn from(error: Error) -> Self {
        match error {
            Error::NotFound => Self::ObjectHandleInvalid,
            Error::Full => Self::HostMemory,
            Error::Exists => Self::ActionProhibited,
            Error::WrongRange => Self::ObjectHandleInvalid,
            Error::Malformed => Self::DataInvalid,
            Error::ReadFailed | Error::WriteFailed => Self::DeviceMemory,
            Error::SerializationFailed | Error::DeserializationFailed => Self::GeneralError,
        }
    }
}

impl From<objects::Error> for Error {
    fn from(_value: objects::Error) -> Self {
        Self::Malformed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NvmError;

/// Persistent key/value storage backing the NVM object ranges
pub trait NvmStorage {
    /// Read the value stored under `key` into `buffer`, `None` if there is none
    fn read<'b>(&mut self, key: u32, buffer: &'b mut [u8]) -> Result<Option<&'b [u8]>, NvmError>;
    fn write(&mut self, key: u32, data: &[u8]) -> Result<(), NvmError>;
    fn remove(&mut self, key: u32) -> Result<(), NvmError>;
}

/// Storage of a build without NVM: nothing to load, nothing can be persisted
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNvm;

impl NvmStorage for NoNvm {
    fn read<'b>(&mut self, _key: u32, _buffer: &'b mut [u8]) -> Result<Option<&'b [u8]>, NvmError> {
        Ok(None)
    }

    fn write(&mut self, _key: u32, _data: &[u8]) -> Result<(), NvmError> {
        Err(NvmError)
    }

    fn remove(&mut self, _key: u32) -> Result<(), NvmError> {
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct NvmRecord<'a> {
    pub version: u8,
    pub handle: ObjectHandle,
    #[serde(borrow, with = "serde_bytes")]
    pub blob: &'a [u8],
}

#[derive(Debug, Clone)]
struct StoredObject {
    handle: ObjectHandle,
    blob: ObjectBlob,
}

impl StoredObject {
    fn new(handle: ObjectHandle, blob: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            handle,
            blob: ObjectBlob::from_slice(blob).map_err(|_| Error::Full)?,
        })
    }

    fn view(&self) -> Option<ObjectView<'_>> {
        ObjectView::parse(&self.blob).ok()
    }
}

pub struct ObjectStore<N> {
    layout: ObjectLayout,
    embedded: &'static [&'static [u8]],
    nvm: N,
    nvm_objects: heapless::Vec<StoredObject, NVM_OBJECTS_MAX>,
    vm_objects: heapless::Vec<StoredObject, VM_OBJECTS_MAX>,
}

impl<N: NvmStorage> ObjectStore<N> {
    pub fn new(layout: ObjectLayout, embedded: &'static [&'static [u8]], nvm: N) -> Self {
        Self {
            layout,
            embedded,
            nvm,
            nvm_objects: heapless::Vec::new(),
            vm_objects: heapless::Vec::new(),
        }
    }

    pub fn layout(&self) -> &ObjectLayout {
        &self.layout
    }

    /// Every embedded object parses and sits in the embedded range
    pub fn embedded_valid(&self) -> bool {
        self.embedded.iter().all(|blob| {
            ObjectView::parse(blob)
                .map(|object| self.layout.classify(object.handle()) == ObjectRange::Embedded)
                .unwrap_or(false)
        })
    }

    /// Fill the NVM cache from storage
    pub fn load(&mut self) -> Result<(), Error> {
        self.nvm_objects.clear();
        let ranges = [self.layout.nvm_static, self.layout.nvm_dynamic];
        let mut buffer = [0; OBJECT_MAX_LEN + RECORD_OVERHEAD];
        for handle in ranges.iter().flatten().flat_map(|range| range.handles()) {
            let data = self.nvm.read(handle, &mut buffer).map_err(|_err| {
                error!("Failed to read object {handle}: {_err:?}");
                Error::ReadFailed
            })?;
            let Some(data) = data else {
                continue;
            };
            let record: NvmRecord = postcard::from_bytes(data).map_err(|_err| {
                error!("Failed to parse record {handle}: {_err:?}");
                Error::DeserializationFailed
            })?;
            if record.version != RECORD_VERSION || record.handle != handle {
                warn!("Skipping inconsistent record {handle}");
                continue;
            }
            if ObjectView::parse(record.blob).map(|o| o.handle()) != Ok(handle) {
                warn!("Skipping malformed object {handle}");
                continue;
            }
            self.nvm_objects
                .push(StoredObject::new(handle, record.blob)?)
                .map_err(|_| Error::Full)?;
        }
        debug!("Loaded {} objects from NVM", self.nvm_objects.len());
        Ok(())
    }

    /// Drop the RAM copies of NVM objects and every volatile object
    pub fn release(&mut self) {
        self.nvm_objects.clear();
        self.vm_objects.clear();
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<ObjectView<'_>> {
        match self.layout.classify(handle) {
            ObjectRange::Embedded => self
                .embedded
                .iter()
                .filter_map(|blob| ObjectView::parse(blob).ok())
                .find(|object| object.handle() == handle),
            ObjectRange::NvmStatic | ObjectRange::NvmDynamic => Self::find(&self.nvm_objects, handle),
            ObjectRange::VmDynamic => Self::find(&self.vm_objects, handle),
            _ => None,
        }
    }

    fn find(objects: &[StoredObject], handle: ObjectHandle) -> Option<ObjectView<'_>> {
        objects
            .iter()
            .find(|object| object.handle == handle)
            .and_then(StoredObject::view)
    }

    /// Handles of every local object, in range order
    pub fn handles(&self) -> impl Iterator<Item = ObjectHandle> + '_ {
        let embedded = self
            .embedded
            .iter()
            .filter_map(|blob| ObjectView::parse(blob).ok())
            .map(|object| object.handle());
        let nvm_static = self
            .nvm_objects
            .iter()
            .filter(|object| self.layout.classify(object.handle) == ObjectRange::NvmStatic);
        let nvm_dynamic = self
            .nvm_objects
            .iter()
            .filter(|object| self.layout.classify(object.handle) == ObjectRange::NvmDynamic);
        embedded.chain(
            nvm_static
                .chain(nvm_dynamic)
                .chain(self.vm_objects.iter())
                .map(|object| object.handle),
        )
    }

    /// Lowest unused handle of a writable range
    pub fn free_handle(&self, range: ObjectRange) -> Result<ObjectHandle, Error> {
        let objects: &[StoredObject] = match range {
            ObjectRange::NvmStatic | ObjectRange::NvmDynamic => &self.nvm_objects,
            ObjectRange::VmDynamic => &self.vm_objects,
            _ => return Err(Error::WrongRange),
        };
        let handles = self.layout.range(range).ok_or(Error::WrongRange)?;
        handles
            .handles()
            .find(|handle| objects.iter().all(|object| object.handle != *handle))
            .ok_or(Error::Full)
    }

    /// Store a new object under the handle it carries
    pub fn insert(&mut self, blob: &[u8]) -> Result<ObjectHandle, Error> {
        let handle = ObjectView::parse(blob)?.handle();
        if self.get(handle).is_some() {
            return Err(Error::Exists);
        }
        match self.layout.classify(handle) {
            ObjectRange::NvmStatic | ObjectRange::NvmDynamic => {
                let object = StoredObject::new(handle, blob)?;
                if self.nvm_objects.is_full() {
                    return Err(Error::Full);
                }
                self.persist(handle, blob)?;
                self.nvm_objects.push(object).map_err(|_| Error::Full)?;
            }
            ObjectRange::VmDynamic => self
                .vm_objects
                .push(StoredObject::new(handle, blob)?)
                .map_err(|_| Error::Full)?,
            _ => return Err(Error::WrongRange),
        }
        Ok(handle)
    }

    /// Store NVM static objects, replacing previous objects with the same handles
    ///
    /// Either every object is stored or none is. Capacity is checked before the first write, and
    /// the records written before a failed write are rolled back.
    pub fn install_all(&mut self, blobs: &[&[u8]]) -> Result<(), Error> {
        let mut added = 0;
        for (idx, blob) in blobs.iter().enumerate() {
            let handle = ObjectView::parse(blob)?.handle();
            if self.layout.classify(handle) != ObjectRange::NvmStatic {
                return Err(Error::WrongRange);
            }
            if blob.len() > OBJECT_MAX_LEN {
                return Err(Error::Full);
            }
            let repeated = blobs[..idx].iter().any(|other| handle_of(other) == Ok(handle));
            if !repeated && Self::position(&self.nvm_objects, handle).is_err() {
                added += 1;
            }
        }
        if self.nvm_objects.len() + added > NVM_OBJECTS_MAX {
            return Err(Error::Full);
        }

        for (idx, blob) in blobs.iter().enumerate() {
            if let Err(error) = self.persist(handle_of(blob)?, blob) {
                self.roll_back(&blobs[..idx]);
                return Err(error);
            }
        }

        for blob in blobs {
            let handle = handle_of(blob)?;
            let object = StoredObject::new(handle, blob)?;
            match Self::position(&self.nvm_objects, handle) {
                Ok(idx) => self.nvm_objects[idx] = object,
                Err(_) => self.nvm_objects.push(object).map_err(|_| Error::Full)?,
            }
        }
        Ok(())
    }

    /// Undo the NVM writes of `blobs`, restoring the cached object where there is one
    fn roll_back(&mut self, blobs: &[&[u8]]) {
        for blob in blobs {
            let Ok(handle) = handle_of(blob) else {
                continue;
            };
            let result = match Self::position(&self.nvm_objects, handle) {
                Ok(idx) => {
                    let previous = self.nvm_objects[idx].blob.clone();
                    self.persist(handle, &previous)
                }
                Err(_) => self.nvm.remove(handle).map_err(|_| Error::WriteFailed),
            };
            if let Err(_err) = result {
                error!("Failed to roll back object {handle}: {_err:?}");
            }
        }
    }

    pub fn remove(&mut self, handle: ObjectHandle) -> Result<(), Error> {
        match self.layout.classify(handle) {
            ObjectRange::NvmDynamic => {
                Self::position(&self.nvm_objects, handle)?;
                self.nvm.remove(handle).map_err(|_err| {
                    error!("Failed to remove object {handle}: {_err:?}");
                    Error::WriteFailed
                })?;
                let idx = Self::position(&self.nvm_objects, handle)?;
                self.nvm_objects.swap_remove(idx);
            }
            ObjectRange::VmDynamic => {
                let idx = Self::position(&self.vm_objects, handle)?;
                self.vm_objects.swap_remove(idx);
            }
            _ => return Err(Error::WrongRange),
        }
        Ok(())
    }

    fn position(objects: &[StoredObject], handle: ObjectHandle) -> Result<usize, Error> {
        objects
            .iter()
            .position(|object| object.handle == handle)
            .ok_or(Error::NotFound)
    }

    fn persist(&mut self, handle: ObjectHandle, blob: &[u8]) -> Result<(), Error> {
        let record = NvmRecord {
            version: RECORD_VERSION,
            handle,
            blob,
        };
        let mut buffer = [0; OBJECT_MAX_LEN + RECORD_OVERHEAD];
        let data = postcard::to_slice(&record, &mut buffer).map_err(|_err| {
            error!("Failed to serialize object {handle}: {_err:?}");
            Error::SerializationFailed
        })?;
        self.nvm.write(handle, data).map_err(|_err| {
            error!("Failed to write object {handle}: {_err:?}");
            Error::WriteFailed
        })
    }
}

fn handle_of(blob: &[u8]) -> Result<ObjectHandle, Error> {
    Ok(ObjectView::parse(blob)?.handle())
}
