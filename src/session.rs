//! Library initialization state and the session table

use core::hint::black_box;

use secure_engine_kms_interface::{ObjectHandle, Rv, SessionFlags, SessionHandle, SlotId};

use crate::config::{SEARCH_MAX, SESSIONS_MAX};

/// Key handle of a session with no operation in progress
pub const KEY_NOT_KNOWN: ObjectHandle = 0;
/// External token session of a session that has none
pub const EXTERNAL_SESSION_UNKNOWN: u32 = 0xFFFF;

/// Nesting level from which `Initialize` fails
const NESTING_MAX: u8 = 0xFF;

/// Callback invoked on events reported for a session, `(session, event)`
pub type Notify = fn(SessionHandle, u32) -> Rv;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Digesting,
    Encrypting,
    Decrypting,
    Signing,
    Verifying,
    Searching,
}

#[derive(Debug, Clone)]
struct Session {
    slot: SlotId,
    flags: SessionFlags,
    state: SessionState,
    key: ObjectHandle,
    external: u32,
    notify: Option<Notify>,
    found: heapless::Vec<ObjectHandle, SEARCH_MAX>,
    cursor: usize,
}

impl Session {
    fn new(slot: SlotId, flags: SessionFlags, notify: Option<Notify>) -> Self {
        Self {
            slot,
            flags,
            state: SessionState::Idle,
            key: KEY_NOT_KNOWN,
            external: EXTERNAL_SESSION_UNKNOWN,
            notify,
            found: heapless::Vec::new(),
            cursor: 0,
        }
    }

    fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.key = KEY_NOT_KNOWN;
        self.found.clear();
        self.cursor = 0;
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    nesting: u8,
    sessions: [Option<Session>; SESSIONS_MAX],
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self) -> Rv {
        if self.nesting == NESTING_MAX {
            return Rv::FunctionFailed;
        }
        if self.nesting > 0 {
            self.nesting += 1;
            return Rv::CryptokiAlreadyInitialized;
        }
        self.nesting = 1;
        self.sessions = Default::default();
        Rv::Ok
    }

    /// Returns `true` in the second field when the library is no longer initialized
    pub fn finalize(&mut self) -> (Rv, bool) {
        match self.nesting {
            0 => (Rv::CryptokiNotInitialized, false),
            1 => {
                self.nesting = 0;
                self.sessions = Default::default();
                (Rv::Ok, true)
            }
            _ => {
                self.nesting -= 1;
                (Rv::Ok, false)
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.nesting != 0
    }

    pub fn open(
        &mut self,
        slot: SlotId,
        flags: SessionFlags,
        notify: Option<Notify>,
    ) -> Result<SessionHandle, Rv> {
        if !self.is_initialized() {
            return Err(Rv::CryptokiNotInitialized);
        }
        if !flags.contains(SessionFlags::SERIAL_SESSION) {
            return Err(Rv::SessionParallelNotSupported);
        }
        let (idx, free) = self
            .sessions
            .iter_mut()
            .enumerate()
            .find(|(_, session)| session.is_none())
            .ok_or(Rv::SessionCount)?;
        *free = Some(Session::new(slot, flags, notify));
        Ok(idx as SessionHandle + 1)
    }

    pub fn close(&mut self, handle: SessionHandle) -> Result<(), Rv> {
        self.check(handle)?;
        self.sessions[handle as usize - 1] = None;
        Ok(())
    }

    /// Fails with `SessionHandleInvalid` unless `handle` designates an open session
    pub fn check(&self, handle: SessionHandle) -> Result<(), Rv> {
        if handle == 0 || handle as usize > SESSIONS_MAX {
            return Err(Rv::SessionHandleInvalid);
        }
        let idx = black_box(handle as usize).wrapping_sub(1);
        if !(0..SESSIONS_MAX).contains(&idx) {
            return Err(Rv::SessionHandleInvalid);
        }
        match self.sessions.get(idx) {
            Some(Some(_)) => Ok(()),
            _ => Err(Rv::SessionHandleInvalid),
        }
    }

    fn session(&self, handle: SessionHandle) -> Result<&Session, Rv> {
        self.check(handle)?;
        self.sessions[handle as usize - 1]
            .as_ref()
            .ok_or(Rv::SessionHandleInvalid)
    }

    fn session_mut(&mut self, handle: SessionHandle) -> Result<&mut Session, Rv> {
        self.check(handle)?;
        self.sessions[handle as usize - 1]
            .as_mut()
            .ok_or(Rv::SessionHandleInvalid)
    }

    pub fn state(&self, handle: SessionHandle) -> Result<SessionState, Rv> {
        self.session(handle).map(|session| session.state)
    }

    pub fn key(&self, handle: SessionHandle) -> Result<ObjectHandle, Rv> {
        self.session(handle).map(|session| session.key)
    }

    pub fn slot(&self, handle: SessionHandle) -> Result<SlotId, Rv> {
        self.session(handle).map(|session| session.slot)
    }

    pub fn flags(&self, handle: SessionHandle) -> Result<SessionFlags, Rv> {
        self.session(handle).map(|session| session.flags)
    }

    pub fn set_state(
        &mut self,
        handle: SessionHandle,
        state: SessionState,
        key: ObjectHandle,
    ) -> Result<(), Rv> {
        let session = self.session_mut(handle)?;
        session.state = state;
        session.key = key;
        Ok(())
    }

    /// Back to `Idle`, forgetting the key and any search in progress
    pub fn reset(&mut self, handle: SessionHandle) {
        if let Ok(session) = self.session_mut(handle) {
            session.reset();
        }
    }

    pub fn register_external_session(
        &mut self,
        handle: SessionHandle,
        external: u32,
    ) -> Result<(), Rv> {
        self.session_mut(handle)?.external = external;
        Ok(())
    }

    /// External token session of `handle`, [`EXTERNAL_SESSION_UNKNOWN`] if none
    pub fn external_session(&self, handle: SessionHandle) -> u32 {
        self.session(handle)
            .map(|session| session.external)
            .unwrap_or(EXTERNAL_SESSION_UNKNOWN)
    }

    pub fn local_for_external(&self, external: u32) -> Option<SessionHandle> {
        if external == EXTERNAL_SESSION_UNKNOWN {
            return None;
        }
        self.sessions
            .iter()
            .position(|session| {
                session
                    .as_ref()
                    .is_some_and(|session| session.external == external)
            })
            .map(|idx| idx as SessionHandle + 1)
    }

    /// Forward an event to the callback registered when `handle` was opened
    pub fn notify(&self, handle: SessionHandle, event: u32) -> Rv {
        match self.session(handle) {
            Ok(Session {
                notify: Some(notify),
                ..
            }) => notify(handle, event),
            Ok(_) => Rv::Ok,
            Err(rv) => rv,
        }
    }

    pub fn open_count(&self) -> usize {
        self.sessions.iter().flatten().count()
    }

    pub fn rw_count(&self) -> usize {
        self.sessions
            .iter()
            .flatten()
            .filter(|session| session.flags.contains(SessionFlags::RW_SESSION))
            .count()
    }

    /// Enter the `Searching` state with the handles matched by `FindObjectsInit`
    pub fn start_search(
        &mut self,
        handle: SessionHandle,
        found: impl IntoIterator<Item = ObjectHandle>,
    ) -> Result<(), Rv> {
        let session = self.session_mut(handle)?;
        session.reset();
        for object in found {
            if session.found.push(object).is_err() {
                warn!("Search results truncated to {SEARCH_MAX} objects");
                break;
            }
        }
        session.state = SessionState::Searching;
        Ok(())
    }

    /// Copy the next search results into `objects`, returning how many were written
    pub fn next_found(
        &mut self,
        handle: SessionHandle,
        objects: &mut [ObjectHandle],
    ) -> Result<usize, Rv> {
        let session = self.session_mut(handle)?;
        if session.state != SessionState::Searching {
            return Err(Rv::OperationNotInitialized);
        }
        let pending = &session.found[session.cursor..];
        let count = pending.len().min(objects.len());
        objects[..count].copy_from_slice(&pending[..count]);
        session.cursor += count;
        Ok(count)
    }
}
