//! Object management and search

use core::hint::black_box;

use secure_engine_kms_interface::{attribute, FunctionId, ObjectHandle, Rv, SessionHandle};

use super::{lookup, Kms};
use crate::crypto::CryptoProvider;
use crate::ext_token::ExternalToken;
use crate::objects::{self, Attribute, AttributeRequest, ObjectRange};
use crate::session::SessionState;
use crate::store::NvmStorage;

/// Attributes of which a created object must carry at least one besides its class
const TYPE_ATTRIBUTES: [u32; 3] = [
    attribute::CERTIFICATE_TYPE,
    attribute::HW_FEATURE_TYPE,
    attribute::KEY_TYPE,
];

impl<C: CryptoProvider, T: ExternalToken, N: NvmStorage> Kms<C, T, N> {
    pub(super) fn create_object(
        &mut self,
        session: SessionHandle,
        template: &[Attribute<'_>],
        object: &mut ObjectHandle,
    ) -> Result<(), Rv> {
        self.require_session(session)?;
        if let Ok(external) = self.token_session(FunctionId::CreateObject, session) {
            *object = self.token.create_object(external, template)?;
            return Ok(());
        }
        self.require_idle(session)?;
        let typed = TYPE_ATTRIBUTES
            .iter()
            .any(|kind| objects::find(template, *kind).is_some());
        if objects::find(template, attribute::CLASS).is_none() || !typed {
            debug!("Object template lacks its class or type");
            return Err(Rv::TemplateIncomplete);
        }
        let range = self.target_range(template);
        *object = self.store_object(range, &[template])?;
        Ok(())
    }

    pub(super) fn destroy_object(
        &mut self,
        session: SessionHandle,
        object: ObjectHandle,
    ) -> Result<(), Rv> {
        self.require_session(session)?;
        if self.key_locked(object) {
            return Err(Rv::ObjectHandleInvalid);
        }
        match self.layout().classify(object) {
            range if range.is_external() => {
                let external = self.token_session(FunctionId::DestroyObject, session)?;
                self.token.destroy_object(external, object).into_result()
            }
            range @ (ObjectRange::NvmDynamic | ObjectRange::VmDynamic) => {
                let target =
                    lookup(&self.store, &self.locks, object).ok_or(Rv::ObjectHandleInvalid)?;
                if !target.is_destroyable() {
                    return Err(Rv::ActionProhibited);
                }
                self.store.remove(object)?;
                debug!("Destroyed object {object} in {range:?}");
                Ok(())
            }
            _ => Err(Rv::ObjectHandleInvalid),
        }
    }

    pub(super) fn get_attribute_value(
        &mut self,
        session: SessionHandle,
        object: ObjectHandle,
        template: &mut [AttributeRequest<'_>],
    ) -> Result<(), Rv> {
        self.require_session(session)?;
        if self.key_locked(object) {
            return Err(Rv::ObjectHandleInvalid);
        }
        let range = self.layout().classify(object);
        if range.is_external() {
            let external = self.token_session(FunctionId::GetAttributeValue, session)?;
            return self
                .token
                .get_attribute_value(external, object, template)
                .into_result();
        }
        self.require_idle(session)?;
        let target = lookup(&self.store, &self.locks, object).ok_or(Rv::ObjectHandleInvalid)?;

        let sensitive = target.bool_attribute(attribute::EXTRACTABLE) == Some(false);
        if sensitive || !black_box(target.is_extractable()) {
            for request in template.iter_mut() {
                request.len = None;
            }
            return Err(Rv::AttributeSensitive);
        }

        let mut rv = Rv::Ok;
        for request in template.iter_mut() {
            let Some(value) = target.attribute(request.kind) else {
                request.len = None;
                rv = Rv::AttributeTypeInvalid;
                continue;
            };
            match request.value.as_deref_mut() {
                None => request.len = Some(value.len()),
                Some(buffer) if buffer.len() >= value.len() => {
                    buffer[..value.len()].copy_from_slice(value);
                    request.len = Some(value.len());
                }
                Some(_) => {
                    request.len = None;
                    rv = Rv::BufferTooSmall;
                }
            }
        }
        rv.into_result()
    }

    pub(super) fn set_attribute_value(
        &mut self,
        session: SessionHandle,
        object: ObjectHandle,
        template: &[Attribute<'_>],
    ) -> Result<(), Rv> {
        self.require_session(session)?;
        if self.key_locked(object) {
            return Err(Rv::ObjectHandleInvalid);
        }
        let range = self.layout().classify(object);
        if range.is_external() {
            let external = self.token_session(FunctionId::SetAttributeValue, session)?;
            return self
                .token
                .set_attribute_value(external, object, template)
                .into_result();
        }
        if range.is_local() {
            // local objects are immutable once stored
            return Err(Rv::FunctionNotSupported);
        }
        Err(Rv::ObjectHandleInvalid)
    }

    pub(super) fn find_objects_init(
        &mut self,
        session: SessionHandle,
        template: &[Attribute<'_>],
    ) -> Result<(), Rv> {
        self.require_session(session)?;
        if let Ok(external) = self.token_session(FunctionId::FindObjectsInit, session) {
            return self.token.find_objects_init(external, template).into_result();
        }
        self.require_idle(session)?;
        let (store, locks) = (&self.store, &self.locks);
        let found = store.handles().filter(|handle| {
            lookup(store, locks, *handle).is_some_and(|object| object.matches(template))
        });
        self.sessions.start_search(session, found)
    }

    pub(super) fn find_objects(
        &mut self,
        session: SessionHandle,
        objects: &mut [ObjectHandle],
        count: &mut usize,
    ) -> Result<(), Rv> {
        self.require_session(session)?;
        if objects.is_empty() {
            return Err(Rv::ArgumentsBad);
        }
        *count = match self.token_session(FunctionId::FindObjects, session) {
            Ok(external) => self.token.find_objects(external, objects)?,
            Err(_) => self.sessions.next_found(session, objects)?,
        };
        Ok(())
    }

    pub(super) fn find_objects_final(&mut self, session: SessionHandle) -> Result<(), Rv> {
        self.require_session(session)?;
        if let Ok(external) = self.token_session(FunctionId::FindObjectsFinal, session) {
            return self.token.find_objects_final(external).into_result();
        }
        if self.sessions.state(session)? != SessionState::Searching {
            return Err(Rv::OperationNotInitialized);
        }
        self.sessions.reset(session);
        Ok(())
    }
}
