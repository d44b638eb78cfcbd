//! Channel factory keyed by payload type
//!
//! The pipeline only knows a link's `TypeId`. The registry turns that back into
//! a typed crossbeam channel and a typed fan-out [`Sender`].

use super::errors::ConnectionError;
use super::sender::{ChannelMessage, Sender};
use crossbeam_channel::{Sender as CrossbeamSender, bounded};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

type ErasedEnd = Box<dyn Any + Send>;
type ChannelCreatorFn = Box<dyn Fn(usize) -> (ErasedEnd, ErasedEnd) + Send + Sync>;
type OutputWrapperFn = Box<dyn Fn(Vec<ErasedEnd>) -> Option<ErasedEnd> + Send + Sync>;

pub(crate) struct TypeRegistry {
    channel_creators: HashMap<TypeId, ChannelCreatorFn>,
    output_wrappers: HashMap<TypeId, OutputWrapperFn>,
}

impl TypeRegistry {
    fn new() -> Self {
        Self {
            channel_creators: HashMap::new(),
            output_wrappers: HashMap::new(),
        }
    }

    fn register<T: 'static + Send + Clone>(&mut self) {
        let type_id = TypeId::of::<T>();

        self.channel_creators.insert(
            type_id,
            Box::new(|capacity: usize| {
                let (tx, rx) = bounded::<ChannelMessage<T>>(capacity);
                (Box::new(tx) as ErasedEnd, Box::new(rx) as ErasedEnd)
            }),
        );

        self.output_wrappers.insert(
            type_id,
            Box::new(|senders: Vec<ErasedEnd>| {
                let typed = senders
                    .into_iter()
                    .map(|s| s.downcast::<CrossbeamSender<ChannelMessage<T>>>().ok().map(|tx| *tx))
                    .collect::<Option<Vec<_>>>()?;
                Some(Box::new(Sender::new(typed)) as ErasedEnd)
            }),
        );
    }

    pub(crate) fn create_channel(
        &self,
        type_id: TypeId,
        capacity: usize,
    ) -> Result<(ErasedEnd, ErasedEnd), ConnectionError> {
        self.channel_creators
            .get(&type_id)
            .map(|creator| creator(capacity))
            .ok_or(ConnectionError::UnregisteredType(type_id))
    }

    pub(crate) fn wrap_output(
        &self,
        type_id: TypeId,
        senders: Vec<ErasedEnd>,
    ) -> Result<ErasedEnd, ConnectionError> {
        self.output_wrappers
            .get(&type_id)
            .and_then(|wrap| wrap(senders))
            .ok_or(ConnectionError::UnregisteredType(type_id))
    }
}

lazy_static::lazy_static! {
    static ref TYPE_REGISTRY: Mutex<TypeRegistry> = {
        use crate::nodes::collector::ActivityRecord;
        use crate::runtime::VoltageSample;

        let mut registry = TypeRegistry::new();
        registry.register::<VoltageSample>();
        registry.register::<String>();
        registry.register::<ActivityRecord>();
        Mutex::new(registry)
    };
}

/// Lock the global registry. The registry has no invariants a panicking
/// holder could break, so a poisoned lock is simply reclaimed.
pub(crate) fn registry() -> MutexGuard<'static, TypeRegistry> {
    TYPE_REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Make `T` usable as a link payload in pipelines.
pub fn register_type<T: 'static + Send + Clone>() {
    registry().register::<T>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Unregistered;

    #[derive(Clone)]
    struct Custom(#[allow(dead_code)] u8);

    #[test]
    fn test_builtin_types_are_registered() {
        let reg = registry();
        assert!(reg.create_channel(TypeId::of::<String>(), 4).is_ok());
        assert!(reg.create_channel(TypeId::of::<crate::runtime::VoltageSample>(), 4).is_ok());
    }

    #[test]
    fn test_unregistered_type_is_rejected() {
        let reg = registry();
        let err = reg.create_channel(TypeId::of::<Unregistered>(), 4).unwrap_err();
        assert!(matches!(err, ConnectionError::UnregisteredType(_)));
    }

    #[test]
    fn test_register_custom_type() {
        register_type::<Custom>();
        let reg = registry();
        let (tx, _rx) = reg.create_channel(TypeId::of::<Custom>(), 4).unwrap();
        let wrapped = reg.wrap_output(TypeId::of::<Custom>(), vec![tx]).unwrap();
        assert!(wrapped.downcast_ref::<Sender<Custom>>().is_some());
    }
}
