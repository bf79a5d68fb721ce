use std::ops::{Deref, DerefMut};

use crate::commands::Commands;
use crate::error::{EcsError, EcsResult};
use crate::events::{EventData, EventReader};
use crate::query::{QueryData, QueryFilter, QueryView};
use crate::registry::Registry;
use crate::resource::{ResourceArray, ResourceRef, ResourceRefMut};

/// Shared resource parameter.
pub type Res<'r, T> = ResourceRef<'r, T>;

/// Exclusive resource parameter.
pub type ResMut<'r, T> = ResourceRefMut<'r, T>;

/// Shared resource array parameter.
pub struct ResArray<'r, T: 'static>(ResourceRef<'r, ResourceArray<T>>);

impl<T: 'static> Deref for ResArray<'_, T> {
    type Target = ResourceArray<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Exclusive resource array parameter.
pub struct ResArrayMut<'r, T: 'static>(ResourceRefMut<'r, ResourceArray<T>>);

impl<T: 'static> Deref for ResArrayMut<'_, T> {
    type Target = ResourceArray<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: 'static> DerefMut for ResArrayMut<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// What a system parameter resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    Commands,
    Query,
    Resource(&'static str),
    ResourceMut(&'static str),
    ResourceArray(&'static str),
    ResourceArrayMut(&'static str),
    EventReader(&'static str),
    /// A resource kind that resolves to `None` instead of failing when
    /// absent.
    Optional(Box<ParamKind>),
}

/// A value a system function can take as a parameter.
///
/// Resolution is two-phase: [`prepare`](Self::prepare) runs with exclusive
/// access and creates whatever the parameter needs (component stores, event
/// channels); [`fetch`](Self::fetch) then borrows the live value through a
/// shared reference, so several parameters can be fetched side by side.
/// Both run on every invocation.
///
/// Implemented for [`Commands`], [`QueryView`], [`Res`] / [`ResMut`],
/// [`ResArray`] / [`ResArrayMut`], [`EventReader`], `Option` of the resource
/// kinds, and tuples of parameters. Any other parameter type is rejected at
/// compile time.
pub trait SystemParam {
    /// The same parameter type, borrowing the registry for `'r`.
    type Item<'r>;

    /// Appends the kind of each resolved value to `out`.
    fn param_kinds(out: &mut Vec<ParamKind>);

    /// Creates whatever this parameter needs before fetching.
    fn prepare(_registry: &mut Registry) {}

    /// Resolves the parameter.
    ///
    /// # Errors
    ///
    /// Fails when a resource is missing or a borrow conflicts with another
    /// parameter of the same system.
    fn fetch(registry: &Registry) -> EcsResult<Self::Item<'_>>;
}

/// Parameters allowed inside `Option`: missing values resolve to `None`.
pub trait OptionalParam: SystemParam {}

impl SystemParam for Commands<'_> {
    type Item<'r> = Commands<'r>;

    fn param_kinds(out: &mut Vec<ParamKind>) {
        out.push(ParamKind::Commands);
    }

    fn fetch(registry: &Registry) -> EcsResult<Self::Item<'_>> {
        Ok(registry.commands())
    }
}

impl<D: QueryData, F: QueryFilter> SystemParam for QueryView<'_, D, F> {
    type Item<'r> = QueryView<'r, D, F>;

    fn param_kinds(out: &mut Vec<ParamKind>) {
        out.push(ParamKind::Query);
    }

    fn prepare(registry: &mut Registry) {
        D::prepare(registry);
        F::prepare(registry);
    }

    fn fetch(registry: &Registry) -> EcsResult<Self::Item<'_>> {
        registry.try_query()
    }
}

impl<T: Send + Sync + 'static> SystemParam for ResourceRef<'_, T> {
    type Item<'r> = ResourceRef<'r, T>;

    fn param_kinds(out: &mut Vec<ParamKind>) {
        out.push(ParamKind::Resource(std::any::type_name::<T>()));
    }

    fn fetch(registry: &Registry) -> EcsResult<Self::Item<'_>> {
        registry.try_get_resource()
    }
}

impl<T: Send + Sync + 'static> SystemParam for ResourceRefMut<'_, T> {
    type Item<'r> = ResourceRefMut<'r, T>;

    fn param_kinds(out: &mut Vec<ParamKind>) {
        out.push(ParamKind::ResourceMut(std::any::type_name::<T>()));
    }

    fn fetch(registry: &Registry) -> EcsResult<Self::Item<'_>> {
        registry.try_get_resource_mut()
    }
}

impl<T: Send + Sync + 'static> SystemParam for ResArray<'_, T> {
    type Item<'r> = ResArray<'r, T>;

    fn param_kinds(out: &mut Vec<ParamKind>) {
        out.push(ParamKind::ResourceArray(std::any::type_name::<T>()));
    }

    fn fetch(registry: &Registry) -> EcsResult<Self::Item<'_>> {
        registry.try_get_resource_array().map(ResArray)
    }
}

impl<T: Send + Sync + 'static> SystemParam for ResArrayMut<'_, T> {
    type Item<'r> = ResArrayMut<'r, T>;

    fn param_kinds(out: &mut Vec<ParamKind>) {
        out.push(ParamKind::ResourceArrayMut(std::any::type_name::<T>()));
    }

    fn fetch(registry: &Registry) -> EcsResult<Self::Item<'_>> {
        registry.try_get_resource_array_mut().map(ResArrayMut)
    }
}

/// Each system keeps one subscription per event type across invocations, so
/// every event reaches it once. Outside a system a fresh reader is returned.
impl<T: EventData> SystemParam for EventReader<T> {
    type Item<'r> = EventReader<T>;

    fn param_kinds(out: &mut Vec<ParamKind>) {
        out.push(ParamKind::EventReader(std::any::type_name::<T>()));
    }

    fn prepare(registry: &mut Registry) {
        registry.prepare_system_reader::<T>();
    }

    fn fetch(registry: &Registry) -> EcsResult<Self::Item<'_>> {
        Ok(registry.system_event_reader())
    }
}

impl<T: Send + Sync + 'static> OptionalParam for ResourceRef<'_, T> {}
impl<T: Send + Sync + 'static> OptionalParam for ResourceRefMut<'_, T> {}
impl<T: Send + Sync + 'static> OptionalParam for ResArray<'_, T> {}
impl<T: Send + Sync + 'static> OptionalParam for ResArrayMut<'_, T> {}

impl<P: OptionalParam> SystemParam for Option<P> {
    type Item<'r> = Option<P::Item<'r>>;

    fn param_kinds(out: &mut Vec<ParamKind>) {
        let mut inner = Vec::with_capacity(1);
        P::param_kinds(&mut inner);
        out.extend(inner.into_iter().map(|k| ParamKind::Optional(Box::new(k))));
    }

    fn prepare(registry: &mut Registry) {
        P::prepare(registry);
    }

    fn fetch(registry: &Registry) -> EcsResult<Self::Item<'_>> {
        match P::fetch(registry) {
            Ok(value) => Ok(Some(value)),
            Err(EcsError::MissingResource { .. } | EcsError::MissingResourceArray { .. }) => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

macro_rules! impl_system_param_tuple {
    ($($P:ident),*) => {
        impl<$($P: SystemParam),*> SystemParam for ($($P,)*) {
            type Item<'r> = ($($P::Item<'r>,)*);

            #[allow(unused_variables)]
            fn param_kinds(out: &mut Vec<ParamKind>) {
                $($P::param_kinds(out);)*
            }

            #[allow(unused_variables)]
            fn prepare(registry: &mut Registry) {
                $($P::prepare(registry);)*
            }

            #[allow(unused_variables, clippy::unused_unit)]
            fn fetch(registry: &Registry) -> EcsResult<Self::Item<'_>> {
                Ok(($($P::fetch(registry)?,)*))
            }
        }
    };
}

impl_system_param_tuple!();
impl_system_param_tuple!(P0);
impl_system_param_tuple!(P0, P1);
impl_system_param_tuple!(P0, P1, P2);
impl_system_param_tuple!(P0, P1, P2, P3);
impl_system_param_tuple!(P0, P1, P2, P3, P4);
impl_system_param_tuple!(P0, P1, P2, P3, P4, P5);
impl_system_param_tuple!(P0, P1, P2, P3, P4, P5, P6);
impl_system_param_tuple!(P0, P1, P2, P3, P4, P5, P6, P7);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPriority;

    struct Time(f32);

    fn kinds<P: SystemParam>() -> Vec<ParamKind> {
        let mut out = Vec::new();
        P::param_kinds(&mut out);
        out
    }

    #[test]
    fn resource_params_resolve() {
        let mut registry = Registry::new();
        registry.emplace_resource(Time(0.5));
        let res = <Res<Time>>::fetch(&registry).unwrap();
        assert_eq!(res.0, 0.5);
    }

    #[test]
    fn missing_resource_fails_but_optional_is_none() {
        let registry = Registry::new();
        assert!(matches!(
            <Res<Time>>::fetch(&registry),
            Err(EcsError::MissingResource { .. })
        ));
        assert!(<Option<Res<Time>>>::fetch(&registry).unwrap().is_none());
        assert!(
            <Option<ResArray<u32>>>::fetch(&registry)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn optional_still_reports_conflicts() {
        let mut registry = Registry::new();
        registry.emplace_resource(Time(1.0));
        let result = <(ResMut<Time>, Option<Res<Time>>)>::fetch(&registry);
        assert!(matches!(result, Err(EcsError::BorrowConflict { .. })));
    }

    #[test]
    fn tuple_params_fetch_side_by_side() {
        let mut registry = Registry::new();
        registry.emplace_resource(Time(2.0));
        registry.emplace_resource_array(7u32);
        let (time, mut array, commands) =
            <(Res<Time>, ResArrayMut<u32>, Commands)>::fetch(&registry).unwrap();
        array.push(time.0 as u32);
        assert!(commands.is_empty());
        drop((time, array, commands));
        assert_eq!(
            registry.get_resource_array::<u32>().unwrap().as_slice(),
            &[7, 2]
        );
    }

    #[test]
    fn event_reader_param() {
        let mut registry = Registry::new();
        <EventReader<u8>>::prepare(&mut registry);
        assert!(registry.event_bus().contains::<u8>());

        registry.emit_event(4u8, EventPriority::Normal);
        registry.dispatch_events();
        let mut reader = <EventReader<u8>>::fetch(&registry).unwrap();
        assert_eq!(reader.read_values(), vec![4]);
    }

    #[test]
    fn query_param_prepares_stores() {
        let mut registry = Registry::new();
        <QueryView<(&u64,)>>::prepare(&mut registry);
        assert!(registry.is_registered::<u64>());
        let view = <QueryView<(&u64,)>>::fetch(&registry).unwrap();
        assert_eq!(view.size(), 0);
    }

    #[test]
    fn param_kinds_flatten_tuples() {
        assert_eq!(
            kinds::<(Commands, QueryView<(&u8,)>, Option<ResMut<Time>>)>(),
            vec![
                ParamKind::Commands,
                ParamKind::Query,
                ParamKind::Optional(Box::new(ParamKind::ResourceMut(
                    std::any::type_name::<Time>()
                ))),
            ]
        );
        assert!(kinds::<()>().is_empty());
    }
}
