use std::any::{TypeId, type_name};

use crate::error::EcsResult;
use crate::registry::Registry;
use crate::system_param::{ParamKind, SystemParam};

/// Identity of a system: the `TypeId` of its function item or closure.
///
/// Two registrations of the same function share an id; two distinct
/// functions (or closures) never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(TypeId);

impl SystemId {
    /// The id of the system built from `F`.
    pub fn of<F: 'static>() -> Self {
        Self(TypeId::of::<F>())
    }

    /// The id of the system built from `func`.
    pub fn of_val<F: 'static>(_func: &F) -> Self {
        Self::of::<F>()
    }
}

/// A function whose parameters are all [`SystemParam`]s.
///
/// Implemented for functions and closures with 0 to 8 parameters. `Marker`
/// is the function's parameter list and only exists to keep the blanket
/// impls apart.
pub trait SystemParamFunction<Marker>: Send + 'static {
    /// The parameters as a tuple.
    type Param: SystemParam;

    /// Calls the function with resolved parameters.
    fn run(&mut self, param: <Self::Param as SystemParam>::Item<'_>);
}

macro_rules! impl_system_function {
    ($($P:ident),*) => {
        #[allow(non_snake_case)]
        impl<Func, $($P: SystemParam),*> SystemParamFunction<fn($($P,)*)> for Func
        where
            Func: Send + 'static,
            for<'a> &'a mut Func: FnMut($($P),*) + FnMut($($P::Item<'_>),*),
        {
            type Param = ($($P,)*);

            fn run(&mut self, param: <Self::Param as SystemParam>::Item<'_>) {
                // Calling through a generic helper lets the compiler pick the
                // `FnMut(P::Item<'_>)` impl for the concrete lifetime.
                fn call_inner<$($P),*>(mut f: impl FnMut($($P),*), $($P: $P),*) {
                    f($($P),*)
                }
                let ($($P,)*) = param;
                call_inner(self, $($P),*);
            }
        }
    };
}

impl_system_function!();
impl_system_function!(P0);
impl_system_function!(P0, P1);
impl_system_function!(P0, P1, P2);
impl_system_function!(P0, P1, P2, P3);
impl_system_function!(P0, P1, P2, P3, P4);
impl_system_function!(P0, P1, P2, P3, P4, P5);
impl_system_function!(P0, P1, P2, P3, P4, P5, P6);
impl_system_function!(P0, P1, P2, P3, P4, P5, P6, P7);

type RunFn = Box<dyn FnMut(&mut Registry) -> EcsResult<()> + Send>;

/// A type-erased system: one uniform callable over the [`Registry`].
///
/// Every invocation prepares and fetches the parameters afresh, calls the
/// function, then applies the commands it queued. If a parameter cannot be
/// resolved the function body is skipped, a warning is logged and the
/// error is returned. [`EventReader`](crate::EventReader) parameters keep
/// their subscription between invocations.
pub struct SystemFn {
    id: SystemId,
    name: &'static str,
    param_kinds: Vec<ParamKind>,
    run: RunFn,
}

impl SystemFn {
    /// Wraps a system function.
    pub fn new<Marker: 'static, F: SystemParamFunction<Marker>>(mut func: F) -> Self {
        let name = type_name::<F>();
        let mut param_kinds = Vec::new();
        <F::Param as SystemParam>::param_kinds(&mut param_kinds);

        let id = SystemId::of::<F>();
        let run = move |registry: &mut Registry| -> EcsResult<()> {
            registry.set_running_system(Some(id));
            <F::Param as SystemParam>::prepare(registry);
            let resolved = match <F::Param as SystemParam>::fetch(registry) {
                Ok(params) => {
                    func.run(params);
                    Ok(())
                }
                Err(err) => {
                    log::warn!("Skipping system {name}: {err}");
                    Err(err)
                }
            };
            registry.set_running_system(None);
            resolved?;
            registry.apply_commands();
            Ok(())
        };

        Self {
            id,
            name,
            param_kinds,
            run: Box::new(run),
        }
    }

    pub fn id(&self) -> SystemId {
        self.id
    }

    /// Type name of the wrapped function.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Kinds of the resolved parameters, in declaration order.
    pub fn param_kinds(&self) -> &[ParamKind] {
        &self.param_kinds
    }

    /// Runs the system once.
    ///
    /// # Errors
    ///
    /// Returns the resolution error of the first parameter that failed.
    pub fn run(&mut self, registry: &mut Registry) -> EcsResult<()> {
        (self.run)(registry)
    }
}

impl std::fmt::Debug for SystemFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemFn")
            .field("name", &self.name)
            .field("param_kinds", &self.param_kinds)
            .finish_non_exhaustive()
    }
}

/// Converts a function into a [`SystemFn`].
///
/// A parameter type without a [`SystemParam`] implementation is rejected at
/// compile time:
///
/// ```compile_fail
/// use tessera_ecs::IntoSystem;
///
/// fn not_a_system(_: u32) {}
/// let _ = not_a_system.into_system();
/// ```
///
/// # Example
///
/// ```
/// use tessera_ecs::{IntoSystem, Registry, ResMut};
///
/// struct Counter(u32);
///
/// fn tick(mut counter: ResMut<Counter>) {
///     counter.0 += 1;
/// }
///
/// let mut registry = Registry::new();
/// registry.emplace_resource(Counter(0));
/// let mut system = tick.into_system();
/// system.run(&mut registry).unwrap();
/// assert_eq!(registry.get_resource::<Counter>().unwrap().0, 1);
/// ```
pub trait IntoSystem<Marker>: Sized {
    fn into_system(self) -> SystemFn;
}

impl<Marker: 'static, F: SystemParamFunction<Marker>> IntoSystem<Marker> for F {
    fn into_system(self) -> SystemFn {
        SystemFn::new(self)
    }
}

/// Marker for passing an already built [`SystemFn`].
pub struct IsSystemFn;

impl IntoSystem<IsSystemFn> for SystemFn {
    fn into_system(self) -> SystemFn {
        self
    }
}
