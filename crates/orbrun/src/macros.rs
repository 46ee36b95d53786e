//! Contract and servant declaration macros.

/// Declares a contract: an async trait whose objects can cross the wire.
///
/// ```ignore
/// orbrun::contract! {
///     pub trait Calculator: Named = "Demo.ICalculator" {
///         fn add(&self, a: i64, b: i64) -> i64;
///         fn reset(&self);
///     }
/// }
/// ```
///
/// This generates the trait (every method returning `orbrun::Result`), its
/// static `Contract`, the dispatcher servant types use through `serve!`, and
/// the forwarding implementation for proxies. Bases must themselves be
/// contracts.
#[macro_export]
macro_rules! contract {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident $(: $($base:ident),+)? = $type_id:literal {
            $(
                $(#[$mmeta:meta])*
                fn $method:ident(&self $(, $arg:ident : $ty:ty)* $(,)?) $(-> $ret:ty)?;
            )*
        }
    ) => {
        $(#[$meta])*
        #[$crate::async_trait]
        $vis trait $name: $crate::RemoteObject $($(+ $base)+)? {
            $(
                $(#[$mmeta])*
                async fn $method(&self $(, $arg: $ty)*) -> $crate::Result<$crate::__orb_ret!($($ret)?)>;
            )*
        }

        impl $crate::ObjectContract for dyn $name {
            fn contract() -> &'static $crate::Contract {
                static CONTRACT: $crate::Contract = $crate::Contract {
                    name: $type_id,
                    extends: &[$($(<dyn $base as $crate::ObjectContract>::contract),+)?],
                    members: &[$(
                        $crate::contract::Member {
                            name: ::core::stringify!($method),
                            arity: $crate::__orb_count!($($arg)*),
                        }
                    ),*],
                    view: $crate::proxy::view_of::<dyn $name>,
                };
                &CONTRACT
            }

            fn upcast(this: ::std::sync::Arc<Self>) -> ::std::sync::Arc<dyn $crate::RemoteObject> {
                this
            }

            fn from_proxy(core: ::std::sync::Arc<$crate::ProxyCore>) -> ::std::sync::Arc<Self> {
                ::std::sync::Arc::new($crate::Remote::<dyn $name>::new(core))
            }
        }

        impl dyn $name {
            /// Runs `member` of `contract`, which is this contract or one it extends.
            #[doc(hidden)]
            #[allow(unused_mut, unused_variables)]
            $vis async fn __orb_dispatch<__S: $name + ?Sized>(
                this: &__S,
                contract: &'static $crate::Contract,
                member: &str,
                call: $crate::Invocation,
            ) -> $crate::Result<$crate::Argument> {
                if contract == <dyn $name as $crate::ObjectContract>::contract() {
                    let $crate::Invocation { args, marshal, .. } = call;
                    let mut args = args.into_iter();
                    return match member {
                        $(
                            ::core::stringify!($method) => {
                                $(
                                    let $arg: $ty = $crate::marshal::take_arg(&mut args, &marshal, ::core::stringify!($arg))?;
                                )*
                                let result = <__S as $name>::$method(this $(, $arg)*).await?;
                                $crate::Wire::into_arg(result, &marshal)
                            }
                        )*
                        other => Err($crate::Error::unresolvable(::std::format!("member '{}' of '{}'", other, $type_id))),
                    };
                }
                $($(
                    if <dyn $base as $crate::ObjectContract>::contract().is_a(contract.name) {
                        return <dyn $base>::__orb_dispatch(this, contract, member, call).await;
                    }
                )+)?
                Err($crate::Error::unresolvable(::std::format!("contract '{}' via '{}'", contract.name, $type_id)))
            }

            /// Views `this` as `contract`, upcasting through the bases as needed.
            #[doc(hidden)]
            $vis fn __orb_cast(
                this: ::std::sync::Arc<dyn $name>,
                contract: &'static $crate::Contract,
            ) -> ::std::option::Option<::std::boxed::Box<dyn ::std::any::Any + ::core::marker::Send + ::core::marker::Sync>> {
                if contract == <dyn $name as $crate::ObjectContract>::contract() {
                    return ::std::option::Option::Some(::std::boxed::Box::new(this));
                }
                $($(
                    if <dyn $base as $crate::ObjectContract>::contract().is_a(contract.name) {
                        let base: ::std::sync::Arc<dyn $base> = this;
                        return <dyn $base>::__orb_cast(base, contract);
                    }
                )+)?
                ::std::option::Option::None
            }
        }

        #[$crate::async_trait]
        impl<__T: ?Sized + $crate::ObjectContract> $name for $crate::Remote<__T> {
            $(
                async fn $method(&self $(, $arg: $ty)*) -> $crate::Result<$crate::__orb_ret!($($ret)?)> {
                    let core = $crate::Remote::core(self);
                    let marshal = core.marshal();
                    let args = ::std::vec![$($crate::Wire::into_arg($arg, &marshal)?),*];
                    let result = core.call(::core::stringify!($method), args).await?;
                    $crate::Wire::from_arg(result, &marshal)
                }
            )*
        }
    };
}

/// Implements `RemoteObject` for a servant type that implements the listed
/// contracts. Members, type ids and casts of the contracts they extend come
/// along. Prefix with `context` to bind `orbrun::context::current()` around
/// each call.
///
/// ```ignore
/// orbrun::serve!(Calc: Calculator, Named);
/// orbrun::serve!(context Registry: Directory);
/// ```
#[macro_export]
macro_rules! serve {
    (@impl $context:literal, $ty:ty : $($contract:ident),+) => {
        #[$crate::async_trait]
        impl $crate::RemoteObject for $ty {
            fn contracts(&self) -> ::std::vec::Vec<&'static $crate::Contract> {
                ::std::vec![$(<dyn $contract as $crate::ObjectContract>::contract()),+]
            }

            fn type_name(&self) -> &'static str {
                ::std::any::type_name::<$ty>()
            }

            async fn invoke(&self, call: $crate::Invocation) -> $crate::Result<$crate::Argument> {
                let contracts = $crate::RemoteObject::contracts(self);
                let (contract, member) = $crate::contract::resolve(&contracts, &call.member, call.args.len())?;
                $(
                    if <dyn $contract as $crate::ObjectContract>::contract().is_a(contract.name) {
                        return <dyn $contract>::__orb_dispatch(self, contract, member.name, call).await;
                    }
                )+
                Err($crate::Error::unresolvable(::std::format!("contract '{}'", contract.name)))
            }

            fn cast(
                self: ::std::sync::Arc<Self>,
                contract: &'static $crate::Contract,
            ) -> ::std::option::Option<::std::boxed::Box<dyn ::std::any::Any + ::core::marker::Send + ::core::marker::Sync>> {
                if contract.is_root() {
                    let object: ::std::sync::Arc<dyn $crate::RemoteObject> = self;
                    return ::std::option::Option::Some(::std::boxed::Box::new(object));
                }
                $(
                    if <dyn $contract as $crate::ObjectContract>::contract().is_a(contract.name) {
                        let view: ::std::sync::Arc<dyn $contract> = self;
                        return <dyn $contract>::__orb_cast(view, contract);
                    }
                )+
                ::std::option::Option::None
            }

            fn context_aware(&self) -> bool {
                $context
            }
        }
    };
    (context $ty:ty : $($contract:ident),+ $(,)?) => {
        $crate::serve!(@impl true, $ty : $($contract),+);
    };
    ($ty:ty : $($contract:ident),+ $(,)?) => {
        $crate::serve!(@impl false, $ty : $($contract),+);
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __orb_ret {
    () => { () };
    ($ret:ty) => { $ret };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __orb_count {
    () => { 0usize };
    ($head:tt $($tail:tt)*) => { 1usize + $crate::__orb_count!($($tail)*) };
}
