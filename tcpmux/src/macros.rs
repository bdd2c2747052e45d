/// Define an enumeration with known variants and an unknown representation.
///
/// Most network protocols define fields where not all bit-patterns are standardized values. In
/// some cases these are invalid while others allocate them through some registrar (such as IANA).
/// This macro makes it more ergonomic to define a representation for such fields by providing
/// converters to and from an underlying representation derived from the definition.
// Copyright (C) 2016 whitequark@whitequark.org
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $( $variant:ident = $value:expr ),+ $(,)*
        }
    ) => {
        enum_with_unknown! {
            $( #[$enum_attr] )*
            pub doc enum $name($ty) {
                $( #[allow(missing_docs)] $variant = $value ),+
            }
        }
    };
    (
        $( #[$enum_attr:meta] )*
        pub doc enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )+
              $variant:ident = $value:expr $(,)*
            ),+
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// A value whose interpretation was not determined.
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

#[cfg(feature = "log")]
#[macro_use]
mod logging {
    macro_rules! net_log {
        (trace, $($arg:expr),*) => { ::log::trace!($($arg),*) };
        (debug, $($arg:expr),*) => { ::log::debug!($($arg),*) };
        (info, $($arg:expr),*) => { ::log::info!($($arg),*) };
        (warn, $($arg:expr),*) => { ::log::warn!($($arg),*) };
        (error, $($arg:expr),*) => { ::log::error!($($arg),*) };
    }
}

#[cfg(not(feature = "log"))]
#[macro_use]
mod logging {
    macro_rules! net_log {
        ($level:ident, $($arg:expr),*) => {{ $( let _ = &$arg; )* }}
    }
}

macro_rules! net_trace {
    ($($arg:expr),* $(,)?) => (net_log!(trace, $($arg),*));
}

macro_rules! net_debug {
    ($($arg:expr),* $(,)?) => (net_log!(debug, $($arg),*));
}

macro_rules! net_info {
    ($($arg:expr),* $(,)?) => (net_log!(info, $($arg),*));
}

macro_rules! net_warn {
    ($($arg:expr),* $(,)?) => (net_log!(warn, $($arg),*));
}

macro_rules! net_error {
    ($($arg:expr),* $(,)?) => (net_log!(error, $($arg),*));
}
