//! Declarative macros for the name tables used across the hwtelem codebase

/// Define an enum with automatic `name()` and `all()` implementations
///
/// # Example
/// ```
/// use hwtelem::metric_enum;
///
/// metric_enum! {
///     pub enum Plane {
///         Core => "Core",
///         Soc => "SoC",
///     }
/// }
///
/// let plane = Plane::Soc;
/// assert_eq!(plane.name(), "SoC");
/// assert_eq!(Plane::all().len(), 2);
/// ```
///
/// Expands to:
/// - An enum with Debug, Clone, Copy, PartialEq, Eq, Hash derives
/// - A `name(&self) -> &'static str` method
/// - An `all() -> Vec<Self>` method
#[macro_export]
macro_rules! metric_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $str:literal),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)*
                }
            }

            pub fn all() -> Vec<$name> {
                vec![$($name::$variant,)*]
            }
        }
    };
}

/// Define an enum with name() and all() methods, plus custom data per variant
///
/// # Example
/// ```
/// use hwtelem::enum_with_data;
///
/// enum_with_data! {
///     pub enum Refill: (u8, u8) {
///         FromL2 => ("L2", (0x43, 0x01)),
///         FromL3 => ("L3", (0x43, 0x02)),
///     }
///     impl selector -> (u8, u8)
/// }
///
/// let refill = Refill::FromL3;
/// assert_eq!(refill.name(), "L3");
/// assert_eq!(refill.selector(), (0x43, 0x02));
/// ```
#[macro_export]
macro_rules! enum_with_data {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $data_type:ty {
            $($variant:ident => ($str:literal, $data:expr)),* $(,)?
        }
        impl $method:ident -> $return_type:ty
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)*
                }
            }

            pub fn $method(&self) -> $return_type {
                match self {
                    $($name::$variant => $data,)*
                }
            }

            pub fn all() -> Vec<$name> {
                vec![$($name::$variant,)*]
            }
        }
    };
}
