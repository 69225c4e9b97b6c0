//! Generic register abstractions for type-safe MSR programming

/// A 64-bit configuration value destined for a control register
///
/// Only [`RegisterLayout`] implementations can produce one, so every bit
/// placement written to hardware comes from a layout defined in this crate.
/// [`RegisterValue::ZERO`] is the single exception and is used to clear
/// counter registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegisterValue(u64);

impl RegisterValue {
    /// Value written to counter registers to reset them
    pub const ZERO: Self = Self(0);

    pub(crate) const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bits to hand to the register-access transport
    pub const fn bits(self) -> u64 {
        self.0
    }
}

/// Trait for register layouts that can be converted to/from raw MSR values
///
/// This trait provides type-safe conversion between structured register
/// layouts and the raw 64-bit values that are written to/read from MSRs.
///
/// # Example
///
/// ```ignore
/// use hwtelem_raw::register::RegisterLayout;
///
/// #[derive(Debug, Default)]
/// struct MyControl {
///     enable: bool,
///     threshold: u8,
/// }
///
/// impl RegisterLayout for MyControl {
///     fn to_msr_value(&self) -> u64 {
///         (if self.enable { 1 } else { 0 })
///             | ((self.threshold as u64) << 8)
///     }
///
///     fn from_msr_value(value: u64) -> Self {
///         Self {
///             enable: (value & 1) != 0,
///             threshold: ((value >> 8) & 0xFF) as u8,
///         }
///     }
/// }
/// ```
pub trait RegisterLayout: Sized {
    /// Pack this layout into raw register bits
    fn to_msr_value(&self) -> u64;

    /// Parse raw register bits into this layout
    fn from_msr_value(value: u64) -> Self;

    /// Validate that narrow fields fit their bit width
    fn validate(&self) -> Result<(), &'static str> {
        Ok(())
    }

    /// Pack this layout into a value accepted by the register-access layer
    fn to_register_value(&self) -> RegisterValue {
        RegisterValue::from_bits(self.to_msr_value())
    }
}

/// A control register address paired with the layout to program into it
#[derive(Debug, Clone, Copy)]
pub struct Register<T: RegisterLayout> {
    /// MSR address
    pub address: u32,
    /// Typed register layout
    pub layout: T,
}

impl<T: RegisterLayout> Register<T> {
    pub fn new(address: u32, layout: T) -> Self {
        Self { address, layout }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        self.layout.validate()
    }

    pub fn value(&self) -> RegisterValue {
        self.layout.to_register_value()
    }
}

/// Bit width of a free-running hardware counter
///
/// Counter deltas wrap at `max_value()`, so every counter register carries its
/// width next to its address instead of assuming one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterWidth {
    Bits32,
    Bits44,
    Bits48,
    Bits64,
}

impl CounterWidth {
    pub const fn bits(self) -> u32 {
        match self {
            CounterWidth::Bits32 => 32,
            CounterWidth::Bits44 => 44,
            CounterWidth::Bits48 => 48,
            CounterWidth::Bits64 => 64,
        }
    }

    /// Largest value the counter can hold before wrapping to zero
    pub const fn max_value(self) -> u64 {
        match self {
            CounterWidth::Bits64 => u64::MAX,
            other => (1u64 << other.bits()) - 1,
        }
    }
}

/// A counter register: address plus declared width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterRegister {
    pub address: u32,
    pub width: CounterWidth,
}

impl CounterRegister {
    pub const fn new(address: u32, width: CounterWidth) -> Self {
        Self { address, width }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Toy {
        enable: bool,
        threshold: u8,
    }

    impl RegisterLayout for Toy {
        fn to_msr_value(&self) -> u64 {
            (if self.enable { 1 } else { 0 }) | ((self.threshold as u64) << 8)
        }

        fn from_msr_value(value: u64) -> Self {
            Self {
                enable: (value & 1) != 0,
                threshold: ((value >> 8) & 0xFF) as u8,
            }
        }
    }

    #[test]
    fn test_counter_width_max_values() {
        assert_eq!(CounterWidth::Bits32.max_value(), 0xFFFF_FFFF);
        assert_eq!(CounterWidth::Bits44.max_value(), 0x0FFF_FFFF_FFFF);
        assert_eq!(CounterWidth::Bits48.max_value(), 0xFFFF_FFFF_FFFF);
        assert_eq!(CounterWidth::Bits64.max_value(), u64::MAX);
    }

    #[test]
    fn test_register_value_from_layout() {
        let reg = Register::new(
            0xE01,
            Toy {
                enable: true,
                threshold: 10,
            },
        );
        assert_eq!(reg.value().bits(), 0x0A01);
        assert!(reg.validate().is_ok());
        assert_eq!(RegisterValue::ZERO.bits(), 0);
    }
}
