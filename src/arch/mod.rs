// src/arch/mod.rs

//! Architecture-specific abstractions.
//!
//! The `x86` module always compiles; the raw assembly inside it is gated on
//! `target_arch = "x86"` with inert host fallbacks so the library (and its
//! unit tests) can be built for a host target as well.

pub mod x86;

pub use self::x86::*;

/// Architecture-specific CPU implementation.
pub type ArchCpu = self::x86::cpu::X86Cpu;

/// Trait for CPU-specific operations.
pub trait Cpu {
    /// Halt the CPU until the next interrupt.
    fn halt();

    /// Disable interrupts.
    fn disable_interrupts();

    /// Enable interrupts.
    fn enable_interrupts();

    /// Check if interrupts are enabled.
    fn are_interrupts_enabled() -> bool;

    /// Disable interrupts, returning the previous EFLAGS value.
    fn save_and_disable_interrupts() -> u32;

    /// Restore a previously saved EFLAGS value (including IF).
    fn restore_interrupts(flags: u32);
}
