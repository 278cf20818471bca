//! Control transfer to the loaded image.
//!
//! The jump is not a call: it masks interrupts, drains every pending
//! store, places the descriptor pointer in `r0` and branches to the
//! entry address with the Thumb bit set. Nothing after it executes.

use core::arch::asm;
use mimi_common::handoff::Handoff;

/// Transfers control to `entry`. Does not return.
pub fn transfer(handoff: &Handoff, entry: u32) -> ! {
    cortex_m::interrupt::disable();
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
    unsafe {
        asm!(
            "bx {target}",
            in("r0") handoff as *const Handoff as u32,
            target = in(reg) entry | 1,
            options(noreturn),
        )
    }
}

/// As [`transfer`], first installing `sp` as the main stack pointer.
pub fn transfer_with_sp(handoff: &Handoff, entry: u32, sp: u32) -> ! {
    cortex_m::interrupt::disable();
    unsafe { cortex_m::register::msp::write(sp) };
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
    unsafe {
        asm!(
            "bx {target}",
            in("r0") handoff as *const Handoff as u32,
            target = in(reg) entry | 1,
            options(noreturn),
        )
    }
}
