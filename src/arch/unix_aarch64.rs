use guardstack::Stack;

use super::{push, EntryFn};

// AAPCS64: x19-x28, the frame pointer (x29), the link register (x30) and the lower halves of
// v8-v15 are callee-saved. x18 is left alone, some platforms reserve it.
//
// x0 = save, x1 = target, x2 = arg
asm_function!(
    "coroutine_context_transfer",
    "
    sub sp, sp, #0xa0
    stp x19, x20, [sp, #0x00]
    stp x21, x22, [sp, #0x10]
    stp x23, x24, [sp, #0x20]
    stp x25, x26, [sp, #0x30]
    stp x27, x28, [sp, #0x40]
    stp d8,  d9,  [sp, #0x50]
    stp d10, d11, [sp, #0x60]
    stp d12, d13, [sp, #0x70]
    stp d14, d15, [sp, #0x80]
    stp x29, x30, [sp, #0x90]

    // Save the current stack pointer and switch to the target stack.
    mov x9, sp
    str x9, [x0]
    mov sp, x1

    ldp x19, x20, [sp, #0x00]
    ldp x21, x22, [sp, #0x10]
    ldp x23, x24, [sp, #0x20]
    ldp x25, x26, [sp, #0x30]
    ldp x27, x28, [sp, #0x40]
    ldp d8,  d9,  [sp, #0x50]
    ldp d10, d11, [sp, #0x60]
    ldp d12, d13, [sp, #0x70]
    ldp d14, d15, [sp, #0x80]
    ldp x29, x30, [sp, #0x90]
    add sp, sp, #0xa0

    // Return value of `transfer`, or first argument of the entry function.
    mov x0, x2
    ret
    "
);

// x0 = target, x1 = arg
asm_function!(
    "coroutine_context_restore",
    "
    mov sp, x0

    ldp x19, x20, [sp, #0x00]
    ldp x21, x22, [sp, #0x10]
    ldp x23, x24, [sp, #0x20]
    ldp x25, x26, [sp, #0x30]
    ldp x27, x28, [sp, #0x40]
    ldp d8,  d9,  [sp, #0x50]
    ldp d10, d11, [sp, #0x60]
    ldp d12, d13, [sp, #0x70]
    ldp d14, d15, [sp, #0x80]
    ldp x29, x30, [sp, #0x90]
    add sp, sp, #0xa0

    mov x0, x1
    ret
    "
);

/// Lays out a 160 byte register save area at the top of the stack. Everything is zeroed, except
/// the link register slot which points to `entry`. The `ret` in `transfer` jumps there with the
/// stack pointer back at the (16 byte aligned) top of the stack and a null frame pointer, which
/// terminates backtraces.
///
/// Returns a pointer to the new top of the stack.
pub unsafe fn init(stack: &Stack, entry: EntryFn) -> *mut usize {
    let mut sp = stack.top() as *mut usize;
    // x30
    sp = push(sp, entry as usize);
    // x29, d8-d15, x19-x28
    for _register in 0..19 {
        sp = push(sp, 0);
    }
    sp
}
