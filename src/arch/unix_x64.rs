use guardstack::Stack;

use super::{fpu_control, push, EntryFn};

// System V: rbx, rbp and r12-r15 are callee-saved, so are the control bits of MXCSR and the x87
// control word.
//
// rdi = save, rsi = target, rdx = arg
asm_function!(
    "coroutine_context_transfer",
    "
    push rbp
    push rbx
    push r12
    push r13
    push r14
    push r15

    sub rsp, 8
    stmxcsr dword ptr [rsp]
    fnstcw word ptr [rsp + 4]

    // Save the current stack pointer and switch to the target stack.
    mov [rdi], rsp
    mov rsp, rsi

    // `arg` is the return value of the `transfer` call we are returning into, or the first
    // argument of the entry function on a fresh stack.
    mov rax, rdx
    mov rdi, rdx

    ldmxcsr dword ptr [rsp]
    fldcw word ptr [rsp + 4]
    add rsp, 8

    pop r15
    pop r14
    pop r13
    pop r12
    pop rbx
    pop rbp
    ret
    "
);

// rdi = target, rsi = arg
asm_function!(
    "coroutine_context_restore",
    "
    mov rsp, rdi

    mov rax, rsi
    mov rdi, rsi

    ldmxcsr dword ptr [rsp]
    fldcw word ptr [rsp + 4]
    add rsp, 8

    pop r15
    pop r14
    pop r13
    pop r12
    pop rbx
    pop rbp
    ret
    "
);

/// After the call to this function the stack looks like this:
/// * Return address of `entry`. Zeroed, as we never return from this stack. But the ABI expects
///   it for alignment reasons: "the value (%rsp + 8) is always a multiple of 16 when control is
///   transferred to the function entry point".
/// * Pointer to `entry`, popped by the `ret` in `transfer`.
/// * 6 zeroed callee-saved registers (rbp, rbx, r12-r15).
/// * MXCSR and x87 control word, copied from the caller.
///
/// Returns a pointer to the new top of the stack.
pub unsafe fn init(stack: &Stack, entry: EntryFn) -> *mut usize {
    let mut sp = stack.top() as *mut usize;
    sp = push(sp, 0);
    sp = push(sp, entry as usize);
    for _register in 0..6 {
        sp = push(sp, 0);
    }
    sp = push(sp, fpu_control());
    sp
}
