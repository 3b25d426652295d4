use guardstack::Stack;

use super::{fpu_control, push, EntryFn};

// Win64: rbx, rbp, rdi, rsi, r12-r15 and xmm6-xmm15 are callee-saved, so are the control bits of
// MXCSR and the x87 control word.
//
// Windows also needs to know the bounds of the stack it's running on, otherwise stack probes
// (`__chkstk`) and the exception dispatcher get confused. They live in the Thread Information
// Block, see https://en.wikipedia.org/wiki/Win32_Thread_Information_Block and Boost.Context's
// jump_x86_64_ms_pe_masm.asm:
// * gs:[0x08]   stack base
// * gs:[0x10]   stack limit
// * gs:[0x1478] deallocation stack
// They are saved and restored together with the registers.
//
// rcx = save, rdx = target, r8 = arg
asm_function!(
    "coroutine_context_transfer",
    "
    push rbp
    push rbx
    push rdi
    push rsi
    push r12
    push r13
    push r14
    push r15

    sub rsp, 0xa0
    movups [rsp + 0x00], xmm6
    movups [rsp + 0x10], xmm7
    movups [rsp + 0x20], xmm8
    movups [rsp + 0x30], xmm9
    movups [rsp + 0x40], xmm10
    movups [rsp + 0x50], xmm11
    movups [rsp + 0x60], xmm12
    movups [rsp + 0x70], xmm13
    movups [rsp + 0x80], xmm14
    movups [rsp + 0x90], xmm15

    sub rsp, 8
    stmxcsr dword ptr [rsp]
    fnstcw word ptr [rsp + 4]

    // Load NT_TIB
    mov r10, qword ptr gs:[0x30]
    push qword ptr [r10 + 0x08]
    push qword ptr [r10 + 0x10]
    push qword ptr [r10 + 0x1478]

    // Save the current stack pointer and switch to the target stack.
    mov [rcx], rsp
    mov rsp, rdx

    pop qword ptr [r10 + 0x1478]
    pop qword ptr [r10 + 0x10]
    pop qword ptr [r10 + 0x08]

    ldmxcsr dword ptr [rsp]
    fldcw word ptr [rsp + 4]
    add rsp, 8

    movups xmm6, [rsp + 0x00]
    movups xmm7, [rsp + 0x10]
    movups xmm8, [rsp + 0x20]
    movups xmm9, [rsp + 0x30]
    movups xmm10, [rsp + 0x40]
    movups xmm11, [rsp + 0x50]
    movups xmm12, [rsp + 0x60]
    movups xmm13, [rsp + 0x70]
    movups xmm14, [rsp + 0x80]
    movups xmm15, [rsp + 0x90]
    add rsp, 0xa0

    pop r15
    pop r14
    pop r13
    pop r12
    pop rsi
    pop rdi
    pop rbx
    pop rbp

    // Return value of `transfer`, or first argument of the entry function.
    mov rax, r8
    mov rcx, r8
    ret
    "
);

// rcx = target, rdx = arg
asm_function!(
    "coroutine_context_restore",
    "
    mov rsp, rcx

    mov r10, qword ptr gs:[0x30]
    pop qword ptr [r10 + 0x1478]
    pop qword ptr [r10 + 0x10]
    pop qword ptr [r10 + 0x08]

    ldmxcsr dword ptr [rsp]
    fldcw word ptr [rsp + 4]
    add rsp, 8

    movups xmm6, [rsp + 0x00]
    movups xmm7, [rsp + 0x10]
    movups xmm8, [rsp + 0x20]
    movups xmm9, [rsp + 0x30]
    movups xmm10, [rsp + 0x40]
    movups xmm11, [rsp + 0x50]
    movups xmm12, [rsp + 0x60]
    movups xmm13, [rsp + 0x70]
    movups xmm14, [rsp + 0x80]
    movups xmm15, [rsp + 0x90]
    add rsp, 0xa0

    pop r15
    pop r14
    pop r13
    pop r12
    pop rsi
    pop rdi
    pop rbx
    pop rbp

    mov rax, rdx
    mov rcx, rdx
    ret
    "
);

/// After the call to this function the stack looks like this:
/// * 48 zeroed bytes: the 32 byte home area (shadow space) Windows requires above the return
///   address of every function, plus padding so that `(rsp + 8)` is 16 byte aligned on entry.
///   https://docs.microsoft.com/en-us/cpp/build/stack-usage?view=vs-2019
/// * Return address of `entry`. Zeroed, as we never return from this stack.
/// * Pointer to `entry`, popped by the `ret` in `transfer`.
/// * 8 zeroed general purpose registers and 10 zeroed xmm registers.
/// * MXCSR and x87 control word, copied from the caller.
/// * Stack base, stack limit and deallocation stack of the new stack, loaded into the TIB.
///
/// Returns a pointer to the new top of the stack.
pub unsafe fn init(stack: &Stack, entry: EntryFn) -> *mut usize {
    let mut sp = stack.top() as *mut usize;
    for _slot in 0..6 {
        sp = push(sp, 0);
    }
    sp = push(sp, 0);
    sp = push(sp, entry as usize);
    // rbp, rbx, rdi, rsi, r12-r15 and 160 bytes of xmm6-xmm15
    for _slot in 0..(8 + 20) {
        sp = push(sp, 0);
    }
    sp = push(sp, fpu_control());
    sp = push(sp, stack.top() as usize);
    // The whole stack is committed, so the limit is simply the lowest usable address.
    sp = push(sp, stack.limit() as usize);
    sp = push(sp, stack.deallocation() as usize);
    sp
}
