// All architectures expose the same api. Here I just want to take some time explaining the general
// idea behind all of them.
//
// At the core of the implementation there are 3 functions:
// * `init(stack: &Stack, entry: EntryFn) -> *mut usize`
// * `transfer(save: *mut *mut usize, target: *mut usize, arg: usize) -> usize`
// * `restore(target: *mut usize, arg: usize) -> !`
//
// A suspended flow of control is fully described by a single stack pointer. Everything else that
// is needed to continue it (callee-saved registers, on x86_64 the floating point control words,
// the return address and on Windows a few fields of the Thread Information Block) is stored on its
// own stack, right above that pointer:
// ```
//      +                  +
//      |     .......      |
//      |                  |
//      +------------------+
//      |Return address    |  <- `ret` continues here
//      +------------------+
//      |Callee-saved regs |
//      +------------------+
//      |MXCSR, x87 CW     |  (x86_64 only)
//      +------------------+
//      |TIB stack fields  |  (Windows only)
//      +------------------+  <- saved stack pointer
// ```
// Because the registers are spilled by an actual function call, the compiler already assumes that
// all caller-saved registers are clobbered and we only need to take care of the callee-saved ones.
//
// ### init
// `init` takes a fresh **stack** and a **pointer to an entry function**. It writes a frame at the
// top of the stack that looks exactly like one left behind by `transfer`: zeroed registers and
// the entry function as return address. Switching to it will "return" into the entry function,
// with the transferred `arg` as its only argument. The entry function must never return, there is
// nothing above it to return to.
//
// ### transfer
// 1. Pushes the callee-saved registers of the current context.
// 2. Writes the current stack pointer into `save`.
// 3. Changes the stack pointer to `target` and pops the registers saved there.
// 4. Returns into the target context, handing it `arg` as return value (and first argument if
//    the target is a fresh entry function).
//
// ### restore
// The second half of `transfer` alone. Used to leave a context for good: nothing is saved, so
// control can never come back to the caller of `restore`.

/// Fixed entry point of a fresh stack. Receives the `arg` of the first transfer into it.
pub type EntryFn = unsafe extern "C" fn(usize) -> !;

// Defines a global function in assembly, taking care of symbol decoration and ELF metadata.
macro_rules! asm_function {
    ($name:literal, $body:literal) => {
        #[cfg(target_vendor = "apple")]
        std::arch::global_asm!(concat!(
            ".globl _", $name, "\n",
            ".p2align 4\n",
            "_", $name, ":\n",
            $body
        ));

        #[cfg(target_family = "windows")]
        std::arch::global_asm!(concat!(
            ".globl ", $name, "\n",
            ".p2align 4\n",
            $name, ":\n",
            $body
        ));

        #[cfg(not(any(target_vendor = "apple", target_family = "windows")))]
        std::arch::global_asm!(concat!(
            ".globl ", $name, "\n",
            ".type ", $name, ", %function\n",
            ".p2align 4\n",
            $name, ":\n",
            $body, "\n",
            ".size ", $name, ", . - ", $name
        ));
    };
}

#[cfg(all(target_family = "unix", target_arch = "x86_64"))]
mod unix_x64;
#[cfg(all(target_family = "unix", target_arch = "x86_64"))]
pub use self::unix_x64::*;

#[cfg(all(target_family = "unix", target_arch = "aarch64"))]
mod unix_aarch64;
#[cfg(all(target_family = "unix", target_arch = "aarch64"))]
pub use self::unix_aarch64::*;

#[cfg(all(target_family = "windows", target_arch = "x86_64"))]
mod windows_x64;
#[cfg(all(target_family = "windows", target_arch = "x86_64"))]
pub use self::windows_x64::*;

#[cfg(not(any(
    all(target_family = "unix", target_arch = "x86_64"),
    all(target_family = "unix", target_arch = "aarch64"),
    all(target_family = "windows", target_arch = "x86_64"),
)))]
compile_error!("coroutine-context only supports x86_64 and aarch64 on unix, and x86_64 on windows");

extern "C" {
    fn coroutine_context_transfer(save: *mut *mut usize, target: *mut usize, arg: usize) -> usize;
    fn coroutine_context_restore(target: *mut usize, arg: usize) -> !;
}

/// Saves the current context into `save` and switches to `target`.
///
/// Returns once another context restores `save`, yielding the `arg` it passed along.
#[inline(always)]
pub unsafe fn transfer(save: *mut *mut usize, target: *mut usize, arg: usize) -> usize {
    coroutine_context_transfer(save, target, arg)
}

/// Switches to `target` without saving the current context.
#[inline(always)]
pub unsafe fn restore(target: *mut usize, arg: usize) -> ! {
    coroutine_context_restore(target, arg)
}

// The MXCSR register in the low and the x87 control word in the high half of a frame slot. A
// fresh stack starts out with the floating point environment of the context starting it.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
unsafe fn fpu_control() -> usize {
    let mut slot: u64 = 0;
    std::arch::asm!(
        "stmxcsr dword ptr [{slot}]",
        "fnstcw word ptr [{slot} + 4]",
        slot = in(reg) &mut slot as *mut u64,
        options(nostack, preserves_flags)
    );
    slot as usize
}

// Used by `init` implementations to lay out the first frame.
#[inline(always)]
unsafe fn push(mut sp: *mut usize, val: usize) -> *mut usize {
    sp = sp.offset(-1);
    *sp = val;
    sp
}

