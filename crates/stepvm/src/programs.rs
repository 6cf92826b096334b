//! Machine code images used by the demo and the tests.

/// Writes the first thirteen Fibonacci numbers as bytes to `[rsp-13, rsp)`.
///
/// The loop body starts at offset 39 and the closing `jne` sits at offset 58; the program ends
/// with a `nop` at offset 60. Run to completion it executes 99 instructions and leaves
/// `RCX = 13`.
pub const FIBONACCI: &[u8] = &[
    0x48, 0xC7, 0xC0, 0x01, 0x00, 0x00, 0x00, // mov rax, 1
    0x48, 0xC7, 0xC3, 0x00, 0x00, 0x00, 0x00, // mov rbx, 0
    0x48, 0xC7, 0xC1, 0x00, 0x00, 0x00, 0x00, // mov rcx, 0
    0xBA, 0x00, 0x00, 0x00, 0x00, // mov edx, 0
    0x48, 0xC7, 0xC6, 0x0D, 0x00, 0x00, 0x00, // mov rsi, 13
    0x48, 0x89, 0xE5, // mov rbp, rsp
    0x48, 0x29, 0xF5, // sub rbp, rsi
    // loop:
    0x88, 0x44, 0x0D, 0x00, // mov [rbp+rcx], al
    0x48, 0x89, 0xC2, // mov rdx, rax
    0x48, 0x01, 0xD8, // add rax, rbx
    0x48, 0x89, 0xD3, // mov rbx, rdx
    0x48, 0xFF, 0xC1, // inc rcx
    0x48, 0x39, 0xF1, // cmp rcx, rsi
    0x75, 0xEB, // jne loop
    0x90, // nop
];

/// Offset of the first instruction of the [`FIBONACCI`] loop body.
pub const FIBONACCI_LOOP: u64 = 39;

/// The bytes [`FIBONACCI`] stores, lowest address first.
pub const FIBONACCI_SEQUENCE: [u8; 13] = [1, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144, 233];
