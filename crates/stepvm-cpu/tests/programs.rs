use stepvm_cpu::{
    Context, ControlUnit, CuState, EmuError, Flag, Gpr, Register, RunRequest, StopReason, Width,
    WriteRule,
};
use stepvm_mem::{MemorySpace, DEFAULT_STACK_BASE};

const PROLOGUE: &[u8] = &[
    0x48, 0xC7, 0xC0, 0x01, 0x00, 0x00, 0x00, // mov rax, 1
    0x48, 0xC7, 0xC3, 0x00, 0x00, 0x00, 0x00, // mov rbx, 0
    0x48, 0xC7, 0xC1, 0x00, 0x00, 0x00, 0x00, // mov rcx, 0
    0xBA, 0x00, 0x00, 0x00, 0x00, // mov edx, 0
    0x48, 0xC7, 0xC6, 0x0D, 0x00, 0x00, 0x00, // mov rsi, 13
    0x48, 0x89, 0xE5, // mov rbp, rsp
    0x48, 0x29, 0xF5, // sub rbp, rsi
];

const STEP: &[u8] = &[
    0x48, 0x89, 0xC2, // mov rdx, rax
    0x48, 0x01, 0xD8, // add rax, rbx
    0x48, 0x89, 0xD3, // mov rbx, rdx
];

const STORE: &[u8] = &[0x88, 0x44, 0x0D, 0x00]; // mov [rbp+rcx], al

const EPILOGUE: &[u8] = &[
    0x48, 0xFF, 0xC1, // inc rcx
    0x48, 0x39, 0xF1, // cmp rcx, rsi
    0x75, 0xEB, // jne loop
    0x90, // nop
];

fn program(store_first: bool) -> Vec<u8> {
    let mut image = PROLOGUE.to_vec();
    if store_first {
        image.extend_from_slice(STORE);
        image.extend_from_slice(STEP);
    } else {
        image.extend_from_slice(STEP);
        image.extend_from_slice(STORE);
    }
    image.extend_from_slice(EPILOGUE);
    image
}

fn machine(image: &[u8]) -> Context {
    let mut ctx = Context::new(MemorySpace::new(image));
    ctx.set_gpr(Gpr::Rsp, DEFAULT_STACK_BASE);
    ctx.set_gpr(Gpr::Rbp, DEFAULT_STACK_BASE);
    ctx
}

fn stored_sequence(ctx: &Context) -> Vec<u8> {
    ctx.memory.read_bytes(DEFAULT_STACK_BASE - 13, 13)
}

#[test]
fn fibonacci_store_first_writes_the_sequence() {
    let image = program(true);
    assert_eq!(image.len(), 61);
    let mut ctx = machine(&image);

    let outcome = ControlUnit::default()
        .run(&mut ctx, RunRequest::run())
        .unwrap();
    assert_eq!(outcome.stop, StopReason::EndOfMemory);
    assert_eq!(outcome.executed, 7 + 13 * 7 + 1);
    assert_eq!(outcome.ip, 61);
    assert_eq!(outcome.last_disassembled.as_deref(), Some("NOP"));

    assert_eq!(
        stored_sequence(&ctx),
        vec![1, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144, 233]
    );
    assert_eq!(ctx.gpr(Gpr::Rcx), 13);
    assert_eq!(ctx.gpr(Gpr::Rbp), DEFAULT_STACK_BASE - 13);
    assert!(ctx.flag(Flag::Zero));
}

#[test]
fn fibonacci_store_after_add_is_shifted_by_one() {
    let mut ctx = machine(&program(false));
    ControlUnit::default()
        .run(&mut ctx, RunRequest::run())
        .unwrap();
    assert_eq!(
        stored_sequence(&ctx),
        vec![1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144, 233, 121]
    );
}

#[test]
fn stepping_through_the_prologue() {
    let mut ctx = machine(&program(true));
    let mut cu = ControlUnit::default();
    let expected = [
        (7, "MOV RAX, 0x1"),
        (14, "MOV RBX, 0x0"),
        (21, "MOV RCX, 0x0"),
        (26, "MOV EDX, 0x0"),
        (33, "MOV RSI, 0xD"),
        (36, "MOV RBP, RSP"),
        (39, "SUB RBP, RSI"),
        (43, "MOV BYTE PTR [RBP+RCX], AL"),
    ];
    for (ip, text) in expected {
        let outcome = cu.run(&mut ctx, RunRequest::step()).unwrap();
        assert_eq!(outcome.stop, StopReason::Stepped);
        assert_eq!(outcome.ip, ip);
        assert_eq!(outcome.last_disassembled.as_deref(), Some(text));
    }
    assert_eq!(ctx.memory.read(DEFAULT_STACK_BASE - 13), 1);
}

#[test]
fn breakpoint_inside_the_loop_fires_every_iteration() {
    let mut ctx = machine(&program(true));
    ctx.add_breakpoint(39);
    let mut cu = ControlUnit::default();

    for iteration in 0..13u64 {
        let outcome = cu.run(&mut ctx, RunRequest::run()).unwrap();
        assert_eq!(outcome.stop, StopReason::Breakpoint { rip: 39 });
        assert_eq!(ctx.gpr(Gpr::Rcx), iteration);
        assert_eq!(cu.state(), CuState::Paused(39));
    }
    let outcome = cu.run(&mut ctx, RunRequest::run()).unwrap();
    assert_eq!(outcome.stop, StopReason::EndOfMemory);
}

#[test]
fn unknown_opcode_mid_program_leaves_state_untouched() {
    // mov rax, 1; ud2
    let mut ctx = machine(&[0x48, 0xC7, 0xC0, 0x01, 0x00, 0x00, 0x00, 0x0F, 0x0B]);
    let mut cu = ControlUnit::default();
    cu.run(&mut ctx, RunRequest::step()).unwrap();
    let before = ctx.clone();

    let err = cu.run(&mut ctx, RunRequest::run()).unwrap_err();
    assert_eq!(
        err,
        EmuError::UnknownOpcode {
            ip: 7,
            bytes: vec![0x0F, 0x0B]
        }
    );
    assert_eq!(ctx, before);
    assert_eq!(cu.state(), CuState::Idle);
}

#[test]
fn sbb_consumes_carry_and_reports_overflow() {
    // sbb al, bl
    let mut ctx = machine(&[0x18, 0xD8]);
    ctx.set_gpr(Gpr::Rax, 0x80);
    ctx.set_gpr(Gpr::Rbx, 0x7f);
    ctx.set_flag(Flag::Carry, true);

    let outcome = ControlUnit::default()
        .run(&mut ctx, RunRequest::step())
        .unwrap();
    assert_eq!(outcome.last_disassembled.as_deref(), Some("SBB AL, BL"));
    assert_eq!(ctx.gpr(Gpr::Rax), 0);
    assert!(ctx.flag(Flag::Carry));
    assert!(ctx.flag(Flag::Overflow));
    assert!(ctx.flag(Flag::Auxiliary));
    assert!(ctx.flag(Flag::Zero));
}

#[test]
fn write_rule_controls_dword_writes() {
    // mov eax, 0x12345678
    let image = [0xB8, 0x78, 0x56, 0x34, 0x12];
    let eax = Register::new(Gpr::Rax, Width::Dword);

    for (rule, expected) in [
        (WriteRule::Architectural, 0x1234_5678),
        (WriteRule::PreserveUpper, 0xffff_ffff_1234_5678),
    ] {
        let mut ctx = Context::with_rule(MemorySpace::new(&image), rule);
        ctx.set_gpr(Gpr::Rax, u64::MAX);
        ControlUnit::default()
            .run(&mut ctx, RunRequest::step())
            .unwrap();
        assert_eq!(ctx.gpr(Gpr::Rax), expected, "{rule:?}");
        assert_eq!(ctx.read_register(eax), 0x1234_5678);
    }
}

#[test]
fn byte_and_word_writes_merge_under_both_rules() {
    // mov al, 0x11; mov ah, 0x22; mov cx, 0x3344
    let image = [0xB0, 0x11, 0xB4, 0x22, 0x66, 0xB9, 0x44, 0x33];
    for rule in [WriteRule::Architectural, WriteRule::PreserveUpper] {
        let mut ctx = Context::with_rule(MemorySpace::new(&image), rule);
        ctx.set_gpr(Gpr::Rax, u64::MAX);
        ctx.set_gpr(Gpr::Rcx, u64::MAX);
        ControlUnit::default()
            .run(&mut ctx, RunRequest::run())
            .unwrap();
        assert_eq!(ctx.gpr(Gpr::Rax), 0xffff_ffff_ffff_2211);
        assert_eq!(ctx.gpr(Gpr::Rcx), 0xffff_ffff_ffff_3344);
    }
}
