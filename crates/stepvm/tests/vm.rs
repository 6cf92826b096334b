use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use stepvm::programs::{FIBONACCI, FIBONACCI_LOOP, FIBONACCI_SEQUENCE};
use stepvm::{
    EmuError, Gpr, StopReason, Vm, VmConfig, VmError, VmEvent, Width, DEFAULT_STACK_BASE,
};
use stepvm_cpu::DecodedInstruction;
use stepvm_mem::MAIN_SEGMENT;

fn fibonacci() -> Vm {
    Vm::with_config(FIBONACCI, VmConfig::default().with_name("fib")).unwrap()
}

fn register(vm: &Vm, name: &str) -> u64 {
    vm.registers(Width::Qword)
        .into_iter()
        .find(|(reg, _)| *reg == name)
        .map(|(_, value)| value)
        .unwrap()
}

#[test]
fn fibonacci_runs_to_completion() {
    let vm = fibonacci();
    let report = pollster::block_on(vm.run(false)).unwrap();
    assert_eq!(report.stop, StopReason::EndOfMemory);
    assert_eq!(report.executed, 99);
    assert_eq!(report.ip, FIBONACCI.len() as u64);
    assert_eq!(vm.instruction_pointer(), FIBONACCI.len() as u64);

    let memory = vm.memory();
    let stored: Vec<u8> = (0..13)
        .map(|i| memory.get(&(DEFAULT_STACK_BASE - 13 + i)).copied().unwrap_or(0))
        .collect();
    assert_eq!(stored, FIBONACCI_SEQUENCE);

    let registers = vm.registers(Width::Qword);
    assert_eq!(registers.len(), 17);
    assert_eq!(registers[0], ("IP", FIBONACCI.len() as u64));
    assert_eq!(registers[1].0, "RAX");
    assert_eq!(register(&vm, "RCX"), 13);
    assert_eq!(register(&vm, "RSP"), DEFAULT_STACK_BASE);
    assert_eq!(register(&vm, "RBP"), DEFAULT_STACK_BASE - 13);

    let flags = vm.flags();
    assert!(flags.contains(&("ZF", true)));
    assert!(flags.contains(&("CF", false)));
}

#[test]
fn registers_follow_the_requested_width() {
    let vm = fibonacci();
    vm.run_blocking(true).unwrap();
    let names: Vec<_> = vm
        .registers(Width::Dword)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(&names[..3], &["IP", "EAX", "ECX"]);
    assert_eq!(names.last(), Some(&"R15D"));
}

#[test]
fn breakpoint_pauses_before_the_loop_body() {
    let vm = fibonacci();
    assert!(vm.add_breakpoint(FIBONACCI_LOOP));
    assert!(!vm.add_breakpoint(FIBONACCI_LOOP));

    let report = vm.run_blocking(false).unwrap();
    assert_eq!(report.stop, StopReason::Breakpoint { rip: FIBONACCI_LOOP });
    assert_eq!(report.executed, 7);
    assert_eq!(vm.instruction_pointer(), FIBONACCI_LOOP);
    // The store at the breakpoint has not happened yet.
    assert_eq!(vm.memory().get(&(DEFAULT_STACK_BASE - 13)), None);

    let report = vm.run_blocking(true).unwrap();
    assert_eq!(report.stop, StopReason::Stepped);
    assert_eq!(
        report.last_disassembled.as_deref(),
        Some("MOV BYTE PTR [RBP+RCX], AL")
    );
    assert_eq!(vm.memory().get(&(DEFAULT_STACK_BASE - 13)), Some(&1));

    assert!(vm.remove_breakpoint(FIBONACCI_LOOP));
    assert!(!vm.remove_breakpoint(FIBONACCI_LOOP));
    assert_eq!(vm.run_blocking(false).unwrap().stop, StopReason::EndOfMemory);
}

#[test]
fn reset_keeps_breakpoints() {
    let vm = fibonacci();
    vm.add_breakpoint(58);
    vm.add_breakpoint(FIBONACCI_LOOP);
    vm.run_blocking(false).unwrap();
    vm.run_blocking(false).unwrap();
    assert_eq!(vm.instruction_pointer(), 58);

    vm.reset().unwrap();
    assert_eq!(vm.instruction_pointer(), 0);
    assert_eq!(register(&vm, "RAX"), 0);
    assert_eq!(register(&vm, "RSP"), DEFAULT_STACK_BASE);
    assert!(vm.memory().keys().all(|&addr| addr < FIBONACCI.len() as u64));
    assert_eq!(vm.breakpoints(), vec![FIBONACCI_LOOP, 58]);

    let report = vm.run_blocking(false).unwrap();
    assert_eq!(report.stop, StopReason::Breakpoint { rip: FIBONACCI_LOOP });
}

#[test]
fn run_past_the_end_is_a_no_op() {
    let vm = fibonacci();
    vm.run_blocking(false).unwrap();
    let before = vm.context();
    let report = vm.run_blocking(false).unwrap();
    assert_eq!(report.stop, StopReason::EndOfMemory);
    assert_eq!(report.executed, 0);
    assert_eq!(vm.context(), before);
}

#[test]
fn listeners_see_run_and_breakpoint_events() {
    let vm = fibonacci();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    vm.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

    vm.add_breakpoint(FIBONACCI_LOOP);
    vm.add_breakpoint(FIBONACCI_LOOP);
    let report = vm.run_blocking(true).unwrap();

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            VmEvent::BreakpointsChanged(vec![FIBONACCI_LOOP]),
            VmEvent::RunFinished(report),
        ]
    );
    match &events[1] {
        VmEvent::RunFinished(report) => assert_eq!(report.ip, 7),
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn unknown_opcode_leaves_the_machine_untouched() {
    // mov rax, 1; ud2
    let vm = Vm::new(&[0x48, 0xC7, 0xC0, 0x01, 0x00, 0x00, 0x00, 0x0F, 0x0B]).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    vm.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

    vm.run_blocking(true).unwrap();
    let before = vm.context();
    let err = vm.run_blocking(false).unwrap_err();
    assert!(matches!(
        err,
        VmError::Emu(EmuError::UnknownOpcode { ip: 7, .. })
    ));
    assert_eq!(vm.context(), before);
    assert!(matches!(
        events.lock().unwrap().last(),
        Some(VmEvent::RunFailed(_))
    ));

    // The machine stays usable.
    vm.reset().unwrap();
    assert_eq!(vm.run_blocking(true).unwrap().ip, 7);
}

#[test]
fn snapshots_during_a_run_are_consistent() {
    // loop: inc rax; inc rbx; jmp loop
    let image = [0x48, 0xFF, 0xC0, 0x48, 0xFF, 0xC3, 0xEB, 0xF8];
    let vm = Vm::with_config(
        &image,
        VmConfig::default().with_run_limit(Some(300_000)),
    )
    .unwrap();

    let run = vm.run(false);
    for _ in 0..200 {
        let ctx = vm.context();
        let (rax, rbx) = (ctx.gpr(Gpr::Rax), ctx.gpr(Gpr::Rbx));
        assert!(rax == rbx || rax == rbx + 1, "torn snapshot: {rax} {rbx}");
        assert!(image.len() as u64 > ctx.rip);
        assert!(vm.shallow_copy().instruction_pointer < image.len() as u64);
    }
    // Breakpoint edits do not wait for the run to finish.
    vm.add_breakpoint(0x100);

    let report = pollster::block_on(run).unwrap();
    assert_eq!(report.stop, StopReason::LimitReached);
    assert_eq!(report.executed, 300_000);
    assert_eq!(register(&vm, "RAX"), 100_000);
    assert_eq!(vm.breakpoints(), vec![0x100]);
}

#[test]
fn disassemble_lists_every_instruction_once() {
    let vm = fibonacci();
    let items = vm.disassemble_all().unwrap();
    // Seven prologue instructions, seven in the loop body, then the trailing nop.
    assert_eq!(items.len(), 15);
    assert!(items.windows(2).all(|pair| pair[0].address < pair[1].address));
    assert_eq!(items[7].address, FIBONACCI_LOOP);
    assert_eq!(items[13].text, "JNE 0x27");
    assert_eq!(items[13].address, 0x3A);
    assert_eq!(items[14].text, "NOP");
    assert_eq!(items[14].address, 0x3C);

    // The listing covers `.main` exactly: from the entry point up to the segment end.
    let ctx = vm.context();
    let main = ctx.memory.segment(MAIN_SEGMENT).unwrap().range;
    assert_eq!(items[0].address, ctx.memory.entry_point());
    assert_eq!(main.start, ctx.memory.entry_point());
    let last = items.last().unwrap();
    let last_len = DecodedInstruction::decode(&FIBONACCI[last.address as usize..], last.address)
        .unwrap()
        .len() as u64;
    assert_eq!(last.address + last_len, main.end);
    assert_eq!(main.end, FIBONACCI.len() as u64);

    let current: Vec<_> = items.iter().filter(|item| item.current).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].address, 0);

    // Disassembling does not touch the live machine.
    assert_eq!(vm.instruction_pointer(), 0);
    assert_eq!(register(&vm, "RAX"), 0);
}

#[test]
fn disassembly_marks_the_paused_instruction() {
    let vm = fibonacci();
    vm.add_breakpoint(FIBONACCI_LOOP);
    vm.run_blocking(false).unwrap();
    let items = vm.disassemble_all().unwrap();
    let current: Vec<_> = items
        .iter()
        .filter(|item| item.current)
        .map(|item| item.address)
        .collect();
    assert_eq!(current, vec![FIBONACCI_LOOP]);
    assert!(items[7].to_string().contains("←RIP"));
}

#[test]
fn stack_base_is_configurable() {
    let vm = Vm::with_config(FIBONACCI, VmConfig::default().with_stack_base(0x1000)).unwrap();
    vm.run_blocking(false).unwrap();
    let memory = vm.memory();
    assert_eq!(memory.get(&(0x1000 - 13)), Some(&1));
    assert_eq!(memory.get(&(0x1000 - 1)), Some(&233));
}

#[test]
fn dropping_a_running_vm_stops_at_an_instruction_boundary() {
    // jmp $
    let vm = Vm::new(&[0xEB, 0xFE]).unwrap();
    let run = vm.run(false);
    // Let the worker enter the endless segment.
    thread::sleep(Duration::from_millis(50));

    let (dropped, wait_dropped) = mpsc::channel();
    thread::spawn(move || {
        drop(vm);
        let _ = dropped.send(());
    });
    wait_dropped
        .recv_timeout(Duration::from_secs(5))
        .expect("dropping the vm did not return");
    assert!(matches!(pollster::block_on(run), Err(VmError::WorkerGone)));
}
