//! The background worker and its request/response correlation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use wasmbox_runtime::{
    ApiOptions, AssemblyOptions, BufferedOutput, DrawCommand, MemoryLoader, Recorded,
    RecordingSurface, RouterError, Vasm6502Options, WorkerApi,
};

use common::{archive, loader, plain, CRT1};

/// Spins for a while before exiting cleanly.
const SLOW: &str = r#"
(module
  (import "wasi_unstable" "proc_exit" (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  (func (export "_start")
    (local $i i32)
    (loop $spin
      (local.set $i (i32.add (local.get $i) (i32.const 1)))
      (br_if $spin (i32.lt_u (local.get $i) (i32.const 300000000))))
    (call $proc_exit (i32.const 0))))
"#;

fn spawn(options: ApiOptions, loader: MemoryLoader) -> (WorkerApi, BufferedOutput) {
    let output = BufferedOutput::new();
    let worker = WorkerApi::spawn(options, Box::new(loader), Arc::new(output.clone())).unwrap();
    (worker, output)
}

#[tokio::test]
async fn correlated_calls_resolve_with_stage_output() {
    let (worker, output) = spawn(ApiOptions::default(), loader());
    worker.ready().await.unwrap();
    assert!(plain(&output.take()).contains("> Untarring sysroot.tar... done."));

    let asm = worker
        .compile_to_assembly(AssemblyOptions::new("test.cc", "test.S", "int main(){return 0;}"))
        .await
        .unwrap();
    assert_eq!(asm.as_deref(), Some(&b"main:\n\txor eax, eax\n\tret\n"[..]));

    let bin = worker
        .compile_to_6502(Vasm6502Options::new("a.s", "a.bin", "rts\n"))
        .await
        .unwrap();
    assert_eq!(bin, Some(vec![0xa9, 0x00, 0x60]));
    assert_eq!(worker.pending(), 0);

    let text = plain(&output.take());
    assert!(text.contains("> clang -cc1 -S"), "{text}");
    assert!(text.contains("> vasm6502_oldstyle -o a.bin a.s\n"), "{text}");
}

#[tokio::test]
async fn failed_stage_responds_without_payload() {
    let options = ApiOptions {
        vasm: "vasm-missing".to_string(),
        ..ApiOptions::default()
    };
    let (worker, output) = spawn(options, loader());

    let bin = worker
        .compile_to_6502(Vasm6502Options::new("a.s", "a.bin", ""))
        .await
        .unwrap();
    assert_eq!(bin, None);
    assert!(plain(&output.contents()).contains("Error: failed to load resource `vasm-missing`"));
}

#[tokio::test]
async fn startup_failure_is_reported_to_every_caller() {
    let (worker, output) = spawn(ApiOptions::default(), MemoryLoader::new());

    assert!(matches!(worker.ready().await, Err(RouterError::Startup(_))));
    let result = worker
        .compile_to_assembly(AssemblyOptions::new("test.cc", "test.S", ""))
        .await;
    assert!(matches!(result, Err(RouterError::Startup(_))));
    assert!(plain(&output.contents()).contains("failed to load resource `memfs`"));
}

#[tokio::test]
async fn slow_requests_time_out_and_free_their_slot() {
    let options = ApiOptions {
        request_timeout_ms: Some(20),
        ..ApiOptions::default()
    };
    let (worker, _) = spawn(options, loader().with("vasm6502_oldstyle", SLOW));
    worker.ready().await.unwrap();

    let result = worker
        .compile_to_6502(Vasm6502Options::new("a.s", "a.bin", ""))
        .await;
    assert!(matches!(result, Err(RouterError::Timeout { id: 0 })), "{result:?}");
    assert_eq!(worker.pending(), 0);
}

#[tokio::test]
async fn terminated_worker_disconnects_callers() {
    let (worker, _) = spawn(ApiOptions::default(), loader());
    worker.ready().await.unwrap();
    worker.terminate().unwrap();

    let result = worker
        .compile_to_assembly(AssemblyOptions::new("test.cc", "test.S", ""))
        .await;
    assert!(matches!(result, Err(RouterError::Disconnected)), "{result:?}");
    assert_eq!(worker.pending(), 0);
}

#[tokio::test]
async fn compile_link_run_animates_the_posted_canvas() {
    let sysroot = archive(&[
        ("lib/", &b""[..]),
        ("lib/crt1.o", &CRT1[..]),
        ("program", common::CANVAS.as_bytes()),
    ]);
    let options = ApiOptions {
        frame_interval_ms: 1,
        ..ApiOptions::default()
    };
    let (worker, output) = spawn(options, loader().with("sysroot.tar", sysroot));

    let surface = RecordingSurface::new();
    worker.post_canvas(Box::new(surface.clone())).unwrap();
    worker.set_show_timing(true).unwrap();
    worker.compile_link_run("int main(){}").unwrap();

    let frames = || {
        surface
            .recorded()
            .iter()
            .filter(|entry| matches!(entry, Recorded::Draw(DrawCommand::FillRect { .. })))
            .count()
    };
    for _ in 0..500 {
        if frames() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(frames(), 3);
    assert_eq!(
        surface.recorded().first(),
        Some(&Recorded::Draw(DrawCommand::SetWidth(320)))
    );

    let text = plain(&output.contents());
    assert!(text.contains("> test.wasm\n"), "{text}");
    assert!(text.contains("Compiling test.wasm... done. ("), "{text}");
    assert!(!text.contains("Error"), "{text}");
}

#[tokio::test]
async fn frames_keep_their_schedule_under_a_stream_of_requests() {
    let sysroot = archive(&[
        ("lib/", &b""[..]),
        ("lib/crt1.o", &CRT1[..]),
        ("program", common::SPINNER.as_bytes()),
    ]);
    let options = ApiOptions {
        frame_interval_ms: 20,
        ..ApiOptions::default()
    };
    let (worker, _) = spawn(options, loader().with("sysroot.tar", sysroot));

    let surface = RecordingSurface::new();
    worker.post_canvas(Box::new(surface.clone())).unwrap();
    worker.compile_link_run("int main(){}").unwrap();
    // Served after the run, so the program is animating from here on.
    worker
        .compile_to_assembly(AssemblyOptions::new("test.cc", "test.S", ""))
        .await
        .unwrap();

    let frames = || {
        surface
            .recorded()
            .iter()
            .filter(|entry| matches!(entry, Recorded::Draw(DrawCommand::FillRect { .. })))
            .count()
    };
    let before = frames();
    // Each request arrives well within one frame interval of the last.
    for _ in 0..200 {
        worker.set_stdin("tick").unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let delivered = frames() - before;
    assert!(delivered >= 3, "only {delivered} frames delivered");
}

#[tokio::test]
async fn stdin_can_be_replaced_remotely() {
    let sysroot = archive(&[("program", common::ECHO.as_bytes())]);
    let (worker, output) = spawn(ApiOptions::default(), loader().with("sysroot.tar", sysroot));
    worker.ready().await.unwrap();

    worker.set_stdin("ping").unwrap();
    worker.compile_link_run("int main(){}").unwrap();

    // Correlated calls are served after the run, so the echo is complete.
    worker
        .compile_to_assembly(AssemblyOptions::new("test.cc", "test.S", ""))
        .await
        .unwrap();
    assert!(plain(&output.contents()).contains("> test.wasm\nping\n"));
}
