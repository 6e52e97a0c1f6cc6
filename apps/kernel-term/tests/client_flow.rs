mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use kernel_term_core::error::InvalidState;
use kernel_term_core::input::KeyEffect;
use kernel_term_core::service::{ExecuteChunk, SessionConfig};
use kernel_term_core::sink::{MemorySink, RenderTarget};
use kernel_term_core::{KernelClient, KernelError};
use support::{ScriptedKernel, wait_for_screen};
use tokio::sync::Notify;

async fn active_client(kernel: Arc<ScriptedKernel>) -> (KernelClient, MemorySink, String) {
    let sink = MemorySink::new();
    let mut client = KernelClient::new(kernel, RenderTarget::new(sink.clone()));
    let session = client
        .create_session(&SessionConfig::new("bash"))
        .await
        .unwrap();
    client.activate(&session.id).await.unwrap();
    (client, sink, session.id)
}

#[test_timeout::tokio_timeout_test(10)]
async fn typed_command_is_echoed_locally_and_remote_echo_dropped() {
    let kernel = Arc::new(ScriptedKernel::new());
    kernel.echo_input.store(true, Ordering::SeqCst);
    let (mut client, sink, id) = active_client(kernel.clone()).await;

    let effects = client.handle_input("ls\r").await.unwrap();
    assert_eq!(
        effects,
        vec![
            KeyEffect::Echo('l'),
            KeyEffect::Echo('s'),
            KeyEffect::Commit("ls\n".into())
        ]
    );
    assert_eq!(kernel.inputs(), vec![(id.clone(), "ls\n".to_string())]);

    kernel.push(&id, "file.txt\n");
    wait_for_screen(&sink, |screen| screen.contains("file.txt")).await;
    assert_eq!(sink.screen(), "ls\r\nfile.txt\n");
    assert!(client.input().is_empty());
}

#[test_timeout::tokio_timeout_test(10)]
async fn backspace_edits_before_commit() {
    let kernel = Arc::new(ScriptedKernel::new());
    let (mut client, sink, id) = active_client(kernel.clone()).await;

    client.handle_input("lx\u{7f}s\r").await.unwrap();

    assert_eq!(kernel.inputs(), vec![(id, "ls\n".to_string())]);
    assert_eq!(sink.screen(), "lx\u{8} \u{8}s\r\n");
}

#[test_timeout::tokio_timeout_test(10)]
async fn interrupt_renders_glyph_and_keeps_the_line() {
    let kernel = Arc::new(ScriptedKernel::new());
    let (mut client, sink, _id) = active_client(kernel.clone()).await;

    client.handle_input("sleep\u{3}").await.unwrap();

    assert!(kernel.inputs().is_empty());
    assert_eq!(client.input().as_str(), "sleep");
    assert!(sink.screen().ends_with("sleep^C"));
}

#[test_timeout::tokio_timeout_test(10)]
async fn commit_without_active_session_is_rejected() {
    let kernel = Arc::new(ScriptedKernel::new());
    let mut client = KernelClient::new(kernel.clone(), RenderTarget::new(MemorySink::new()));

    let err = client.handle_input("ls\r").await.unwrap_err();
    assert_eq!(err, KernelError::InvalidState(InvalidState::NoActiveSession));
    assert!(kernel.inputs().is_empty());
}

#[test_timeout::tokio_timeout_test(10)]
async fn switching_sessions_discards_the_partial_line() {
    let kernel = Arc::new(ScriptedKernel::new());
    let (mut client, _sink, _id) = active_client(kernel.clone()).await;

    client.handle_input("half").await.unwrap();
    client.activate("other").await.unwrap();
    assert!(client.input().is_empty());

    client.handle_input("pwd\r").await.unwrap();
    assert_eq!(kernel.inputs(), vec![("other".to_string(), "pwd\n".to_string())]);
}

#[test_timeout::tokio_timeout_test(10)]
async fn execute_renders_output_then_exit_code() {
    let kernel = Arc::new(ScriptedKernel::new());
    *kernel.exec_chunks.lock() = vec![
        ExecuteChunk::data("hello\n"),
        ExecuteChunk::exit("", 3),
    ];
    let (client, sink, _id) = active_client(kernel.clone()).await;
    sink.clear_log();

    let code = client.execute("echo hello").await.unwrap().finish().await.unwrap();

    assert_eq!(code, Some(3));
    assert_eq!(sink.screen(), "hello\n");
    assert_eq!(sink.exit_code(), Some(3));
    assert!(!client.target().is_interactive_suspended());
}

#[test_timeout::tokio_timeout_test(10)]
async fn concurrent_execute_is_rejected() {
    let gate = Arc::new(Notify::new());
    let kernel = Arc::new(ScriptedKernel::with_exec_gate(gate.clone()));
    *kernel.exec_chunks.lock() = vec![ExecuteChunk::exit("done\n", 0)];
    let (client, sink, id) = active_client(kernel.clone()).await;

    let run = client.execute("sleep 1").await.unwrap();
    let err = client.execute("ls").await.err().unwrap();
    assert_eq!(
        err,
        KernelError::InvalidState(InvalidState::ExecutionInFlight { session_id: id })
    );

    // Interactive output is parked while the run owns the sink.
    kernel.push(&client.active().unwrap(), "later");
    tokio::task::yield_now().await;

    gate.notify_one();
    assert_eq!(run.finish().await.unwrap(), Some(0));
    wait_for_screen(&sink, |screen| screen.ends_with("later")).await;
    assert_eq!(sink.screen(), "done\nlater");

    // The slot is free again.
    client.execute("ls").await.unwrap();
}

#[test_timeout::tokio_timeout_test(10)]
async fn output_parked_during_execute_does_not_survive_a_switch() {
    let gate = Arc::new(Notify::new());
    let kernel = Arc::new(ScriptedKernel::with_exec_gate(gate.clone()));
    *kernel.exec_chunks.lock() = vec![ExecuteChunk::exit("done\n", 0)];
    let (mut client, sink, first) = active_client(kernel.clone()).await;

    let run = client.execute("sleep 1").await.unwrap();
    kernel.push(&first, "stale-from-first;");
    // Let the pump park the chunk in the backlog.
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.activate("second").await.unwrap();
    gate.notify_one();
    assert_eq!(run.finish().await.unwrap(), Some(0));

    kernel.push("second", "fresh;");
    wait_for_screen(&sink, |screen| screen.ends_with("fresh;")).await;
    assert_eq!(sink.screen(), "done\nfresh;");
}

#[test_timeout::tokio_timeout_test(10)]
async fn text_held_for_an_unfinished_echo_is_shown_on_next_commit() {
    let kernel = Arc::new(ScriptedKernel::new());
    let (mut client, sink, id) = active_client(kernel.clone()).await;

    client.handle_input("exit\r").await.unwrap();
    kernel.push(&id, "e");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(sink.screen(), "exit\r\n");

    client.handle_input("ls\r").await.unwrap();
    assert_eq!(sink.screen(), "exit\r\nls\r\ne");
}
