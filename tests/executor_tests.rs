use batch_lite::worker::{execute_command, CommandWork, Work};
use batch_lite::{JobArgs, WorkError};
use serde_json::Value;

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

#[tokio::test]
async fn test_execute_simple_command() {
    let output = execute_command(&sh("echo hello"), None, false).await.unwrap();

    assert_eq!(output.exit_code, Some(0));
    assert_eq!(output.stdout, Some("hello\n".to_string()));
    assert!(output.stderr.is_none());
}

#[tokio::test]
async fn test_execute_empty_output() {
    // Command that produces no output
    let output = execute_command(&sh("true"), None, false).await.unwrap();

    assert_eq!(output.exit_code, Some(0));
    assert!(output.stdout.is_none()); // Empty output should be None
}

#[tokio::test]
async fn test_execute_large_output() {
    let output = execute_command(&sh("seq 1 1000"), None, false).await.unwrap();

    let stdout = output.stdout.unwrap();
    assert_eq!(stdout.lines().count(), 1000);
}

#[tokio::test]
async fn test_execute_command_failure() {
    let err = execute_command(&sh("exit 1"), None, false)
        .await
        .unwrap_err();

    match err {
        WorkError::NonZeroExit { program, code, detail } => {
            assert_eq!(program, "sh");
            assert_eq!(code, Some(1));
            assert_eq!(detail, "Exit code: Some(1)");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_execute_command_with_stderr() {
    // Command that writes to stderr and fails
    let err = execute_command(&sh("echo 'error message' >&2 && exit 1"), None, false)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("error message"));
}

#[tokio::test]
async fn test_execute_invalid_command() {
    let argv = vec!["nonexistent_command_12345".to_string()];
    let err = execute_command(&argv, None, false).await.unwrap_err();

    assert!(matches!(err, WorkError::Spawn { .. }));
}

#[tokio::test]
async fn test_execute_empty_command_line() {
    let err = execute_command(&[], None, false).await.unwrap_err();
    assert!(matches!(err, WorkError::InvalidArguments(_)));
}

#[tokio::test]
async fn test_execute_in_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "found").unwrap();

    let output = execute_command(&sh("cat marker.txt"), Some(dir.path()), false)
        .await
        .unwrap();

    assert_eq!(output.stdout, Some("found".to_string()));
}

#[tokio::test]
async fn test_direct_io_does_not_capture() {
    let output = execute_command(&sh("echo streamed"), None, true)
        .await
        .unwrap();

    assert_eq!(output.exit_code, Some(0));
    assert!(output.stdout.is_none());
    assert!(output.stderr.is_none());
}

#[tokio::test]
async fn test_direct_io_failure() {
    let err = execute_command(&sh("echo 'progress'; exit 4"), None, true)
        .await
        .unwrap_err();

    assert!(matches!(err, WorkError::NonZeroExit { code: Some(4), .. }));
}

#[tokio::test]
async fn test_command_work_appends_job_arguments() {
    let work = CommandWork::new(["echo", "layout"]);
    assert_eq!(work.name(), "echo");

    let value = work
        .call(JobArgs::from_positional(["graph.dot"]).with_arg(2))
        .await
        .unwrap();

    assert_eq!(value["stdout"], Value::from("layout graph.dot 2\n"));
    assert_eq!(value["exit_code"], Value::from(0));
}

#[tokio::test]
async fn test_command_work_builder() {
    let dir = tempfile::tempdir().unwrap();
    let work = CommandWork::new(["/usr/bin/env", "pwd"])
        .current_dir(dir.path())
        .direct_io(true)
        .with_name("where-am-i");

    assert_eq!(work.name(), "where-am-i");
    assert_eq!(work.argv(), ["/usr/bin/env", "pwd"]);
    assert_eq!(work.cwd(), Some(dir.path()));
    assert!(work.is_direct_io());

    let buffered = CommandWork::new(["/usr/bin/env", "pwd"]).current_dir(dir.path());
    assert_eq!(buffered.name(), "env");
    let output = buffered.run().await.unwrap();
    let printed = output.stdout.unwrap();
    let expected = dir.path().canonicalize().unwrap();
    assert_eq!(
        std::path::Path::new(printed.trim()).canonicalize().unwrap(),
        expected
    );
}

#[tokio::test]
async fn test_execute_piped_commands() {
    let output = execute_command(&sh("echo 'hello world' | wc -w"), None, false)
        .await
        .unwrap();

    // Output should be "2" (word count)
    assert_eq!(output.stdout.unwrap().trim(), "2");
}
