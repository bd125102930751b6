//! Supervisor behavior against scripted children.

use crate::{Process, ProcessConfig, RestartPolicy, RunningProcess};
use hsu_common::{ProcessError, ProcessResult};
use hsu_process::{ChildProcess, ExecutionSpec, ExitWatch, OutputSink, ProcessLauncher};
use hsu_process_state::ProcessState;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// How a scripted child behaves.
#[derive(Debug, Clone, Copy)]
enum Script {
    /// Exits on its own after the delay, code 0 is a clean exit
    Exit { after: Duration, code: i32 },
    /// Runs until interrupted or killed
    UntilSignalled,
    /// Ignores the interrupt, dies on kill
    IgnoresInterrupt,
    /// Ignores every signal
    Unkillable,
    /// Signal delivery always fails
    SignalFails,
    /// Ignores the interrupt, kill delivery fails
    KillFails,
    /// Never gets spawned
    SpawnFails,
}

#[derive(Default)]
struct Counters {
    spawns: AtomicUsize,
    interrupts: AtomicUsize,
    kills: AtomicUsize,
}

impl Counters {
    fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

type Trigger = Arc<Mutex<Option<oneshot::Sender<ProcessResult<()>>>>>;

fn fire(trigger: &Trigger, outcome: ProcessResult<()>) {
    if let Some(tx) = trigger.lock().take() {
        let _ = tx.send(outcome);
    }
}

/// Hands out children following a script; the last entry repeats.
struct ScriptedLauncher {
    scripts: Mutex<VecDeque<Script>>,
    counters: Arc<Counters>,
}

impl ScriptedLauncher {
    fn new(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            counters: Arc::new(Counters::default()),
        })
    }

    fn next_script(&self) -> Script {
        let mut scripts = self.scripts.lock();
        if scripts.len() > 1 {
            scripts.pop_front().unwrap()
        } else {
            *scripts.front().expect("launcher needs at least one script")
        }
    }
}

impl ProcessLauncher for ScriptedLauncher {
    fn spawn(
        &self,
        spec: &ExecutionSpec,
        _stdout: &OutputSink,
        _stderr: &OutputSink,
    ) -> ProcessResult<Box<dyn ChildProcess>> {
        let script = self.next_script();
        let spawns = self.counters.spawns.fetch_add(1, Ordering::SeqCst) + 1;

        if let Script::SpawnFails = script {
            return Err(ProcessError::spawn_failed(&spec.id, "no such file"));
        }

        let (tx, exit) = ExitWatch::channel(&spec.id);
        let trigger: Trigger = Arc::new(Mutex::new(Some(tx)));

        if let Script::Exit { after, code } = script {
            let trigger = Arc::clone(&trigger);
            let id = spec.id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                let outcome = if code == 0 {
                    Ok(())
                } else {
                    Err(ProcessError::crashed(id, code))
                };
                fire(&trigger, outcome);
            });
        }

        Ok(Box::new(ScriptedChild {
            id: spec.id.clone(),
            pid: 1000 + spawns as u32,
            script,
            exit,
            trigger,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct ScriptedChild {
    id: String,
    pid: u32,
    script: Script,
    exit: ExitWatch,
    trigger: Trigger,
    counters: Arc<Counters>,
}

impl ChildProcess for ScriptedChild {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn send_interrupt(&self) -> ProcessResult<()> {
        self.counters.interrupts.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::SignalFails => Err(ProcessError::stop_failed(&self.id, "permission denied")),
            Script::IgnoresInterrupt | Script::Unkillable | Script::KillFails => Ok(()),
            _ => {
                fire(&self.trigger, Err(ProcessError::killed(&self.id, "SIGINT")));
                Ok(())
            }
        }
    }

    fn send_kill(&self) -> ProcessResult<()> {
        self.counters.kills.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::SignalFails | Script::KillFails => {
                Err(ProcessError::stop_failed(&self.id, "permission denied"))
            }
            Script::Unkillable => Ok(()),
            _ => {
                fire(&self.trigger, Err(ProcessError::killed(&self.id, "SIGKILL")));
                Ok(())
            }
        }
    }

    fn exit(&mut self) -> &mut ExitWatch {
        &mut self.exit
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn exits(after: u64, code: i32) -> Script {
    Script::Exit {
        after: ms(after),
        code,
    }
}

/// Config with short timeouts so every path finishes quickly.
fn fast_config(policy: RestartPolicy) -> ProcessConfig {
    ProcessConfig {
        name: Some("worker".to_string()),
        start_timeout: ms(50),
        backoff_timeout: ms(10),
        restart_timeout: ms(10),
        stop_timeout: ms(50),
        kill_timeout: ms(50),
        restart_policy: policy,
        ..ProcessConfig::new("/bin/worker")
    }
}

fn start(config: ProcessConfig, launcher: &Arc<ScriptedLauncher>) -> RunningProcess {
    let launcher: Arc<dyn ProcessLauncher> = launcher.clone();
    Process::new(config)
        .with_launcher(launcher)
        .run(&CancellationToken::new())
}

async fn finish(running: &mut RunningProcess) -> ProcessState {
    tokio::time::timeout(Duration::from_secs(5), running.wait())
        .await
        .expect("supervision should finish")
        .expect("supervision machinery should not fail");
    running.state().expect("a finished run has a state")
}

/// Poll until `condition` holds for the process status.
async fn wait_until(
    running: &RunningProcess,
    what: &str,
    condition: impl Fn(&crate::ProcessStatus) -> bool,
) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition(&running.status()) {
            tokio::time::sleep(ms(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "never reached {}, stuck in {:?}", what, running.state());
}

async fn wait_for_state(running: &RunningProcess, state: ProcessState) {
    wait_until(running, state.as_str(), |status| status.state() == Some(state)).await;
}

#[tokio::test]
async fn test_clean_exit_without_policy_stops() {
    let launcher = ScriptedLauncher::new([exits(10, 0)]);
    let mut running = start(fast_config(RestartPolicy::Never), &launcher);

    assert_eq!(finish(&mut running).await, ProcessState::Stopped);

    let status = running.status();
    assert_eq!(status.last_error, None);
    assert_eq!(status.start_attempt, 0);
    assert_eq!(status.restart_count, 0);
    assert_eq!(status.pid, None);
    assert_eq!(launcher.counters.spawns(), 1);
}

#[tokio::test]
async fn test_crash_without_policy_keeps_exit_error() {
    let launcher = ScriptedLauncher::new([exits(10, 3)]);
    let mut running = start(fast_config(RestartPolicy::Never), &launcher);

    assert_eq!(finish(&mut running).await, ProcessState::Stopped);
    assert_eq!(
        running.status().last_error,
        Some(ProcessError::crashed("worker", 3))
    );
    assert_eq!(launcher.counters.spawns(), 1);
}

#[tokio::test]
async fn test_on_failure_retries_until_clean_exit() {
    let launcher = ScriptedLauncher::new([exits(5, 1), exits(5, 0)]);
    let mut running = start(fast_config(RestartPolicy::OnFailure), &launcher);

    assert_eq!(finish(&mut running).await, ProcessState::Stopped);

    let status = running.status();
    assert_eq!(status.last_error, None);
    assert_eq!(status.start_attempt, 1);
    assert_eq!(launcher.counters.spawns(), 2);
    assert_eq!(
        status.transitions().count_transitions_to(ProcessState::Backoff),
        1
    );
}

#[tokio::test]
async fn test_always_stops_after_max_restarts_of_clean_runs() {
    // Each run outlives the start timeout, so exits go through restarting
    let launcher = ScriptedLauncher::new([exits(150, 0)]);
    let config = ProcessConfig {
        max_restarts: 3,
        ..fast_config(RestartPolicy::Always)
    };
    let mut running = start(config, &launcher);

    assert_eq!(finish(&mut running).await, ProcessState::Stopped);

    let status = running.status();
    assert_eq!(status.restart_count, 3);
    assert_eq!(status.last_error, None);
    assert_eq!(launcher.counters.spawns(), 3);
    assert_eq!(
        status.transitions().count_transitions_to(ProcessState::Running),
        3
    );
}

#[tokio::test]
async fn test_always_fails_after_max_restarts_of_crashing_runs() {
    let launcher = ScriptedLauncher::new([exits(150, 2)]);
    let config = ProcessConfig {
        max_restarts: 2,
        ..fast_config(RestartPolicy::Always)
    };
    let mut running = start(config, &launcher);

    assert_eq!(finish(&mut running).await, ProcessState::Failed);

    let status = running.status();
    assert_eq!(status.restart_count, 2);
    assert_eq!(
        status.last_error,
        Some(ProcessError::restarts_exhausted(
            "worker",
            2,
            Some(&ProcessError::crashed("worker", 2))
        ))
    );
}

#[tokio::test]
async fn test_backoff_gives_up_after_max_start_attempts() {
    let launcher = ScriptedLauncher::new([exits(5, 1)]);
    let config = ProcessConfig {
        max_start_attempts: 3,
        ..fast_config(RestartPolicy::Always)
    };
    let mut running = start(config, &launcher);

    assert_eq!(finish(&mut running).await, ProcessState::Failed);

    let status = running.status();
    assert_eq!(status.start_attempt, 3);
    assert_eq!(launcher.counters.spawns(), 3);
    let err = status.last_error.expect("failed run has an error");
    assert!(err.to_string().contains("maximum start attempts reached"));
    assert!(err.to_string().contains("exit code 1"));
}

#[tokio::test]
async fn test_surviving_start_timeout_resets_attempts() {
    let launcher = ScriptedLauncher::new([exits(5, 1), exits(5, 1), Script::UntilSignalled]);
    let config = ProcessConfig {
        max_start_attempts: 5,
        ..fast_config(RestartPolicy::Always)
    };
    let running = start(config, &launcher);

    wait_for_state(&running, ProcessState::Running).await;
    let status = running.status();
    assert_eq!(status.start_attempt, 0);
    assert_eq!(status.last_error, None);
    assert_eq!(status.pid, Some(1003));
}

#[tokio::test]
async fn test_spawn_failure_is_never_restarted() {
    let launcher = ScriptedLauncher::new([Script::SpawnFails]);
    let mut running = start(fast_config(RestartPolicy::Always), &launcher);

    assert_eq!(finish(&mut running).await, ProcessState::Failed);
    assert!(matches!(
        running.status().last_error,
        Some(ProcessError::SpawnFailed { .. })
    ));
    assert_eq!(launcher.counters.spawns(), 1);
}

#[tokio::test]
async fn test_malformed_env_fails_before_spawn() {
    let launcher = ScriptedLauncher::new([Script::UntilSignalled]);
    let config = ProcessConfig {
        env: vec!["MISSING_VALUE".to_string()],
        ..fast_config(RestartPolicy::Always)
    };
    let mut running = start(config, &launcher);

    assert_eq!(finish(&mut running).await, ProcessState::Failed);
    assert!(matches!(
        running.status().last_error,
        Some(ProcessError::Configuration { .. })
    ));
    assert_eq!(launcher.counters.spawns(), 0);
}

#[tokio::test]
async fn test_stop_interrupts_running_child_once() {
    let launcher = ScriptedLauncher::new([Script::UntilSignalled]);
    let mut running = start(fast_config(RestartPolicy::Always), &launcher);
    wait_for_state(&running, ProcessState::Running).await;

    let handle = running.stop_handle();
    running.stop();
    handle.stop();
    running.stop();
    assert!(handle.is_stop_requested());

    assert_eq!(finish(&mut running).await, ProcessState::Stopped);
    assert_eq!(launcher.counters.interrupts(), 1);
    assert_eq!(launcher.counters.kills(), 0);
    assert_eq!(
        running.status().last_error,
        Some(ProcessError::killed("worker", "SIGINT"))
    );
}

#[tokio::test]
async fn test_stop_during_start_window() {
    let launcher = ScriptedLauncher::new([Script::UntilSignalled]);
    let config = ProcessConfig {
        start_timeout: Duration::from_secs(10),
        ..fast_config(RestartPolicy::Never)
    };
    let mut running = start(config, &launcher);
    wait_for_state(&running, ProcessState::Starting).await;

    running.stop();

    assert_eq!(finish(&mut running).await, ProcessState::Stopped);
    assert_eq!(launcher.counters.interrupts(), 1);
    assert_eq!(
        running.status().transitions().count_transitions_to(ProcessState::Running),
        0
    );
}

#[tokio::test]
async fn test_parent_cancellation_stops_process() {
    let launcher = ScriptedLauncher::new([Script::UntilSignalled]);
    let launcher_dyn: Arc<dyn ProcessLauncher> = launcher.clone();
    let parent = CancellationToken::new();
    let mut running = Process::new(fast_config(RestartPolicy::Always))
        .with_launcher(launcher_dyn)
        .run(&parent);
    wait_for_state(&running, ProcessState::Running).await;

    parent.cancel();

    assert_eq!(finish(&mut running).await, ProcessState::Stopped);
    assert_eq!(launcher.counters.interrupts(), 1);
}

#[tokio::test]
async fn test_stop_escalates_to_kill() {
    let launcher = ScriptedLauncher::new([Script::IgnoresInterrupt]);
    let mut running = start(fast_config(RestartPolicy::Never), &launcher);
    wait_for_state(&running, ProcessState::Running).await;

    running.stop();

    assert_eq!(finish(&mut running).await, ProcessState::Stopped);
    assert_eq!(launcher.counters.interrupts(), 1);
    assert_eq!(launcher.counters.kills(), 1);
    assert_eq!(
        running.status().last_error,
        Some(ProcessError::killed("worker", "SIGKILL"))
    );
}

#[tokio::test]
async fn test_unkillable_child_fails() {
    let launcher = ScriptedLauncher::new([Script::Unkillable]);
    let mut running = start(fast_config(RestartPolicy::Never), &launcher);
    wait_for_state(&running, ProcessState::Running).await;

    running.stop();

    assert_eq!(finish(&mut running).await, ProcessState::Failed);
    let status = running.status();
    assert_eq!(
        status.last_error,
        Some(ProcessError::unkillable("worker", ms(50)))
    );
    assert!(status
        .last_error
        .as_ref()
        .map_or(false, |e| e.to_string().contains("failed to kill process")));
    assert_eq!(
        status.transitions().count_transitions_to(ProcessState::Killing),
        1
    );
}

#[tokio::test]
async fn test_interrupt_failure_fails() {
    let launcher = ScriptedLauncher::new([Script::SignalFails]);
    let mut running = start(fast_config(RestartPolicy::Never), &launcher);
    wait_for_state(&running, ProcessState::Running).await;

    running.stop();

    assert_eq!(finish(&mut running).await, ProcessState::Failed);
    assert!(matches!(
        running.status().last_error,
        Some(ProcessError::StopFailed { .. })
    ));
    assert_eq!(launcher.counters.kills(), 0);
}

#[tokio::test]
async fn test_kill_failure_fails() {
    let launcher = ScriptedLauncher::new([Script::KillFails]);
    let mut running = start(fast_config(RestartPolicy::Never), &launcher);
    wait_for_state(&running, ProcessState::Running).await;

    running.stop();

    assert_eq!(finish(&mut running).await, ProcessState::Failed);
    let status = running.status();
    assert_eq!(
        status.last_error,
        Some(ProcessError::stop_failed("worker", "permission denied"))
    );
    assert_eq!(launcher.counters.interrupts(), 1);
    assert_eq!(launcher.counters.kills(), 1);
    assert_eq!(
        status.transitions().count_transitions_to(ProcessState::Killing),
        1
    );
}

#[tokio::test]
async fn test_cancel_during_backoff_fails_on_finished_child() {
    let launcher = ScriptedLauncher::new([exits(5, 1)]);
    let config = ProcessConfig {
        backoff_timeout: Duration::from_secs(30),
        ..fast_config(RestartPolicy::Always)
    };
    let mut running = start(config, &launcher);
    wait_for_state(&running, ProcessState::Backoff).await;

    running.stop();

    assert_eq!(finish(&mut running).await, ProcessState::Failed);
    assert_eq!(launcher.counters.interrupts(), 0);
    assert_eq!(launcher.counters.spawns(), 1);
    assert_eq!(
        running.status().last_error,
        Some(ProcessError::stop_failed("worker", "process already finished"))
    );
}

#[tokio::test]
async fn test_cancel_during_restart_delay_fails_on_finished_child() {
    let launcher = ScriptedLauncher::new([exits(150, 0)]);
    let config = ProcessConfig {
        restart_timeout: Duration::from_secs(30),
        ..fast_config(RestartPolicy::Always)
    };
    let mut running = start(config, &launcher);
    wait_for_state(&running, ProcessState::Restarting).await;

    running.stop();

    assert_eq!(finish(&mut running).await, ProcessState::Failed);
    let status = running.status();
    assert_eq!(launcher.counters.interrupts(), 0);
    assert_eq!(status.restart_count, 1);
    assert!(matches!(
        status.last_error,
        Some(ProcessError::StopFailed { ref reason, .. }) if reason == "process already finished"
    ));
}

#[tokio::test]
async fn test_history_follows_transition_table() {
    let launcher = ScriptedLauncher::new([exits(5, 1), exits(150, 0), Script::IgnoresInterrupt]);
    let mut running = start(fast_config(RestartPolicy::Always), &launcher);

    // backoff, then a run that restarts, then a run that needs a kill
    wait_until(&running, "third run", |status| {
        status.state() == Some(ProcessState::Running) && status.restart_count == 1
    })
    .await;
    running.stop();
    assert_eq!(finish(&mut running).await, ProcessState::Stopped);

    let status = running.status();
    let history: Vec<_> = status.transitions().history().cloned().collect();
    assert_eq!(history[0].from, None);
    assert_eq!(history[0].to, ProcessState::Starting);
    for transition in &history[1..] {
        let from = transition.from.expect("only the first transition has no origin");
        assert!(from.can_transition_to(transition.to), "{} -> {}", from, transition.to);
    }

    let states: Vec<_> = history.iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![
            ProcessState::Starting,
            ProcessState::Backoff,
            ProcessState::Starting,
            ProcessState::Running,
            ProcessState::Restarting,
            ProcessState::Starting,
            ProcessState::Running,
            ProcessState::Stopping,
            ProcessState::Killing,
            ProcessState::Stopped,
        ]
    );
}

#[tokio::test]
async fn test_result_is_delivered_once() {
    let launcher = ScriptedLauncher::new([exits(5, 0)]);
    let mut running = start(fast_config(RestartPolicy::Never), &launcher);

    assert_eq!(finish(&mut running).await, ProcessState::Stopped);
    assert_eq!(
        running.wait().await,
        Err(ProcessError::completion_channel_closed("worker"))
    );
}

#[tokio::test]
async fn test_supervisor_log_lines_reach_stderr_sink() {
    let launcher = ScriptedLauncher::new([exits(5, 4)]);
    let launcher_dyn: Arc<dyn ProcessLauncher> = launcher.clone();
    let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));
    let mut running = Process::new(fast_config(RestartPolicy::Never))
        .with_launcher(launcher_dyn)
        .with_stderr(OutputSink::writer(buffer.clone()))
        .run(&CancellationToken::new());

    assert_eq!(finish(&mut running).await, ProcessState::Stopped);

    let log = String::from_utf8_lossy(&buffer.lock()).to_string();
    let lines: Vec<_> = log.lines().collect();
    assert_eq!(lines.len(), 3, "{}", log);
    assert!(lines[0].ends_with("/bin/worker starting"));
    assert!(lines[1].contains("/bin/worker finished with error"));
    assert!(lines[2].ends_with("/bin/worker stopped"));
}

#[tokio::test]
async fn test_snapshot_reports_normalized_config() {
    let launcher = ScriptedLauncher::new([Script::UntilSignalled]);
    let config = ProcessConfig {
        name: Some("worker".to_string()),
        ..ProcessConfig::new("/bin/worker")
    };
    let mut running = start(config, &launcher);
    wait_until(&running, "spawned child", |status| status.pid.is_some()).await;

    let value = serde_json::to_value(running.snapshot()).unwrap();
    assert_eq!(value["cmd"], "/bin/worker");
    assert_eq!(value["startTimeout"], 1000);
    assert_eq!(value["stopTimeout"], 20000);
    assert_eq!(value["restartTimeout"], 100);
    assert_eq!(value["state"], "starting");
    assert_eq!(value["pid"], 1001);

    running.stop();
    assert_eq!(finish(&mut running).await, ProcessState::Stopped);
}
