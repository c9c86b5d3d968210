//! The engine loop: a strictly sequential command interpreter.
//!
//! The loop owns the build engine and executes a short work-list of steps.
//! Handling a unit of work schedules its execution followed by a cleanup
//! step, and the cleanup step re-arms the loop; both the success and the
//! failure path end with the loop back in `HandleNextServerRequest`, so it
//! can never stall with work pending.
//!
//! State machine: Booting (initial load) → Idle (blocked in
//! `take_next_work`) → Running (command in flight) → back to Idle on
//! success or failure, publishing the post-command build state each time;
//! Idle → Exiting on end-of-work.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::build::{BuildEngine, BuildState, CommandError, ResolvedKey};
use crate::cancel::{CancelToken, LastCommandCell};
use crate::messages::{Event, LogLevel};
use crate::state::{BuildStateCell, ServerState, ServerStateCell};
use crate::work::{CommandExecution, Work, WorkSource};

/// One step of the engine's work-list.
#[derive(Debug)]
enum Step {
    /// Initial load: publish the first build state and announce it.
    SendReadyForRequests,

    /// Pull the next unit of work and schedule its execution.
    HandleNextServerRequest,

    /// Run one command against the engine.
    RunCommand {
        execution: CommandExecution,
        cancel: CancelToken,
    },

    /// Publish the post-command state, notify listeners, re-arm the loop.
    PostCommandCleanup,
}

/// Outcome of the most recent command, consumed by the cleanup step.
struct CompletedRun<S> {
    work_id: u64,
    state: Arc<S>,
    succeeded: bool,
}

/// The engine-side half of the dispatcher.
pub struct EngineLoop<E: BuildEngine> {
    engine: E,
    source: WorkSource,
    build_state: Arc<BuildStateCell<E::State>>,
    server_state: Arc<ServerStateCell>,
    last_command: LastCommandCell,
    completed: Option<CompletedRun<E::State>>,
}

impl<E: BuildEngine> EngineLoop<E> {
    pub fn new(
        engine: E,
        source: WorkSource,
        build_state: Arc<BuildStateCell<E::State>>,
        server_state: Arc<ServerStateCell>,
        last_command: LastCommandCell,
    ) -> Self {
        EngineLoop {
            engine,
            source,
            build_state,
            server_state,
            last_command,
            completed: None,
        }
    }

    /// Run the command loop to completion.
    ///
    /// Blocking; drive this from a dedicated thread. Returns once the work
    /// queue signals end-of-work, or with the error that aborted the
    /// initial load.
    pub fn run(mut self) -> Result<(), CommandError> {
        let mut steps = VecDeque::from([Step::SendReadyForRequests]);

        while let Some(step) = steps.pop_front() {
            match step {
                Step::SendReadyForRequests => {
                    let state = self.engine.load()?;
                    self.build_state.publish(state);
                    self.server_state
                        .snapshot()
                        .notify_event_listeners(Event::BuildLoaded);
                    info!("build loaded; serving execution requests");
                    steps.push_back(Step::HandleNextServerRequest);
                }

                Step::HandleNextServerRequest => {
                    let (server, work) = self.source.take_next_work();
                    match work {
                        Work::EndOfWork => {
                            info!("end of work; engine loop exiting");
                            break;
                        }
                        Work::CommandExecution(execution) => {
                            let cancel = CancelToken::new();
                            self.last_command.set(execution.id, cancel.clone());
                            server.notify_event_listeners(Event::log(
                                LogLevel::Info,
                                format!("running `{}` (work {})", execution.command, execution.id),
                            ));
                            steps.push_front(Step::PostCommandCleanup);
                            steps.push_front(Step::RunCommand { execution, cancel });
                        }
                    }
                }

                Step::RunCommand { execution, cancel } => {
                    let CommandExecution { id, command, .. } = execution;
                    debug!(work_id = id, command = %command, "executing");
                    match self.engine.run_command(&command, &cancel) {
                        Ok(state) => {
                            self.completed = Some(CompletedRun {
                                work_id: id,
                                state,
                                succeeded: true,
                            });
                        }
                        Err(err) => {
                            // Failure path: the cancel handle is done, the
                            // listeners hear about the failure, and whatever
                            // was scheduled after the command is dropped.
                            // Cleanup still runs so the loop re-arms.
                            error!(work_id = id, error = %err, "command failed");
                            cancel.finish();
                            self.server_state
                                .snapshot()
                                .notify_event_listeners(Event::ExecutionFailure { id });
                            self.last_command.clear();
                            self.completed = Some(CompletedRun {
                                work_id: id,
                                state: self.engine.current_state(),
                                succeeded: false,
                            });
                            steps.clear();
                            steps.push_back(Step::PostCommandCleanup);
                        }
                    }
                }

                Step::PostCommandCleanup => {
                    if let Some(run) = self.completed.take() {
                        let previous = self.build_state.snapshot();
                        self.build_state.publish(run.state.clone());

                        if run.succeeded {
                            let server = self.server_state.snapshot();
                            server.notify_event_listeners(Event::ExecutionSuccess {
                                id: run.work_id,
                            });
                            server.notify_event_listeners(Event::log(
                                LogLevel::Info,
                                format!("work {} finished", run.work_id),
                            ));
                            self.last_command.clear();
                            notify_structure_change(&server, previous.as_deref(), run.state.as_ref());
                            notify_value_changes(&server, previous.as_deref(), run.state.as_ref());
                        }
                    }
                    steps.push_back(Step::HandleNextServerRequest);
                }
            }
        }

        Ok(())
    }
}

/// Tell build listeners when a command reshaped the build.
fn notify_structure_change<S: BuildState>(
    server: &ServerState,
    previous: Option<&S>,
    next: &S,
) {
    let structure = next.structure();
    if previous.map(BuildState::structure).as_ref() != Some(&structure) {
        server.notify_build_listeners(Event::BuildStructureChanged { structure });
    }
}

/// Tell key listeners about settings whose value changed under them.
fn notify_value_changes<S: BuildState>(server: &ServerState, previous: Option<&S>, next: &S) {
    for (key, listeners) in server.key_listeners() {
        let value = match next.resolve(key) {
            Ok(Some(ResolvedKey::Setting { value })) => value,
            // Tasks notify through execution events; resolution errors
            // here have no requester to report to.
            _ => continue,
        };

        let old_value = previous
            .and_then(|state| state.resolve(key).ok().flatten())
            .and_then(|resolved| match resolved {
                ResolvedKey::Setting { value } => Some(value),
                ResolvedKey::Task { .. } => None,
            });

        if old_value.as_ref() != Some(&value) {
            for client in listeners {
                client.send(Event::ValueChange {
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
    }
}
