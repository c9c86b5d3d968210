//! A small in-process build engine so the server binary runs end-to-end.
//!
//! The demo build has a handful of settings and tasks and simulates work
//! with a configurable latency. It exists to exercise the dispatcher; the
//! real engine behind a production deployment implements the same traits.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;

use forge_core::{
    BuildEngine, BuildState, BuildStructure, CancelToken, CommandError, ResolvedKey, ScopedKey,
    StateError,
};

/// Immutable snapshot of the demo build.
#[derive(Debug, Clone)]
pub struct DemoState {
    settings: BTreeMap<ScopedKey, String>,
    tasks: BTreeMap<ScopedKey, String>,
    builds_run: u64,
}

impl DemoState {
    fn initial() -> Self {
        let mut settings = BTreeMap::new();
        settings.insert(ScopedKey::global("name"), "forge-demo".to_string());
        settings.insert(ScopedKey::global("version"), "0.1.0".to_string());
        settings.insert(ScopedKey::global("builds-run"), "0".to_string());
        settings.insert(ScopedKey::scoped("core", "sources"), "core/src".to_string());

        let mut tasks = BTreeMap::new();
        tasks.insert(ScopedKey::global("compile"), "compile".to_string());
        tasks.insert(ScopedKey::global("test"), "test".to_string());
        tasks.insert(
            ScopedKey::scoped("core", "compile"),
            "core/compile".to_string(),
        );

        DemoState {
            settings,
            tasks,
            builds_run: 0,
        }
    }

    fn known_keys(&self) -> impl Iterator<Item = &ScopedKey> {
        self.settings.keys().chain(self.tasks.keys())
    }
}

impl BuildState for DemoState {
    fn parse_keys(&self, text: &str) -> Result<Vec<ScopedKey>, StateError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        // "scope/name" addresses one key; a bare name matches it in every
        // scope that defines it. Malformed text is simply no matches.
        let wanted = match text.split_once('/') {
            Some((scope, name)) if !scope.is_empty() && !name.is_empty() => {
                ScopedKey::scoped(scope, name)
            }
            Some(_) => return Ok(Vec::new()),
            None => ScopedKey::global(text),
        };

        Ok(self
            .known_keys()
            .filter(|key| **key == wanted || (wanted.scope.is_none() && key.name == wanted.name))
            .cloned()
            .collect())
    }

    fn resolve(&self, key: &ScopedKey) -> Result<Option<ResolvedKey>, StateError> {
        if let Some(value) = self.settings.get(key) {
            return Ok(Some(ResolvedKey::Setting {
                value: value.clone(),
            }));
        }
        if let Some(command) = self.tasks.get(key) {
            return Ok(Some(ResolvedKey::Task {
                command: command.clone(),
            }));
        }
        Ok(None)
    }

    fn structure(&self) -> BuildStructure {
        BuildStructure {
            projects: vec!["root".to_string(), "core".to_string()],
        }
    }

    fn completions(&self, line: &str, _level: u8) -> Result<Vec<String>, StateError> {
        let prefix = line.trim();
        Ok(self
            .known_keys()
            .map(ToString::to_string)
            .filter(|name| name.starts_with(prefix))
            .collect())
    }
}

/// Demo engine: every command "succeeds" after a latency, except commands
/// starting with `fail`.
pub struct DemoEngine {
    state: Arc<DemoState>,
    command_latency: Duration,
}

impl DemoEngine {
    pub fn new(command_latency: Duration) -> Self {
        DemoEngine {
            state: Arc::new(DemoState::initial()),
            command_latency,
        }
    }
}

impl BuildEngine for DemoEngine {
    type State = DemoState;

    fn load(&mut self) -> Result<Arc<DemoState>, CommandError> {
        info!("demo project loaded");
        Ok(self.state.clone())
    }

    fn run_command(
        &mut self,
        command: &str,
        cancel: &CancelToken,
    ) -> Result<Arc<DemoState>, CommandError> {
        // Sleep in slices so cancellation is observed promptly.
        const SLICES: u32 = 10;
        for _ in 0..SLICES {
            if cancel.is_cancelled() {
                return Err(CommandError::Cancelled);
            }
            thread::sleep(self.command_latency / SLICES);
        }

        if command.starts_with("fail") {
            return Err(CommandError::Failed(format!("task `{command}` failed")));
        }

        let mut next = (*self.state).clone();
        next.builds_run += 1;
        next.settings.insert(
            ScopedKey::global("builds-run"),
            next.builds_run.to_string(),
        );
        self.state = Arc::new(next);
        Ok(self.state.clone())
    }

    fn current_state(&self) -> Arc<DemoState> {
        self.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_match_across_scopes() {
        let state = DemoState::initial();
        let keys = state.parse_keys("compile").unwrap();
        assert_eq!(
            keys,
            vec![
                ScopedKey::global("compile"),
                ScopedKey::scoped("core", "compile")
            ]
        );
    }

    #[test]
    fn scoped_text_addresses_one_key() {
        let state = DemoState::initial();
        let keys = state.parse_keys("core/compile").unwrap();
        assert_eq!(keys, vec![ScopedKey::scoped("core", "compile")]);
    }

    #[test]
    fn malformed_text_is_no_matches_not_an_error() {
        let state = DemoState::initial();
        assert!(state.parse_keys("/compile").unwrap().is_empty());
        assert!(state.parse_keys("").unwrap().is_empty());
    }

    #[test]
    fn commands_advance_the_build_counter() {
        let mut engine = DemoEngine::new(Duration::from_millis(0));
        let cancel = CancelToken::new();

        let state = engine.run_command("compile", &cancel).unwrap();
        assert_eq!(
            state.resolve(&ScopedKey::global("builds-run")).unwrap(),
            Some(ResolvedKey::Setting {
                value: "1".to_string()
            })
        );
    }

    #[test]
    fn cancelled_commands_fail_fast() {
        let mut engine = DemoEngine::new(Duration::from_secs(60));
        let cancel = CancelToken::new();
        cancel.cancel();

        assert!(matches!(
            engine.run_command("compile", &cancel),
            Err(CommandError::Cancelled)
        ));
    }
}
