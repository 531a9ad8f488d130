//! Key bindings. Instead of runtime-dispatched callbacks, bindings map
//! byte sequences to a tagged [`Action`] resolved from a static registry;
//! the engine matches client input against the scopes along the client's
//! tree path, child scopes overriding ancestors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Open the replay view for the attached pane.
    EnterReplay,
    NextPane,
    PreviousPane,
    NewPane,
    RemovePane,
    Detach,
}

/// The registry of user-nameable actions.
pub const ACTIONS: &[(&str, Action)] = &[
    ("replay", Action::EnterReplay),
    ("next-pane", Action::NextPane),
    ("prev-pane", Action::PreviousPane),
    ("new-pane", Action::NewPane),
    ("remove-pane", Action::RemovePane),
    ("detach", Action::Detach),
];

pub fn lookup_action(name: &str) -> Option<Action> {
    ACTIONS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, action)| *action)
}

/// An associative container from input byte sequence to action. One scope
/// hangs off every group in the tree.
#[derive(Debug, Default)]
pub struct BindScope {
    bindings: Mutex<HashMap<Vec<u8>, Action>>,
}

impl BindScope {
    pub fn new() -> Self {
        BindScope::default()
    }

    pub fn set(&self, sequence: impl Into<Vec<u8>>, action: Action) {
        self.bindings.lock().unwrap().insert(sequence.into(), action);
    }

    pub fn unset(&self, sequence: &[u8]) {
        self.bindings.lock().unwrap().remove(sequence);
    }

    pub fn get(&self, sequence: &[u8]) -> Option<Action> {
        self.bindings.lock().unwrap().get(sequence).copied()
    }

    fn entries(&self) -> Vec<(Vec<u8>, Action)> {
        self.bindings
            .lock()
            .unwrap()
            .iter()
            .map(|(seq, action)| (seq.clone(), *action))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindEvent {
    /// A complete sequence matched an action.
    Action(Action),
    /// Input that matched nothing; routed to the attached pane.
    Raw(Vec<u8>),
}

/// Matches incoming bytes against the active scope stack. Bytes that form
/// a prefix of some binding are held back until the sequence resolves.
pub struct Engine {
    scopes: Vec<Arc<BindScope>>,
    buffer: Vec<u8>,
    tx: mpsc::UnboundedSender<BindEvent>,
}

impl Engine {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BindEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Engine {
                scopes: Vec::new(),
                buffer: Vec::new(),
                tx,
            },
            rx,
        )
    }

    /// Replace the scope stack; scopes are ordered root to leaf so later
    /// entries override earlier ones on conflict.
    pub fn set_scopes(&mut self, scopes: Vec<Arc<BindScope>>) {
        self.scopes = scopes;
        self.flush();
    }

    fn effective(&self) -> HashMap<Vec<u8>, Action> {
        let mut merged = HashMap::new();
        for scope in &self.scopes {
            for (sequence, action) in scope.entries() {
                merged.insert(sequence, action);
            }
        }
        merged
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let raw = std::mem::take(&mut self.buffer);
        let _ = self.tx.send(BindEvent::Raw(raw));
    }

    pub fn input(&mut self, data: &[u8]) {
        let bindings = self.effective();

        for &byte in data {
            self.buffer.push(byte);

            if let Some(action) = bindings.get(self.buffer.as_slice()) {
                let _ = self.tx.send(BindEvent::Action(*action));
                self.buffer.clear();
                continue;
            }

            let is_prefix = bindings
                .keys()
                .any(|sequence| sequence.starts_with(&self.buffer));
            if !is_prefix {
                self.flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(scope: &Arc<BindScope>) -> (Engine, mpsc::UnboundedReceiver<BindEvent>) {
        let (mut engine, rx) = Engine::new();
        engine.set_scopes(vec![scope.clone()]);
        (engine, rx)
    }

    #[test]
    fn matches_sequences() {
        let scope = Arc::new(BindScope::new());
        scope.set(b"\x01r".to_vec(), Action::EnterReplay);
        let (mut engine, mut rx) = engine_with(&scope);

        engine.input(b"\x01r");
        assert_eq!(rx.try_recv(), Ok(BindEvent::Action(Action::EnterReplay)));
    }

    #[test]
    fn non_matching_input_is_raw() {
        let scope = Arc::new(BindScope::new());
        scope.set(b"\x01r".to_vec(), Action::EnterReplay);
        let (mut engine, mut rx) = engine_with(&scope);

        engine.input(b"hello");
        assert_eq!(rx.try_recv(), Ok(BindEvent::Raw(b"h".to_vec())));
    }

    #[test]
    fn prefix_is_held_until_resolution() {
        let scope = Arc::new(BindScope::new());
        scope.set(b"\x01n".to_vec(), Action::NextPane);
        let (mut engine, mut rx) = engine_with(&scope);

        engine.input(b"\x01");
        assert!(rx.try_recv().is_err());

        engine.input(b"x");
        // The held prefix and the mismatch flush together.
        assert_eq!(rx.try_recv(), Ok(BindEvent::Raw(b"\x01x".to_vec())));
    }

    #[test]
    fn child_scope_overrides_ancestor() {
        let root = Arc::new(BindScope::new());
        root.set(b"\x01n".to_vec(), Action::NextPane);
        let leaf = Arc::new(BindScope::new());
        leaf.set(b"\x01n".to_vec(), Action::Detach);

        let (mut engine, mut rx) = Engine::new();
        engine.set_scopes(vec![root, leaf]);
        engine.input(b"\x01n");
        assert_eq!(rx.try_recv(), Ok(BindEvent::Action(Action::Detach)));
    }

    #[test]
    fn registry_resolves_names() {
        assert_eq!(lookup_action("replay"), Some(Action::EnterReplay));
        assert_eq!(lookup_action("bogus"), None);
    }
}
