//! Control-panel bindings.
//!
//! A GUI edits values through [`ParamBinding`]s and calls `on_commit` once editing is done.
//! Commits are only queued here; the simulation loop drains the queue between ticks, so a
//! structural change can never land in the middle of a frame.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use crate::params::{ParamClass, ParamDecl, ParamId, ParamRange, ParameterStore};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlMessage {
    Commit { id: ParamId, value: f32 },
    /// Reseed the grid with the current parameters.
    Reset,
}

/// Registration contract implemented by a GUI toolkit.
pub trait ControlSurface {
    fn add_parameter(&mut self, binding: ParamBinding);
    fn add_action(&mut self, name: &str, action: Box<dyn Fn()>);
}

struct PanelState {
    decls: Vec<ParamDecl>,
    edits: Vec<f32>,
    pending: VecDeque<ControlMessage>,
}

/// Shared handle to the panel state. Cloning it is cheap and every clone sees the same
/// edits and queue.
#[derive(Clone)]
pub struct ControlPanel {
    state: Rc<RefCell<PanelState>>,
}

impl ControlPanel {
    pub fn new(store: &ParameterStore) -> Self {
        let decls = store.declarations().to_vec();
        let edits = ParamId::ALL.iter().map(|id| store.get(*id)).collect();
        Self {
            state: Rc::new(RefCell::new(PanelState {
                decls,
                edits,
                pending: VecDeque::new(),
            })),
        }
    }

    pub fn binding(&self, id: ParamId) -> ParamBinding {
        let decl = self.state.borrow().decls[id.index()];
        ParamBinding {
            decl,
            panel: self.clone(),
        }
    }

    pub fn bindings(&self) -> Vec<ParamBinding> {
        ParamId::ALL.into_iter().map(|id| self.binding(id)).collect()
    }

    /// Hand every parameter and the reset action to a GUI.
    pub fn register(&self, surface: &mut impl ControlSurface) {
        for binding in self.bindings() {
            surface.add_parameter(binding);
        }
        let panel = self.clone();
        surface.add_action("Reset Game Data", Box::new(move || panel.request_reset()));
    }

    pub fn request_reset(&self) {
        self.state
            .borrow_mut()
            .pending
            .push_back(ControlMessage::Reset);
    }

    pub fn has_pending(&self) -> bool {
        !self.state.borrow().pending.is_empty()
    }

    pub(crate) fn drain(&self) -> Vec<ControlMessage> {
        self.state.borrow_mut().pending.drain(..).collect()
    }

    /// Overwrite the edited value, e.g. after the loop rejected a commit.
    pub(crate) fn sync(&self, id: ParamId, value: f32) {
        self.state.borrow_mut().edits[id.index()] = value;
    }

    fn edit(&self, id: ParamId) -> f32 {
        self.state.borrow().edits[id.index()]
    }

    fn stage(&self, id: ParamId, value: f32) {
        self.sync(id, value);
    }

    fn commit(&self, id: ParamId) {
        let value = self.edit(id);
        self.state
            .borrow_mut()
            .pending
            .push_back(ControlMessage::Commit { id, value });
    }
}

/// `{ get, set, range, on_commit }` for one parameter.
#[derive(Clone)]
pub struct ParamBinding {
    decl: ParamDecl,
    panel: ControlPanel,
}

impl ParamBinding {
    pub fn id(&self) -> ParamId {
        self.decl.id
    }

    pub fn name(&self) -> &'static str {
        self.decl.id.name()
    }

    pub fn range(&self) -> ParamRange {
        self.decl.range
    }

    /// Slider increment, if the parameter has one.
    pub fn step(&self) -> Option<f32> {
        self.decl.range.step
    }

    pub fn class(&self) -> ParamClass {
        self.decl.class
    }

    pub fn get(&self) -> f32 {
        self.panel.edit(self.decl.id)
    }

    /// Record an in-progress edit. Nothing reaches the simulation until `on_commit`.
    pub fn set(&self, value: f32) {
        self.panel.stage(self.decl.id, value);
    }

    pub fn on_commit(&self) {
        self.panel.commit(self.decl.id);
    }
}

/// A [`ControlSurface`] that keeps registrations addressable by name, for hosts that drive
/// the panel through strings (the web exports).
#[derive(Default)]
pub struct NamedControls {
    parameters: Vec<ParamBinding>,
    actions: Vec<(String, Box<dyn Fn()>)>,
}

impl ControlSurface for NamedControls {
    fn add_parameter(&mut self, binding: ParamBinding) {
        self.parameters.push(binding);
    }

    fn add_action(&mut self, name: &str, action: Box<dyn Fn()>) {
        self.actions.push((name.to_string(), action));
    }
}

impl NamedControls {
    pub fn parameter(&self, name: &str) -> Option<&ParamBinding> {
        self.parameters.iter().find(|b| b.name() == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.parameters.iter().map(ParamBinding::name)
    }

    /// Run the action registered under `name`. Returns false if there is none.
    pub fn trigger(&self, name: &str) -> bool {
        match self.actions.iter().find(|(n, _)| n == name) {
            Some((_, action)) => {
                action();
                true
            }
            None => false,
        }
    }
}
