//! Schedulable units of work.
//!
//! A descriptor is a name plus closures that capture a typed handle to the
//! task that built it. The mission loop only ever calls the closures, so
//! unrelated task types can sit side by side in one table.

use core::cell::RefCell;
use core::time::Duration;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Handle to a task shared between its descriptors and the composition root.
pub type Shared<T> = Rc<RefCell<T>>;

pub fn shared<T>(task: T) -> Shared<T> {
    Rc::new(RefCell::new(task))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateResult {
    Ok,
    /// Part of the observation is stale; the rest is usable.
    Warning,
    /// The observation must not be trusted this cycle.
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyResult {
    Ok,
    Failure,
}

/// Task that acts on the state when its condition holds.
pub trait Action<S> {
    fn condition(&self, state: &S) -> bool;
    fn execute(&mut self, state: &mut S);
}

/// Task that writes a fresh observation into the state every cycle.
pub trait Update<S> {
    fn update(&mut self, state: &mut S) -> UpdateResult;
}

/// Read-only consistency check run after all updates.
pub trait Verify<S> {
    fn verify(&self, state: &S) -> VerifyResult;
}

/// Task that keeps timestamps and must follow explicit mission time changes.
pub trait NotifyTimeChanged {
    fn on_time_changed(&mut self, previous: Duration, current: Duration);
}

type ConditionFn<S> = Box<dyn Fn(&S) -> bool>;
type ActionFn<S> = Box<dyn FnMut(&mut S)>;
type UpdateFn<S> = Box<dyn FnMut(&mut S) -> UpdateResult>;
type VerifyFn<S> = Box<dyn Fn(&S) -> VerifyResult>;

pub struct ActionDescriptor<S> {
    name: &'static str,
    condition: ConditionFn<S>,
    action: ActionFn<S>,
}

impl<S: 'static> ActionDescriptor<S> {
    pub fn new(
        name: &'static str,
        condition: impl Fn(&S) -> bool + 'static,
        action: impl FnMut(&mut S) + 'static,
    ) -> Self {
        Self {
            name,
            condition: Box::new(condition),
            action: Box::new(action),
        }
    }

    pub fn for_task<T: Action<S> + 'static>(name: &'static str, task: &Shared<T>) -> Self {
        let condition_task = Rc::clone(task);
        let action_task = Rc::clone(task);

        Self::new(
            name,
            move |state| condition_task.borrow().condition(state),
            move |state| action_task.borrow_mut().execute(state),
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_runnable(&self, state: &S) -> bool {
        (self.condition)(state)
    }

    pub fn execute(&mut self, state: &mut S) {
        (self.action)(state);
    }
}

impl<S> core::fmt::Debug for ActionDescriptor<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ActionDescriptor").field("name", &self.name).finish_non_exhaustive()
    }
}

pub struct UpdateDescriptor<S> {
    name: &'static str,
    update: UpdateFn<S>,
}

impl<S: 'static> UpdateDescriptor<S> {
    pub fn new(name: &'static str, update: impl FnMut(&mut S) -> UpdateResult + 'static) -> Self {
        Self {
            name,
            update: Box::new(update),
        }
    }

    pub fn for_task<T: Update<S> + 'static>(name: &'static str, task: &Shared<T>) -> Self {
        let task = Rc::clone(task);
        Self::new(name, move |state| task.borrow_mut().update(state))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn run(&mut self, state: &mut S) -> UpdateResult {
        (self.update)(state)
    }
}

impl<S> core::fmt::Debug for UpdateDescriptor<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UpdateDescriptor").field("name", &self.name).finish_non_exhaustive()
    }
}

pub struct VerifyDescriptor<S> {
    name: &'static str,
    verify: VerifyFn<S>,
}

impl<S: 'static> VerifyDescriptor<S> {
    pub fn new(name: &'static str, verify: impl Fn(&S) -> VerifyResult + 'static) -> Self {
        Self {
            name,
            verify: Box::new(verify),
        }
    }

    pub fn for_task<T: Verify<S> + 'static>(name: &'static str, task: &Shared<T>) -> Self {
        let task = Rc::clone(task);
        Self::new(name, move |state| task.borrow().verify(state))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn run(&self, state: &S) -> VerifyResult {
        (self.verify)(state)
    }
}

impl<S> core::fmt::Debug for VerifyDescriptor<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VerifyDescriptor").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Several actions sharing one scheduling slot.
///
/// Runnable when any member is runnable. Executing it runs every member
/// whose own condition holds at that moment, in declaration order.
pub struct CompositeAction<S, const N: usize> {
    name: &'static str,
    actions: [ActionDescriptor<S>; N],
}

impl<S: 'static, const N: usize> CompositeAction<S, N> {
    pub fn new(name: &'static str, actions: [ActionDescriptor<S>; N]) -> Self {
        Self { name, actions }
    }

    pub fn build(self) -> ActionDescriptor<S> {
        let actions = Rc::new(RefCell::new(self.actions));
        let condition_actions = Rc::clone(&actions);

        ActionDescriptor::new(
            self.name,
            move |state| condition_actions.borrow().iter().any(|action| action.is_runnable(state)),
            move |state| {
                for action in actions.borrow_mut().iter_mut() {
                    if action.is_runnable(state) {
                        action.execute(state);
                    }
                }
            },
        )
    }
}
