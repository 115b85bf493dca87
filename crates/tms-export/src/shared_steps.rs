//! Shared-step resolution.
//!
//! Vendors let a step call another reusable block (TestRail shared steps,
//! Zephyr "call to test", Azure DevOps shared steps, Allure shared steps).
//! Test cases keep such calls as references; inside a shared step nested
//! calls are inlined, because the common schema does not nest shared steps.
//!
//! Every referenced block is converted once, under a stable id allocated the
//! first time it is referenced, so several test cases calling the same block
//! share one [`SharedStep`].

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use tms_models::{
    stable_id, CaseAttribute, EntityKind, Link, PriorityType, SharedStep, StateType, Step,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// A vendor step before shared-step resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum RawStep<K> {
    /// A plain step.
    Step(Step),
    /// A call to the shared step identified by the vendor key.
    Call(K),
}

/// A shared step as fetched from the vendor, with unresolved calls.
#[derive(Debug, Clone)]
pub struct SharedStepDefinition<K> {
    pub key: K,
    pub name: String,
    pub description: String,
    pub state: StateType,
    pub priority: PriorityType,
    pub steps: Vec<RawStep<K>>,
    pub attributes: Vec<CaseAttribute>,
    pub links: Vec<Link>,
    pub tags: Vec<String>,
    /// Attachment file names already stored under the shared step's id.
    pub attachments: Vec<String>,
    pub section_id: Uuid,
}

impl<K> SharedStepDefinition<K> {
    pub fn new(key: K, name: impl Into<String>, section_id: Uuid) -> Self {
        Self {
            key,
            name: name.into(),
            description: String::new(),
            state: StateType::default(),
            priority: PriorityType::default(),
            steps: Vec::new(),
            attributes: Vec::new(),
            links: Vec::new(),
            tags: Vec::new(),
            attachments: Vec::new(),
            section_id,
        }
    }
}

/// A step of a resolved shared step whose attachments live in another
/// shared step's directory and must be copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowedStep {
    pub shared_step: Uuid,
    pub step_index: usize,
    pub from: Uuid,
}

/// Output of [`SharedStepResolver::resolve`].
#[derive(Debug, Default)]
pub struct ResolvedSharedSteps {
    pub shared_steps: Vec<SharedStep>,
    pub borrowed: Vec<BorrowedStep>,
    pub warnings: Vec<String>,
}

/// Collects shared-step references and definitions and resolves them.
pub struct SharedStepResolver<K> {
    scope: String,
    ids: HashMap<K, Uuid>,
    order: Vec<K>,
    definitions: HashMap<K, SharedStepDefinition<K>>,
    unavailable: HashMap<K, String>,
}

impl<K> SharedStepResolver<K>
where
    K: Eq + Hash + Clone + Display,
{
    /// Create an empty resolver; `scope` feeds the stable ids.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ids: HashMap::new(),
            order: Vec::new(),
            definitions: HashMap::new(),
            unavailable: HashMap::new(),
        }
    }

    /// Number of shared steps referenced or defined so far.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Reference a shared step, returning its id.
    pub fn request(&mut self, key: &K) -> Uuid {
        if let Some(id) = self.ids.get(key) {
            return *id;
        }
        let id = stable_id(EntityKind::SharedStep, &self.scope, &key.to_string());
        self.ids.insert(key.clone(), id);
        self.order.push(key.clone());
        debug!(%key, %id, "Shared step referenced");
        id
    }

    /// Id of a referenced shared step.
    pub fn id_of(&self, key: &K) -> Option<Uuid> {
        self.ids.get(key).copied()
    }

    /// Record the definition of a shared step; its calls are requested too.
    pub fn define(&mut self, definition: SharedStepDefinition<K>) -> Uuid {
        let id = self.request(&definition.key);
        for step in &definition.steps {
            if let RawStep::Call(callee) = step {
                self.request(callee);
            }
        }
        self.unavailable.remove(&definition.key);
        self.definitions.insert(definition.key.clone(), definition);
        id
    }

    /// Whether a definition was recorded.
    pub fn is_defined(&self, key: &K) -> bool {
        self.definitions.contains_key(key)
    }

    /// Give up on fetching a shared step; a placeholder will be emitted.
    pub fn mark_unavailable(&mut self, key: &K, reason: impl Into<String>) {
        self.request(key);
        if !self.definitions.contains_key(key) {
            self.unavailable.insert(key.clone(), reason.into());
        }
    }

    /// Referenced shared steps that still need fetching.
    pub fn missing(&self) -> Vec<K> {
        self.order
            .iter()
            .filter(|k| !self.definitions.contains_key(*k) && !self.unavailable.contains_key(*k))
            .cloned()
            .collect()
    }

    /// Whether resolution will emit placeholder shared steps.
    pub fn has_placeholders(&self) -> bool {
        self.order.iter().any(|k| !self.definitions.contains_key(k))
    }

    /// Convert a test case's steps: calls become references.
    pub fn convert_steps(&mut self, raw: Vec<RawStep<K>>) -> Vec<Step> {
        raw.into_iter()
            .map(|step| match step {
                RawStep::Step(step) => step,
                RawStep::Call(key) => Step::shared(self.request(&key)),
            })
            .collect()
    }

    /// Produce every referenced shared step with nested calls inlined.
    ///
    /// A call that would re-enter a shared step already being inlined is
    /// dropped with a warning. Keys without a definition become empty
    /// placeholders in `fallback_section` so references stay valid.
    pub fn resolve(self, fallback_section: Uuid) -> ResolvedSharedSteps {
        let mut resolved = ResolvedSharedSteps::default();
        let mut memo: HashMap<K, Vec<(Step, Uuid)>> = HashMap::new();

        for key in &self.order {
            let id = self.ids[key];
            let Some(definition) = self.definitions.get(key) else {
                let reason = self
                    .unavailable
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| "definition was never fetched".to_string());
                let message = format!("Shared step {key} exported as placeholder: {reason}");
                warn!("{message}");
                resolved.warnings.push(message);

                let mut placeholder = SharedStep::new(id, key.to_string(), fallback_section);
                placeholder.description = format!("Shared step could not be exported: {reason}");
                resolved.shared_steps.push(placeholder);
                continue;
            };

            let mut stack = Vec::new();
            let (steps, _) = self.flatten(key, &mut stack, &mut memo, &mut resolved.warnings);

            let mut shared = SharedStep::new(id, definition.name.clone(), definition.section_id);
            shared.description = definition.description.clone();
            shared.state = definition.state;
            shared.priority = definition.priority;
            shared.attributes = definition.attributes.clone();
            shared.links = definition.links.clone();
            shared.tags = definition.tags.clone();
            shared.attachments = definition.attachments.clone();

            for (index, (step, origin)) in steps.into_iter().enumerate() {
                if origin != id && !step.all_attachments().is_empty() {
                    resolved.borrowed.push(BorrowedStep {
                        shared_step: id,
                        step_index: index,
                        from: origin,
                    });
                }
                shared.steps.push(step);
            }
            resolved.shared_steps.push(shared);
        }

        resolved
    }

    /// Inline `key`'s steps. Returns the steps with the id of the shared step
    /// each one came from, and whether no call had to be dropped (only such
    /// results are memoized, since a dropped call depends on the caller).
    fn flatten(
        &self,
        key: &K,
        stack: &mut Vec<K>,
        memo: &mut HashMap<K, Vec<(Step, Uuid)>>,
        warnings: &mut Vec<String>,
    ) -> (Vec<(Step, Uuid)>, bool) {
        if let Some(done) = memo.get(key) {
            return (done.clone(), true);
        }
        let Some(definition) = self.definitions.get(key) else {
            return (Vec::new(), true);
        };
        let own = self.ids[key];

        stack.push(key.clone());
        let mut steps = Vec::new();
        let mut complete = true;
        for raw in &definition.steps {
            match raw {
                RawStep::Step(step) => steps.push((step.clone(), own)),
                RawStep::Call(callee) if stack.contains(callee) => {
                    push_warning(
                        warnings,
                        format!("Shared step {key} calls {callee} recursively; call dropped"),
                    );
                    complete = false;
                }
                RawStep::Call(callee) if !self.definitions.contains_key(callee) => {
                    push_warning(
                        warnings,
                        format!("Shared step {key} calls unavailable {callee}; call dropped"),
                    );
                    complete = false;
                }
                RawStep::Call(callee) => {
                    let (inner, inner_complete) = self.flatten(callee, stack, memo, warnings);
                    complete &= inner_complete;
                    steps.extend(inner);
                }
            }
        }
        stack.pop();

        if complete {
            memo.insert(key.clone(), steps.clone());
        }
        (steps, complete)
    }
}

fn push_warning(warnings: &mut Vec<String>, message: String) {
    warn!("{message}");
    if !warnings.contains(&message) {
        warnings.push(message);
    }
}
