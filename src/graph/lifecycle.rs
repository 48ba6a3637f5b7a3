//! Mount/unmount state machine for lifecycle-managed associations.
//!
//! The current stage of an instance is itself recorded in the graph as a
//! `Lifestate` link association (`from` = instance, `to` = stage node).

use std::fmt;

use tracing::debug;

use super::Graph;
use crate::types::{AssocId, GraphError, Result};

/// Lifecycle stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Becoming active
    Mounting,
    /// Active
    Mounted,
    /// Re-initializing while active
    Remounting,
    /// Shutting down
    Unmounting,
    /// Inactive
    Unmounted,
}

impl Stage {
    /// Every stage, in system-association creation order
    pub const ALL: [Stage; 5] = [
        Stage::Mounting,
        Stage::Mounted,
        Stage::Remounting,
        Stage::Unmounting,
        Stage::Unmounted,
    ];

    /// Stage name, also the suffix of its system association id
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Mounting => "Mounting",
            Stage::Mounted => "Mounted",
            Stage::Remounting => "Remounting",
            Stage::Unmounting => "Unmounting",
            Stage::Unmounted => "Unmounted",
        }
    }

    /// Whether `from → to` is in the transition table
    pub fn can_transition(from: Option<Stage>, to: Stage) -> bool {
        matches!(
            (from, to),
            (None, Stage::Mounting)
                | (Some(Stage::Mounting), Stage::Mounted)
                | (Some(Stage::Mounted), Stage::Remounting)
                | (Some(Stage::Mounted), Stage::Unmounting)
                | (Some(Stage::Remounting), Stage::Mounted)
                | (Some(Stage::Unmounting), Stage::Unmounted)
                | (Some(Stage::Unmounted), Stage::Mounting)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name of an optional stage, `undefined` before the first transition
pub fn stage_name(stage: &Option<Stage>) -> &'static str {
    stage.as_ref().map_or("undefined", Stage::name)
}

/// Effect invoked after every successful transition
pub type Effect = Box<dyn FnMut(&Graph, Stage) -> anyhow::Result<()> + Send>;

/// Lifecycle of one instance association
pub struct Lifecycle {
    instance: AssocId,
    link: Option<AssocId>,
    stage: Option<Stage>,
    effect: Option<Effect>,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("instance", &self.instance)
            .field("link", &self.link)
            .field("stage", &self.stage)
            .finish()
    }
}

impl Lifecycle {
    /// Lifecycle for `instance`, not yet mounted
    pub fn new(instance: AssocId) -> Self {
        Self { instance, link: None, stage: None, effect: None }
    }

    /// Register the effect run after each transition
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }

    /// Instance association
    pub fn instance(&self) -> &AssocId {
        &self.instance
    }

    /// `Lifestate` link association, once the first transition ran
    pub fn link(&self) -> Option<&AssocId> {
        self.link.as_ref()
    }

    /// Current stage
    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    /// Whether the stage is `Mounting`
    pub fn is_mounting(&self) -> bool {
        self.stage == Some(Stage::Mounting)
    }

    /// Whether the stage is `Mounted`
    pub fn is_mounted(&self) -> bool {
        self.stage == Some(Stage::Mounted)
    }

    /// Whether the stage is `Remounting`
    pub fn is_remounting(&self) -> bool {
        self.stage == Some(Stage::Remounting)
    }

    /// Whether the stage is `Unmounting`
    pub fn is_unmounting(&self) -> bool {
        self.stage == Some(Stage::Unmounting)
    }

    /// Whether the stage is `Unmounted`
    pub fn is_unmounted(&self) -> bool {
        self.stage == Some(Stage::Unmounted)
    }

    /// Validate, record the stage in the graph, then run the effect.
    ///
    /// Effect errors are logged; the transition itself has already happened.
    pub fn transition(&mut self, graph: &mut Graph, to: Stage) -> Result<()> {
        if !Stage::can_transition(self.stage, to) {
            return Err(GraphError::InvalidTransition { from: self.stage, to }.into());
        }

        let stage_node = graph.system().stage(to).clone();
        match &self.link {
            Some(link) if graph.contains(link) => graph.set_to(link, Some(&stage_node))?,
            _ => {
                let lifestate = graph.system().lifestate.clone();
                let link = graph.new_typed(&lifestate)?;
                graph.set_from(&link, Some(&self.instance))?;
                graph.set_to(&link, Some(&stage_node))?;
                self.link = Some(link);
            }
        }

        debug!(instance = %self.instance, from = stage_name(&self.stage), to = %to, "lifecycle transition");
        self.stage = Some(to);

        if let Some(effect) = self.effect.as_mut() {
            if let Err(err) = effect(graph, to) {
                tracing::error!(instance = %self.instance, stage = %to, error = %err, "lifecycle effect failed");
            }
        }
        Ok(())
    }

    /// `Mounting → Mounted` from an unmounted or fresh state
    pub fn mount(&mut self, graph: &mut Graph) -> Result<()> {
        self.transition(graph, Stage::Mounting)?;
        self.transition(graph, Stage::Mounted)
    }

    /// `Remounting → Mounted`
    pub fn remount(&mut self, graph: &mut Graph) -> Result<()> {
        self.transition(graph, Stage::Remounting)?;
        self.transition(graph, Stage::Mounted)
    }

    /// `Unmounting → Unmounted`
    pub fn unmount(&mut self, graph: &mut Graph) -> Result<()> {
        self.transition(graph, Stage::Unmounting)?;
        self.transition(graph, Stage::Unmounted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn table_matches_the_documented_cycle() {
        assert!(Stage::can_transition(None, Stage::Mounting));
        assert!(!Stage::can_transition(None, Stage::Mounted));
        assert!(Stage::can_transition(Some(Stage::Unmounted), Stage::Mounting));
        assert!(!Stage::can_transition(Some(Stage::Mounted), Stage::Mounted));
        assert!(!Stage::can_transition(Some(Stage::Unmounting), Stage::Mounted));
    }

    #[test]
    fn transitions_are_recorded_as_lifestate_links() {
        let mut graph = Graph::new();
        let instance = graph.new_association();
        let mut lifecycle = Lifecycle::new(instance.clone());

        lifecycle.mount(&mut graph).unwrap();
        assert!(lifecycle.is_mounted());

        let link = lifecycle.link().cloned().unwrap();
        assert_eq!(graph.type_of(&link), Some(&graph.system().lifestate));
        assert_eq!(graph.from_of(&link), Some(&instance));
        assert_eq!(graph.to_of(&link), Some(graph.system().stage(Stage::Mounted)));

        lifecycle.unmount(&mut graph).unwrap();
        assert!(lifecycle.is_unmounted());
        assert_eq!(graph.to_of(&link), Some(graph.system().stage(Stage::Unmounted)));
    }

    #[test]
    fn invalid_transition_names_both_stages() {
        let mut graph = Graph::new();
        let instance = graph.new_association();
        let mut lifecycle = Lifecycle::new(instance);
        let err = lifecycle.transition(&mut graph, Stage::Unmounted).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Graph error: Invalid lifecycle transition from undefined to Unmounted"
        );
        assert_eq!(lifecycle.stage(), None);
    }

    #[test]
    fn effect_sees_each_stage() {
        let mut graph = Graph::new();
        let instance = graph.new_association();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut lifecycle = Lifecycle::new(instance).with_effect(Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        lifecycle.mount(&mut graph).unwrap();
        lifecycle.remount(&mut graph).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
