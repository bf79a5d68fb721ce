use std::borrow::Cow;

use crate::error::{EcsError, EcsResult};
use crate::function_system::{IntoSystem, SystemFn, SystemId};
use crate::registry::Registry;

/// Name of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageLabel(Cow<'static, str>);

impl StageLabel {
    /// Runs once, on the first [`Schedule::run`] or [`Schedule::initialize`].
    pub const START_UP: StageLabel = StageLabel::new("StartUp");
    /// Default first update stage.
    pub const UPDATE: StageLabel = StageLabel::new("Update");
    /// Default second update stage.
    pub const POST_UPDATE: StageLabel = StageLabel::new("PostUpdate");
    /// Runs once, on [`Schedule::shutdown`].
    pub const CLEAN_UP: StageLabel = StageLabel::new("CleanUp");

    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `StartUp` and `CleanUp` have fixed positions and cannot be edited.
    pub fn is_reserved(&self) -> bool {
        *self == Self::START_UP || *self == Self::CLEAN_UP
    }
}

impl std::fmt::Display for StageLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for StageLabel {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

impl From<String> for StageLabel {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

/// An ordered set of systems, deduplicated by [`SystemId`].
pub struct Stage {
    label: StageLabel,
    systems: Vec<SystemFn>,
}

impl Stage {
    /// Creates a new empty stage.
    pub fn new(label: impl Into<StageLabel>) -> Self {
        Self {
            label: label.into(),
            systems: Vec::new(),
        }
    }

    pub fn label(&self) -> &StageLabel {
        &self.label
    }

    /// Appends a system. A system with the same id is replaced in place
    /// instead, keeping its position; returns `false` in that case.
    pub fn add_system<M>(&mut self, system: impl IntoSystem<M>) -> bool {
        let system = system.into_system();
        match self.systems.iter_mut().find(|s| s.id() == system.id()) {
            Some(existing) => {
                log::warn!(
                    "System {} is already in stage {}; replacing it",
                    system.name(),
                    self.label
                );
                *existing = system;
                false
            }
            None => {
                self.systems.push(system);
                true
            }
        }
    }

    /// Removes the system with the given id.
    pub fn remove_system(&mut self, id: SystemId) -> bool {
        let before = self.systems.len();
        self.systems.retain(|s| s.id() != id);
        self.systems.len() != before
    }

    pub fn contains(&self, id: SystemId) -> bool {
        self.systems.iter().any(|s| s.id() == id)
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Names of the systems in run order.
    pub fn system_names(&self) -> Vec<&'static str> {
        self.systems.iter().map(SystemFn::name).collect()
    }

    /// Runs every system in order. Returns how many were skipped because
    /// their parameters could not be resolved.
    pub fn run(&mut self, registry: &mut Registry) -> usize {
        self.systems
            .iter_mut()
            .filter_map(|system| system.run(registry).err())
            .count()
    }
}

/// Lifecycle of a [`Schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    Idle,
    Initialized,
    Shutdown,
}

/// Runs systems stage by stage, single-threaded and in a fixed order.
///
/// The `StartUp` stage runs once before the first frame, the update stages
/// (`Update` then `PostUpdate` by default) run every frame followed by an
/// event dispatch, and `CleanUp` runs once on shutdown.
///
/// Malformed edits (unknown or duplicate stages, edits to the reserved
/// stages) log a warning and return `false`.
///
/// # Example
///
/// ```
/// use tessera_ecs::{Registry, ResMut, Schedule, StageLabel};
///
/// struct Frames(u32);
///
/// fn count(mut frames: ResMut<Frames>) {
///     frames.0 += 1;
/// }
///
/// let mut registry = Registry::new();
/// registry.emplace_resource(Frames(0));
///
/// let mut schedule = Schedule::new();
/// schedule.add_system(StageLabel::UPDATE, count);
/// schedule.run(&mut registry);
/// schedule.run(&mut registry);
/// schedule.shutdown(&mut registry);
///
/// assert_eq!(registry.get_resource::<Frames>().unwrap().0, 2);
/// ```
pub struct Schedule {
    startup: Stage,
    updates: Vec<Stage>,
    cleanup: Stage,
    state: ScheduleState,
    frame: u64,
}

impl Schedule {
    /// Creates a schedule with the `Update` and `PostUpdate` stages.
    pub fn new() -> Self {
        Self::with_update_stages([StageLabel::UPDATE, StageLabel::POST_UPDATE])
    }

    /// Creates a schedule with the given ordered update stages. Reserved and
    /// duplicate labels are skipped with a warning.
    pub fn with_update_stages<L: Into<StageLabel>>(labels: impl IntoIterator<Item = L>) -> Self {
        let mut schedule = Self {
            startup: Stage::new(StageLabel::START_UP),
            updates: Vec::new(),
            cleanup: Stage::new(StageLabel::CLEAN_UP),
            state: ScheduleState::Idle,
            frame: 0,
        };
        for label in labels {
            schedule.add_stage(label);
        }
        schedule
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    /// Number of completed update frames.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    // ---- Lifecycle ----

    /// Runs the `StartUp` stage. Only valid while idle.
    pub fn initialize(&mut self, registry: &mut Registry) {
        if self.state != ScheduleState::Idle {
            log::warn!("Schedule already initialized ({:?})", self.state);
            return;
        }
        log::debug!("Running {} start-up systems", self.startup.len());
        self.startup.run(registry);
        self.state = ScheduleState::Initialized;
    }

    /// Runs one frame: every update stage in order, then an event dispatch.
    /// Initializes first if still idle; does nothing after shutdown.
    pub fn run(&mut self, registry: &mut Registry) {
        match self.state {
            ScheduleState::Idle => self.initialize(registry),
            ScheduleState::Initialized => {}
            ScheduleState::Shutdown => {
                log::warn!("Schedule::run called after shutdown; ignoring");
                return;
            }
        }
        for stage in &mut self.updates {
            let skipped = stage.run(registry);
            if skipped > 0 {
                log::debug!("Stage {}: {skipped} systems skipped", stage.label);
            }
        }
        registry.dispatch_events();
        self.frame += 1;
    }

    /// Runs the `CleanUp` stage once. Ignored unless the schedule has been
    /// initialized.
    pub fn shutdown(&mut self, registry: &mut Registry) {
        match self.state {
            ScheduleState::Idle => {
                log::warn!("Schedule::shutdown called before initialize; ignoring");
                return;
            }
            ScheduleState::Shutdown => {
                log::warn!("Schedule already shut down");
                return;
            }
            ScheduleState::Initialized => {}
        }
        log::debug!("Running {} clean-up systems", self.cleanup.len());
        self.cleanup.run(registry);
        self.state = ScheduleState::Shutdown;
    }

    // ---- Systems ----

    /// Adds a system to the stage `label`, replacing a previous registration
    /// of the same system in that stage. Returns `false` if the stage does
    /// not exist.
    pub fn add_system<M>(&mut self, label: impl Into<StageLabel>, system: impl IntoSystem<M>) -> bool {
        let label = label.into();
        match self.stage_mut(&label) {
            Some(stage) => {
                stage.add_system(system);
                true
            }
            None => {
                log::warn!("{}", EcsError::StageNotFound(label.to_string()));
                false
            }
        }
    }

    /// Removes a system from the stage `label`. Scans the stage linearly.
    pub fn remove_system(&mut self, label: impl Into<StageLabel>, id: SystemId) -> bool {
        self.stage_mut(&label.into())
            .is_some_and(|stage| stage.remove_system(id))
    }

    pub fn contains_system(&self, label: impl Into<StageLabel>, id: SystemId) -> bool {
        self.stage(&label.into()).is_some_and(|stage| stage.contains(id))
    }

    /// Number of systems in the stage `label`; 0 for unknown stages.
    pub fn system_count(&self, label: impl Into<StageLabel>) -> usize {
        self.stage(&label.into()).map_or(0, Stage::len)
    }

    // ---- Stages ----

    /// Appends an update stage.
    pub fn add_stage(&mut self, label: impl Into<StageLabel>) -> bool {
        let label = label.into();
        let at = self.updates.len();
        self.try_insert_stage(at, label)
    }

    /// Inserts an update stage right before `anchor`.
    pub fn insert_stage_before(
        &mut self,
        anchor: impl Into<StageLabel>,
        label: impl Into<StageLabel>,
    ) -> bool {
        match self.update_position(&anchor.into()) {
            Ok(at) => self.try_insert_stage(at, label.into()),
            Err(err) => warn_rejected(err),
        }
    }

    /// Inserts an update stage right after `anchor`.
    pub fn insert_stage_after(
        &mut self,
        anchor: impl Into<StageLabel>,
        label: impl Into<StageLabel>,
    ) -> bool {
        match self.update_position(&anchor.into()) {
            Ok(at) => self.try_insert_stage(at + 1, label.into()),
            Err(err) => warn_rejected(err),
        }
    }

    /// Removes an update stage and its systems.
    pub fn remove_stage(&mut self, label: impl Into<StageLabel>) -> bool {
        match self.update_position(&label.into()) {
            Ok(at) => {
                let stage = self.updates.remove(at);
                log::debug!("Removed stage {} with {} systems", stage.label, stage.len());
                true
            }
            Err(err) => warn_rejected(err),
        }
    }

    /// Every stage label in run order, `StartUp` first and `CleanUp` last.
    pub fn stage_labels(&self) -> Vec<&StageLabel> {
        std::iter::once(&self.startup)
            .chain(&self.updates)
            .chain(std::iter::once(&self.cleanup))
            .map(Stage::label)
            .collect()
    }

    pub fn stage(&self, label: &StageLabel) -> Option<&Stage> {
        if *label == StageLabel::START_UP {
            return Some(&self.startup);
        }
        if *label == StageLabel::CLEAN_UP {
            return Some(&self.cleanup);
        }
        self.updates.iter().find(|s| s.label == *label)
    }

    fn stage_mut(&mut self, label: &StageLabel) -> Option<&mut Stage> {
        if *label == StageLabel::START_UP {
            return Some(&mut self.startup);
        }
        if *label == StageLabel::CLEAN_UP {
            return Some(&mut self.cleanup);
        }
        self.updates.iter_mut().find(|s| s.label == *label)
    }

    /// Index of an update stage. Reserved stages are not update stages.
    fn update_position(&self, label: &StageLabel) -> EcsResult<usize> {
        if label.is_reserved() {
            return Err(EcsError::ReservedStage(label.to_string()));
        }
        self.updates
            .iter()
            .position(|s| s.label == *label)
            .ok_or_else(|| EcsError::StageNotFound(label.to_string()))
    }

    fn try_insert_stage(&mut self, at: usize, label: StageLabel) -> bool {
        if label.is_reserved() {
            return warn_rejected(EcsError::ReservedStage(label.to_string()));
        }
        if self.stage(&label).is_some() {
            return warn_rejected(EcsError::DuplicateStage(label.to_string()));
        }
        self.updates.insert(at, Stage::new(label));
        true
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

fn warn_rejected(err: EcsError) -> bool {
    log::warn!("Schedule edit rejected: {err}");
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system_param::ResMut;

    #[derive(Default)]
    struct Log(Vec<&'static str>);

    fn startup(mut log: ResMut<Log>) {
        log.0.push("startup");
    }

    fn update(mut log: ResMut<Log>) {
        log.0.push("update");
    }

    fn post_update(mut log: ResMut<Log>) {
        log.0.push("post_update");
    }

    fn cleanup(mut log: ResMut<Log>) {
        log.0.push("cleanup");
    }

    fn physics(mut log: ResMut<Log>) {
        log.0.push("physics");
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.emplace_resource(Log::default());
        registry
    }

    fn entries(registry: &Registry) -> Vec<&'static str> {
        registry.get_resource::<Log>().unwrap().0.clone()
    }

    #[test]
    fn lifecycle_order() {
        let mut registry = registry();
        let mut schedule = Schedule::new();
        // Registration order differs from stage order on purpose.
        schedule.add_system(StageLabel::CLEAN_UP, cleanup);
        schedule.add_system(StageLabel::POST_UPDATE, post_update);
        schedule.add_system(StageLabel::UPDATE, update);
        schedule.add_system(StageLabel::START_UP, startup);

        assert_eq!(schedule.state(), ScheduleState::Idle);
        schedule.run(&mut registry);
        assert_eq!(schedule.state(), ScheduleState::Initialized);
        schedule.run(&mut registry);
        schedule.shutdown(&mut registry);
        assert_eq!(schedule.state(), ScheduleState::Shutdown);

        assert_eq!(
            entries(&registry),
            vec![
                "startup",
                "update",
                "post_update",
                "update",
                "post_update",
                "cleanup"
            ]
        );
        assert_eq!(schedule.frame(), 2);
    }

    #[test]
    fn run_after_shutdown_does_nothing() {
        let mut registry = registry();
        let mut schedule = Schedule::new();
        schedule.add_system(StageLabel::UPDATE, update);
        schedule.initialize(&mut registry);
        schedule.shutdown(&mut registry);
        schedule.run(&mut registry);
        assert!(entries(&registry).is_empty());
        assert_eq!(schedule.frame(), 0);
    }

    #[test]
    fn shutdown_before_initialize_is_ignored() {
        let mut registry = registry();
        let mut schedule = Schedule::new();
        schedule.add_system(StageLabel::START_UP, startup);
        schedule.add_system(StageLabel::CLEAN_UP, cleanup);

        schedule.shutdown(&mut registry);
        assert_eq!(schedule.state(), ScheduleState::Idle);
        assert!(entries(&registry).is_empty());

        schedule.run(&mut registry);
        schedule.shutdown(&mut registry);
        assert_eq!(entries(&registry), vec!["startup", "cleanup"]);
    }

    #[test]
    fn initialize_runs_once() {
        let mut registry = registry();
        let mut schedule = Schedule::new();
        schedule.add_system(StageLabel::START_UP, startup);
        schedule.initialize(&mut registry);
        schedule.initialize(&mut registry);
        schedule.run(&mut registry);
        assert_eq!(entries(&registry), vec!["startup"]);
    }

    #[test]
    fn duplicate_system_is_replaced_in_place() {
        let mut schedule = Schedule::new();
        assert!(schedule.add_system(StageLabel::UPDATE, update));
        assert!(schedule.add_system(StageLabel::UPDATE, physics));
        assert!(schedule.add_system(StageLabel::UPDATE, update));
        assert_eq!(schedule.system_count(StageLabel::UPDATE), 2);

        let stage = schedule.stage(&StageLabel::UPDATE).unwrap();
        assert!(stage.system_names()[0].ends_with("update"));
        assert!(stage.system_names()[1].ends_with("physics"));
    }

    #[test]
    fn same_system_in_two_stages() {
        let mut schedule = Schedule::new();
        schedule.add_system(StageLabel::UPDATE, update);
        schedule.add_system(StageLabel::POST_UPDATE, update);
        assert!(schedule.contains_system(StageLabel::UPDATE, SystemId::of_val(&update)));
        assert!(schedule.contains_system(StageLabel::POST_UPDATE, SystemId::of_val(&update)));
    }

    #[test]
    fn unknown_stage_rejected() {
        let mut schedule = Schedule::new();
        assert!(!schedule.add_system("Render", update));
        assert_eq!(schedule.system_count("Render"), 0);
    }

    #[test]
    fn remove_system() {
        let mut registry = registry();
        let mut schedule = Schedule::new();
        schedule.add_system(StageLabel::UPDATE, update);
        schedule.add_system(StageLabel::UPDATE, physics);

        assert!(schedule.remove_system(StageLabel::UPDATE, SystemId::of_val(&update)));
        assert!(!schedule.remove_system(StageLabel::UPDATE, SystemId::of_val(&update)));
        schedule.run(&mut registry);
        assert_eq!(entries(&registry), vec!["physics"]);
    }

    #[test]
    fn custom_stages() {
        let mut registry = registry();
        let mut schedule = Schedule::new();
        assert!(schedule.insert_stage_after(StageLabel::UPDATE, "Physics"));
        assert!(schedule.insert_stage_before(StageLabel::UPDATE, "PreUpdate"));
        assert!(schedule.add_stage("Last"));

        let labels: Vec<_> = schedule.stage_labels().iter().map(|l| l.as_str()).collect();
        assert_eq!(
            labels,
            vec!["StartUp", "PreUpdate", "Update", "Physics", "PostUpdate", "Last", "CleanUp"]
        );

        schedule.add_system("Physics", physics);
        schedule.add_system(StageLabel::UPDATE, update);
        schedule.run(&mut registry);
        assert_eq!(entries(&registry), vec!["update", "physics"]);
    }

    #[test]
    fn reserved_and_duplicate_stage_edits_rejected() {
        let mut schedule = Schedule::new();
        assert!(!schedule.add_stage(StageLabel::UPDATE));
        assert!(!schedule.add_stage(StageLabel::START_UP));
        assert!(!schedule.insert_stage_before(StageLabel::START_UP, "Early"));
        assert!(!schedule.insert_stage_after(StageLabel::CLEAN_UP, "Late"));
        assert!(!schedule.insert_stage_after("Missing", "Late"));
        assert!(!schedule.remove_stage(StageLabel::CLEAN_UP));
        assert!(!schedule.remove_stage("Missing"));
        assert_eq!(schedule.stage_labels().len(), 4);

        assert!(schedule.remove_stage(StageLabel::POST_UPDATE));
        assert_eq!(schedule.stage_labels().len(), 3);
    }

    #[test]
    fn with_update_stages_configures_order() {
        let schedule = Schedule::with_update_stages(["Input", "Simulate", "Input", "StartUp"]);
        let labels: Vec<_> = schedule.stage_labels().iter().map(|l| l.to_string()).collect();
        assert_eq!(labels, vec!["StartUp", "Input", "Simulate", "CleanUp"]);
    }

    #[test]
    fn skipped_system_does_not_stop_frame() {
        let mut registry = Registry::new();
        let mut schedule = Schedule::new();
        schedule.add_system(StageLabel::UPDATE, update);
        schedule.add_system(StageLabel::POST_UPDATE, |mut n: ResMut<u32>| *n += 1);
        registry.emplace_resource(0u32);

        schedule.run(&mut registry);
        assert_eq!(*registry.get_resource::<u32>().unwrap(), 1);
        assert_eq!(schedule.frame(), 1);
    }
}
