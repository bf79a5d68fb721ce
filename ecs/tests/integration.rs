use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tessera_ecs::{
    Commands, Entity, EventPriority, EventReader, IntoSystem, QueryView, Registry, Res, ResMut,
    Schedule, ScheduleState, StageLabel, SystemId, With, Without,
};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Transform {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
}

#[derive(Debug, PartialEq)]
struct Hp(u32);

struct Player;

struct Frozen;

struct Counter(u32);

#[derive(Debug, Clone, PartialEq)]
enum Alert {
    Damage(u32),
    Died(Entity),
}

// ---------------------------------------------------------------------------
// Entity lifecycle
// ---------------------------------------------------------------------------

#[test]
fn recycled_slot_gets_new_version() {
    let mut registry = Registry::new();

    let e0 = registry.create();
    assert_eq!((e0.index(), e0.version()), (0, 0));
    registry.add_component(e0, Hp(100)).unwrap();

    assert!(registry.destroy(e0));
    let e1 = registry.create();
    assert_eq!((e1.index(), e1.version()), (0, 1));
    assert_ne!(e0, e1);

    assert!(!registry.has_component::<Hp>(e1));
    assert!(!registry.is_alive(e0));
    assert!(registry.get_component::<Hp>(e0).is_err());
}

#[test]
fn stale_handles_never_alias_across_many_reuses() {
    let mut registry = Registry::new();
    let mut stale = Vec::new();
    for round in 0..64 {
        let e = registry.create();
        registry.add_component(e, Hp(round)).unwrap();
        stale.push(e);
        registry.destroy(e);
    }

    let live = registry.create();
    registry.add_component(live, Hp(999)).unwrap();
    for old in stale {
        assert!(!registry.is_alive(old));
        assert!(!registry.has_component::<Hp>(old));
    }
    assert_eq!(*registry.get_component::<Hp>(live).unwrap(), Hp(999));
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[test]
fn query_scans_only_the_smallest_store() {
    let mut registry = Registry::new();
    let entities = registry.create_many(100_000);
    for (i, &e) in entities.iter().enumerate() {
        registry
            .add_component(e, Transform { x: i as f32, y: 0.0 })
            .unwrap();
    }
    for &e in &entities[..3] {
        registry.add_component(e, Player).unwrap();
    }

    let mut query = registry.query::<(&Player,)>();
    let mut visited = 0;
    query.each(|_, _: (&Player,)| visited += 1);
    assert_eq!(visited, 3);
    assert!(query.scanned() <= 3);
    drop(query);

    let mut query = registry.query::<(&Transform, &Player)>();
    let mut xs = Vec::new();
    query.each(|_, (t, _): (&Transform, &Player)| xs.push(t.x));
    xs.sort_by(f32::total_cmp);
    assert_eq!(xs, vec![0.0, 1.0, 2.0]);
    assert!(query.scanned() <= 3);
}

#[test]
fn query_yields_exactly_the_intersection() {
    let mut registry = Registry::new();
    let mut expected = Vec::new();
    for i in 0..50u32 {
        let e = registry.create();
        if i % 2 == 0 {
            registry.add_component(e, Transform { x: 0.0, y: 0.0 }).unwrap();
        }
        if i % 3 == 0 {
            registry.add_component(e, Velocity { x: 1.0, y: 2.0 }).unwrap();
        }
        if i % 5 == 0 {
            registry.add_component(e, Frozen).unwrap();
        }
        if i % 2 == 0 && i % 3 == 0 && i % 5 != 0 {
            expected.push(e);
        }
    }

    let mut query = registry.query_filtered::<(&mut Transform, &Velocity), Without<Frozen>>();
    let mut seen = query.entities();
    query.each(|_, (t, v): (&mut Transform, &Velocity)| {
        t.x += v.x;
        t.y += v.y;
    });
    drop(query);

    seen.sort_by_key(|e| e.index());
    assert_eq!(seen, expected);
    for e in expected {
        assert_eq!(
            *registry.get_component::<Transform>(e).unwrap(),
            Transform { x: 1.0, y: 2.0 }
        );
    }
}

#[test]
fn removals_keep_query_consistent() {
    let mut registry = Registry::new();
    let entities = registry.create_many(10);
    for &e in &entities {
        registry.add_component(e, Hp(e.index())).unwrap();
    }
    registry.destroy(entities[0]);
    registry.remove_component::<Hp>(entities[5]);

    let mut total = 0;
    registry
        .query::<(&Hp,)>()
        .each(|_, (hp,): (&Hp,)| total += hp.0);
    assert_eq!(total, (1..10).sum::<u32>() - 5);
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

fn write_one(mut counter: ResMut<Counter>) {
    counter.0 = 1;
}

fn increment(mut counter: ResMut<Counter>) {
    let value = counter.0;
    counter.0 = value + 1;
}

#[test]
fn systems_run_in_registration_order() {
    let mut registry = Registry::new();
    registry.emplace_resource(Counter(0));

    let mut schedule = Schedule::new();
    schedule.add_system(StageLabel::UPDATE, write_one);
    schedule.add_system(StageLabel::UPDATE, increment);
    schedule.run(&mut registry);

    assert_eq!(registry.get_resource::<Counter>().unwrap().0, 2);
}

#[test]
fn post_update_sees_update_results() {
    let mut registry = Registry::new();
    registry.emplace_resource(Counter(0));

    let mut schedule = Schedule::new();
    schedule.add_system(StageLabel::POST_UPDATE, increment);
    schedule.add_system(StageLabel::UPDATE, write_one);
    schedule.run(&mut registry);

    assert_eq!(registry.get_resource::<Counter>().unwrap().0, 2);
}

#[test]
fn full_schedule_lifecycle() {
    fn spawn_players(commands: Commands) {
        for i in 0..4 {
            commands
                .spawn()
                .with(Transform { x: i as f32, y: 0.0 })
                .with(Velocity { x: 1.0, y: 0.0 })
                .with(Player)
                .build();
        }
    }

    fn integrate(mut query: QueryView<(&mut Transform, &Velocity), With<Player>>) {
        query.each(|_, (t, v): (&mut Transform, &Velocity)| t.x += v.x);
    }

    fn count_frames(mut counter: ResMut<Counter>) {
        counter.0 += 1;
    }

    fn despawn_all(query: QueryView<(&Transform,)>, commands: Commands) {
        for e in query.entities() {
            commands.destroy(e);
        }
    }

    let mut registry = Registry::new();
    registry.emplace_resource(Counter(0));

    let mut schedule = Schedule::new();
    schedule.add_system(StageLabel::START_UP, spawn_players);
    schedule.add_system(StageLabel::UPDATE, integrate);
    schedule.add_system(StageLabel::POST_UPDATE, count_frames);
    schedule.add_system(StageLabel::CLEAN_UP, despawn_all);

    for _ in 0..3 {
        schedule.run(&mut registry);
    }
    assert_eq!(registry.entity_count(), 4);
    assert_eq!(registry.get_resource::<Counter>().unwrap().0, 3);
    let players = registry.query::<(&Transform,)>().entities();
    let mut xs: Vec<f32> = players
        .into_iter()
        .map(|e| registry.get_component::<Transform>(e).unwrap().x)
        .collect();
    xs.sort_by(f32::total_cmp);
    assert_eq!(xs, vec![3.0, 4.0, 5.0, 6.0]);

    schedule.shutdown(&mut registry);
    assert_eq!(schedule.state(), ScheduleState::Shutdown);
    assert_eq!(registry.entity_count(), 0);
}

#[test]
fn systems_with_missing_resources_are_skipped() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);

    let mut registry = Registry::new();
    let mut schedule = Schedule::new();
    schedule.add_system(StageLabel::UPDATE, increment);
    schedule.add_system(StageLabel::UPDATE, move |_: Option<Res<Counter>>| {
        seen.fetch_add(1, Ordering::Relaxed);
    });

    schedule.run(&mut registry);
    assert_eq!(calls.load(Ordering::Relaxed), 1);
    assert!(!registry.has_resource::<Counter>());
}

#[test]
fn removing_a_system_by_id() {
    let mut registry = Registry::new();
    registry.emplace_resource(Counter(0));

    let mut schedule = Schedule::new();
    schedule.add_system(StageLabel::UPDATE, increment);
    let id = increment.into_system().id();
    assert_eq!(id, SystemId::of_val(&increment));

    schedule.run(&mut registry);
    assert!(schedule.remove_system(StageLabel::UPDATE, id));
    schedule.run(&mut registry);
    assert_eq!(registry.get_resource::<Counter>().unwrap().0, 1);
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[test]
fn immediate_event_reaches_existing_reader_without_dispatch() {
    let registry = Registry::new();
    let mut reader = registry.get_event_reader::<Alert>();

    registry.emit_event_immediate(Alert::Damage(7), EventPriority::Critical);

    let events = reader.read();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].value, Alert::Damage(7));
    assert_eq!(events[0].priority, EventPriority::Critical);
    assert!(reader.read().is_empty());
}

#[test]
fn dispatched_events_arrive_by_priority() {
    let registry = Registry::new();
    let mut reader = registry.get_event_reader::<Alert>();

    registry.emit_event(Alert::Damage(1), EventPriority::Low);
    registry.emit_event(Alert::Damage(2), EventPriority::Critical);
    registry.emit_event(Alert::Damage(3), EventPriority::Normal);
    registry.emit_event(Alert::Damage(4), EventPriority::Critical);
    assert!(reader.read().is_empty());

    assert_eq!(registry.dispatch_events(), 4);
    assert_eq!(
        reader.read_values(),
        vec![
            Alert::Damage(2),
            Alert::Damage(4),
            Alert::Damage(3),
            Alert::Damage(1)
        ]
    );
}

#[test]
fn events_flow_between_systems_across_frames() {
    fn damage(query: QueryView<(&Hp,)>, commands: Commands) {
        for e in query.entities() {
            commands.emit_event(Alert::Died(e), EventPriority::High);
        }
    }

    fn tally(mut reader: EventReader<Alert>, mut counter: ResMut<Counter>) {
        counter.0 += reader.read().len() as u32;
    }

    let mut registry = Registry::new();
    registry.emplace_resource(Counter(0));
    let e = registry.create();
    registry.add_component(e, Hp(0)).unwrap();

    let mut schedule = Schedule::new();
    schedule.add_system(StageLabel::UPDATE, tally);
    schedule.add_system(StageLabel::UPDATE, damage);

    // Frame 1 records the event, the end-of-frame dispatch publishes it.
    schedule.run(&mut registry);
    assert_eq!(registry.get_resource::<Counter>().unwrap().0, 0);
    schedule.run(&mut registry);
    assert_eq!(registry.get_resource::<Counter>().unwrap().0, 1);
}

fn count_alerts(mut reader: EventReader<Alert>, mut counter: ResMut<Counter>) {
    counter.0 += reader.read().len() as u32;
}

fn alerts_seen_over_three_frames<M>(emitter: impl IntoSystem<M>) -> u32 {
    let mut registry = Registry::new();
    registry.emplace_resource(Counter(0));

    let mut schedule = Schedule::new();
    schedule.add_system(StageLabel::UPDATE, count_alerts);
    schedule.add_system(StageLabel::POST_UPDATE, emitter);
    for _ in 0..3 {
        schedule.run(&mut registry);
    }
    registry.get_resource::<Counter>().unwrap().0
}

#[test]
fn immediate_events_reach_earlier_stages_next_frame() {
    fn deferred(commands: Commands) {
        commands.emit_event(Alert::Damage(1), EventPriority::Normal);
    }

    fn immediate(commands: Commands) {
        commands.emit_event_immediate(Alert::Damage(1), EventPriority::Normal);
    }

    assert_eq!(alerts_seen_over_three_frames(deferred), 2);
    assert_eq!(alerts_seen_over_three_frames(immediate), 2);
}

#[test]
fn immediate_events_are_counted_once_by_later_systems() {
    fn immediate(commands: Commands) {
        commands.emit_event_immediate(Alert::Damage(1), EventPriority::Normal);
    }

    let mut registry = Registry::new();
    registry.emplace_resource(Counter(0));

    let mut schedule = Schedule::new();
    schedule.add_system(StageLabel::UPDATE, immediate);
    schedule.add_system(StageLabel::POST_UPDATE, count_alerts);
    for _ in 0..3 {
        schedule.run(&mut registry);
    }
    assert_eq!(registry.get_resource::<Counter>().unwrap().0, 3);
}
