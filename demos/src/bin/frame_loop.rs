//! Headless frame loop: particles drift, bounce off the arena walls and
//! expire; wall hits and expirations travel over the event bus.
//!
//! ```text
//! cargo run -p tessera-demos --bin frame_loop -- --frames 300 --entities 5000
//! ```

use clap::Parser;
use tessera_ecs::{
    Commands, Entity, EventPriority, EventReader, QueryView, Registry, Res, ResMut, Schedule,
    StageLabel, Without,
};

#[derive(Parser, Debug)]
#[command(name = "frame_loop", about = "Runs a headless Tessera ECS frame loop")]
struct Args {
    /// Number of frames to simulate.
    #[arg(long, default_value = "120")]
    frames: u64,

    /// Number of particles spawned at start-up.
    #[arg(long, default_value = "1000")]
    entities: u32,

    /// Half extent of the square arena.
    #[arg(long, default_value = "50.0")]
    arena: f32,
}

#[derive(Debug, Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
}

/// Frames left before the particle expires.
struct Lifetime(u32);

/// Particles that never expire.
struct Immortal;

struct Config {
    spawn_count: u32,
    arena: f32,
}

struct Time {
    delta: f32,
    frame: u64,
}

#[derive(Default)]
struct Stats {
    bounces: u64,
    expired: u64,
    critical: u64,
}

#[derive(Debug, Clone)]
enum ParticleEvent {
    Bounced(Entity),
    Expired(Entity),
}

/// Deterministic scatter so runs are reproducible without a RNG dependency.
fn scatter(i: u32, arena: f32) -> (Position, Velocity) {
    let h = i.wrapping_mul(2_654_435_761);
    let unit = |shift: u32| ((h >> shift) & 0xff) as f32 / 255.0 * 2.0 - 1.0;
    (
        Position {
            x: unit(0) * arena,
            y: unit(8) * arena,
        },
        Velocity {
            x: unit(16) * 10.0,
            y: unit(24) * 10.0,
        },
    )
}

fn spawn_particles(config: Res<Config>, commands: Commands) {
    for i in 0..config.spawn_count {
        let (position, velocity) = scatter(i, config.arena);
        let builder = commands.spawn().with(position).with(velocity);
        if i % 10 == 0 {
            builder.with(Immortal).build();
        } else {
            builder.with(Lifetime(30 + i % 200)).build();
        }
    }
    log::info!("Queued {} particles", config.spawn_count);
}

fn advance_time(mut time: ResMut<Time>) {
    time.frame += 1;
}

fn integrate(time: Res<Time>, mut particles: QueryView<(&mut Position, &Velocity)>) {
    particles.each(|_, (pos, vel): (&mut Position, &Velocity)| {
        pos.x += vel.x * time.delta;
        pos.y += vel.y * time.delta;
    });
}

fn bounce(
    config: Res<Config>,
    mut particles: QueryView<(&mut Position, &mut Velocity)>,
    commands: Commands,
) {
    let arena = config.arena;
    particles.each(|entity, (pos, vel): (&mut Position, &mut Velocity)| {
        let mut hit = false;
        if pos.x.abs() > arena {
            pos.x = pos.x.clamp(-arena, arena);
            vel.x = -vel.x;
            hit = true;
        }
        if pos.y.abs() > arena {
            pos.y = pos.y.clamp(-arena, arena);
            vel.y = -vel.y;
            hit = true;
        }
        if hit {
            commands.emit_event(ParticleEvent::Bounced(entity), EventPriority::Low);
        }
    });
}

fn age(mut mortal: QueryView<(&mut Lifetime,), Without<Immortal>>, commands: Commands) {
    mortal.each(|entity, (lifetime,): (&mut Lifetime,)| {
        lifetime.0 = lifetime.0.saturating_sub(1);
        if lifetime.0 == 0 {
            commands.destroy(entity);
            commands.emit_event_immediate(ParticleEvent::Expired(entity), EventPriority::Critical);
        }
    });
}

fn tally(mut events: EventReader<ParticleEvent>, mut stats: ResMut<Stats>) {
    for event in events.read() {
        if event.priority == EventPriority::Critical {
            stats.critical += 1;
        }
        match event.value {
            ParticleEvent::Bounced(_) => stats.bounces += 1,
            ParticleEvent::Expired(_) => stats.expired += 1,
        }
    }
}

fn report(time: Res<Time>, stats: Res<Stats>, particles: QueryView<(&Position,)>) {
    if time.frame % 30 == 0 {
        log::info!(
            "frame {:>4}: {} particles, {} bounces, {} expired",
            time.frame,
            particles.size(),
            stats.bounces,
            stats.expired
        );
    }
}

fn farewell(stats: Res<Stats>, time: Res<Time>) {
    log::info!(
        "Stopped after {} frames: {} bounces, {} expired ({} critical events)",
        time.frame,
        stats.bounces,
        stats.expired,
        stats.critical
    );
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut registry = Registry::new();
    registry.emplace_resource(Config {
        spawn_count: args.entities,
        arena: args.arena,
    });
    registry.emplace_resource(Time {
        delta: 1.0 / 60.0,
        frame: 0,
    });
    registry.emplace_resource(Stats::default());

    let mut schedule = Schedule::new();
    schedule.insert_stage_after(StageLabel::UPDATE, "Physics");
    schedule.add_system(StageLabel::START_UP, spawn_particles);
    schedule.add_system(StageLabel::UPDATE, advance_time);
    schedule.add_system("Physics", integrate);
    schedule.add_system("Physics", bounce);
    // Expirations are sent immediately, so `tally` sees them in the same
    // frame; bounces arrive one frame later through the regular dispatch.
    schedule.add_system(StageLabel::POST_UPDATE, age);
    schedule.add_system(StageLabel::POST_UPDATE, tally);
    schedule.add_system(StageLabel::POST_UPDATE, report);
    schedule.add_system(StageLabel::CLEAN_UP, farewell);

    log::info!(
        "Stages: {}",
        schedule
            .stage_labels()
            .iter()
            .map(|label| label.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    for _ in 0..args.frames {
        schedule.run(&mut registry);
    }
    schedule.shutdown(&mut registry);
}
