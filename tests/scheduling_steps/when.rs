//! When steps for scheduling BDD scenarios.

use super::world::{SchedulingWorld, parse_tag, run_async};
use eyre::WrapErr;
use mockable::Clock;
use rstest_bdd_macros::when;

#[when(r#"a worker polls the "{tag}" variant"#)]
fn a_worker_polls(world: &mut SchedulingWorld, tag: String) -> Result<(), eyre::Report> {
    let variant = parse_tag(&tag)?;
    let poller = world.engine.poller(world.worker).with_tags([variant]);
    world.polled_at = Some(world.engine.clock.utc());
    world.elapsed_minutes = 0;
    let report = run_async(poller.poll_once()).wrap_err("poll once")?;
    world.last_poll = Some(report);
    Ok(())
}

#[when(r#"pending "{tag}" work is scheduled"#)]
fn pending_work_is_scheduled(world: &mut SchedulingWorld, tag: String) -> Result<(), eyre::Report> {
    let variant = parse_tag(&tag)?;
    run_async(world.engine.scheduling.schedule_pending(variant, None, 10))
        .wrap_err("schedule pending work")?;
    Ok(())
}
