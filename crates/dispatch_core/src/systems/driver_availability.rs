use bevy_ecs::prelude::{Commands, Query, Res, ResMut};
use tracing::{debug, info};

use crate::clock::EngineClock;
use crate::ecs::{Driver, DriverDirectory, DriverStatus, IdleSince, LocationClock};
use crate::engine::event::{CurrentEvent, EngineEvent};
use crate::spatial::DriverIndex;

/// Moves a driver between the available pool and off-duty. A first `true`
/// enrolls the driver; it joins matching once its first location sample
/// arrives. Availability changes are ignored mid-engagement.
pub fn driver_availability_system(
    mut commands: Commands,
    event: Res<CurrentEvent>,
    clock: Res<EngineClock>,
    mut directory: ResMut<DriverDirectory>,
    mut driver_index: ResMut<DriverIndex>,
    mut drivers: Query<(&mut Driver, Option<&mut IdleSince>)>,
) {
    let EngineEvent::DriverAvailability { driver: driver_id, available } = &event.0 else {
        return;
    };
    let driver_id = driver_id.clone();
    let available = *available;

    let Some(entity) = directory.get(&driver_id) else {
        if available {
            let entity = commands
                .spawn((
                    Driver { user_id: driver_id.clone(), status: DriverStatus::Available },
                    LocationClock::default(),
                    IdleSince(clock.now_ms()),
                ))
                .id();
            directory.insert(driver_id.clone(), entity);
            info!(driver = %driver_id, "driver enrolled and available");
        }
        return;
    };

    let Ok((mut driver, idle)) = drivers.get_mut(entity) else {
        return;
    };
    match (driver.status, available) {
        (DriverStatus::Offline, true) => {
            driver.status = DriverStatus::Available;
            if let Some(mut idle) = idle {
                idle.0 = clock.now_ms();
            }
            info!(driver = %driver_id, "driver available");
        }
        (DriverStatus::Available, false) => {
            driver.status = DriverStatus::Offline;
            driver_index.remove(entity);
            info!(driver = %driver_id, "driver off duty");
        }
        (DriverStatus::Reserved | DriverStatus::OnRide, _) => {
            debug!(driver = %driver_id, status = ?driver.status, "availability change ignored mid-engagement");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_ecs::prelude::{Schedule, World};

    use crate::test_helpers::test_world;

    fn set_availability(world: &mut World, driver: &str, available: bool) {
        world.insert_resource(CurrentEvent(EngineEvent::DriverAvailability {
            driver: driver.into(),
            available,
        }));
        let mut schedule = Schedule::default();
        schedule.add_systems(driver_availability_system);
        schedule.run(world);
    }

    fn driver_status(world: &mut World) -> DriverStatus {
        let mut drivers = world.query::<&Driver>();
        drivers.single(world).status
    }

    #[test]
    fn first_availability_enrolls_the_driver() {
        let mut world = test_world();
        set_availability(&mut world, "driver-1", true);

        assert!(world.resource::<DriverDirectory>().contains(&"driver-1".into()));
        assert_eq!(driver_status(&mut world), DriverStatus::Available);
    }

    #[test]
    fn going_off_duty_leaves_the_spatial_index() {
        let mut world = test_world();
        set_availability(&mut world, "driver-1", true);
        set_availability(&mut world, "driver-1", false);

        assert_eq!(driver_status(&mut world), DriverStatus::Offline);
        assert!(world.resource::<DriverIndex>().is_empty());

        set_availability(&mut world, "driver-1", true);
        assert_eq!(driver_status(&mut world), DriverStatus::Available);
    }

    #[test]
    fn mid_engagement_changes_are_ignored() {
        let mut world = test_world();
        crate::test_helpers::matched_ride(&mut world, "rider-1", "driver-1");

        set_availability(&mut world, "driver-1", false);
        assert_eq!(driver_status(&mut world), DriverStatus::Reserved);
    }
}
