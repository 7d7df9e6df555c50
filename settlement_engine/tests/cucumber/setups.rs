use cucumber::given;

use crate::cucumber::{policy_world::PolicySystem, PolicyWorld};

#[given("a fresh install")]
async fn fresh_database(world: &mut PolicyWorld) {
    let system = PolicySystem::new().await;
    world.system = Some(system);
}
