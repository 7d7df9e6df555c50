mod setups;
mod steps;
mod policy_world;

pub use policy_world::PolicyWorld;
