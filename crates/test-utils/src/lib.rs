pub mod builders;
pub mod fake_spawner;

pub use builders::{RunPolicyBuilder, TaskSpecBuilder};
pub use fake_spawner::{FakeSpawner, Scripted};
