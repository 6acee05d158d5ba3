pub mod counter;
pub mod events;
pub mod executor;
mod scheduler;
pub mod types;

pub use counter::*;
pub use events::*;
pub use executor::*;
pub use types::*;
