pub mod application;
pub mod events;
pub mod ingest;
pub mod instruction;
pub mod pathway;
pub mod status;

pub use application::*;
pub use events::*;
pub use ingest::*;
pub use instruction::*;
pub use pathway::*;
pub use status::*;
