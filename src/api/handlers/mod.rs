pub mod applications;
pub mod system;

pub use applications::*;
pub use system::*;
