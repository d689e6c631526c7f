mod bus;
mod error;
mod gen;
mod shunt;

pub mod debug;

pub use bus::*;
pub use error::*;
pub use gen::*;
pub use shunt::*;
