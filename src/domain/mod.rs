mod money;
mod profile;
mod wager;

pub use money::*;
pub use profile::*;
pub use wager::*;
