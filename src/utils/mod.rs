pub mod community;
mod display;
mod parse;

pub use community::{Community, CommunityList};
pub use display::*;
pub use parse::*;
