pub mod apply;
pub mod diff;
pub mod provider;
pub mod show;

pub mod util;
