mod list;
mod types;

pub use list::{load_instance_list, parse_instance_list};
pub use types::{AppliedMarker, ServerInstance};
