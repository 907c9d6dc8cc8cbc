pub mod guard;
pub mod role;
pub mod table;

pub use guard::{AccessError, RbacService};
pub use role::{Permission, Role};
pub use table::PermissionTable;
