pub mod inspect;
pub mod limit;
pub mod roles;
