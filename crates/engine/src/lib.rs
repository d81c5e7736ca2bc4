pub mod gate;
pub mod project;
pub mod store;
pub mod subscription;
