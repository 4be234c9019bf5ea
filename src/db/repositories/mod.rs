pub mod marks;
pub mod observations;
pub mod sessions;
