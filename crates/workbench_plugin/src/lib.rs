pub mod graph;
pub mod intent;
pub mod observe;
pub mod plugin;
pub mod space;
pub mod surface;
