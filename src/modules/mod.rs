pub mod assets;
pub mod descriptor;
pub mod diff;
pub mod lifecycle;
pub mod loader;
pub mod plugin;
pub mod records;
