pub mod loader;

pub use loader::DataLoader;
