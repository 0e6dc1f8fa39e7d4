pub mod character;
pub mod genre;
pub mod novel;
pub mod outline;
pub mod research;
pub mod state;
pub mod world;
