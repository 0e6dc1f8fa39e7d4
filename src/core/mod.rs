pub mod backend;
pub mod cast;
pub mod compiler;
pub mod context;
pub mod drafter;
pub mod grammar;
pub mod markov;
pub mod outline;
pub mod pipeline;
pub mod research;
pub mod seed;
pub mod store;
pub mod world;
